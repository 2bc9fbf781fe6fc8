//! Audio chunk type and the stdout read-event forwarder.
//!
//! The audio stream is raw, unframed PCM. Each OS-level read event is
//! wrapped verbatim into an `AudioChunk` and forwarded immediately: no
//! batching, no re-chunking to the configured chunk duration. Boundary
//! timing is the external process's responsibility.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::UnboundedSender;

/// Read buffer size for the audio stream.
const READ_BUFFER_SIZE: usize = 8192;

/// One delivery of raw PCM bytes, exactly as read from the OS pipe.
///
/// Carries no alignment guarantee: the producing process targets the
/// configured chunk duration but OS buffering can split or coalesce
/// deliveries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    data: Vec<u8>,
}

impl AudioChunk {
    /// Wrap one read event's bytes.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// The raw bytes of this delivery.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the chunk, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Number of bytes in this delivery.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for a zero-length delivery.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Vec<u8>> for AudioChunk {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// Forward every read event on the audio stream as an `AudioChunk`.
///
/// Bytes are passed through verbatim in read order. A zero-length read
/// means end of file under the `AsyncRead` contract and ends the forwarder;
/// so does a closed receiver or a read error (the process exit path reports
/// the failure).
pub async fn forward_audio<R>(mut reader: R, tx: UnboundedSender<AudioChunk>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(AudioChunk::new(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Audio stream read failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn forwards_bytes_verbatim_in_order() {
        let (reader, mut writer) = tokio::io::duplex(1024);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let forwarder = tokio::spawn(forward_audio(reader, tx));

        writer.write_all(b"abc").await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.as_bytes(), b"abc");

        writer.write_all(b"defg").await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(second.as_bytes(), b"defg");

        drop(writer);
        assert!(rx.recv().await.is_none());
        forwarder.await.unwrap();
    }

    #[tokio::test]
    async fn eof_ends_forwarder_without_chunks() {
        let (reader, writer) = tokio::io::duplex(64);
        drop(writer);

        let (tx, mut rx) = mpsc::unbounded_channel();
        forward_audio(reader, tx).await;
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn chunk_accessors() {
        let chunk = AudioChunk::from(vec![1u8, 2, 3]);
        assert_eq!(chunk.len(), 3);
        assert!(!chunk.is_empty());
        assert_eq!(chunk.clone().into_bytes(), vec![1, 2, 3]);

        let empty = AudioChunk::new(Vec::new());
        assert!(empty.is_empty());
    }
}
