//! Line-oriented decoder for the status stream.
//!
//! The status bytes arrive arbitrarily chunked: a delivery may split a line
//! in the middle or carry several lines at once. `LogDecoder` keeps a single
//! pending-partial-line buffer, emits one record per newline-terminated line
//! in receipt order, and never drops a line — lines that fail structured
//! parsing fall back to a raw-text record.

use futures_core::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::capture::LogRecord;

/// Read buffer size for the status stream.
const READ_BUFFER_SIZE: usize = 4096;

/// Stateful line-splitter and record decoder over an arbitrary byte stream.
#[derive(Debug, Default)]
pub struct LogDecoder {
    pending: Vec<u8>,
}

impl LogDecoder {
    /// Create a decoder with an empty pending buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one delivery of bytes and decode any completed lines.
    ///
    /// Emits one record per newline-terminated line, in order. Any trailing
    /// partial line is retained for the next delivery. Blank lines carry no
    /// diagnostic content and produce nothing.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<LogRecord> {
        self.pending.extend_from_slice(bytes);

        let mut records = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let line = &self.pending[start..start + offset];
            if let Some(record) = decode_line(line) {
                records.push(record);
            }
            start += offset + 1;
        }
        self.pending.drain(..start);

        records
    }

    /// Flush a trailing non-newline-terminated line at end of stream.
    ///
    /// The partial line is surfaced exactly once; afterwards the buffer is
    /// empty and further calls return `None`.
    pub fn finish(&mut self) -> Option<LogRecord> {
        let rest = std::mem::take(&mut self.pending);
        decode_line(&rest)
    }

    /// Number of buffered bytes awaiting a newline.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Decode one complete line, falling back to a raw-text record.
fn decode_line(line: &[u8]) -> Option<LogRecord> {
    let line = strip_cr(line);
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }

    let text = String::from_utf8_lossy(line);
    match LogRecord::parse(&text) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::debug!(error = %e, line = %text, "Unparsable status line, keeping raw text");
            Some(LogRecord::unparsed(text.into_owned()))
        }
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((&b'\r', rest)) => rest,
        _ => line,
    }
}

/// Decode records from a raw status stream.
///
/// Returns a lazy, ordered stream of records that ends when the reader hits
/// end of file, after flushing any trailing partial line. Read errors end
/// the stream; the process exit path reports the failure.
pub fn records<R>(reader: R) -> impl Stream<Item = LogRecord>
where
    R: AsyncRead + Unpin,
{
    struct DecodeState<R> {
        reader: R,
        decoder: LogDecoder,
        queue: std::collections::VecDeque<LogRecord>,
        eof: bool,
    }

    let state = DecodeState {
        reader,
        decoder: LogDecoder::new(),
        queue: std::collections::VecDeque::new(),
        eof: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(record) = state.queue.pop_front() {
                return Some((record, state));
            }
            if state.eof {
                return None;
            }

            let mut buf = [0u8; READ_BUFFER_SIZE];
            match state.reader.read(&mut buf).await {
                Ok(0) => {
                    state.eof = true;
                    if let Some(record) = state.decoder.finish() {
                        return Some((record, state));
                    }
                    return None;
                }
                Ok(n) => {
                    state.queue.extend(state.decoder.feed(&buf[..n]));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Status stream read failed");
                    state.eof = true;
                    if let Some(record) = state.decoder.finish() {
                        return Some((record, state));
                    }
                    return None;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MessageType;

    #[test]
    fn split_delivery_yields_two_records_in_order() {
        let mut decoder = LogDecoder::new();

        let first = decoder.feed(b"{\"a\":1}\n{\"b\"");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].message, "{\"a\":1}");

        let second = decoder.feed(b":2}\n");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message, "{\"b\":2}");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn multiple_lines_in_one_delivery() {
        let mut decoder = LogDecoder::new();
        let records = decoder.feed(b"one\ntwo\nthree\n");
        let messages: Vec<_> = records.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, ["one", "two", "three"]);
    }

    #[test]
    fn non_json_line_falls_back_to_raw_text() {
        let mut decoder = LogDecoder::new();
        let records = decoder.feed(b"some plain diagnostic\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message_type, MessageType::Info);
        assert_eq!(records[0].message, "some plain diagnostic");
    }

    #[test]
    fn trailing_partial_line_surfaces_once_on_finish() {
        let mut decoder = LogDecoder::new();
        assert!(decoder.feed(b"incomplete tail").is_empty());

        let flushed = decoder.finish().unwrap();
        assert_eq!(flushed.message, "incomplete tail");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn blank_lines_produce_nothing() {
        let mut decoder = LogDecoder::new();
        assert!(decoder.feed(b"\n  \n\r\n").is_empty());
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn crlf_terminated_line_decodes_cleanly() {
        let mut decoder = LogDecoder::new();
        let records = decoder.feed(b"windows style\r\n");
        assert_eq!(records[0].message, "windows style");
    }
}
