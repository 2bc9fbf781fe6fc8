//! Tests for the status stream decoder.

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use system_audio_tap::capture::{records, LogDecoder, MessageType};

fn record_line(message_type: &str, message: &str) -> String {
    format!(
        r#"{{"timestamp":"2026-01-01T00:00:00Z","message_type":"{message_type}","data":{{"message":"{message}"}}}}"#
    )
}

#[test]
fn two_lines_decode_regardless_of_split_point() {
    let input = b"{\"a\":1}\n{\"b\":2}\n";

    for split in 0..input.len() {
        let mut decoder = LogDecoder::new();
        let mut decoded = decoder.feed(&input[..split]);
        decoded.extend(decoder.feed(&input[split..]));

        let messages: Vec<_> = decoded.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(
            messages,
            ["{\"a\":1}", "{\"b\":2}"],
            "split at byte {split} dropped or duplicated a line"
        );
    }
}

#[test]
fn structured_records_decode_with_type_and_message() {
    let mut decoder = LogDecoder::new();
    let line = record_line("stream_start", "capture started");
    let records = decoder.feed(format!("{line}\n").as_bytes());

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message_type, MessageType::StreamStart);
    assert_eq!(records[0].message, "capture started");
}

#[test]
fn unparsable_line_is_kept_not_dropped() {
    let mut decoder = LogDecoder::new();
    let records = decoder.feed(b"panic: something went sideways\n");

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message_type, MessageType::Info);
    assert_eq!(records[0].message, "panic: something went sideways");
}

#[test]
fn interleaved_structured_and_plain_lines_stay_ordered() {
    let mut decoder = LogDecoder::new();
    let input = format!(
        "{}\nplain text\n{}\n",
        record_line("info", "first"),
        record_line("error", "third")
    );
    let records = decoder.feed(input.as_bytes());

    let messages: Vec<_> = records.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(messages, ["first", "plain text", "third"]);
}

#[tokio::test]
async fn record_stream_ends_after_flushing_partial_line() {
    let (reader, mut writer) = tokio::io::duplex(256);

    let writes = tokio::spawn(async move {
        let line = record_line("info", "complete");
        writer.write_all(line.as_bytes()).await.unwrap();
        writer.write_all(b"\n{\"trailing\"").await.unwrap();
        // Dropping the writer ends the stream mid-line.
    });

    let stream = std::pin::pin!(records(reader));
    let decoded: Vec<_> = stream.collect().await;
    writes.await.unwrap();

    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[0].message, "complete");
    assert_eq!(decoded[0].message_type, MessageType::Info);
    // The trailing partial line surfaces exactly once, as raw text.
    assert_eq!(decoded[1].message, "{\"trailing\"");
}

#[tokio::test]
async fn record_stream_preserves_line_order_across_deliveries() {
    let (reader, mut writer) = tokio::io::duplex(256);

    let writes = tokio::spawn(async move {
        for i in 0..5 {
            let line = record_line("debug", &format!("message {i}"));
            writer.write_all(line.as_bytes()).await.unwrap();
            writer.write_all(b"\n").await.unwrap();
        }
    });

    let stream = std::pin::pin!(records(reader));
    let decoded: Vec<_> = stream.collect().await;
    writes.await.unwrap();

    let messages: Vec<_> = decoded.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(
        messages,
        ["message 0", "message 1", "message 2", "message 3", "message 4"]
    );
}
