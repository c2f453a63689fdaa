//! Event source abstraction for inbound topic messages.
//!
//! Every transport hands the dispatcher the same thing: a topic name and a
//! JSON value. Implementations here cover newline-delimited JSON (stdin or a
//! replay file) and an in-process channel.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// One message as it arrives off the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub topic: String,
    pub value: serde_json::Value,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            value,
        }
    }
}

/// Events produced by an event source.
#[derive(Debug)]
pub enum SourceEvent {
    /// A well-formed envelope was read.
    Message(InboundMessage),
    /// A line that is not a valid envelope. Carries the parse error.
    Malformed(String),
    /// Source reached end of data.
    Eof,
}

/// Trait abstracting where inbound messages come from.
///
/// The dispatcher calls [`next_event`](EventSource::next_event) in a
/// `select!` with cancellation.
#[async_trait]
pub trait EventSource: Send + 'static {
    /// Read the next event.
    ///
    /// Returns `SourceEvent::Eof` when no more data is available and `Err`
    /// only on unrecoverable I/O errors.
    async fn next_event(&mut self) -> Result<SourceEvent>;

    /// Human-readable name for logging (e.g. "stdin", "replay").
    fn source_name(&self) -> &str;
}

// ============================================================================
// JSON Lines Source (stdin / replay file)
// ============================================================================

/// Reads `{"topic": ..., "value": ...}` envelopes, one per line.
///
/// Used with a producer piping records in:
/// `turbine_simulator | windops --stdin`
pub struct JsonLinesSource<R> {
    reader: R,
    line_buffer: Vec<u8>,
    name: String,
    delay_ms: u64,
    yielded_first: bool,
}

impl<R> JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            reader,
            line_buffer: Vec::with_capacity(1024),
            name: name.into(),
            delay_ms: 0,
            yielded_first: false,
        }
    }

    /// Pause `delay_ms` between messages (replay pacing).
    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

impl JsonLinesSource<BufReader<tokio::io::Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), "stdin")
    }
}

impl JsonLinesSource<BufReader<tokio::fs::File>> {
    /// Open a replay file.
    pub async fn open(path: &Path, delay_ms: u64) -> Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open replay file {}", path.display()))?;
        Ok(Self::new(BufReader::new(file), "replay").with_delay(delay_ms))
    }
}

#[async_trait]
impl<R> EventSource for JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async fn next_event(&mut self) -> Result<SourceEvent> {
        // No delay before the first message.
        if self.yielded_first && self.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        }
        loop {
            self.line_buffer.clear();
            let bytes = self
                .reader
                .read_until(b'\n', &mut self.line_buffer)
                .await
                .with_context(|| format!("Read error on {}", self.name))?;
            if bytes == 0 {
                return Ok(SourceEvent::Eof);
            }
            // Invalid UTF-8 is a bad record, not a broken source.
            let line = match std::str::from_utf8(&self.line_buffer) {
                Ok(text) => text.trim(),
                Err(e) => {
                    self.yielded_first = true;
                    return Ok(SourceEvent::Malformed(format!("invalid UTF-8: {e}")));
                }
            };
            if line.is_empty() {
                continue;
            }
            self.yielded_first = true;
            return Ok(match serde_json::from_str::<InboundMessage>(line) {
                Ok(message) => SourceEvent::Message(message),
                Err(e) => SourceEvent::Malformed(e.to_string()),
            });
        }
    }

    fn source_name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Channel Source (in-process producers)
// ============================================================================

/// Reads messages pushed by another task. EOF when every sender is dropped.
pub struct ChannelSource {
    rx: mpsc::Receiver<InboundMessage>,
}

impl ChannelSource {
    /// Create a source and the sender that feeds it.
    pub fn new(capacity: usize) -> (mpsc::Sender<InboundMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn next_event(&mut self) -> Result<SourceEvent> {
        Ok(match self.rx.recv().await {
            Some(message) => SourceEvent::Message(message),
            None => SourceEvent::Eof,
        })
    }

    fn source_name(&self) -> &str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source(text: &'static str) -> JsonLinesSource<BufReader<&'static [u8]>> {
        JsonLinesSource::new(BufReader::new(text.as_bytes()), "test")
    }

    #[tokio::test]
    async fn test_json_lines_skips_blank_and_flags_malformed() {
        let mut src = source(
            "{\"topic\":\"turbine_telemetry\",\"value\":{\"device_id\":\"D1\",\"power_output\":1.0}}\n\
             \n\
             not json\n\
             {\"topic\":\"cancel_curtailment\",\"value\":{\"device_id\":\"D1\"}}\n",
        );

        match src.next_event().await.unwrap() {
            SourceEvent::Message(m) => {
                assert_eq!(m.topic, "turbine_telemetry");
                assert_eq!(m.value["device_id"], json!("D1"));
            }
            other => panic!("expected message, got {other:?}"),
        }
        assert!(matches!(src.next_event().await.unwrap(), SourceEvent::Malformed(_)));
        assert!(matches!(src.next_event().await.unwrap(), SourceEvent::Message(_)));
        assert!(matches!(src.next_event().await.unwrap(), SourceEvent::Eof));
        assert_eq!(src.source_name(), "test");
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_malformed_not_fatal() {
        let reader = tokio_test::io::Builder::new()
            .read(b"{\"topic\":\"turbine_telemetry\",\"value\":{\"device_id\":\"D1\",\"power_output\":1.0}}\n")
            .read(b"\xff\xfe garbage\n")
            .read(b"{\"topic\":\"turbine_telemetry\",\"value\":{\"device_id\":\"D2\",\"power_output\":2.0}}\n")
            .build();
        let mut src = JsonLinesSource::new(BufReader::new(reader), "mock");

        assert!(matches!(src.next_event().await.unwrap(), SourceEvent::Message(_)));
        match src.next_event().await.unwrap() {
            SourceEvent::Malformed(reason) => assert!(reason.contains("UTF-8"), "{reason}"),
            other => panic!("expected malformed, got {other:?}"),
        }
        match src.next_event().await.unwrap() {
            SourceEvent::Message(m) => assert_eq!(m.value["device_id"], json!("D2")),
            other => panic!("expected message, got {other:?}"),
        }
        assert!(matches!(src.next_event().await.unwrap(), SourceEvent::Eof));
    }

    #[tokio::test]
    async fn test_line_split_across_reads() {
        let reader = tokio_test::io::Builder::new()
            .read(b"{\"topic\":\"cancel_curtailment\",")
            .read(b"\"value\":{\"device_id\":\"WIND_ZP_002\"}}\n")
            .build();
        let mut src = JsonLinesSource::new(BufReader::new(reader), "mock");
        match src.next_event().await.unwrap() {
            SourceEvent::Message(m) => assert_eq!(m.value["device_id"], json!("WIND_ZP_002")),
            other => panic!("expected message, got {other:?}"),
        }
        assert!(matches!(src.next_event().await.unwrap(), SourceEvent::Eof));
    }

    #[tokio::test]
    async fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = JsonLinesSource::open(&dir.path().join("missing.jsonl"), 0).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_channel_source_eof_when_senders_dropped() {
        let (tx, mut src) = ChannelSource::new(4);
        tx.send(InboundMessage::new("t", json!({}))).await.unwrap();
        drop(tx);
        assert!(matches!(src.next_event().await.unwrap(), SourceEvent::Message(_)));
        assert!(matches!(src.next_event().await.unwrap(), SourceEvent::Eof));
    }
}
