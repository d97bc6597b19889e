//! Incremental Server-Sent Events decoding for streaming providers

use futures_util::{Stream, StreamExt};

use crate::error::ProviderFault;

/// Splits a byte stream into SSE event payloads.
///
/// Only the `data` field matters to the providers: multi-line data is joined
/// with `\n`, comments and other fields are dropped, and partial lines are
/// buffered until the rest of the line arrives.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every event completed by them
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush an event left open when the stream ended
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let line = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            let line = line.trim_end_matches('\r');
            if let Some(event) = self.process_line(line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let event = self.data.join("\n");
        self.data.clear();
        Some(event)
    }
}

/// Adapt a streaming HTTP response into SSE data payloads
pub fn data_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<String, ProviderFault>> + Send + 'static {
    async_stream::stream! {
        let mut bytes = response.bytes_stream();
        let mut parser = SseParser::new();
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for data in parser.feed(&chunk) {
                        yield Ok(data);
                    }
                }
                Err(e) => {
                    yield Err(ProviderFault::from(e));
                    return;
                }
            }
        }
        if let Some(data) = parser.finish() {
            yield Ok(data);
        }
    }
}
