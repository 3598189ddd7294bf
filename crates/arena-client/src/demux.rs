//! Incremental decoder from SSE body bytes to [`StreamEvent`]s.

use tracing::{debug, warn};

use crate::stream::StreamEvent;

/// Splits a chunked `text/event-stream` body into typed events.
///
/// Chunks may end anywhere, including inside a multi-byte character or in the
/// middle of the blank-line delimiter; undecoded bytes are kept until the next
/// call.
#[derive(Debug, Default)]
pub struct StreamDemultiplexer {
    buf: Vec<u8>,
}

impl StreamDemultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every event completed by it, in order.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf) {
            let frame: Vec<u8> = self.buf.drain(..idx + delim_len).take(idx).collect();
            if let Some(event) = decode_frame(&frame) {
                events.push(event);
            }
        }
        events
    }

    /// Decodes whatever is left once the transport has closed.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buf);
        decode_frame(&rest).into_iter().collect()
    }

    /// Number of bytes waiting for a delimiter.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

fn find_frame_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len()
            && buf[i] == b'\r'
            && buf[i + 1] == b'\n'
            && buf[i + 2] == b'\r'
            && buf[i + 3] == b'\n'
        {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

/// Extracts the `data:` payload of one frame.
fn frame_data(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    Some(data_lines.join("\n"))
}

fn decode_frame(bytes: &[u8]) -> Option<StreamEvent> {
    let data = frame_data(bytes)?;
    if data.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<StreamEvent>(&data) {
        Ok(StreamEvent::Unknown) => {
            debug!(payload = %data, "ignoring unknown stream event type");
            None
        }
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, payload = %data, "skipping malformed stream event");
            None
        }
    }
}
