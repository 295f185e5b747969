//! Incremental decoder for upstream server-sent events.
//!
//! Only `data:` fields matter for completion streams. Bytes may arrive split
//! at arbitrary points, including inside a UTF-8 sequence, so lines are
//! buffered as raw bytes until a newline is seen.

/// Terminal payload of an OpenAI-style stream.
pub const DONE_MARKER: &str = "[DONE]";

/// A decoded event payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload.
    Data(String),
    /// The `[DONE]` marker.
    Done,
}

/// Line-buffering SSE decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed bytes and return every complete event they finish.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }
}

fn parse_line(raw: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\r', '\n']);
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.trim() == DONE_MARKER {
        Some(SseEvent::Done)
    } else if data.trim().is_empty() {
        None
    } else {
        Some(SseEvent::Data(data.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_split_events() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        let events = decoder.push(b":1}\n\ndata: {\"b\":2}\r\n\r\ndata: [DONE]\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent::Data("{\"a\":1}".to_string()),
                SseEvent::Data("{\"b\":2}".to_string()),
                SseEvent::Done,
            ]
        );
    }

    #[test]
    fn test_ignores_comments_and_other_fields() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\nevent: ping\nid: 7\ndata:{\"x\":1}\n");
        assert_eq!(events, vec![SseEvent::Data("{\"x\":1}".to_string())]);
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: {\"c\":\"é\"}\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        assert!(decoder.push(&bytes[..split]).is_empty());
        let events = decoder.push(&bytes[split..]);
        assert_eq!(events, vec![SseEvent::Data("{\"c\":\"é\"}".to_string())]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: [DONE]").is_empty());
        assert_eq!(decoder.finish(), Some(SseEvent::Done));
        assert_eq!(decoder.finish(), None);
    }
}
