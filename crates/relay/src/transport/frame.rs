//! Incremental `text/event-stream` decoding.
//!
//! Bytes arrive in arbitrary chunks: a chunk may end mid-line or in the
//! middle of a multi-byte UTF-8 sequence. The decoder only decodes complete
//! lines and only yields an event once its terminating blank line is seen.

use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// Event type; unnamed events are `message`.
    pub fn event_type(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    ready: VecDeque<SseEvent>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            self.process_line(&line);
        }
    }

    pub fn next_event(&mut self) -> Option<SseEvent> {
        self.ready.pop_front()
    }

    /// True while bytes or fields of an unfinished event are buffered.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty() || !self.data.is_empty() || self.event.is_some()
    }

    fn process_line(&mut self, line: &str) {
        if line.is_empty() {
            self.dispatch();
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self) {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);
        if data.is_empty() {
            return;
        }
        self.ready.push_back(SseEvent {
            event,
            data: data.join("\n"),
            id: self.id.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut SseDecoder) -> Vec<SseEvent> {
        std::iter::from_fn(|| decoder.next_event()).collect()
    }

    #[test]
    fn test_event_needs_blank_line() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"event: endpoint\ndata: {\"uri\":\"/message?sessionId=abc\"}\n");
        assert!(decoder.next_event().is_none());
        assert!(decoder.has_partial());

        decoder.push(b"\n");
        let event = decoder.next_event().unwrap();
        assert_eq!(event.event_type(), "endpoint");
        assert_eq!(event.data, "{\"uri\":\"/message?sessionId=abc\"}");
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_split_lines_and_utf8() {
        let frame = "event: message\ndata: {\"city\":\"北京\"}\n\n".as_bytes();
        // Split inside the first multi-byte character.
        let cut = frame.iter().position(|b| *b >= 0x80).unwrap() + 1;

        let mut decoder = SseDecoder::new();
        decoder.push(&frame[..cut]);
        assert!(decoder.next_event().is_none());
        decoder.push(&frame[cut..]);

        let events = drain(&mut decoder);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"city\":\"北京\"}");
    }

    #[test]
    fn test_crlf_multiline_and_comments() {
        let mut decoder = SseDecoder::new();
        decoder.push(b":ping\r\n\r\ndata: first\r\ndata: second\r\n\r\nevent: message\r\ndata:x\r\n\r\n");

        let events = drain(&mut decoder);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), "message");
        assert_eq!(events[0].data, "first\nsecond");
        assert_eq!(events[1].data, "x");
    }

    #[test]
    fn test_byte_at_a_time() {
        let stream = b"event: message\ndata: {\"id\":1}\n\nevent: message\ndata: {\"id\":2}\n\n";
        let mut decoder = SseDecoder::new();
        let mut seen = Vec::new();
        for byte in stream.iter() {
            decoder.push(std::slice::from_ref(byte));
            seen.extend(drain(&mut decoder));
        }
        let data: Vec<_> = seen.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(data, vec!["{\"id\":1}", "{\"id\":2}"]);
    }
}
