//! Minimal incremental Server-Sent-Events parser.
//!
//! Feed raw chunks as they arrive; complete events come out. Handles events
//! split across chunk boundaries and multi-line data fields.

/// One parsed SSE event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of raw bytes-as-text; returns any events completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        // Events are separated by a blank line.
        while let Some(boundary) = find_event_boundary(&self.buffer) {
            let raw: String = self.buffer.drain(..boundary.end).collect();
            let block = &raw[..boundary.start];
            if let Some(event) = parse_event_block(block) {
                events.push(event);
            }
        }

        events
    }
}

struct Boundary {
    /// End of the event block (exclusive).
    start: usize,
    /// End of the separator (exclusive) — where the next event begins.
    end: usize,
}

fn find_event_boundary(buffer: &str) -> Option<Boundary> {
    let lf = buffer.find("\n\n").map(|i| Boundary { start: i, end: i + 2 });
    let crlf = buffer
        .find("\r\n\r\n")
        .map(|i| Boundary { start: i, end: i + 4 });

    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.start <= b.start { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines = Vec::new();

    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
        // Comment lines (":") and unknown fields are ignored.
    }

    if event.is_none() && data_lines.is_empty() {
        return None;
    }

    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_event() {
        let mut parser = SseParser::new();
        let events = parser.push("event: message_start\ndata: {\"a\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].data, r#"{"a":1}"#);
    }

    #[test]
    fn event_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push("event: ping\nda").is_empty());
        let events = parser.push("ta: {}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("ping"));
        assert_eq!(events[0].data, "{}");
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut parser = SseParser::new();
        let events = parser.push("data: one\n\ndata: two\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "one");
        assert_eq!(events[1].data, "two");
    }

    #[test]
    fn multi_line_data_joined() {
        let mut parser = SseParser::new();
        let events = parser.push("data: line1\ndata: line2\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn crlf_separators() {
        let mut parser = SseParser::new();
        let events = parser.push("event: done\r\ndata: x\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("done"));
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn comments_ignored() {
        let mut parser = SseParser::new();
        let events = parser.push(": keepalive\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn incomplete_event_buffered() {
        let mut parser = SseParser::new();
        assert!(parser.push("data: partial").is_empty());
        assert!(parser.push(" more").is_empty());
        let events = parser.push("\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "partial more");
    }
}
