//! Minimal server-sent-events framing shared by the streaming adapters.
//!
//! Upstream byte chunks arrive with no alignment guarantees, so the buffer
//! accumulates until a blank line completes an event, then hands back the
//! `event:`/`data:` pair.

/// One parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    /// Value of the `event:` field, when present.
    pub event: Option<String>,
    /// Concatenated `data:` lines, newline-joined.
    pub data: String,
}

/// Incremental SSE parser over raw byte chunks.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    pending: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a byte chunk; returns every event completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));

        let mut events = Vec::new();
        // Events are delimited by a blank line; tolerate \r\n framing.
        while let Some(pos) = self.pending.find("\n\n") {
            let raw: String = self.pending.drain(..pos + 2).collect();
            if let Some(event) = parse_event(&raw) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_event(raw: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines = Vec::new();

    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim_start().to_string());
        }
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
    fn test_single_event() {
        let mut buffer = SseBuffer::new();
        let events = buffer.push(b"data: {\"x\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"x\":1}");
        assert_eq!(events[0].event, None);
    }

    #[test]
    fn test_named_event() {
        let mut buffer = SseBuffer::new();
        let events = buffer.push(b"event: message_start\ndata: {}\n\n");
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].data, "{}");
    }

    #[test]
    fn test_split_across_chunks() {
        let mut buffer = SseBuffer::new();
        assert!(buffer.push(b"data: par").is_empty());
        assert!(buffer.push(b"tial").is_empty());
        let events = buffer.push(b"\n\n");
        assert_eq!(events[0].data, "partial");
    }

    #[test]
    fn test_multiple_events_one_chunk() {
        let mut buffer = SseBuffer::new();
        let events = buffer.push(b"data: one\n\ndata: two\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "one");
        assert_eq!(events[1].data, "two");
    }

    #[test]
    fn test_crlf_framing() {
        let mut buffer = SseBuffer::new();
        let events = buffer.push(b"data: x\r\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn test_multiline_data_joined() {
        let mut buffer = SseBuffer::new();
        let events = buffer.push(b"data: line1\ndata: line2\n\n");
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn test_comment_only_block_skipped() {
        let mut buffer = SseBuffer::new();
        let events = buffer.push(b": keepalive\n\n");
        assert!(events.is_empty());
    }
}
