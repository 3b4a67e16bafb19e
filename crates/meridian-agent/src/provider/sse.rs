//! Line buffering for SSE and NDJSON response bodies.

/// Accumulates raw bytes and yields complete lines (without terminators).
#[derive(Default)]
pub(crate) struct LineBuffer {
    buf: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and drain every complete line it closes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    /// Whatever is left after the stream ends.
    pub fn remainder(self) -> Option<String> {
        let rest = self.buf.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}

/// Strip the `data: ` prefix of an SSE data line, if present.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lines_across_chunks() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"data: {\"a\":").is_empty());
        let lines = buf.push(b"1}\n\ndata: [DONE]\n");
        assert_eq!(lines, vec!["data: {\"a\":1}", "", "data: [DONE]"]);
    }

    #[test]
    fn remainder_returns_trailing_partial() {
        let mut buf = LineBuffer::new();
        buf.push(b"{\"done\":true}");
        assert_eq!(buf.remainder().as_deref(), Some("{\"done\":true}"));
    }

    #[test]
    fn data_prefix_stripping() {
        assert_eq!(sse_data("data: {}"), Some("{}"));
        assert_eq!(sse_data("event: ping"), None);
    }
}
