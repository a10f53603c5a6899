//! Incremental decoder for streamed chat completions
//!
//! The body is a sequence of lines. Lines prefixed `data: ` carry a JSON
//! fragment with a content delta; a `data: [DONE]` line ends the
//! stream. Lines that fail to parse are skipped.

use serde::Deserialize;
use tracing::trace;

/// One decoded increment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// Content delta, in arrival order
    Delta(String),
    /// End-of-stream marker
    Done,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Splits a byte stream into lines and decodes content deltas
#[derive(Debug, Default)]
pub struct DeltaDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl DeltaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the items completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamItem> {
        let mut items = Vec::new();
        if self.done {
            return items;
        }

        self.buffer.extend_from_slice(bytes);

        // '\n' never occurs inside a multi-byte UTF-8 sequence
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(item) = self.decode_line(&line) {
                items.push(item);
                if self.done {
                    self.buffer.clear();
                    break;
                }
            }
        }

        items
    }

    /// Decode whatever is left when the connection closes
    pub fn finish(&mut self) -> Vec<StreamItem> {
        if self.done || self.buffer.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line).into_iter().collect()
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<StreamItem> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\r', '\n']);

        let data = line.strip_prefix("data:")?.trim_start();

        if data.trim() == "[DONE]" {
            self.done = true;
            return Some(StreamItem::Done);
        }

        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                trace!(error = %e, "skipping malformed stream line");
                return None;
            }
        };

        chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .filter(|content| !content.is_empty())
            .map(StreamItem::Delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_line(content: &str) -> String {
        format!(
            "data: {}\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    #[test]
    fn test_decodes_deltas_until_done() {
        let mut decoder = DeltaDecoder::new();
        let body = format!(
            "{}{}data: [DONE]\n{}",
            delta_line("It's "),
            delta_line("sunny."),
            delta_line("ignored")
        );

        let items = decoder.push(body.as_bytes());
        assert_eq!(
            items,
            vec![
                StreamItem::Delta("It's ".into()),
                StreamItem::Delta("sunny.".into()),
                StreamItem::Done
            ]
        );
        assert!(decoder.push(delta_line("late").as_bytes()).is_empty());
    }

    #[test]
    fn test_done_inside_content_is_not_the_end_marker() {
        let mut decoder = DeltaDecoder::new();
        let body = format!(
            "{}{}data: [DONE]\n",
            delta_line("Reply with [DONE] when "),
            delta_line("finished.")
        );

        assert_eq!(
            decoder.push(body.as_bytes()),
            vec![
                StreamItem::Delta("Reply with [DONE] when ".into()),
                StreamItem::Delta("finished.".into()),
                StreamItem::Done
            ]
        );
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let mut decoder = DeltaDecoder::new();
        let body = format!(
            ": keep-alive\n\ndata: {{broken\nevent: ping\n{}data: {{\"choices\":[]}}\n",
            delta_line("ok")
        );

        let items = decoder.push(body.as_bytes());
        assert_eq!(items, vec![StreamItem::Delta("ok".into())]);
        assert_eq!(
            decoder.push(delta_line("more").as_bytes()),
            vec![StreamItem::Delta("more".into())]
        );
    }

    #[test]
    fn test_lines_split_across_chunks() {
        let mut decoder = DeltaDecoder::new();
        let line = delta_line("héllo wörld");
        let bytes = line.as_bytes();
        let (a, b) = bytes.split_at(bytes.len() / 2);

        assert!(decoder.push(a).is_empty());
        assert_eq!(decoder.push(b), vec![StreamItem::Delta("héllo wörld".into())]);
    }

    #[test]
    fn test_crlf_and_trailing_line_without_newline() {
        let mut decoder = DeltaDecoder::new();
        let body = delta_line("first").replace('\n', "\r\n");
        assert_eq!(decoder.push(body.as_bytes()), vec![StreamItem::Delta("first".into())]);

        let tail = delta_line("tail");
        decoder.push(tail.trim_end().as_bytes());
        assert_eq!(decoder.finish(), vec![StreamItem::Delta("tail".into())]);
    }
}
