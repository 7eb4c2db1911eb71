//! Frames sent by the text-completion collaborator.
//!
//! One frame per line, either bare JSON or SSE-style `data: <json>`. The
//! stream ends with `{"type":"done"}` or the literal `[DONE]`.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{PreviewError, Result};
use crate::models::FileEdit;

const SSE_DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Incremental response text.
    Delta { text: String },
    /// Structured payload sent once the response is complete.
    Final {
        #[serde(default)]
        files: Vec<FileEdit>,
        #[serde(default)]
        credits: u64,
    },
    /// The collaborator gave up on the request.
    Error { message: String },
    /// End-of-stream sentinel.
    Done,
}

/// Parse one line. Blank and comment lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Frame>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.starts_with(':') {
        return Ok(None);
    }
    let payload = match line.strip_prefix(SSE_DATA_PREFIX) {
        Some(rest) => rest.trim_start(),
        None => line,
    };
    if payload == DONE_SENTINEL {
        return Ok(Some(Frame::Done));
    }
    // SSE `event:` / `id:` lines carry nothing we need.
    if line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:") {
        return Ok(None);
    }
    serde_json::from_str(payload)
        .map(Some)
        .map_err(|e| PreviewError::Frame {
            detail: format!("{e} in line {payload:?}"),
        })
}

/// Reassembles lines from arbitrarily split byte chunks.
///
/// Bytes are buffered until a newline arrives, so multi-byte characters split
/// across chunks are decoded intact.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every frame completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Frame>> {
        self.pending.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(nl) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=nl).collect();
            let text = String::from_utf8(line).map_err(|e| PreviewError::Frame {
                detail: format!("invalid utf-8: {e}"),
            })?;
            if let Some(frame) = parse_line(&text)? {
                trace!(?frame, "decoded frame");
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    /// Flush a final line that had no trailing newline.
    pub fn finish(&mut self) -> Result<Option<Frame>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8(rest).map_err(|e| PreviewError::Frame {
            detail: format!("invalid utf-8: {e}"),
        })?;
        parse_line(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_and_sse_lines() {
        assert_eq!(
            parse_line(r#"{"type":"delta","text":"hi"}"#).unwrap(),
            Some(Frame::Delta { text: "hi".into() })
        );
        assert_eq!(
            parse_line(r#"data: {"type":"delta","text":"hi"}"#).unwrap(),
            Some(Frame::Delta { text: "hi".into() })
        );
        assert_eq!(parse_line("data: [DONE]").unwrap(), Some(Frame::Done));
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line(": keep-alive").unwrap(), None);
        assert_eq!(parse_line("event: message").unwrap(), None);
    }

    #[test]
    fn final_frame_defaults() {
        let frame = parse_line(r#"{"type":"final"}"#).unwrap();
        assert_eq!(
            frame,
            Some(Frame::Final {
                files: vec![],
                credits: 0
            })
        );
    }

    #[test]
    fn malformed_line_is_frame_error() {
        let err = parse_line("{not json").unwrap_err();
        assert!(matches!(err, PreviewError::Frame { .. }));
        assert!(err.is_transport());
    }

    #[test]
    fn decoder_handles_split_utf8() {
        let line = "{\"type\":\"delta\",\"text\":\"héllo ✓\"}\n".as_bytes();
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for b in line {
            frames.extend(decoder.push(std::slice::from_ref(b)).unwrap());
        }
        assert_eq!(
            frames,
            vec![Frame::Delta {
                text: "héllo ✓".into()
            }]
        );
    }

    #[test]
    fn decoder_flushes_unterminated_line() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(br#"{"type":"done"}"#).unwrap().is_empty());
        assert_eq!(decoder.finish().unwrap(), Some(Frame::Done));
        assert_eq!(decoder.finish().unwrap(), None);
    }
}
