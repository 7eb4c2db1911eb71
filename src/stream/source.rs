//! Text-completion collaborators that produce frame streams.

use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use base64::Engine as _;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::error::{PreviewError, Result};
use crate::models::{ChatMessage, FileTable};
use crate::stream::frame::{Frame, FrameDecoder};

/// A boxed stream of decoded frames.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// Optional reference image sent along with a prompt.
#[derive(Debug, Clone, Serialize)]
pub struct ImageAttachment {
    pub media_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

impl ImageAttachment {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let media_type = match ext.as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            other => {
                return Err(PreviewError::Other(format!(
                    "unsupported image type: .{other}"
                )))
            }
        };
        Ok(Self {
            media_type: media_type.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        })
    }
}

/// Everything the collaborator needs to produce one response.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub files: FileTable,
    pub history: Vec<ChatMessage>,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageAttachment>,
    pub model: String,
}

/// Opens one streamed response per request.
pub trait CompletionSource {
    fn open(&self, request: &CompletionRequest) -> impl Future<Output = Result<FrameStream>> + Send;
}

struct DecodeState<S> {
    body: S,
    decoder: FrameDecoder,
    ready: VecDeque<Frame>,
    ended: bool,
}

/// Decode a raw byte stream into frames.
pub fn decode_frames<S, B, E>(body: S) -> FrameStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: FrameDecoder::new(),
        ready: VecDeque::new(),
        ended: false,
    };
    let frames = futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(frame) = st.ready.pop_front() {
                return Some((Ok(frame), st));
            }
            if st.ended {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => match st.decoder.push(chunk.as_ref()) {
                    Ok(frames) => st.ready.extend(frames),
                    Err(e) => {
                        st.ended = true;
                        return Some((Err(e), st));
                    }
                },
                Some(Err(e)) => {
                    st.ended = true;
                    let err = PreviewError::Transport {
                        detail: e.to_string(),
                    };
                    return Some((Err(err), st));
                }
                None => {
                    st.ended = true;
                    match st.decoder.finish() {
                        Ok(Some(frame)) => st.ready.push_back(frame),
                        Ok(None) => {}
                        Err(e) => return Some((Err(e), st)),
                    }
                }
            }
        }
    });
    Box::pin(frames)
}

/// Streams responses from an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpCompletionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpCompletionClient {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

impl CompletionSource for HttpCompletionClient {
    #[instrument(skip_all, fields(endpoint = %self.endpoint, model = %request.model))]
    async fn open(&self, request: &CompletionRequest) -> Result<FrameStream> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        debug!(
            files = request.files.len(),
            history = request.history.len(),
            has_image = request.image.is_some(),
            "sending completion request"
        );
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PreviewError::Completion {
                message: format!("HTTP {status}: {body}"),
            });
        }
        info!(%status, "completion stream opened");
        Ok(decode_frames(response.bytes_stream()))
    }
}

/// Replays a recorded response from disk or memory.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    origin: ReplayOrigin,
    chunk_size: usize,
}

#[derive(Debug, Clone)]
enum ReplayOrigin {
    File(PathBuf),
    Bytes(Vec<u8>),
}

impl ReplaySource {
    #[must_use]
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            origin: ReplayOrigin::File(path.into()),
            chunk_size: 64,
        }
    }

    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            origin: ReplayOrigin::Bytes(bytes.into()),
            chunk_size: 64,
        }
    }

    /// Deliver the recording in chunks of this many bytes (min 1).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

impl CompletionSource for ReplaySource {
    async fn open(&self, _request: &CompletionRequest) -> Result<FrameStream> {
        let bytes = match &self.origin {
            ReplayOrigin::File(path) => tokio::fs::read(path).await?,
            ReplayOrigin::Bytes(bytes) => bytes.clone(),
        };
        let chunks: Vec<std::result::Result<Vec<u8>, std::io::Error>> = bytes
            .chunks(self.chunk_size)
            .map(|c| Ok(c.to_vec()))
            .collect();
        Ok(decode_frames(futures::stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            files: FileTable::new(),
            history: vec![],
            prompt: "hi".into(),
            image: None,
            model: "test-model".into(),
        }
    }

    async fn collect(stream: FrameStream) -> Vec<Result<Frame>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn replay_decodes_every_frame() {
        let recording = concat!(
            "{\"type\":\"delta\",\"text\":\"<file path=\\\"a.ts\\\">\"}\n",
            "{\"type\":\"delta\",\"text\":\"x</file>\"}\n",
            "{\"type\":\"final\",\"files\":[],\"credits\":3}\n",
            "data: [DONE]\n",
        );
        let source = ReplaySource::from_bytes(recording).with_chunk_size(7);
        let frames: Vec<Frame> = collect(source.open(&request()).await.unwrap())
            .await
            .into_iter()
            .map(|f| f.unwrap())
            .collect();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[3], Frame::Done);
        assert!(matches!(frames[2], Frame::Final { credits: 3, .. }));
    }

    #[tokio::test]
    async fn transport_error_surfaces_once() {
        let chunks: Vec<std::result::Result<Vec<u8>, String>> = vec![
            Ok(b"{\"type\":\"delta\",\"text\":\"a\"}\n".to_vec()),
            Err("connection reset".into()),
            Ok(b"{\"type\":\"done\"}\n".to_vec()),
        ];
        let frames = collect(decode_frames(futures::stream::iter(chunks))).await;
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_ok());
        assert!(matches!(frames[1], Err(PreviewError::Transport { .. })));
    }

    #[test]
    fn image_attachment_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.bmp");
        std::fs::write(&path, b"xx").unwrap();
        assert!(ImageAttachment::from_path(&path).is_err());
    }

    #[test]
    fn image_attachment_encodes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.png");
        std::fs::write(&path, b"abc").unwrap();
        let img = ImageAttachment::from_path(&path).unwrap();
        assert_eq!(img.media_type, "image/png");
        assert_eq!(img.data, "YWJj");
    }
}
