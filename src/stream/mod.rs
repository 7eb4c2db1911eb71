pub mod event;
pub mod extractor;
pub mod frame;
pub mod source;

pub use event::{DroppedFragment, StreamEvent};
pub use extractor::StreamTagExtractor;
pub use frame::{Frame, FrameDecoder};
pub use source::{
    CompletionRequest, CompletionSource, FrameStream, HttpCompletionClient, ImageAttachment,
    ReplaySource,
};
