//! Request/response translation between caller formats and the backend

pub mod normalize;
pub mod stream;
pub mod transform;

pub use normalize::{CallerRequest, NormalizeOptions, Normalized, normalize};
pub use stream::{SseFrame, StreamSummary, StreamTranslator};
pub use transform::{to_claude, to_openai};
