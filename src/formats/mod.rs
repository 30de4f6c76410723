//! Wire formats: the two caller APIs and the backend Responses API

pub mod claude;
pub mod detect;
pub mod openai;
pub mod responses;

pub use detect::{Detection, DetectionSignal, detect_format};

/// Public wire format a caller speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestFormat {
    Claude,
    OpenAi,
}

impl RequestFormat {
    /// Prometheus label / log value
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestFormat::Claude => "claude",
            RequestFormat::OpenAi => "openai",
        }
    }
}

impl std::fmt::Display for RequestFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
