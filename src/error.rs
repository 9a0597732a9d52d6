//! Error taxonomy shared by the capture, analysis, and export paths.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the engine.
///
/// Capture-side variants can stop a running pipeline; everything raised on
/// the analysis side stays local to one iteration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio stream fault: {0}")]
    StreamFault(String),

    #[error("shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: usize, found: usize },

    #[error("nothing has been captured yet")]
    EmptyBuffer,

    #[error("write failed: {0}")]
    WriteFailure(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("template store error: {0}")]
    Store(String),

    #[error("pipeline is not running")]
    NotRunning,

    #[error("pipeline did not answer within {}ms", .0.as_millis())]
    ReplyTimeout(Duration),

    #[error("pipeline is already running")]
    AlreadyRunning,
}

impl EngineError {
    /// Short stable label for logs and observer payloads.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::DeviceUnavailable(_) => "device_unavailable",
            EngineError::StreamFault(_) => "stream_fault",
            EngineError::ShapeMismatch { .. } => "shape_mismatch",
            EngineError::EmptyBuffer => "empty_buffer",
            EngineError::WriteFailure(_) => "write_failure",
            EngineError::InvalidConfig(_) => "invalid_config",
            EngineError::InvalidTemplate(_) => "invalid_template",
            EngineError::Store(_) => "store",
            EngineError::NotRunning => "not_running",
            EngineError::ReplyTimeout(_) => "reply_timeout",
            EngineError::AlreadyRunning => "already_running",
        }
    }
}

impl From<hound::Error> for EngineError {
    fn from(err: hound::Error) -> Self {
        EngineError::WriteFailure(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
