use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UPSError {
    /// A command argument is outside the range the UPS accepts.
    #[error("invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("UPS communication failed: {0}")]
    Io(#[from] io::Error),

    #[error("serial port failure: {0}")]
    Serial(#[from] serialport::Error),

    /// No terminator arrived within the inter-character timeout.
    #[error("timed out waiting for UPS response")]
    Timeout,

    /// A frame arrived but doesn't have the expected shape.
    #[error("malformed UPS response {line:?}: {reason}")]
    MalformedResponse { line: String, reason: String },
}

impl UPSError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> UPSError {
        UPSError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(line: &str, reason: impl Into<String>) -> UPSError {
        UPSError::MalformedResponse {
            line: line.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the transport can be kept after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, UPSError::Io(_) | UPSError::Serial(_))
    }
}
