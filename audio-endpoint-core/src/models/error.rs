use thiserror::Error;

/// Errors produced by the endpoint lifecycle and buffer exchange layers.
///
/// `BufferEmpty` and `BufferFull` are transient: they mean "not this period"
/// and drive a retry on the next period rather than a failure path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("format not supported: {0}")]
    FormatNotSupported(String),

    #[error("no capture data ready")]
    BufferEmpty,

    #[error("no render space available")]
    BufferFull,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("device lost: {0}")]
    DeviceLost(String),

    #[error("{operation} failed with code {code:#010x}")]
    PlatformFailure { operation: String, code: i32 },
}

impl AudioError {
    /// Wrap an opaque device API failure code with the operation that produced it.
    pub fn platform(operation: impl Into<String>, code: i32) -> Self {
        Self::PlatformFailure {
            operation: operation.into(),
            code,
        }
    }

    /// Expected "not ready yet" conditions that are retried on the next period.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BufferEmpty | Self::BufferFull)
    }

    /// Errors that mean the endpoint behind a handle or stream is gone.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost(_))
    }
}
