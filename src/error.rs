pub type FramewrightResult<T> = Result<T, FramewrightError>;

#[derive(thiserror::Error, Debug)]
pub enum FramewrightError {
    /// Malformed scene or job; reported before any rendering starts.
    #[error("validation error: {0}")]
    Validation(String),

    /// A font/image/audio reference could not be resolved. Fatal to the job.
    #[error("resource missing: {0}")]
    ResourceMissing(String),

    /// Frame timestamps arrived out of order. Always an internal defect.
    #[error("ordering violation: {0}")]
    OrderingViolation(String),

    /// Codec or container level failure.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Cooperative shutdown, not a defect.
    #[error("job cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FramewrightError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn resource_missing(msg: impl Into<String>) -> Self {
        Self::ResourceMissing(msg.into())
    }

    pub fn ordering(msg: impl Into<String>) -> Self {
        Self::OrderingViolation(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    /// True for errors the caller can fix by correcting its input.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::ResourceMissing(_))
    }
}
