use thiserror::Error;

pub type Result<T> = std::result::Result<T, BloomError>;

#[derive(Error, Debug)]
pub enum BloomError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown backend: '{0}' (expected atomic, non-atomic or auto)")]
    UnknownBackend(String),

    #[error("Script {sha} is not cached by the store after reload")]
    ScriptNotCached { sha: String },

    #[error("Storage operation failed: {0}")]
    StorageError(String),

    #[error("Unexpected reply from store: {0}")]
    UnexpectedReply(String),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),
}

impl BloomError {
    /// Whether the error came from talking to the store rather than from
    /// local validation.
    pub fn is_remote(&self) -> bool {
        match self {
            BloomError::InvalidConfig(_) | BloomError::UnknownBackend(_) => false,
            BloomError::ScriptNotCached { .. }
            | BloomError::StorageError(_)
            | BloomError::UnexpectedReply(_) => true,
            #[cfg(feature = "redis")]
            BloomError::RedisError(_) => true,
        }
    }
}

// Missing required builder fields
impl From<derive_builder::UninitializedFieldError> for BloomError {
    fn from(err: derive_builder::UninitializedFieldError) -> Self {
        BloomError::InvalidConfig(err.to_string())
    }
}
