use thiserror::Error;

pub type ShelfguardResult<T> = Result<T, ShelfguardError>;

#[derive(Error, Debug)]
pub enum ShelfguardError {
    /// No master key could be loaded or generated. Fatal at boot; recoverable
    /// afterward only by regenerating or rotating the key.
    #[error("Master key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("Context mismatch: envelope was sealed for '{found}', not '{expected}'")]
    ContextMismatch { expected: String, found: String },

    #[error("Decryption failed: {0}")]
    DecryptionFailure(String),

    #[error("Alert channel '{channel}' delivery failed: {reason}")]
    ChannelDelivery {
        channel: &'static str,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl ShelfguardError {
    /// Admin-visible rendering: generic message unless detail is requested.
    /// Production responses never carry internals or key material.
    pub fn public_message(&self, with_detail: bool) -> String {
        if with_detail {
            self.to_string()
        } else {
            match self {
                Self::ContextMismatch { .. } => "decryption context mismatch".into(),
                Self::DecryptionFailure(_) => "decryption failed".into(),
                Self::KeyUnavailable(_) => "encryption key unavailable".into(),
                _ => "internal error".into(),
            }
        }
    }
}
