use thiserror::Error;

/// Failure of a single enhancement submission.
///
/// Every kind is local to one submission: the caller returns to idle and may
/// submit again. Nothing here is retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnhanceError {
    /// Credential absent or structurally invalid. Raised before any network I/O.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The service rejected the credential.
    #[error("credential rejected: {0}")]
    Authentication(String),
    /// Rate limit or quota exhausted for the credential.
    #[error("quota exhausted: {0}")]
    QuotaExceeded(String),
    /// Model not found or not permitted for the credential.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    /// The call succeeded but carried no image part.
    #[error("no image returned: {0}")]
    EmptyResponse(String),
    /// Network failure, malformed payload, or undecodable image.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl EnhanceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Authentication(_) => "authentication",
            Self::QuotaExceeded(_) => "quota_exceeded",
            Self::ModelUnavailable(_) => "model_unavailable",
            Self::EmptyResponse(_) => "empty_response",
            Self::Transport(_) => "transport",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Configuration(_) => {
                "No usable API key is configured. Set GEMINI_API_KEY or use /key."
            }
            Self::Authentication(_) => {
                "The API key was rejected. Select a different key to continue."
            }
            Self::QuotaExceeded(_) => {
                "The API key has run out of quota. Try again later or use a different key."
            }
            Self::ModelUnavailable(_) => {
                "The image model is not available for this key. Check the model setting."
            }
            Self::EmptyResponse(_) => {
                "The model returned text but no image. Try a different mode or note."
            }
            Self::Transport(_) => "The image service could not be reached or answered badly.",
        }
    }

    /// Whether the shell should offer re-selecting the credential.
    pub fn offers_credential_reselect(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::QuotaExceeded(_))
    }
}

/// A configuration value outside its enumerated domain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown enhancement mode '{0}'")]
    UnknownMode(String),
    #[error("unsupported aspect ratio '{0}' (expected one of 1:1, 4:3, 3:4, 16:9, 9:16)")]
    UnknownAspectRatio(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("unsupported image type '{0}'")]
    UnsupportedMime(String),
    #[error("image payload is not valid base64")]
    InvalidBase64,
    #[error("image payload is not a decodable raster image")]
    Undecodable,
    #[error("malformed data URI")]
    MalformedDataUri,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no image loaded")]
    NoImage,
    #[error("an enhancement is already in progress")]
    Busy,
    #[error("history entry {0} not found")]
    UnknownHistoryEntry(usize),
    #[error("no enhanced image to work with")]
    NothingEnhanced,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Enhance(#[from] EnhanceError),
    #[error("event log write failed: {0}")]
    EventLog(String),
}
