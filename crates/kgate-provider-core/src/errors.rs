use std::error::Error;
use std::fmt;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Which request shape of the fallback ladder was on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptStage {
    Primary,
    Flattened,
    Minimal,
}

impl AttemptStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStage::Primary => "primary",
            AttemptStage::Flattened => "flattened",
            AttemptStage::Minimal => "minimal",
        }
    }

    /// The next, smaller request shape.
    pub fn next(&self) -> Option<AttemptStage> {
        match self {
            AttemptStage::Primary => Some(AttemptStage::Flattened),
            AttemptStage::Flattened => Some(AttemptStage::Minimal),
            AttemptStage::Minimal => None,
        }
    }
}

impl fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum ProviderError {
    Unsupported(&'static str),
    InvalidConfig(String),
    MissingCredentialField(&'static str),
    InvalidRequest(String),
    /// Reading or writing a credential file failed.
    Credential(String),
    Refresh(String),
    /// Upstream answered with an error status (or a rejection body).
    Upstream {
        stage: AttemptStage,
        status: u16,
        message: String,
    },
    /// No HTTP response was obtained.
    Transport {
        stage: AttemptStage,
        message: String,
    },
    Other(String),
}

impl ProviderError {
    /// HTTP status a gateway should answer with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ProviderError::InvalidRequest(_) => 400,
            ProviderError::Unsupported(_) => 501,
            ProviderError::Upstream { status, .. } if *status >= 400 => *status,
            ProviderError::Upstream { .. } | ProviderError::Transport { .. } => 502,
            ProviderError::Refresh(_) => 401,
            ProviderError::InvalidConfig(_)
            | ProviderError::MissingCredentialField(_)
            | ProviderError::Credential(_)
            | ProviderError::Other(_) => 500,
        }
    }

    pub fn stage(&self) -> Option<AttemptStage> {
        match self {
            ProviderError::Upstream { stage, .. } | ProviderError::Transport { stage, .. } => {
                Some(*stage)
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Unsupported(_) => "unsupported",
            ProviderError::InvalidConfig(_) => "invalid_config",
            ProviderError::MissingCredentialField(_) => "missing_credential_field",
            ProviderError::InvalidRequest(_) => "invalid_request_error",
            ProviderError::Credential(_) => "credential_error",
            ProviderError::Refresh(_) => "refresh_error",
            ProviderError::Upstream { .. } => "upstream_error",
            ProviderError::Transport { .. } => "transport_error",
            ProviderError::Other(_) => "internal_error",
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Unsupported(what) => write!(f, "unsupported: {what}"),
            ProviderError::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            ProviderError::MissingCredentialField(field) => {
                write!(f, "missing credential field: {field}")
            }
            ProviderError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            ProviderError::Credential(msg) => write!(f, "credential: {msg}"),
            ProviderError::Refresh(msg) => write!(f, "token refresh failed: {msg}"),
            ProviderError::Upstream {
                stage,
                status,
                message,
            } => write!(f, "upstream {status} during {stage} attempt: {message}"),
            ProviderError::Transport { stage, message } => {
                write!(f, "transport error during {stage} attempt: {message}")
            }
            ProviderError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl Error for ProviderError {}
