//! Error taxonomy for every remote-side and inbound failure.
//!
//! Transport Client failures come in three flavours that the provider's
//! protocol keeps apart: the HTTP layer failed (`Transport`), the envelope
//! carried a non-zero status code (`Validation`), or the envelope reported an
//! `errors` list (`Remote`). The inbound path adds `Auth` and `NotFound`.

use thiserror::Error;

/// Coarse classification used by callers to pick a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Validation,
    Remote,
    Auth,
    NotFound,
    Host,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network or HTTP-layer failure with no usable envelope.
    #[error("Unable to connect to the OHT service: {detail}")]
    Transport { status: Option<u16>, detail: String },

    /// The envelope status code was non-zero.
    #[error("OHT service returned validation error: #{code} {message}")]
    Validation { code: i64, message: String },

    /// The provider executed the call but reported errors.
    #[error("OHT service returned following error: {message}")]
    Remote { message: String, errors: Vec<String> },

    /// A local language tag has no provider counterpart.
    #[error("Language '{0}' is not supported by OHT")]
    UnsupportedLanguage(String),

    /// Callback token missing or not matching.
    #[error("Callback authentication failed for job item {job_item_id}")]
    Auth { job_item_id: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Failure reported by a host collaborator (store, converter).
    #[error("Host error: {0}")]
    Host(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn transport(status: Option<u16>, detail: impl Into<String>) -> Self {
        GatewayError::Transport {
            status,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Transport { .. } => ErrorKind::Transport,
            GatewayError::Validation { .. } | GatewayError::UnsupportedLanguage(_) => {
                ErrorKind::Validation
            }
            GatewayError::Remote { .. } => ErrorKind::Remote,
            GatewayError::Auth { .. } => ErrorKind::Auth,
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::Host(_) => ErrorKind::Host,
        }
    }

    /// Whether repeating the same read could succeed.
    ///
    /// Only transport failures qualify: connection errors and timeouts (no
    /// status), rate limiting (429) and server errors (5xx). Validation and
    /// remote errors are answers, not outages.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport { status: None, .. } => true,
            GatewayError::Transport {
                status: Some(status),
                ..
            } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let detail = if err.is_timeout() {
            format!("request timed out: {}", err)
        } else {
            err.to_string()
        };
        GatewayError::Transport { status, detail }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
