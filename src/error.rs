use crate::action::{CallId, SafetyCheck};
use std::time::Duration;
use thiserror::Error;

/// Failure of a single action against an execution surface.
///
/// Everything except [`ExecError::BackendUnavailable`] is recoverable: the
/// orchestrator folds it into an error-tagged call output and the model is
/// expected to adapt. A lost surface is fatal for the turn.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("action '{0}' is not supported by this backend")]
    Unsupported(&'static str),
    #[error("target not found: {0}")]
    TargetNotFound(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("action timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend failure: {0}")]
    Backend(String),
}

impl ExecError {
    /// True when the execution surface is unusable and the turn must end.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecError::BackendUnavailable(_))
    }
}

/// Failure of the model exchange itself.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model service error {status}: {body}")]
    Service { status: u16, body: String },
    #[error("malformed model response: {0}")]
    Malformed(String),
}

impl ModelError {
    /// Transient failures worth retrying when the caller opted into retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Transport(_) => true,
            ModelError::Service { status, .. } => *status == 429 || *status >= 500,
            ModelError::Malformed(_) => false,
        }
    }
}

/// Terminal outcome of a turn that did not run to a plain model response.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("model exchange failed: {0}")]
    Model(#[from] ModelError),
    #[error("backend unusable while executing {call_id}: {source}")]
    Fatal {
        call_id: CallId,
        #[source]
        source: ExecError,
    },
    /// The operator refused a required safety acknowledgment; the turn is
    /// abandoned with the blocking checks attached.
    #[error("action {call_id} withheld: safety acknowledgment refused")]
    SafetyRefused {
        call_id: CallId,
        checks: Vec<SafetyCheck>,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid screenshot payload: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_backend_unavailable_is_fatal() {
        assert!(ExecError::BackendUnavailable("gone".into()).is_fatal());
        assert!(!ExecError::Unsupported("drag").is_fatal());
        assert!(!ExecError::TargetNotFound("#submit".into()).is_fatal());
        assert!(!ExecError::Timeout(Duration::from_secs(5)).is_fatal());
        assert!(!ExecError::Backend("boom".into()).is_fatal());
    }

    #[test]
    fn retryable_model_errors() {
        assert!(ModelError::Service {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(ModelError::Service {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!ModelError::Service {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!ModelError::Malformed("no output".into()).is_retryable());
    }
}
