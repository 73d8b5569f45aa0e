use crate::action::Action;
use crate::error::ExecError;
use async_trait::async_trait;

/// Environment state snapshot returned after executing an action: a
/// screenshot plus whatever metadata the surface can cheaply report.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    /// base64-encoded PNG of the surface.
    pub screenshot_b64: String,
    /// Current URL for browser surfaces, `None` elsewhere.
    pub url: Option<String>,
}

impl Observation {
    pub fn new(screenshot_b64: impl Into<String>, url: Option<String>) -> Self {
        Self {
            screenshot_b64: screenshot_b64.into(),
            url,
        }
    }
}

/// The execution surface contract. One trait, many interchangeable backends
/// (local browser, containerized desktop, remote desktop service).
///
/// Implementations must cover the whole [`Action`] taxonomy; a variant the
/// surface cannot perform fails with [`ExecError::Unsupported`] rather than
/// silently doing nothing. Waiting for the mutation to settle (navigation,
/// animation) before capturing the observation is the backend's job.
///
/// A backend instance holds exclusive state (a browser tab, a VM session)
/// and must not be shared across conversations.
#[async_trait]
pub trait Computer: Send + Sync {
    /// Perform one action and return the fresh observation.
    async fn execute(&self, action: &Action) -> Result<Observation, ExecError>;

    /// Observe the surface without mutating it; the initial state before
    /// any action.
    async fn current_observation(&self) -> Result<Observation, ExecError>;

    /// Display size in pixels, advertised to the model in the tool schema.
    fn dimensions(&self) -> (u32, u32) {
        (1280, 800)
    }

    /// Environment name advertised to the model ("browser", "linux", ...).
    fn environment(&self) -> &str {
        "browser"
    }
}

#[async_trait]
impl<T: Computer + ?Sized> Computer for Box<T> {
    async fn execute(&self, action: &Action) -> Result<Observation, ExecError> {
        (**self).execute(action).await
    }

    async fn current_observation(&self) -> Result<Observation, ExecError> {
        (**self).current_observation().await
    }

    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }

    fn environment(&self) -> &str {
        (**self).environment()
    }
}
