use crate::action::Action;
use crate::computer::{Computer, Observation};
use crate::error::ExecError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct RemoteConfig {
    /// Action endpoint of the remote desktop session.
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub dimensions: (u32, u32),
    pub environment: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8787/v1/actions".into(),
            api_key: None,
            timeout: Duration::from_secs(15),
            dimensions: (1280, 800),
            environment: "linux".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RemoteObservation {
    /// base64 PNG.
    screenshot: String,
    #[serde(default)]
    url: Option<String>,
}

/// Remote desktop/browser session behind an HTTP action endpoint: one
/// action per request, the settled observation in the reply. The session
/// lifecycle (provisioning, teardown) belongs to whoever handed us the
/// endpoint.
pub struct RemoteComputer {
    http: reqwest::Client,
    cfg: RemoteConfig,
}

impl RemoteComputer {
    pub fn new(cfg: RemoteConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, cfg }
    }

    fn request_body(action: &Action) -> Value {
        json!({ "action": action })
    }

    async fn dispatch(&self, action: &Action) -> Result<Observation, ExecError> {
        let mut req = self
            .http
            .post(&self.cfg.endpoint)
            .json(&Self::request_body(action));
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ExecError::Timeout(self.cfg.timeout)
            } else {
                ExecError::BackendUnavailable(format!("remote endpoint unreachable: {}", e))
            }
        })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ExecError::Backend(format!("truncated response: {}", e)))?;
        match status.as_u16() {
            200..=299 => {
                let obs: RemoteObservation = serde_json::from_str(&body)
                    .map_err(|e| ExecError::Backend(format!("bad observation payload: {}", e)))?;
                Ok(Observation::new(obs.screenshot, obs.url))
            }
            404 => Err(ExecError::TargetNotFound(body)),
            422 => Err(ExecError::Unsupported(action.kind())),
            502 | 503 | 504 => Err(ExecError::BackendUnavailable(format!(
                "remote session gone ({}): {}",
                status, body
            ))),
            _ => Err(ExecError::Backend(format!("{}: {}", status, body))),
        }
    }
}

#[async_trait]
impl Computer for RemoteComputer {
    async fn execute(&self, action: &Action) -> Result<Observation, ExecError> {
        self.dispatch(action).await
    }

    async fn current_observation(&self) -> Result<Observation, ExecError> {
        self.dispatch(&Action::Screenshot).await
    }

    fn dimensions(&self) -> (u32, u32) {
        self.cfg.dimensions
    }

    fn environment(&self) -> &str {
        &self.cfg.environment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_wraps_the_tagged_action() {
        let body = RemoteComputer::request_body(&Action::Click {
            x: 24,
            y: 150,
            button: Default::default(),
        });
        assert_eq!(body["action"]["type"], "click");
        assert_eq!(body["action"]["x"], 24);
        assert_eq!(body["action"]["button"], "left");
    }

    #[test]
    fn observation_payload_parses_without_url() {
        let obs: RemoteObservation =
            serde_json::from_str(r#"{"screenshot": "aGk="}"#).unwrap();
        assert_eq!(obs.screenshot, "aGk=");
        assert!(obs.url.is_none());
    }
}
