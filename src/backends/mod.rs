//! Interchangeable execution surfaces behind the [`Computer`] contract.

pub mod chromium;
pub mod docker;
pub mod remote;

pub use chromium::{Chromium, ChromiumComputer, ChromiumConfig};
pub use docker::{DockerComputer, DockerConfig};
pub use remote::{RemoteComputer, RemoteConfig};

use crate::computer::Computer;
use crate::error::ExecError;
use serde::Deserialize;
use std::time::Duration;

fn default_true() -> bool {
    true
}

fn default_display() -> String {
    ":1".into()
}

fn default_dimensions() -> (u32, u32) {
    (1280, 800)
}

/// Registry mapping a backend name to its constructor. Tagged so hosts can
/// pick and parameterize a surface from plain JSON config:
///
/// ```json
/// {"backend": "docker", "container": "cua-desktop"}
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendConfig {
    Chromium {
        #[serde(default = "default_true")]
        headless: bool,
        #[serde(default)]
        user_agent: Option<String>,
        /// Devtools websocket of an existing browser; launches a fresh one
        /// when absent.
        #[serde(default)]
        ws_url: Option<String>,
        #[serde(default = "default_dimensions")]
        dimensions: (u32, u32),
    },
    Docker {
        container: String,
        #[serde(default = "default_display")]
        display: String,
        #[serde(default = "default_dimensions")]
        dimensions: (u32, u32),
    },
    Remote {
        endpoint: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_dimensions")]
        dimensions: (u32, u32),
    },
}

impl BackendConfig {
    /// Construct the configured surface.
    pub async fn connect(self) -> Result<Box<dyn Computer>, ExecError> {
        match self {
            BackendConfig::Chromium {
                headless,
                user_agent,
                ws_url,
                dimensions,
            } => {
                let cfg = ChromiumConfig {
                    headless,
                    user_agent,
                    dimensions,
                };
                let computer = match ws_url.as_deref().filter(|u| !u.trim().is_empty()) {
                    Some(ws) => ChromiumComputer::connect(ws, cfg).await?,
                    None => ChromiumComputer::launch(cfg).await?,
                };
                Ok(Box::new(computer))
            }
            BackendConfig::Docker {
                container,
                display,
                dimensions,
            } => Ok(Box::new(DockerComputer::new(DockerConfig {
                container,
                display,
                dimensions,
            }))),
            BackendConfig::Remote {
                endpoint,
                api_key,
                dimensions,
            } => Ok(Box::new(RemoteComputer::new(RemoteConfig {
                endpoint,
                api_key,
                timeout: Duration::from_secs(15),
                dimensions,
                environment: "linux".into(),
            }))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_parses_tagged_configs() {
        let cfg: BackendConfig =
            serde_json::from_str(r#"{"backend": "docker", "container": "cua-desktop"}"#).unwrap();
        match cfg {
            BackendConfig::Docker {
                container, display, ..
            } => {
                assert_eq!(container, "cua-desktop");
                assert_eq!(display, ":1");
            }
            other => panic!("unexpected: {:?}", other),
        }

        let cfg: BackendConfig = serde_json::from_str(
            r#"{"backend": "remote", "endpoint": "https://desktop.example/v1/actions"}"#,
        )
        .unwrap();
        assert!(matches!(cfg, BackendConfig::Remote { .. }));

        let cfg: BackendConfig = serde_json::from_str(r#"{"backend": "chromium"}"#).unwrap();
        match cfg {
            BackendConfig::Chromium {
                headless,
                dimensions,
                ..
            } => {
                assert!(headless);
                assert_eq!(dimensions, (1280, 800));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = serde_json::from_str::<BackendConfig>(r#"{"backend": "holodeck"}"#);
        assert!(err.is_err());
    }
}
