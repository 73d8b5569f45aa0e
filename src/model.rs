use crate::computer::Computer;
use crate::convo::Item;
use crate::error::ModelError;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tracing::{debug, warn};

/// A declared tool: the hosted computer-use tool or a plain function schema.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolSpec {
    #[serde(rename = "computer_use_preview")]
    Computer {
        display_width: u32,
        display_height: u32,
        environment: String,
    },
    Function {
        name: String,
        description: String,
        parameters: Value,
    },
}

impl ToolSpec {
    /// The computer tool advertising a concrete surface's display.
    pub fn computer_for(computer: &dyn Computer) -> Self {
        let (w, h) = computer.dimensions();
        ToolSpec::Computer {
            display_width: w,
            display_height: h,
            environment: computer.environment().to_string(),
        }
    }

    /// The completion tool the autonomous driver registers.
    pub fn done() -> Self {
        ToolSpec::Function {
            name: "done".into(),
            description: "Call this function when you have completed your task and want to stop."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "reason": {
                        "type": "string",
                        "description": "Reason for completing the task.",
                    },
                },
                "additionalProperties": false,
                "required": ["reason"],
            }),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ToolSpec::Function { name, .. } => Some(name),
            ToolSpec::Computer { .. } => None,
        }
    }
}

/// One model step: an ordered list of message/call items.
#[derive(Clone, Debug)]
pub struct ModelResponse {
    pub id: String,
    pub items: Vec<Item>,
}

/// The model service boundary: full conversation plus tool schema in,
/// ordered item list out.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn create_response(
        &self,
        input: &[Item],
        tools: &[ToolSpec],
    ) -> Result<ModelResponse, ModelError>;
}

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            model: env::var("OPENAI_CUA_MODEL").unwrap_or_else(|_| "computer-use-preview".into()),
        }
    }
}

/// Retry policy for the model exchange. Off by default: the exchange fails
/// straight to the caller unless a retry budget is supplied.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    pub max_retries: u32,
    pub initial_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(100),
        }
    }
}

impl Backoff {
    pub fn retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }
}

/// Responses-style HTTP client for a hosted computer-use model.
#[derive(Clone)]
pub struct HostedModel {
    http: reqwest::Client,
    cfg: ModelConfig,
    backoff: Backoff,
}

impl HostedModel {
    pub fn new(cfg: ModelConfig) -> Result<Self> {
        if cfg.api_key.is_empty() {
            bail!("OPENAI_API_KEY missing");
        }
        Ok(Self {
            http: reqwest::Client::new(),
            cfg,
            backoff: Backoff::default(),
        })
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    async fn attempt(&self, body: &Value) -> Result<ModelResponse, ModelError> {
        let url = format!("{}/responses", self.cfg.api_base);
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.cfg.api_key)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(ModelError::Service {
                status: status.as_u16(),
                body: text,
            });
        }
        let v: Value = serde_json::from_str(&text)
            .map_err(|e| ModelError::Malformed(format!("not json: {}", e)))?;
        Self::parse_response(v)
    }

    /// Parse `{ id, output: [...] }`, keeping the items we understand in
    /// order and skipping the rest (reasoning traces and future kinds).
    fn parse_response(v: Value) -> Result<ModelResponse, ModelError> {
        let id = v
            .get("id")
            .and_then(|x| x.as_str())
            .ok_or_else(|| ModelError::Malformed("missing response id".into()))?
            .to_string();
        let outputs = v
            .get("output")
            .and_then(|x| x.as_array())
            .ok_or_else(|| ModelError::Malformed("missing output array".into()))?;

        let mut items = Vec::with_capacity(outputs.len());
        for o in outputs {
            match serde_json::from_value::<Item>(o.clone()) {
                Ok(item) => items.push(item),
                Err(_) => {
                    let kind = o.get("type").and_then(|t| t.as_str()).unwrap_or("?");
                    debug!(kind, "skipping unhandled output item");
                }
            }
        }
        Ok(ModelResponse { id, items })
    }
}

#[async_trait]
impl ModelClient for HostedModel {
    async fn create_response(
        &self,
        input: &[Item],
        tools: &[ToolSpec],
    ) -> Result<ModelResponse, ModelError> {
        let body = json!({
            "model": self.cfg.model,
            "truncation": "auto",
            "input": input,
            "tools": tools,
        });

        let mut attempt = 0;
        let mut delay = self.backoff.initial_delay;
        loop {
            match self.attempt(&body).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() && attempt < self.backoff.max_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max = self.backoff.max_retries,
                        "retrying model request after error: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;

    #[test]
    fn parses_output_items_in_order_and_skips_unknown() {
        let v = json!({
            "id": "resp_1",
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "role": "assistant",
                 "content": [{"type": "output_text", "text": "clicking"}]},
                {"type": "computer_call", "call_id": "c1",
                 "action": {"type": "click", "x": 24, "y": 150},
                 "pending_safety_checks": []}
            ]
        });
        let resp = HostedModel::parse_response(v).unwrap();
        assert_eq!(resp.id, "resp_1");
        assert_eq!(resp.items.len(), 2);
        assert_eq!(resp.items[0].message_text().as_deref(), Some("clicking"));
        match &resp.items[1] {
            Item::ComputerCall { action, .. } => {
                assert!(matches!(action, Action::Click { x: 24, y: 150, .. }))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn missing_output_is_malformed() {
        let err = HostedModel::parse_response(json!({"id": "resp_2"})).unwrap_err();
        assert!(matches!(err, ModelError::Malformed(_)));
    }

    #[test]
    fn tool_specs_serialize_to_wire_tags() {
        let tools = vec![
            ToolSpec::Computer {
                display_width: 1280,
                display_height: 800,
                environment: "browser".into(),
            },
            ToolSpec::done(),
        ];
        let v = serde_json::to_value(&tools).unwrap();
        assert_eq!(v[0]["type"], "computer_use_preview");
        assert_eq!(v[0]["display_width"], 1280);
        assert_eq!(v[1]["type"], "function");
        assert_eq!(v[1]["name"], "done");
        assert_eq!(v[1]["parameters"]["required"][0], "reason");
    }
}
