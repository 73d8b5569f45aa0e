use crate::computer::Computer;
use crate::convo::{Item, Transcript};
use crate::error::TurnError;
use crate::model::{ModelClient, ToolSpec};
use crate::turn::TurnRunner;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Injected between turns to keep the agent working without user input.
const CONTINUATION_PROMPT: &str = "Continue with the task. Based on what you've done so far, \
decide what to do next and take action. Exercise your best judgment. \
If you believe you have completed the task, call the 'done' tool \
to indicate completion.";

#[derive(Clone, Debug)]
pub struct AutopilotConfig {
    /// Upper bound on autonomous turns.
    pub max_steps: usize,
    /// Pause between turns.
    pub step_delay: Duration,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            step_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AutoReport {
    pub steps: usize,
    /// The reason the agent gave when it called `done`, if it did.
    pub done_reason: Option<String>,
    pub last_message: Option<String>,
}

/// Runs turn after turn on one task without operator input, stopping when
/// the agent calls the `done` tool or the step budget runs out.
pub struct Autopilot<C: Computer, M: ModelClient> {
    runner: TurnRunner<C, M>,
    cfg: AutopilotConfig,
}

impl<C: Computer, M: ModelClient> Autopilot<C, M> {
    pub fn new(runner: TurnRunner<C, M>, cfg: AutopilotConfig) -> Self {
        Self { runner, cfg }
    }

    pub fn runner(&self) -> &TurnRunner<C, M> {
        &self.runner
    }

    fn done_reason(items: &[Item]) -> Option<String> {
        items.iter().find_map(|i| match i {
            Item::FunctionCall {
                name, arguments, ..
            } if name == "done" => Some(
                serde_json::from_str::<Value>(arguments)
                    .ok()
                    .and_then(|v| v["reason"].as_str().map(str::to_string))
                    .unwrap_or_else(|| "Task completed".to_string()),
            ),
            _ => None,
        })
    }

    /// Run the task to completion. The `done` tool is registered alongside
    /// whatever the caller declared; the computer tool itself is the
    /// caller's to include.
    pub async fn run(
        &self,
        initial_task: &str,
        mut tools: Vec<ToolSpec>,
    ) -> Result<(Transcript, AutoReport), TurnError> {
        if !tools.iter().any(|t| t.name() == Some("done")) {
            tools.push(ToolSpec::done());
        }

        info!(session = %self.runner.session(), "starting task: {}", initial_task);
        self.runner.record_start_state().await;

        let mut transcript = Transcript::opening(initial_task);
        let mut report = AutoReport::default();

        for step in 0..self.cfg.max_steps {
            if step > 0 {
                sleep(self.cfg.step_delay).await;
                transcript.push(Item::user(CONTINUATION_PROMPT));
            }

            let before = transcript.len();
            let turn = self.runner.run_full_turn(&mut transcript, &tools).await?;
            report.steps = step + 1;
            if turn.final_message.is_some() {
                report.last_message = turn.final_message;
            }

            if let Some(reason) = Self::done_reason(&transcript.items()[before..]) {
                info!(session = %self.runner.session(), "agent called 'done': {}", reason);
                report.done_reason = Some(reason);
                return Ok((transcript, report));
            }
        }

        warn!(
            session = %self.runner.session(),
            "reached maximum {} steps (agent did not call 'done')",
            self.cfg.max_steps
        );
        Ok((transcript, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::computer::Observation;
    use crate::error::{ExecError, ModelError};
    use crate::model::ModelResponse;
    use crate::safety::SafetyGate;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedModel {
        responses: Mutex<VecDeque<Vec<Item>>>,
        seen_tools: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Vec<Item>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                seen_tools: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn create_response(
            &self,
            _input: &[Item],
            tools: &[ToolSpec],
        ) -> Result<ModelResponse, ModelError> {
            self.seen_tools.lock().unwrap().push(
                tools
                    .iter()
                    .filter_map(|t| t.name().map(str::to_string))
                    .collect(),
            );
            let items = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ModelError::Malformed("script exhausted".into()))?;
            Ok(ModelResponse {
                id: "resp".into(),
                items,
            })
        }
    }

    struct IdleComputer;

    #[async_trait]
    impl Computer for IdleComputer {
        async fn execute(&self, _action: &Action) -> Result<Observation, ExecError> {
            Ok(Observation::new("c2hvdA==", None))
        }

        async fn current_observation(&self) -> Result<Observation, ExecError> {
            Ok(Observation::new("c2hvdA==", None))
        }
    }

    fn autopilot(model: ScriptedModel, max_steps: usize) -> Autopilot<IdleComputer, ScriptedModel> {
        Autopilot::new(
            TurnRunner::new(IdleComputer, model, SafetyGate::default()),
            AutopilotConfig {
                max_steps,
                step_delay: Duration::from_millis(0),
            },
        )
    }

    #[tokio::test]
    async fn stops_when_the_agent_calls_done() {
        let model = ScriptedModel::new(vec![
            vec![Item::assistant("let me look around")],
            vec![
                Item::FunctionCall {
                    call_id: "f1".into(),
                    name: "done".into(),
                    arguments: r#"{"reason": "all set"}"#.into(),
                },
            ],
            vec![Item::assistant("wrapping up")],
        ]);
        let pilot = autopilot(model, 10);

        let (transcript, report) = pilot.run("tidy the desktop", vec![]).await.unwrap();

        assert_eq!(report.done_reason.as_deref(), Some("all set"));
        assert_eq!(report.steps, 2);
        // the done call still received exactly one (stub) output
        let done_outputs = transcript
            .items()
            .iter()
            .filter(|i| matches!(i, Item::FunctionCallOutput { call_id, .. } if call_id.as_str() == "f1"))
            .count();
        assert_eq!(done_outputs, 1);
    }

    #[tokio::test]
    async fn injects_continuations_until_the_step_budget_runs_out() {
        let model = ScriptedModel::new(vec![
            vec![Item::assistant("thinking")],
            vec![Item::assistant("still thinking")],
            vec![Item::assistant("no progress")],
        ]);
        let pilot = autopilot(model, 3);

        let (transcript, report) = pilot.run("impossible task", vec![]).await.unwrap();

        assert_eq!(report.steps, 3);
        assert!(report.done_reason.is_none());
        assert_eq!(report.last_message.as_deref(), Some("no progress"));
        let continuations = transcript
            .items()
            .iter()
            .filter(|i| {
                i.message_text()
                    .map(|t| t.starts_with("Continue with the task"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(continuations, 2);
    }

    #[tokio::test]
    async fn registers_the_done_tool_exactly_once() {
        let model = ScriptedModel::new(vec![vec![Item::assistant("ok")]]);
        let pilot = autopilot(model, 1);
        pilot
            .run("task", vec![ToolSpec::done()])
            .await
            .unwrap();
        let seen = pilot.runner().model().seen_tools.lock().unwrap().clone();
        assert_eq!(seen[0].iter().filter(|n| n.as_str() == "done").count(), 1);
    }
}
