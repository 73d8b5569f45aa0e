use crate::computer::Computer;
use crate::convo::{CallOutput, Item, Role, Transcript};
use crate::error::TurnError;
use crate::model::{ModelClient, ToolSpec};
use crate::router::FunctionRouter;
use crate::safety::SafetyGate;
use crate::store::TrajectoryStore;
use nanoid::nanoid;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a completed turn did.
#[derive(Clone, Debug, Default)]
pub struct TurnReport {
    pub model_calls: usize,
    pub actions: usize,
    pub functions: usize,
    pub final_message: Option<String>,
}

/// The agent loop proper: one conversation, one execution surface, strictly
/// serialized dispatch.
///
/// A runner owns its surface for the lifetime of the conversation; surfaces
/// hold exclusive state and are never shared across conversations.
pub struct TurnRunner<C: Computer, M: ModelClient> {
    computer: C,
    model: M,
    gate: SafetyGate,
    router: FunctionRouter,
    session: String,
    store: Option<Arc<dyn TrajectoryStore>>,
    shot_seq: AtomicUsize,
}

impl<C: Computer, M: ModelClient> TurnRunner<C, M> {
    pub fn new(computer: C, model: M, gate: SafetyGate) -> Self {
        Self {
            computer,
            model,
            gate,
            router: FunctionRouter,
            session: nanoid!(),
            store: None,
            shot_seq: AtomicUsize::new(0),
        }
    }

    /// Sink for the conversation record and screenshots. Best-effort: store
    /// failures never fail the turn.
    pub fn with_store(mut self, store: Arc<dyn TrajectoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the generated session key (branch runs use the branch name).
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = session.into();
        self
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn computer(&self) -> &C {
        &self.computer
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn gate(&self) -> &SafetyGate {
        &self.gate
    }

    async fn persist(&self, transcript: &Transcript) {
        if let Some(store) = &self.store {
            let _ = store.save_transcript(&self.session, transcript).await;
        }
    }

    /// Capture and persist the surface's state before any action. Best
    /// effort, like every other store interaction.
    pub async fn record_start_state(&self) {
        let Some(store) = &self.store else { return };
        match self.computer.current_observation().await {
            Ok(obs) => {
                let _ = store
                    .save_screenshot(&self.session, None, &obs.screenshot_b64)
                    .await;
            }
            Err(e) => debug!(session = %self.session, "no start observation: {}", e),
        }
    }

    /// Run one full turn: request model steps and dispatch the requested
    /// work until the model answers with a plain response carrying no
    /// action or function calls.
    ///
    /// Items are appended in issuance order, and every call's result lands
    /// immediately after the call item, before the next model request.
    /// Dropping the returned future between dispatches leaves the
    /// transcript consistent and resumable: every appended result
    /// corresponds to a fully completed request.
    pub async fn run_full_turn(
        &self,
        transcript: &mut Transcript,
        tools: &[ToolSpec],
    ) -> Result<TurnReport, TurnError> {
        let mut report = TurnReport::default();

        loop {
            let response = self.model.create_response(transcript.items(), tools).await?;
            report.model_calls += 1;
            debug!(
                session = %self.session,
                response = %response.id,
                items = response.items.len(),
                "model step"
            );

            let mut saw_call = false;
            for item in response.items {
                transcript.push(item.clone());
                match item {
                    Item::Message {
                        role: Role::Assistant,
                        ..
                    } => {
                        if let Some(text) = item.message_text() {
                            info!(session = %self.session, "assistant: {}", text);
                            report.final_message = Some(text);
                        }
                    }
                    Item::ComputerCall {
                        call_id,
                        action,
                        pending_safety_checks,
                    } => {
                        saw_call = true;
                        report.actions += 1;

                        let acked = match self
                            .gate
                            .clear(&call_id, &action, &pending_safety_checks)
                            .await
                        {
                            Ok(acked) => acked,
                            Err(refused) => {
                                self.persist(transcript).await;
                                return Err(TurnError::SafetyRefused {
                                    call_id,
                                    checks: refused.checks,
                                });
                            }
                        };

                        info!(
                            session = %self.session,
                            %call_id,
                            action = action.kind(),
                            "dispatching action"
                        );
                        let output = match self.computer.execute(&action).await {
                            Ok(obs) => {
                                let seq = self.shot_seq.fetch_add(1, Ordering::Relaxed);
                                if let Some(store) = &self.store {
                                    let _ = store
                                        .save_screenshot(
                                            &self.session,
                                            Some(seq),
                                            &obs.screenshot_b64,
                                        )
                                        .await;
                                }
                                CallOutput::screenshot(&obs.screenshot_b64, obs.url)
                            }
                            Err(e) if e.is_fatal() => {
                                warn!(session = %self.session, %call_id, "surface lost: {}", e);
                                self.persist(transcript).await;
                                return Err(TurnError::Fatal {
                                    call_id,
                                    source: e,
                                });
                            }
                            Err(e) => {
                                warn!(session = %self.session, %call_id, "action failed: {}", e);
                                CallOutput::Error {
                                    message: e.to_string(),
                                }
                            }
                        };
                        transcript.push(Item::ComputerCallOutput {
                            call_id,
                            acknowledged_safety_checks: acked,
                            output,
                        });
                    }
                    Item::FunctionCall {
                        call_id,
                        name,
                        arguments,
                    } => {
                        saw_call = true;
                        report.functions += 1;
                        info!(session = %self.session, %call_id, name = %name, "routing function");
                        let output = match self
                            .router
                            .route(&name, &arguments, &self.computer)
                            .await
                        {
                            Ok(out) => out,
                            Err(e) => {
                                self.persist(transcript).await;
                                return Err(TurnError::Fatal {
                                    call_id,
                                    source: e,
                                });
                            }
                        };
                        transcript.push(Item::FunctionCallOutput { call_id, output });
                    }
                    // user/system messages and call outputs never come back
                    // from the model; nothing to do beyond the append.
                    _ => {}
                }
            }

            self.persist(transcript).await;
            if !saw_call {
                return Ok(report);
            }
        }
    }
}
