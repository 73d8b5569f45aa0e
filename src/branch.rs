use crate::autonomous::{AutoReport, Autopilot, AutopilotConfig};
use crate::computer::Computer;
use crate::error::ExecError;
use crate::model::{ModelClient, ToolSpec};
use crate::safety::SafetyGate;
use crate::store::TrajectoryStore;
use crate::turn::TurnRunner;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Provisions a fresh, exclusively-owned execution surface for one branch.
/// The environment-cloning service behind it (snapshot fork, container
/// spawn) is an external collaborator.
#[async_trait]
pub trait ComputerFactory: Send + Sync {
    async fn provision(&self, branch: &str) -> Result<Box<dyn Computer>, ExecError>;
}

#[derive(Clone, Debug)]
pub struct BranchSpec {
    pub name: String,
    pub instruction: String,
}

impl BranchSpec {
    pub fn new(name: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionMode {
    /// Wait for every branch.
    All,
    /// Stop as soon as one branch finishes; the rest are aborted.
    First,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BranchStatus {
    Completed,
    Failed,
    Aborted,
}

#[derive(Clone, Debug)]
pub struct BranchOutcome {
    pub branch: String,
    pub status: BranchStatus,
    pub report: Option<AutoReport>,
    pub error: Option<String>,
}

/// Runs several independent conversations concurrently, one strategy per
/// branch. Each branch owns its own Conversation State and its own surface;
/// nothing is shared between them but the task context.
pub struct BranchRunner<M: ModelClient + Clone + Send + Sync + 'static> {
    factory: Arc<dyn ComputerFactory>,
    model: M,
    store: Option<Arc<dyn TrajectoryStore>>,
    gates: Arc<dyn Fn() -> SafetyGate + Send + Sync>,
    cfg: AutopilotConfig,
    mode: CompletionMode,
}

impl<M: ModelClient + Clone + Send + Sync + 'static> BranchRunner<M> {
    pub fn new(factory: Arc<dyn ComputerFactory>, model: M, cfg: AutopilotConfig) -> Self {
        Self {
            factory,
            model,
            store: None,
            gates: Arc::new(SafetyGate::default),
            cfg,
            mode: CompletionMode::All,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn TrajectoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Gate constructor invoked once per branch (gates hold per-call state
    /// and cannot be shared).
    pub fn with_gates(mut self, gates: Arc<dyn Fn() -> SafetyGate + Send + Sync>) -> Self {
        self.gates = gates;
        self
    }

    pub fn with_mode(mut self, mode: CompletionMode) -> Self {
        self.mode = mode;
        self
    }

    fn compose_task(context: &str, instruction: &str) -> String {
        format!(
            "SHARED CONTEXT: {}\n\nBRANCH-SPECIFIC INSTRUCTION: {}\n\n\
             When you believe you have completed your task, use the 'done' tool \
             to indicate completion and provide a reason.",
            context, instruction
        )
    }

    /// Run every branch against the shared context; results keyed by branch
    /// name. In `First` mode the unfinished branches come back `Aborted`.
    pub async fn run_branches(
        &self,
        context: &str,
        branches: Vec<BranchSpec>,
    ) -> BTreeMap<String, BranchOutcome> {
        let mut set = JoinSet::new();
        let mut names: HashMap<tokio::task::Id, String> = HashMap::new();

        for spec in branches {
            let factory = self.factory.clone();
            let model = self.model.clone();
            let store = self.store.clone();
            let gate = (self.gates)();
            let cfg = self.cfg.clone();
            let task = Self::compose_task(context, &spec.instruction);
            let name = spec.name.clone();

            info!(branch = %name, "starting branch");
            let handle = set.spawn(async move {
                let computer = match factory.provision(&name).await {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(branch = %name, "provisioning failed: {}", e);
                        return BranchOutcome {
                            branch: name,
                            status: BranchStatus::Failed,
                            report: None,
                            error: Some(e.to_string()),
                        };
                    }
                };
                let mut runner =
                    TurnRunner::new(computer, model, gate).with_session(name.clone());
                if let Some(store) = store {
                    runner = runner.with_store(store);
                }
                let tools = vec![ToolSpec::computer_for(runner.computer().as_ref())];
                let pilot = Autopilot::new(runner, cfg);
                match pilot.run(&task, tools).await {
                    Ok((_, report)) => BranchOutcome {
                        branch: name,
                        status: BranchStatus::Completed,
                        report: Some(report),
                        error: None,
                    },
                    Err(e) => BranchOutcome {
                        branch: name,
                        status: BranchStatus::Failed,
                        report: None,
                        error: Some(e.to_string()),
                    },
                }
            });
            names.insert(handle.id(), spec.name);
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    names.remove(&id);
                    info!(branch = %outcome.branch, status = ?outcome.status, "branch finished");
                    results.insert(outcome.branch.clone(), outcome);
                    if self.mode == CompletionMode::First {
                        set.abort_all();
                    }
                }
                Err(join_err) => {
                    if let Some(name) = names.remove(&join_err.id()) {
                        let outcome = BranchOutcome {
                            branch: name.clone(),
                            status: BranchStatus::Aborted,
                            report: None,
                            error: (!join_err.is_cancelled())
                                .then(|| join_err.to_string()),
                        };
                        results.insert(name, outcome);
                    }
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::computer::Observation;
    use crate::convo::Item;
    use crate::error::ModelError;
    use crate::model::ModelResponse;
    use std::time::Duration;

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

    struct IdleFactory;

    #[async_trait]
    impl ComputerFactory for IdleFactory {
        async fn provision(&self, _branch: &str) -> Result<Box<dyn Computer>, ExecError> {
            Ok(Box::new(IdleComputer))
        }
    }

    /// Calls `done` on the first exchange; slow when the branch instruction
    /// says so.
    #[derive(Clone)]
    struct OneShotDone;

    #[async_trait]
    impl crate::model::ModelClient for OneShotDone {
        async fn create_response(
            &self,
            input: &[Item],
            _tools: &[ToolSpec],
        ) -> Result<ModelResponse, ModelError> {
            let opening = input[0].message_text().unwrap_or_default();
            if opening.contains("slow") {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            let already_done = input
                .iter()
                .any(|i| matches!(i, Item::FunctionCallOutput { .. }));
            let items = if already_done {
                vec![Item::assistant("finished")]
            } else {
                vec![Item::FunctionCall {
                    call_id: "f-done".into(),
                    name: "done".into(),
                    arguments: r#"{"reason": "branch finished"}"#.into(),
                }]
            };
            Ok(ModelResponse {
                id: "resp".into(),
                items,
            })
        }
    }

    fn runner(mode: CompletionMode) -> BranchRunner<OneShotDone> {
        BranchRunner::new(
            Arc::new(IdleFactory),
            OneShotDone,
            AutopilotConfig {
                max_steps: 3,
                step_delay: Duration::from_millis(0),
            },
        )
        .with_mode(mode)
    }

    #[tokio::test]
    async fn all_mode_waits_for_every_branch() {
        let results = runner(CompletionMode::All)
            .run_branches(
                "compare checkout flows",
                vec![
                    BranchSpec::new("branch-0", "use the search bar"),
                    BranchSpec::new("branch-1", "browse the categories"),
                ],
            )
            .await;

        assert_eq!(results.len(), 2);
        for outcome in results.values() {
            assert_eq!(outcome.status, BranchStatus::Completed);
            let report = outcome.report.as_ref().unwrap();
            assert_eq!(report.done_reason.as_deref(), Some("branch finished"));
        }
    }

    #[tokio::test]
    async fn first_mode_aborts_the_stragglers() {
        let results = runner(CompletionMode::First)
            .run_branches(
                "race",
                vec![
                    BranchSpec::new("branch-fast", "answer immediately"),
                    BranchSpec::new("branch-slow", "slow branch, stall for a while"),
                ],
            )
            .await;

        assert_eq!(results["branch-fast"].status, BranchStatus::Completed);
        assert_eq!(results["branch-slow"].status, BranchStatus::Aborted);
        assert!(results["branch-slow"].error.is_none());
    }

    #[test]
    fn task_composition_includes_context_and_instruction() {
        let task = BranchRunner::<OneShotDone>::compose_task("ctx", "do it differently");
        assert!(task.starts_with("SHARED CONTEXT: ctx"));
        assert!(task.contains("BRANCH-SPECIFIC INSTRUCTION: do it differently"));
        assert!(task.contains("'done' tool"));
    }
}
