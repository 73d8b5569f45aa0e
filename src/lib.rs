pub mod action;
pub mod autonomous;
pub mod backends;
pub mod branch;
pub mod computer;
pub mod convo;
pub mod error;
pub mod model;
pub mod router;
pub mod safety;
pub mod store;
pub mod turn;

pub use action::{Action, CallId, MouseButton, Point, SafetyCheck};
pub use autonomous::{AutoReport, Autopilot, AutopilotConfig};
pub use backends::BackendConfig;
pub use branch::{BranchRunner, BranchSpec, CompletionMode, ComputerFactory};
pub use computer::{Computer, Observation};
pub use convo::{Item, Transcript};
pub use error::{ExecError, ModelError, TurnError};
pub use model::{Backoff, HostedModel, ModelClient, ModelConfig, ToolSpec};
pub use router::FunctionRouter;
pub use safety::{Acknowledger, SafetyGate, SafetyPolicy};
pub use store::{DiskStore, NullStore, TrajectoryStore};
pub use turn::{TurnReport, TurnRunner};
