use crate::action::Action;
use crate::computer::Computer;
use crate::error::ExecError;
use serde::Deserialize;
use tracing::debug;

/// Fixed result for declared functions with no backend. The caller gave the
/// model a schema but wired nothing up; the model still gets a concrete,
/// documented value rather than an implicit null.
pub const STUB_OUTPUT: &str = "success";

#[derive(Deserialize)]
struct GotoArgs {
    url: String,
}

/// Dispatches model-requested function calls: navigation helpers the
/// executor exposes beyond the core action taxonomy are invoked on it,
/// everything else is answered with [`STUB_OUTPUT`].
#[derive(Clone, Copy, Default)]
pub struct FunctionRouter;

impl FunctionRouter {
    /// Route one function call. Recoverable executor errors become the
    /// function's result text so the model can react; a fatal error
    /// propagates and ends the turn.
    pub async fn route(
        &self,
        name: &str,
        arguments: &str,
        computer: &dyn Computer,
    ) -> Result<String, ExecError> {
        let action = match name {
            "goto" => match serde_json::from_str::<GotoArgs>(arguments) {
                Ok(args) => Action::Goto { url: args.url },
                Err(e) => return Ok(format!("invalid arguments for goto: {}", e)),
            },
            "back" => Action::Back,
            _ => {
                debug!(name, "no backend for declared function, returning stub");
                return Ok(STUB_OUTPUT.to_string());
            }
        };

        match computer.execute(&action).await {
            Ok(_) => Ok(STUB_OUTPUT.to_string()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(format!("error: {}", e)),
        }
    }
}
