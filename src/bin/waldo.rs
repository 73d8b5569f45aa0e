use anyhow::{anyhow, Result};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use waldo::safety::{AcceptAll, AllowAll, DenyAll};
use waldo::{
    Autopilot, AutopilotConfig, BackendConfig, Backoff, DiskStore, HostedModel, ModelConfig,
    SafetyGate, ToolSpec, TurnRunner,
};

fn backend_from_env() -> Result<BackendConfig> {
    let name = env::var("WALDO_BACKEND").unwrap_or_else(|_| "chromium".into());
    match name.as_str() {
        "chromium" => Ok(BackendConfig::Chromium {
            headless: env::var("WALDO_HEADLESS").map(|v| v != "0").unwrap_or(false),
            user_agent: None,
            ws_url: env::var("CHROME_WS_URL").ok(),
            dimensions: (1280, 800),
        }),
        "docker" => Ok(BackendConfig::Docker {
            container: env::var("WALDO_CONTAINER")
                .map_err(|_| anyhow!("WALDO_CONTAINER required for the docker backend"))?,
            display: env::var("WALDO_DISPLAY").unwrap_or_else(|_| ":1".into()),
            dimensions: (1280, 800),
        }),
        "remote" => Ok(BackendConfig::Remote {
            endpoint: env::var("WALDO_REMOTE_ENDPOINT")
                .map_err(|_| anyhow!("WALDO_REMOTE_ENDPOINT required for the remote backend"))?,
            api_key: env::var("WALDO_REMOTE_API_KEY").ok(),
            dimensions: (1280, 800),
        }),
        other => Err(anyhow!("unknown backend '{}'", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let task = env::var("WALDO_TASK")
        .map_err(|_| anyhow!("set WALDO_TASK to the task the agent should work on"))?;

    let computer = backend_from_env()?.connect().await?;

    let model = HostedModel::new(ModelConfig::default())?.with_backoff(Backoff::retries(
        env::var("WALDO_MODEL_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
    ));

    // flagged actions are refused unless the operator opted into
    // auto-acknowledgment for this unattended run
    let gate = if env::var("WALDO_AUTO_ACK").map(|v| v == "1").unwrap_or(false) {
        SafetyGate::new(Box::new(AllowAll), Box::new(AcceptAll))
    } else {
        SafetyGate::new(Box::new(AllowAll), Box::new(DenyAll))
    };

    let runs_dir = env::var("WALDO_RUNS_DIR")
        .map(Into::into)
        .unwrap_or_else(|_| std::env::temp_dir().join("waldo_runs"));
    let store = Arc::new(DiskStore::new(&runs_dir));

    let runner = TurnRunner::new(computer, model, gate).with_store(store);
    info!(session = %runner.session(), "recording run under {}", runs_dir.display());

    let tools = vec![ToolSpec::computer_for(runner.computer().as_ref())];
    let pilot = Autopilot::new(
        runner,
        AutopilotConfig {
            max_steps: env::var("WALDO_MAX_STEPS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            step_delay: Duration::from_secs(1),
        },
    );

    let (_transcript, report) = pilot.run(&task, tools).await?;

    if let Some(reason) = &report.done_reason {
        println!("done after {} steps: {}", report.steps, reason);
    } else {
        println!("stopped after {} steps", report.steps);
    }
    if let Some(message) = &report.last_message {
        println!("{}", message);
    }
    Ok(())
}
