mod face;
mod hands;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use autoglm_agent::config::AgentArgs;
use autoglm_agent::{
    AppResolver, AppTable, DeviceControl, HttpModelClient, LoopController, ModelClient,
    StatusSink, TaskOutcome,
};
use clap::Parser;
use dotenvy::dotenv;
use face::{AgentEvent, WebStatus};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Status sink for headless runs: progress goes to the log.
struct LogStatus;

impl StatusSink for LogStatus {
    fn update_status(&self, text: &str) {
        info!(status = text);
    }

    fn set_task_running(&self, running: bool) {
        info!(running, "task running");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = AgentArgs::parse();
    let resolver: Arc<dyn AppResolver> = Arc::new(load_apps(&args)?);
    let device: Arc<dyn DeviceControl> =
        Arc::new(hands::AdbDevice::new(args.adb.clone(), args.serial.clone()));
    let model: Arc<dyn ModelClient> = Arc::new(
        HttpModelClient::new(args.model_config()).context("building the model client")?,
    );

    if !model.has_credential() {
        warn!("no API key set; pass --api-key or AUTOGLM_API_KEY");
    }

    if let Some(goal) = args.goal.as_deref() {
        return run_once(goal, &args, model, device, resolver).await;
    }

    let (event_tx, _) = broadcast::channel::<AgentEvent>(64);
    let status: Arc<dyn StatusSink> = Arc::new(WebStatus::new(event_tx.clone()));
    let mut controller = LoopController::new(model, status, args.loop_config());
    let busy = Arc::new(AtomicBool::new(false));
    let mut cmd_rx = face::start_server(
        args.port,
        event_tx.clone(),
        controller.stop_handle(),
        busy.clone(),
    )
    .await
    .context("starting the web UI")?;

    info!("waiting for goals");
    while let Some(goal) = cmd_rx.recv().await {
        let event = match controller
            .run_task(&goal, device.clone(), resolver.clone())
            .await
        {
            Ok(report) => AgentEvent::TaskEnd {
                outcome: outcome_label(&report.outcome).to_string(),
                steps: report.steps,
            },
            Err(err) => AgentEvent::Rejected {
                message: err.to_string(),
            },
        };
        busy.store(false, Ordering::SeqCst);
        let _ = event_tx.send(event);
        let _ = event_tx.send(AgentEvent::Ready);
    }

    Ok(())
}

async fn run_once(
    goal: &str,
    args: &AgentArgs,
    model: Arc<dyn ModelClient>,
    device: Arc<dyn DeviceControl>,
    resolver: Arc<dyn AppResolver>,
) -> Result<()> {
    let mut controller = LoopController::new(model, Arc::new(LogStatus), args.loop_config());

    let stop = controller.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after the current step");
            stop.request_stop();
        }
    });

    let report = controller.run_task(goal, device, resolver).await?;
    info!(
        outcome = outcome_label(&report.outcome),
        steps = report.steps,
        "done"
    );
    if let TaskOutcome::Failed { reason } = report.outcome {
        bail!("task failed: {reason}");
    }
    Ok(())
}

fn load_apps(args: &AgentArgs) -> Result<AppTable> {
    let mut table = AppTable::builtin();
    match &args.apps_file {
        Some(path) => {
            table.load_overrides(path)?;
        }
        None => {
            if let Some(path) = AppTable::default_overrides_path().filter(|p| p.exists()) {
                table.load_overrides(&path)?;
            }
        }
    }
    info!(apps = table.len(), "app table ready");
    Ok(table)
}

fn outcome_label(outcome: &TaskOutcome) -> &'static str {
    match outcome {
        TaskOutcome::Finished { .. } => "finished",
        TaskOutcome::Stopped => "stopped",
        TaskOutcome::Failed { .. } => "failed",
        TaskOutcome::MaxStepsReached => "max_steps",
    }
}
