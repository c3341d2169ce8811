//! The observe → decide → act loop.
//!
//! One task runs at a time. Each step captures the screen, asks the model for
//! an action, executes it and feeds failures back into the conversation. A
//! task ends on `finish`, an external stop, an unrecoverable error, or after
//! `max_steps` steps.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Local;
use tracing::{info, warn};

use crate::action::Action;
use crate::device::DeviceControl;
use crate::error::AgentError;
use crate::executor::ActionExecutor;
use crate::history::ConversationHistory;
use crate::model::ModelClient;
use crate::parser::{parse, parse_parts};
use crate::prompt;
use crate::resolver::AppResolver;
use crate::status::{self, StatusSink};

pub const DEFAULT_MAX_STEPS: u32 = 20;

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_steps: u32,
    /// Pause between steps, so the UI can settle and the API is not hammered.
    pub step_delay: Duration,
    /// Pause after going home at task start.
    pub settle_delay: Duration,
    pub model_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            step_delay: Duration::from_secs(2),
            settle_delay: Duration::from_secs(1),
            model_timeout: Duration::from_secs(120),
        }
    }
}

/// Shared run flag for cooperative cancellation.
///
/// A stop is observed before the next step begins. It does not interrupt a
/// model call or gesture already in flight.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }
}

/// Progress of the task currently being driven.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskState {
    pub step: u32,
    pub max_steps: u32,
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Finished { summary: Option<String> },
    Stopped,
    Failed { reason: String },
    MaxStepsReached,
}

impl TaskOutcome {
    fn status_text(&self, max_steps: u32) -> String {
        match self {
            TaskOutcome::Finished { summary: Some(summary) } => {
                format!("{}: {summary}", status::COMPLETED)
            }
            TaskOutcome::Finished { summary: None } => status::COMPLETED.to_string(),
            TaskOutcome::Stopped => status::STOPPED.to_string(),
            TaskOutcome::Failed { reason } => status::failed(reason),
            TaskOutcome::MaxStepsReached => status::max_steps_reached(max_steps),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub outcome: TaskOutcome,
    /// Model-driven steps that were started.
    pub steps: u32,
}

enum StepFlow {
    Continue,
    Finished(Option<String>),
}

pub struct LoopController {
    model: Arc<dyn ModelClient>,
    status: Arc<dyn StatusSink>,
    config: LoopConfig,
    history: ConversationHistory,
    stop: StopHandle,
    last_outcome: Option<TaskOutcome>,
}

impl LoopController {
    pub fn new(
        model: Arc<dyn ModelClient>,
        status: Arc<dyn StatusSink>,
        config: LoopConfig,
    ) -> Self {
        Self {
            model,
            status,
            config,
            history: ConversationHistory::default(),
            stop: StopHandle::default(),
            last_outcome: None,
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Conversation of the current, or most recent, task.
    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn last_outcome(&self) -> Option<&TaskOutcome> {
        self.last_outcome.as_ref()
    }

    /// Handle that can stop the running task from any thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    pub fn is_running(&self) -> bool {
        self.stop.is_running()
    }

    /// Drive the device toward `goal` until the task reaches a terminal state.
    ///
    /// Returns `Err` only when the task is refused up front (empty goal, no
    /// credential, device not connected). Everything after that is reported
    /// through [`TaskReport::outcome`].
    pub async fn run_task(
        &mut self,
        goal: &str,
        device: Arc<dyn DeviceControl>,
        resolver: Arc<dyn AppResolver>,
    ) -> Result<TaskReport, AgentError> {
        let goal = goal.trim();
        // Claim the run flag first so a stop sent during the checks is kept.
        self.stop.start();
        if let Err(err) = self.check_ready(goal, device.as_ref()).await {
            self.stop.request_stop();
            warn!(error = %err, "task refused");
            self.status.update_status(&status::failed(&err.to_string()));
            return Err(err);
        }

        info!(%goal, max_steps = self.config.max_steps, "task started");
        self.history
            .reset(prompt::system_prompt(Local::now().date_naive()));
        self.status.set_task_running(true);
        device.set_task_running(true).await;
        if let Err(err) = device.home().await {
            warn!(error = %err, "could not go home before starting");
        }
        tokio::time::sleep(self.config.settle_delay).await;

        let executor = ActionExecutor::new(device.clone(), resolver.clone());
        let mut task = TaskState {
            step: 0,
            max_steps: self.config.max_steps,
            finished: false,
        };
        let outcome = self
            .drive(goal, device.as_ref(), resolver.as_ref(), &executor, &mut task)
            .await;

        self.stop.request_stop();
        device.set_task_running(false).await;
        self.status.set_task_running(false);
        self.status
            .update_status(&outcome.status_text(task.max_steps));
        match &outcome {
            TaskOutcome::Failed { reason } => warn!(steps = task.step, %reason, "task failed"),
            other => info!(steps = task.step, outcome = ?other, "task ended"),
        }

        self.last_outcome = Some(outcome.clone());
        Ok(TaskReport {
            outcome,
            steps: task.step,
        })
    }

    async fn check_ready(&self, goal: &str, device: &dyn DeviceControl) -> Result<(), AgentError> {
        if goal.is_empty() {
            return Err(AgentError::Config("goal is empty".into()));
        }
        if !self.model.has_credential() {
            return Err(AgentError::Config("no API key configured".into()));
        }
        if !device.is_connected().await {
            return Err(AgentError::Config("device control is not connected".into()));
        }
        Ok(())
    }

    async fn drive(
        &mut self,
        goal: &str,
        device: &dyn DeviceControl,
        resolver: &dyn AppResolver,
        executor: &ActionExecutor,
        task: &mut TaskState,
    ) -> TaskOutcome {
        loop {
            if !self.stop.is_running() {
                return TaskOutcome::Stopped;
            }
            if task.step >= task.max_steps {
                return TaskOutcome::MaxStepsReached;
            }

            task.step += 1;
            match self.step(goal, device, resolver, executor, task.step).await {
                Ok(StepFlow::Continue) => {}
                Ok(StepFlow::Finished(summary)) => {
                    task.finished = true;
                    return TaskOutcome::Finished { summary };
                }
                Err(err) => {
                    return TaskOutcome::Failed {
                        reason: err.to_string(),
                    };
                }
            }

            tokio::time::sleep(self.config.step_delay).await;
        }
    }

    async fn step(
        &mut self,
        goal: &str,
        device: &dyn DeviceControl,
        resolver: &dyn AppResolver,
        executor: &ActionExecutor,
        step: u32,
    ) -> Result<StepFlow, AgentError> {
        info!(step, "step started");
        self.status.update_status(status::THINKING);

        let screenshot = device.screenshot().await?;
        let size = device.screen_size().await?;
        let package = device.current_app().await;
        let current_app = resolver.display_name(&package).unwrap_or(package);

        let text = if step == 1 {
            prompt::first_turn(goal, &current_app)
        } else {
            prompt::screen_info(&current_app)
        };
        self.history.append_user(text, Some(&screenshot.png));

        let reply = tokio::time::timeout(
            self.config.model_timeout,
            self.model.send(self.history.messages()),
        )
        .await
        .map_err(|_| AgentError::Timeout(self.config.model_timeout))??;

        let (rationale, action_spec) = parse_parts(&reply);
        info!(step, thinking = %rationale.trim(), action = %action_spec.trim(), "model replied");
        self.history.append_assistant(&rationale, &action_spec);

        let action = parse(&action_spec, size.width, size.height);
        self.status.update_status(&status::describe(&action));

        let accepted = executor.execute(&action).await;
        self.history.prune_last_image();

        match action {
            Action::Finish { summary } => return Ok(StepFlow::Finished(summary)),
            Action::Error { reason } => {
                warn!(step, %reason, "model answer did not decode");
                self.history
                    .append_user_feedback(prompt::parse_failed_feedback(&reason));
            }
            _ if !accepted => {
                self.history
                    .append_user_feedback(prompt::ACTION_FAILED_FEEDBACK);
            }
            _ => {}
        }

        Ok(StepFlow::Continue)
    }
}
