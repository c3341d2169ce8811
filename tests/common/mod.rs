#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use autoglm_agent::history::ConversationMessage;
use autoglm_agent::{
    DeviceControl, DeviceError, LoopConfig, ModelClient, ModelError, ScreenSize, Screenshot,
    StatusSink, StopHandle,
};

pub const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

/// Loop settings with no sleeping, for fast tests.
pub fn fast_config(max_steps: u32) -> LoopConfig {
    LoopConfig {
        max_steps,
        step_delay: Duration::ZERO,
        settle_delay: Duration::ZERO,
        model_timeout: Duration::from_secs(5),
    }
}

pub fn answer(thinking: &str, action: &str) -> Result<String, ModelError> {
    Ok(format!("<think>{thinking}</think><answer>{action}</answer>"))
}

pub fn tap_answer(x: u32, y: u32) -> Result<String, ModelError> {
    answer("tap it", &format!("do(action=\"Tap\", element=[{x},{y}])"))
}

pub fn finish_answer(message: &str) -> Result<String, ModelError> {
    answer("done", &format!("finish(message=\"{message}\")"))
}

/// Replies from a queue and records every history it was sent.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, ModelError>>>,
    credential: bool,
    stop_on_call: Mutex<Option<(usize, StopHandle)>>,
    hang: bool,
    pub seen: Mutex<Vec<Vec<ConversationMessage>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<String, ModelError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            credential: true,
            stop_on_call: Mutex::new(None),
            hang: false,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn without_credential(mut self) -> Self {
        self.credential = false;
        self
    }

    /// Never answers.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new(Vec::new())
        }
    }

    /// Request a stop while answering the `call`-th request (1-based).
    pub fn stop_during(&self, call: usize, handle: StopHandle) {
        *self.stop_on_call.lock().unwrap() = Some((call, handle));
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn has_credential(&self) -> bool {
        self.credential
    }

    async fn send(&self, messages: &[ConversationMessage]) -> Result<String, ModelError> {
        let call = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(messages.to_vec());
            seen.len()
        };
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some((at, handle)) = self.stop_on_call.lock().unwrap().as_ref() {
            if *at == call {
                handle.request_stop();
            }
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| tap_answer(500, 500))
    }
}

/// In-memory phone that logs every primitive it receives.
pub struct FakeDevice {
    pub connected: AtomicBool,
    pub fail_screenshot: AtomicBool,
    pub reject_gestures: AtomicBool,
    pub size: ScreenSize,
    pub app: String,
    pub calls: Mutex<Vec<String>>,
    pub running: Mutex<Vec<bool>>,
    /// Stop requested while the connection is being checked.
    pub stop_on_connect: Mutex<Option<StopHandle>>,
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self {
            connected: AtomicBool::new(true),
            fail_screenshot: AtomicBool::new(false),
            reject_gestures: AtomicBool::new(false),
            size: ScreenSize {
                width: 1080,
                height: 2400,
            },
            app: "com.android.launcher".into(),
            calls: Mutex::new(Vec::new()),
            running: Mutex::new(Vec::new()),
            stop_on_connect: Mutex::new(None),
        }
    }
}

impl FakeDevice {
    pub fn disconnected() -> Self {
        let device = Self::default();
        device.connected.store(false, Ordering::SeqCst);
        device
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than the `home` issued at task start.
    pub fn gestures(&self) -> Vec<String> {
        self.calls().into_iter().skip(1).collect()
    }

    fn record(&self, call: String) -> Result<(), DeviceError> {
        self.calls.lock().unwrap().push(call);
        if self.reject_gestures.load(Ordering::SeqCst) {
            return Err(DeviceError::Rejected {
                operation: "gesture",
                detail: "rejected by fake".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceControl for FakeDevice {
    async fn is_connected(&self) -> bool {
        if let Some(handle) = self.stop_on_connect.lock().unwrap().as_ref() {
            handle.request_stop();
        }
        self.connected.load(Ordering::SeqCst)
    }

    async fn screenshot(&self) -> Result<Screenshot, DeviceError> {
        if self.fail_screenshot.load(Ordering::SeqCst) {
            return Err(DeviceError::InvalidOutput("screencap failed".into()));
        }
        Ok(Screenshot {
            png: FAKE_PNG.to_vec(),
        })
    }

    async fn screen_size(&self) -> Result<ScreenSize, DeviceError> {
        Ok(self.size)
    }

    async fn current_app(&self) -> String {
        self.app.clone()
    }

    async fn tap(&self, x: u32, y: u32) -> Result<(), DeviceError> {
        self.record(format!("tap {x} {y}"))
    }

    async fn long_press(&self, x: u32, y: u32, hold_ms: u64) -> Result<(), DeviceError> {
        self.record(format!("long_press {x} {y} {hold_ms}"))
    }

    async fn swipe(
        &self,
        from: (u32, u32),
        to: (u32, u32),
        duration_ms: Option<u64>,
    ) -> Result<(), DeviceError> {
        self.record(format!(
            "swipe {} {} {} {} {:?}",
            from.0, from.1, to.0, to.1, duration_ms
        ))
    }

    async fn type_text(&self, text: &str) -> Result<(), DeviceError> {
        self.record(format!("type {text}"))
    }

    async fn launch_package(&self, package: &str) -> Result<(), DeviceError> {
        self.record(format!("launch {package}"))
    }

    async fn back(&self) -> Result<(), DeviceError> {
        self.record("back".into())
    }

    async fn home(&self) -> Result<(), DeviceError> {
        // Start-of-task home is never rejected.
        self.calls.lock().unwrap().push("home".into());
        Ok(())
    }

    async fn set_task_running(&self, running: bool) {
        self.running.lock().unwrap().push(running);
    }
}

#[derive(Default)]
pub struct RecordingStatus {
    pub statuses: Mutex<Vec<String>>,
    pub running: Mutex<Vec<bool>>,
}

impl RecordingStatus {
    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn last_status(&self) -> Option<String> {
        self.statuses.lock().unwrap().last().cloned()
    }

    pub fn running(&self) -> Vec<bool> {
        self.running.lock().unwrap().clone()
    }
}

impl StatusSink for RecordingStatus {
    fn update_status(&self, text: &str) {
        self.statuses.lock().unwrap().push(text.to_string());
    }

    fn set_task_running(&self, running: bool) {
        self.running.lock().unwrap().push(running);
    }
}
