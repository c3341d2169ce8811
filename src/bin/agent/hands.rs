use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use autoglm_agent::device::{DeviceControl, DeviceError, ScreenSize, Screenshot};
use base64::{Engine as _, engine::general_purpose};
use tokio::process::Command;
use tracing::{debug, info};

const PNG_MAGIC: &[u8] = b"\x89PNG";

/// Android phone driven over `adb`. Text input needs the ADB Keyboard IME.
pub struct AdbDevice {
    adb: PathBuf,
    serial: Option<String>,
    size: Mutex<Option<ScreenSize>>,
    task_running: AtomicBool,
}

impl AdbDevice {
    pub fn new(adb: PathBuf, serial: Option<String>) -> Self {
        Self {
            adb,
            serial,
            size: Mutex::new(None),
            task_running: AtomicBool::new(false),
        }
    }

    async fn adb(&self, args: &[&str]) -> Result<Vec<u8>, DeviceError> {
        let mut cmd = Command::new(&self.adb);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        let output = cmd.args(args).output().await?;
        if !output.status.success() {
            let detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if detail.contains("no devices") || detail.contains("device offline") {
                return Err(DeviceError::NotConnected);
            }
            return Err(DeviceError::CommandFailed {
                command: args.join(" "),
                detail,
            });
        }
        Ok(output.stdout)
    }

    async fn shell(&self, args: &[&str]) -> Result<String, DeviceError> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push("shell");
        full.extend_from_slice(args);
        let out = self.adb(&full).await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    async fn keyevent(&self, code: &str) -> Result<(), DeviceError> {
        self.shell(&["input", "keyevent", code]).await.map(drop)
    }

    /// Last known size, fetched on first use.
    async fn cached_size(&self) -> Result<ScreenSize, DeviceError> {
        let cached = *self.size.lock().unwrap_or_else(|e| e.into_inner());
        match cached {
            Some(size) => Ok(size),
            None => self.screen_size().await,
        }
    }

    async fn clamp(&self, x: u32, y: u32) -> Result<(String, String), DeviceError> {
        let size = self.cached_size().await?;
        let (x, y) = clamp_to_screen(x, y, size);
        Ok((x.to_string(), y.to_string()))
    }

    async fn broadcast(&self, args: &[&str]) -> Result<(), DeviceError> {
        let mut full = vec!["am", "broadcast"];
        full.extend_from_slice(args);
        let out = self.shell(&full).await?;
        if !out.contains("Broadcast completed") {
            return Err(DeviceError::Rejected {
                operation: "type",
                detail: out.trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceControl for AdbDevice {
    async fn is_connected(&self) -> bool {
        match self.adb(&["get-state"]).await {
            Ok(out) => String::from_utf8_lossy(&out).trim() == "device",
            Err(err) => {
                debug!(error = %err, "adb get-state failed");
                false
            }
        }
    }

    async fn screenshot(&self) -> Result<Screenshot, DeviceError> {
        let png = self.adb(&["exec-out", "screencap", "-p"]).await?;
        if !png.starts_with(PNG_MAGIC) {
            return Err(DeviceError::InvalidOutput(format!(
                "screencap returned {} bytes that are not a PNG",
                png.len()
            )));
        }
        Ok(Screenshot { png })
    }

    async fn screen_size(&self) -> Result<ScreenSize, DeviceError> {
        let out = self.shell(&["wm", "size"]).await?;
        let size = parse_wm_size(&out)
            .ok_or_else(|| DeviceError::InvalidOutput(format!("wm size: {}", out.trim())))?;
        *self.size.lock().unwrap_or_else(|e| e.into_inner()) = Some(size);
        Ok(size)
    }

    async fn current_app(&self) -> String {
        match self.shell(&["dumpsys", "window"]).await {
            Ok(dump) => parse_focused_package(&dump).unwrap_or_else(|| "Unknown".into()),
            Err(err) => {
                debug!(error = %err, "dumpsys window failed");
                "Unknown".into()
            }
        }
    }

    async fn tap(&self, x: u32, y: u32) -> Result<(), DeviceError> {
        let (x, y) = self.clamp(x, y).await?;
        self.shell(&["input", "tap", x.as_str(), y.as_str()]).await.map(drop)
    }

    async fn long_press(&self, x: u32, y: u32, hold_ms: u64) -> Result<(), DeviceError> {
        let (x, y) = self.clamp(x, y).await?;
        let hold = hold_ms.to_string();
        self.shell(&[
            "input",
            "swipe",
            x.as_str(),
            y.as_str(),
            x.as_str(),
            y.as_str(),
            hold.as_str(),
        ])
        .await
        .map(drop)
    }

    async fn swipe(
        &self,
        from: (u32, u32),
        to: (u32, u32),
        duration_ms: Option<u64>,
    ) -> Result<(), DeviceError> {
        let (x1, y1) = self.clamp(from.0, from.1).await?;
        let (x2, y2) = self.clamp(to.0, to.1).await?;
        let duration = duration_ms
            .unwrap_or_else(|| swipe_duration_ms(from, to))
            .to_string();
        self.shell(&[
            "input",
            "swipe",
            x1.as_str(),
            y1.as_str(),
            x2.as_str(),
            y2.as_str(),
            duration.as_str(),
        ])
        .await
        .map(drop)
    }

    async fn type_text(&self, text: &str) -> Result<(), DeviceError> {
        let ime = self.shell(&["dumpsys", "input_method"]).await?;
        if keyboard_shown(&ime) == Some(false) {
            return Err(DeviceError::Rejected {
                operation: "type",
                detail: "no input field is focused".into(),
            });
        }
        let encoded = general_purpose::STANDARD.encode(text.as_bytes());
        self.broadcast(&["-a", "ADB_CLEAR_TEXT"]).await?;
        self.broadcast(&["-a", "ADB_INPUT_B64", "--es", "msg", encoded.as_str()])
            .await
    }

    async fn launch_package(&self, package: &str) -> Result<(), DeviceError> {
        let out = self
            .shell(&[
                "monkey",
                "-p",
                package,
                "-c",
                "android.intent.category.LAUNCHER",
                "1",
            ])
            .await?;
        if out.contains("No activities found") || out.contains("monkey aborted") {
            return Err(DeviceError::Rejected {
                operation: "launch",
                detail: format!("{package}: {}", out.trim()),
            });
        }
        Ok(())
    }

    async fn back(&self) -> Result<(), DeviceError> {
        self.keyevent("4").await
    }

    async fn home(&self) -> Result<(), DeviceError> {
        self.keyevent("3").await
    }

    async fn set_task_running(&self, running: bool) {
        self.task_running.store(running, Ordering::SeqCst);
        info!(running, "device task flag");
    }
}

/// `wm size` prints the physical size and, if set, an override that wins.
fn parse_wm_size(out: &str) -> Option<ScreenSize> {
    let mut physical = None;
    let mut over = None;
    for line in out.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let Some((w, h)) = value.trim().split_once('x') else {
            continue;
        };
        let (Ok(width), Ok(height)) = (w.trim().parse(), h.trim().parse()) else {
            continue;
        };
        let size = ScreenSize { width, height };
        if label.contains("Override") {
            over = Some(size);
        } else {
            physical = Some(size);
        }
    }
    over.or(physical)
}

/// Package of the focused window, from `mCurrentFocus=Window{… user pkg/Activity}`.
fn parse_focused_package(dump: &str) -> Option<String> {
    let line = dump
        .lines()
        .find(|l| l.contains("mCurrentFocus") || l.contains("mFocusedApp"))?;
    let component = line
        .split_whitespace()
        .find(|token| token.contains('/'))?;
    let package = component.split('/').next()?.trim_matches(|c| c == '{' || c == '}');
    (!package.is_empty()).then(|| package.to_string())
}

fn keyboard_shown(dump: &str) -> Option<bool> {
    let at = dump.find("mInputShown=")?;
    let rest = &dump[at + "mInputShown=".len()..];
    Some(rest.starts_with("true"))
}

fn clamp_to_screen(x: u32, y: u32, size: ScreenSize) -> (u32, u32) {
    (
        x.min(size.width.saturating_sub(1)),
        y.min(size.height.saturating_sub(1)),
    )
}

/// Longer swipes get more time, between one and two seconds.
fn swipe_duration_ms(from: (u32, u32), to: (u32, u32)) -> u64 {
    let dx = i64::from(from.0) - i64::from(to.0);
    let dy = i64::from(from.1) - i64::from(to.1);
    let dist_sq = (dx * dx + dy * dy) as u64;
    (dist_sq / 1000).clamp(1000, 2000)
}
