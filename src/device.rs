use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device is not connected")]
    NotConnected,
    #[error("`{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },
    #[error("device rejected {operation}: {detail}")]
    Rejected {
        operation: &'static str,
        detail: String,
    },
    #[error("unexpected device output: {0}")]
    InvalidOutput(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A captured frame, PNG encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    pub png: Vec<u8>,
}

/// Physical screen size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

/// Everything the loop needs from the phone.
///
/// Gesture coordinates are physical pixels. Implementations clamp them to the
/// screen before dispatch.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    async fn is_connected(&self) -> bool;

    async fn screenshot(&self) -> Result<Screenshot, DeviceError>;

    async fn screen_size(&self) -> Result<ScreenSize, DeviceError>;

    /// Package id of the foreground app, or "Unknown". The loop maps it to a
    /// display name through [`AppResolver::display_name`](crate::resolver::AppResolver::display_name).
    async fn current_app(&self) -> String;

    async fn tap(&self, x: u32, y: u32) -> Result<(), DeviceError>;

    async fn long_press(&self, x: u32, y: u32, hold_ms: u64) -> Result<(), DeviceError>;

    async fn swipe(
        &self,
        from: (u32, u32),
        to: (u32, u32),
        duration_ms: Option<u64>,
    ) -> Result<(), DeviceError>;

    /// Type into the focused field, replacing its contents.
    async fn type_text(&self, text: &str) -> Result<(), DeviceError>;

    async fn launch_package(&self, package: &str) -> Result<(), DeviceError>;

    async fn back(&self) -> Result<(), DeviceError>;

    async fn home(&self) -> Result<(), DeviceError>;

    /// Marks whether an agent task is driving the device.
    async fn set_task_running(&self, running: bool);
}
