use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::action::Action;
use crate::device::{DeviceControl, DeviceError};
use crate::parser::{MAX_SWIPE_MS, MAX_WAIT_MS};
use crate::resolver::AppResolver;

pub const DEFAULT_WAIT: Duration = Duration::from_secs(1);
pub const LONG_PRESS_MS: u64 = 3000;
pub const DOUBLE_TAP_GAP: Duration = Duration::from_millis(100);

/// Turns actions into device primitives. Holds no state between calls.
pub struct ActionExecutor {
    device: Arc<dyn DeviceControl>,
    resolver: Arc<dyn AppResolver>,
}

impl ActionExecutor {
    pub fn new(device: Arc<dyn DeviceControl>, resolver: Arc<dyn AppResolver>) -> Self {
        Self { device, resolver }
    }

    /// Perform `action` and report whether the device accepted it.
    ///
    /// `Finish` and `Error` are not device operations and always succeed.
    pub async fn execute(&self, action: &Action) -> bool {
        match self.dispatch(action).await {
            Ok(()) => {
                debug!(%action, "action dispatched");
                true
            }
            Err(err) => {
                warn!(%action, error = %err, "action failed");
                false
            }
        }
    }

    async fn dispatch(&self, action: &Action) -> Result<(), DeviceError> {
        match action {
            Action::Tap { x, y } => self.device.tap(*x, *y).await,
            Action::DoubleTap { x, y } => {
                self.device.tap(*x, *y).await?;
                tokio::time::sleep(DOUBLE_TAP_GAP).await;
                self.device.tap(*x, *y).await
            }
            Action::LongPress { x, y } => self.device.long_press(*x, *y, LONG_PRESS_MS).await,
            Action::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration_ms,
            } => {
                let duration_ms = duration_ms.map(|ms| ms.min(MAX_SWIPE_MS));
                self.device
                    .swipe((*x1, *y1), (*x2, *y2), duration_ms)
                    .await
            }
            Action::Type { text } => self.device.type_text(text).await,
            Action::Launch { app_name } => {
                let package =
                    self.resolver
                        .resolve(app_name)
                        .ok_or_else(|| DeviceError::Rejected {
                            operation: "launch",
                            detail: format!("no package known for {app_name:?}"),
                        })?;
                self.device.launch_package(&package).await
            }
            Action::Back => self.device.back().await,
            Action::Home => self.device.home().await,
            Action::Wait { duration_ms } => {
                let wait = duration_ms.map_or(DEFAULT_WAIT, |ms| {
                    Duration::from_millis(ms.min(MAX_WAIT_MS))
                });
                tokio::time::sleep(wait).await;
                Ok(())
            }
            Action::Finish { .. } | Action::Error { .. } => Ok(()),
        }
    }
}
