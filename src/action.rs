use std::fmt;

use thiserror::Error;

/// A single device operation decoded from one model response.
///
/// Coordinates are physical pixels, already rescaled from the model's
/// virtual space by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Tap { x: u32, y: u32 },
    DoubleTap { x: u32, y: u32 },
    LongPress { x: u32, y: u32 },
    Swipe {
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        duration_ms: Option<u64>,
    },
    Type { text: String },
    Launch { app_name: String },
    Back,
    Home,
    Wait { duration_ms: Option<u64> },
    Finish { summary: Option<String> },
    Error { reason: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("{field} is not a finite number")]
    NotFinite { field: &'static str },
    #[error("{field} must not be negative (got {value})")]
    Negative { field: &'static str, value: f64 },
    #[error("{field} is too large (got {value})")]
    TooLarge { field: &'static str, value: f64 },
}

fn pixel(field: &'static str, value: f64) -> Result<u32, ActionError> {
    if !value.is_finite() {
        return Err(ActionError::NotFinite { field });
    }
    if value < 0.0 {
        return Err(ActionError::Negative { field, value });
    }
    let rounded = value.round();
    if rounded > f64::from(u32::MAX) {
        return Err(ActionError::TooLarge { field, value });
    }
    Ok(rounded as u32)
}

fn millis(field: &'static str, value: Option<f64>) -> Result<Option<u64>, ActionError> {
    let Some(value) = value else {
        return Ok(None);
    };
    if !value.is_finite() {
        return Err(ActionError::NotFinite { field });
    }
    if value < 0.0 {
        return Err(ActionError::Negative { field, value });
    }
    Ok(Some(value.round() as u64))
}

impl Action {
    pub fn tap(x: f64, y: f64) -> Result<Self, ActionError> {
        Ok(Self::Tap {
            x: pixel("x", x)?,
            y: pixel("y", y)?,
        })
    }

    pub fn double_tap(x: f64, y: f64) -> Result<Self, ActionError> {
        Ok(Self::DoubleTap {
            x: pixel("x", x)?,
            y: pixel("y", y)?,
        })
    }

    pub fn long_press(x: f64, y: f64) -> Result<Self, ActionError> {
        Ok(Self::LongPress {
            x: pixel("x", x)?,
            y: pixel("y", y)?,
        })
    }

    pub fn swipe(
        start: (f64, f64),
        end: (f64, f64),
        duration_ms: Option<f64>,
    ) -> Result<Self, ActionError> {
        Ok(Self::Swipe {
            x1: pixel("x1", start.0)?,
            y1: pixel("y1", start.1)?,
            x2: pixel("x2", end.0)?,
            y2: pixel("y2", end.1)?,
            duration_ms: millis("duration_ms", duration_ms)?,
        })
    }

    pub fn wait(duration_ms: Option<f64>) -> Result<Self, ActionError> {
        Ok(Self::Wait {
            duration_ms: millis("duration_ms", duration_ms)?,
        })
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            reason: reason.into(),
        }
    }

    /// `Finish` and `Error` end the current step without touching the device.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Error { .. })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Tap { x, y } => write!(f, "Tap({x}, {y})"),
            Action::DoubleTap { x, y } => write!(f, "DoubleTap({x}, {y})"),
            Action::LongPress { x, y } => write!(f, "LongPress({x}, {y})"),
            Action::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration_ms,
            } => {
                write!(f, "Swipe({x1}, {y1} -> {x2}, {y2}")?;
                if let Some(ms) = duration_ms {
                    write!(f, ", {ms}ms")?;
                }
                write!(f, ")")
            }
            Action::Type { text } => write!(f, "Type({text:?})"),
            Action::Launch { app_name } => write!(f, "Launch({app_name:?})"),
            Action::Back => write!(f, "Back"),
            Action::Home => write!(f, "Home"),
            Action::Wait { duration_ms: None } => write!(f, "Wait"),
            Action::Wait {
                duration_ms: Some(ms),
            } => write!(f, "Wait({ms}ms)"),
            Action::Finish { summary: None } => write!(f, "Finish"),
            Action::Finish {
                summary: Some(summary),
            } => write!(f, "Finish({summary:?})"),
            Action::Error { reason } => write!(f, "Error({reason})"),
        }
    }
}
