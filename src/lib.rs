//! Autonomous phone agent: a vision model looks at the screen, picks one UI
//! action, and the loop performs it until the goal is reached.

pub mod action;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod executor;
pub mod history;
pub mod model;
pub mod parser;
pub mod prompt;
pub mod resolver;
pub mod status;

pub use action::Action;
pub use controller::{LoopConfig, LoopController, StopHandle, TaskOutcome, TaskReport, TaskState};
pub use device::{DeviceControl, DeviceError, ScreenSize, Screenshot};
pub use error::AgentError;
pub use executor::ActionExecutor;
pub use history::{ConversationHistory, ConversationMessage};
pub use model::{HttpModelClient, ModelClient, ModelConfig, ModelError};
pub use resolver::{AppResolver, AppTable};
pub use status::StatusSink;
