use std::time::Duration;

use thiserror::Error;

use crate::device::DeviceError;
use crate::model::ModelError;

#[derive(Debug, Error)]
pub enum AgentError {
    /// The task was refused before it started.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("model did not answer within {0:?}")]
    Timeout(Duration),
}
