use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::controller::{DEFAULT_MAX_STEPS, LoopConfig};
use crate::model::{DEFAULT_BASE_URL, DEFAULT_MODEL, ModelConfig};

/// Drive an Android phone toward a goal with a vision model.
#[derive(Debug, Clone, Parser)]
#[command(name = "agent", version)]
pub struct AgentArgs {
    /// Run this goal once without the web UI, then exit.
    pub goal: Option<String>,

    #[arg(long, env = "AUTOGLM_API_KEY", hide_env_values = true, default_value = "")]
    pub api_key: String,

    #[arg(long, env = "AUTOGLM_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    #[arg(long, env = "AUTOGLM_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
    pub max_steps: u32,

    /// Pause between steps.
    #[arg(long, default_value_t = 2000)]
    pub step_delay_ms: u64,

    /// Pause after pressing Home at task start.
    #[arg(long, default_value_t = 1000)]
    pub settle_delay_ms: u64,

    #[arg(long, default_value_t = 120)]
    pub model_timeout_secs: u64,

    /// Path to the adb binary.
    #[arg(long, default_value = "adb")]
    pub adb: PathBuf,

    /// Device serial, when more than one device is attached.
    #[arg(long)]
    pub serial: Option<String>,

    /// First port tried for the web UI.
    #[arg(long, default_value_t = 3000)]
    pub port: u16,

    /// JSON file of extra `{"App Name": "package.id"}` entries.
    #[arg(long)]
    pub apps_file: Option<PathBuf>,
}

impl AgentArgs {
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            max_steps: self.max_steps,
            step_delay: Duration::from_millis(self.step_delay_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            model_timeout: Duration::from_secs(self.model_timeout_secs),
        }
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            request_timeout: Duration::from_secs(self.model_timeout_secs),
        }
    }
}
