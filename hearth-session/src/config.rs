use std::time::Duration;

use serde::Deserialize;

/// Tuning for the session bootstrap state machine.
///
/// Every field can be set via an environment variable prefixed with
/// `HEARTH_SESSION__`. The defaults match the shipped client behavior:
/// each lookup attempt is bounded at 8 seconds, a failed lookup is
/// retried 3 more times with linearly growing backoff, and the whole
/// initial resolution may never hold the loading flag past 15 seconds.
#[derive(Debug, Deserialize, Clone)]
pub struct BootstrapConfig {
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_ready_ceiling_ms")]
    pub ready_ceiling_ms: u64,
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
}

fn default_attempt_timeout_ms() -> u64 { 8_000 }
fn default_ready_ceiling_ms() -> u64 { 15_000 }
fn default_retry_limit() -> u32 { 3 }
fn default_backoff_step_ms() -> u64 { 1_000 }

impl BootstrapConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("HEARTH_SESSION").separator("__"))
            .build()?;
        Ok(config.try_deserialize().unwrap_or_else(|_| Self::default()))
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn ready_ceiling(&self) -> Duration {
        Duration::from_millis(self.ready_ceiling_ms)
    }

    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: default_attempt_timeout_ms(),
            ready_ceiling_ms: default_ready_ceiling_ms(),
            retry_limit: default_retry_limit(),
            backoff_step_ms: default_backoff_step_ms(),
        }
    }
}
