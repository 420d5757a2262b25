use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

const ENV_PREFIX: &str = "TASKCONTROL";

/// Read a profiled key: tries `TASKCONTROL_{PROFILE}_{KEY}` first, falls back to `TASKCONTROL_{KEY}`.
fn profiled_opt<F>(lookup: &F, profile: &str, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if !profile.is_empty() {
        let prefixed = format!("{ENV_PREFIX}_{profile}_{key}");
        if let Some(v) = lookup(&prefixed).filter(|s| !s.is_empty()) {
            return Some(v);
        }
    }
    lookup(&format!("{ENV_PREFIX}_{key}")).filter(|s| !s.is_empty())
}

// ── Controller config ─────────────────────────────────────────

/// Thread and pool settings for the job controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Number of worker threads in the main pool. 0 = available parallelism.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Name prefix for main pool threads.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
    /// Name prefix for threads of the on-demand high priority pool.
    #[serde(default = "default_high_priority_prefix")]
    pub high_priority_prefix: String,
    /// Stack size in KiB for lightweight per-child threads.
    #[serde(default = "default_lightweight_stack_kib")]
    pub lightweight_stack_kib: usize,
}

fn default_worker_threads() -> usize { 0 }
fn default_thread_name_prefix() -> String { "taskcontrol-worker".into() }
fn default_high_priority_prefix() -> String { "taskcontrol-high".into() }
fn default_lightweight_stack_kib() -> usize { 256 }

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            thread_name_prefix: default_thread_name_prefix(),
            high_priority_prefix: default_high_priority_prefix(),
            lightweight_stack_kib: default_lightweight_stack_kib(),
        }
    }
}

impl ControllerConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    ///
    /// Profile is read from `TASKCONTROL_PROFILE`. When set (e.g. `BATCH`), every key
    /// is first looked up as `TASKCONTROL_BATCH_{KEY}`, falling back to `TASKCONTROL_{KEY}`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Unparseable values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let profile = lookup(&format!("{ENV_PREFIX}_PROFILE"))
            .unwrap_or_default()
            .to_uppercase();
        let p = profile.as_str();
        let mut config = Self::default();

        if let Some(v) = profiled_opt(&lookup, p, "THREADS").and_then(|v| v.parse().ok()) {
            config.worker_threads = v;
        }
        if let Some(v) = profiled_opt(&lookup, p, "THREAD_NAME_PREFIX") {
            config.thread_name_prefix = v;
        }
        if let Some(v) = profiled_opt(&lookup, p, "HIGH_PRIORITY_PREFIX") {
            config.high_priority_prefix = v;
        }
        if let Some(v) = profiled_opt(&lookup, p, "LIGHTWEIGHT_STACK_KIB").and_then(|v| v.parse().ok()) {
            config.lightweight_stack_kib = v;
        }
        config
    }

    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Reject values the pools cannot be built with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lightweight_stack_kib < 16 {
            return Err(ConfigError::Invalid {
                key: "lightweight_stack_kib".into(),
                value: self.lightweight_stack_kib.to_string(),
            });
        }
        if self.thread_name_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                key: "thread_name_prefix".into(),
                value: String::new(),
            });
        }
        Ok(())
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }

    /// Stack size in bytes for lightweight threads.
    pub fn lightweight_stack_bytes(&self) -> usize {
        self.lightweight_stack_kib * 1024
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Controller config loaded:");
        tracing::info!(
            "  workers:     threads={} (configured {}), prefix={}",
            self.resolved_worker_threads(),
            self.worker_threads,
            self.thread_name_prefix
        );
        tracing::info!("  high prio:   prefix={}", self.high_priority_prefix);
        tracing::info!("  lightweight: stack={}KiB", self.lightweight_stack_kib);
    }
}
