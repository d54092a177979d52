//! Configuration management for the orchestrator service.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `8098`.
//! - `TASK_STORE` - Optional. `memory` or `sqlite`. Defaults to `sqlite`.
//! - `DATA_DIR` - Optional. Directory for the SQLite database. Defaults to `./data`.
//! - `TASK_RETENTION_SECONDS` - Optional. How long task snapshots live. Defaults to 7 days.
//! - `EXECUTOR_TIMEOUT_SECONDS` - Optional. Per-subtask deadline. Defaults to `60`.
//! - `MAX_TASK_DESCRIPTION_CHARS` - Optional. Defaults to `10000`.
//! - `MAX_SUBTASKS` - Optional. Largest accepted plan. Defaults to `10`.
//! - `FAILURE_POLICY` - Optional. `fail_fast` or `continue`. Defaults to `fail_fast`.
//! - `EMPTY_PLAN_POLICY` - Optional. `complete` or `fail`. Defaults to `complete`.
//! - `SUBSCRIBER_BUFFER` - Optional. Per-subscriber notification buffer. Defaults to `64`.
//! - `REPLAY_MAX_SPEED` - Optional. Largest accepted replay speed. Defaults to `10`.
//! - `REPLAY_MAX_DELAY_MS` - Optional. Cap on a single replay gap. Unset means no cap.
//! - `SIMULATED_EXECUTORS` - Optional. Register simulated executors. Defaults to `true`.
//! - `SIMULATED_STEP_MS` - Optional. Step duration of simulated executors. Defaults to `250`.
//! - `STORE_SWEEP_INTERVAL_SECONDS` - Optional. Expired-task sweep period. Defaults to `300`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::orchestrator::{EmptyPlanPolicy, OrchestratorConfig};
use crate::replay::ReplayConfig;
use crate::store::StoreType;
use crate::task::FailurePolicy;
use crate::util::parse_bool;

pub const DEFAULT_PORT: u16 = 8098;
pub const DEFAULT_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_EXECUTOR_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Main configuration struct.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub store_type: StoreType,
    pub data_dir: PathBuf,
    pub retention: Duration,
    pub sweep_interval: Duration,

    pub executor_timeout: Duration,
    pub simulated_executors: bool,
    pub simulated_step: Duration,

    pub orchestrator: OrchestratorConfig,
    pub replay: ReplayConfig,
    pub subscriber_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            store_type: StoreType::default(),
            data_dir: PathBuf::from("./data"),
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            sweep_interval: Duration::from_secs(300),
            executor_timeout: Duration::from_secs(DEFAULT_EXECUTOR_TIMEOUT_SECS),
            simulated_executors: true,
            simulated_step: Duration::from_millis(250),
            orchestrator: OrchestratorConfig::default(),
            replay: ReplayConfig::default(),
            subscriber_buffer: crate::bus::DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

fn invalid(name: &str, detail: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue(name.to_string(), detail.to_string())
}

/// Parse `name` with `FromStr`, or return `default` when unset.
fn parse_var<T, F>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|e| invalid(name, e)),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("HOST").unwrap_or(defaults.host);
        let port = parse_var(&lookup, "PORT", defaults.port)?;

        let store_type = lookup("TASK_STORE")
            .map(|s| StoreType::parse(&s))
            .unwrap_or(defaults.store_type);
        let data_dir = lookup("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let retention_secs: u64 =
            parse_var(&lookup, "TASK_RETENTION_SECONDS", DEFAULT_RETENTION_SECS)?;
        if retention_secs == 0 {
            return Err(invalid("TASK_RETENTION_SECONDS", "must be positive"));
        }
        let sweep_secs: u64 = parse_var(&lookup, "STORE_SWEEP_INTERVAL_SECONDS", 300)?;
        let timeout_secs: u64 = parse_var(
            &lookup,
            "EXECUTOR_TIMEOUT_SECONDS",
            DEFAULT_EXECUTOR_TIMEOUT_SECS,
        )?;
        if timeout_secs == 0 {
            return Err(invalid("EXECUTOR_TIMEOUT_SECONDS", "must be positive"));
        }

        let simulated_executors = match lookup("SIMULATED_EXECUTORS") {
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| invalid("SIMULATED_EXECUTORS", format!("not a boolean: {}", raw)))?,
            None => defaults.simulated_executors,
        };
        let step_ms: u64 = parse_var(&lookup, "SIMULATED_STEP_MS", 250)?;

        let failure_policy = match lookup("FAILURE_POLICY") {
            Some(raw) => FailurePolicy::parse(&raw)
                .ok_or_else(|| invalid("FAILURE_POLICY", format!("unknown policy: {}", raw)))?,
            None => defaults.orchestrator.failure_policy,
        };
        let empty_plan_policy = match lookup("EMPTY_PLAN_POLICY") {
            Some(raw) => EmptyPlanPolicy::parse(&raw)
                .ok_or_else(|| invalid("EMPTY_PLAN_POLICY", format!("unknown policy: {}", raw)))?,
            None => defaults.orchestrator.empty_plan_policy,
        };
        let orchestrator = OrchestratorConfig {
            max_description_chars: parse_var(
                &lookup,
                "MAX_TASK_DESCRIPTION_CHARS",
                defaults.orchestrator.max_description_chars,
            )?,
            max_subtasks: parse_var(&lookup, "MAX_SUBTASKS", defaults.orchestrator.max_subtasks)?,
            failure_policy,
            empty_plan_policy,
        };

        let max_speed: f64 = parse_var(&lookup, "REPLAY_MAX_SPEED", defaults.replay.max_speed)?;
        if !(max_speed.is_finite() && max_speed > 0.0) {
            return Err(invalid("REPLAY_MAX_SPEED", "must be a positive number"));
        }
        let max_delay = match lookup("REPLAY_MAX_DELAY_MS") {
            Some(raw) => Some(Duration::from_millis(
                raw.trim()
                    .parse()
                    .map_err(|e| invalid("REPLAY_MAX_DELAY_MS", e))?,
            )),
            None => None,
        };

        let subscriber_buffer: usize =
            parse_var(&lookup, "SUBSCRIBER_BUFFER", defaults.subscriber_buffer)?;
        if subscriber_buffer == 0 {
            return Err(invalid("SUBSCRIBER_BUFFER", "must be positive"));
        }

        Ok(Self {
            host,
            port,
            store_type,
            data_dir,
            retention: Duration::from_secs(retention_secs),
            sweep_interval: Duration::from_secs(sweep_secs.max(1)),
            executor_timeout: Duration::from_secs(timeout_secs),
            simulated_executors,
            simulated_step: Duration::from_millis(step_ms),
            orchestrator,
            replay: ReplayConfig {
                max_speed,
                max_delay,
            },
            subscriber_buffer,
        })
    }
}
