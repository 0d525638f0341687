//! Raw TOML deserialization types.
//!
//! These structs mirror the TOML file shape and use `serde` defaults.
//! The `load` module validates them into the public `types` structs.

use serde::Deserialize;

// ── Top-level ────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub(super) struct RawConfig {
    #[serde(default)]
    pub supervisor: RawSupervisor,
    #[serde(default)]
    pub component_ids: RawComponentIds,
    #[serde(default)]
    pub rate_limit: RawRateLimit,
    #[serde(default)]
    pub dispatch: RawDispatch,
    #[serde(default)]
    pub eval: RawEval,
}

#[derive(Deserialize)]
pub(super) struct RawSupervisor {
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for RawSupervisor {
    fn default() -> Self {
        Self {
            bot_name: default_bot_name(),
            work_dir: default_work_dir(),
            log_level: default_log_level(),
        }
    }
}

// ── Component IDs ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawComponentIds {
    #[serde(default = "default_regular_ttl_secs")]
    pub regular_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_wire_token_max_length")]
    pub wire_token_max_length: usize,
    #[serde(default = "default_max_args_length")]
    pub max_args_length: usize,
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for RawComponentIds {
    fn default() -> Self {
        Self {
            regular_ttl_secs: default_regular_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            wire_token_max_length: default_wire_token_max_length(),
            max_args_length: default_max_args_length(),
            database: default_database(),
        }
    }
}

// ── Rate limit ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawRateLimit {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub per_user: bool,
}

impl Default for RawRateLimit {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            capacity: default_capacity(),
            per_user: false,
        }
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawDispatch {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_drain_deadline_secs")]
    pub drain_deadline_secs: u64,
    #[serde(default = "default_queue")]
    pub queue: usize,
}

impl Default for RawDispatch {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            drain_deadline_secs: default_drain_deadline_secs(),
            queue: default_queue(),
        }
    }
}

// ── Eval ─────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawEval {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_eval_base_url")]
    pub base_url: String,
    #[serde(default = "default_eval_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub startup_script: bool,
}

impl Default for RawEval {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_eval_base_url(),
            timeout_seconds: default_eval_timeout_seconds(),
            startup_script: true,
        }
    }
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_bot_name() -> String {
    "interact".to_string()
}

fn default_work_dir() -> String {
    "~/.interact-bot".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// 20 days.
fn default_regular_ttl_secs() -> u64 {
    20 * 24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_wire_token_max_length() -> usize {
    100
}

fn default_max_args_length() -> usize {
    4000
}

fn default_database() -> String {
    "component_ids.db".to_string()
}

fn default_window_secs() -> u64 {
    10
}

fn default_capacity() -> usize {
    3
}

fn default_workers() -> usize {
    4
}

fn default_drain_deadline_secs() -> u64 {
    10
}

fn default_queue() -> usize {
    64
}

fn default_eval_base_url() -> String {
    "http://localhost:8080/jshell".to_string()
}

fn default_eval_timeout_seconds() -> u64 {
    10
}

fn default_true() -> bool {
    true
}
