//! Public configuration types.
//!
//! These are the resolved, validated structs the rest of the bot consumes.
//! Raw TOML deserialization types live in `raw.rs`.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;

use crate::component_ids::GeneratorConfig;
use crate::interaction::RunOptions;

/// Top-level resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_name: String,
    pub work_dir: PathBuf,
    pub log_level: String,
    pub component_ids: ComponentIdsConfig,
    pub rate_limit: RateLimitConfig,
    pub dispatch: DispatchConfig,
    pub eval: EvalConfig,
}

// ── Component IDs ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ComponentIdsConfig {
    /// Idle period after which a `Regular` ID may be evicted.
    pub regular_ttl: TimeDelta,
    pub sweep_interval: Duration,
    pub wire_token_max_length: usize,
    pub max_args_length: usize,
    /// SQLite file backing the payload store; absolute after loading.
    pub database: PathBuf,
}

impl ComponentIdsConfig {
    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            wire_token_max_length: self.wire_token_max_length,
            max_args_length: self.max_args_length,
        }
    }
}

// ── Rate limit ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: TimeDelta,
    pub capacity: NonZeroUsize,
    /// One window per user instead of one shared window.
    pub per_user: bool,
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub workers: NonZeroUsize,
    pub drain_deadline: Duration,
    /// Capacity of the inbound event queue.
    pub queue: NonZeroUsize,
}

impl DispatchConfig {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            workers: self.workers,
            drain_deadline: self.drain_deadline,
        }
    }
}

// ── Eval ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_seconds: u64,
    pub startup_script: bool,
}
