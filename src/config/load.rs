//! Configuration loading with env-var overrides.
//!
//! Reads TOML files, follows `[meta] base = "..."` inheritance chains,
//! and applies `INTERACT_WORK_DIR` and `INTERACT_LOG_LEVEL` env overrides.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use serde::Deserialize;

use crate::component_ids::codec::TOKEN_LEN;
use crate::error::AppError;

use super::raw::RawConfig;
use super::types::*;

/// Longest configurable duration: 100 years. Larger values would push
/// instants past what the time arithmetic can represent.
const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Deep-merge two TOML values. Tables merge key by key; any other overlay
/// value replaces the base value.
fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, ov_val) in overlay_tbl {
                let merged = match base_tbl.remove(&key) {
                    Some(base_val) => merge_toml(base_val, ov_val),
                    None => ov_val,
                };
                base_tbl.insert(key, merged);
            }
            toml::Value::Table(base_tbl)
        }
        (_, overlay) => overlay,
    }
}

/// Read `path`, follow its `[meta] base` chain and return the merged value.
/// `visited` holds canonical paths already in the chain.
fn load_raw_merged(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<toml::Value, AppError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical) {
        return Err(AppError::Config(format!(
            "circular base reference detected at: {}",
            path.display()
        )));
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let overlay_val: toml::Value = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let Some(base_str) = overlay_val
        .get("meta")
        .and_then(|m| m.get("base"))
        .and_then(|b| b.as_str())
    else {
        return Ok(overlay_val);
    };

    let base_path = if Path::new(base_str).is_absolute() {
        PathBuf::from(base_str)
    } else {
        path.parent().unwrap_or(Path::new(".")).join(base_str)
    };
    let base_val = load_raw_merged(&base_path, visited)?;
    Ok(merge_toml(base_val, overlay_val))
}

/// Load config from `config_path`, or `config/default.toml`, then apply
/// env-var overrides. Without a path and without `config/default.toml`
/// the built-in defaults are used.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let work_dir_override = env::var("INTERACT_WORK_DIR").ok();
    let log_level_override = env::var("INTERACT_LOG_LEVEL").ok();

    if let Some(path) = config_path {
        return load_from(
            Path::new(path),
            work_dir_override.as_deref(),
            log_level_override.as_deref(),
        );
    }

    let default_path = Path::new("config/default.toml");
    if default_path.exists() {
        load_from(
            default_path,
            work_dir_override.as_deref(),
            log_level_override.as_deref(),
        )
    } else {
        resolve(
            RawConfig::default(),
            work_dir_override.as_deref(),
            log_level_override.as_deref(),
        )
    }
}

/// Load from an explicit path. Tests pass overrides directly instead of
/// mutating env vars.
pub fn load_from(
    path: &Path,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let merged_val = load_raw_merged(path, &mut HashSet::new())?;

    let parsed: RawConfig = Deserialize::deserialize(merged_val).map_err(|e: toml::de::Error| {
        AppError::Config(format!("config error in {}: {e}", path.display()))
    })?;

    resolve(parsed, work_dir_override, log_level_override)
}

/// Validate raw values and build the public [`Config`].
pub(super) fn resolve(
    parsed: RawConfig,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let s = parsed.supervisor;
    let work_dir = expand_home(work_dir_override.unwrap_or(&s.work_dir));
    let log_level = log_level_override.unwrap_or(&s.log_level).to_string();

    let ids = parsed.component_ids;
    let regular_ttl = positive_secs("component_ids.regular_ttl_secs", ids.regular_ttl_secs)?;
    if ids.sweep_interval_secs == 0 {
        return Err(AppError::Config(
            "component_ids.sweep_interval_secs must be greater than 0".into(),
        ));
    }
    let sweep_interval = Duration::from_secs(at_most(
        "component_ids.sweep_interval_secs",
        ids.sweep_interval_secs,
    )?);
    if ids.wire_token_max_length < TOKEN_LEN {
        return Err(AppError::Config(format!(
            "component_ids.wire_token_max_length must be at least {TOKEN_LEN}, got {}",
            ids.wire_token_max_length
        )));
    }
    let database = {
        let p = expand_home(&ids.database);
        if p.is_absolute() { p } else { work_dir.join(p) }
    };

    let rl = parsed.rate_limit;
    let window = positive_secs("rate_limit.window_secs", rl.window_secs)?;
    let capacity = non_zero("rate_limit.capacity", rl.capacity)?;

    let d = parsed.dispatch;
    let workers = non_zero("dispatch.workers", d.workers)?;
    let queue = non_zero("dispatch.queue", d.queue)?;
    let drain_deadline =
        Duration::from_secs(at_most("dispatch.drain_deadline_secs", d.drain_deadline_secs)?);

    let ev = parsed.eval;
    if ev.enabled && ev.base_url.trim().is_empty() {
        return Err(AppError::Config("eval.base_url must be set when eval is enabled".into()));
    }

    Ok(Config {
        bot_name: s.bot_name,
        work_dir,
        log_level,
        component_ids: ComponentIdsConfig {
            regular_ttl,
            sweep_interval,
            wire_token_max_length: ids.wire_token_max_length,
            max_args_length: ids.max_args_length,
            database,
        },
        rate_limit: RateLimitConfig {
            window,
            capacity,
            per_user: rl.per_user,
        },
        dispatch: DispatchConfig {
            workers,
            drain_deadline,
            queue,
        },
        eval: EvalConfig {
            enabled: ev.enabled,
            base_url: ev.base_url,
            timeout_seconds: ev.timeout_seconds,
            startup_script: ev.startup_script,
        },
    })
}

fn positive_secs(key: &str, secs: u64) -> Result<TimeDelta, AppError> {
    if secs == 0 {
        return Err(AppError::Config(format!("{key} must be greater than 0")));
    }
    let secs = at_most(key, secs)?;
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| AppError::Config(format!("{key} is out of range: {secs}")))
}

fn at_most(key: &str, secs: u64) -> Result<u64, AppError> {
    if secs > MAX_DURATION_SECS {
        return Err(AppError::Config(format!(
            "{key} must be at most {MAX_DURATION_SECS} seconds (100 years), got {secs}"
        )));
    }
    Ok(secs)
}

fn non_zero(key: &str, n: usize) -> Result<NonZeroUsize, AppError> {
    NonZeroUsize::new(n).ok_or_else(|| AppError::Config(format!("{key} must be at least 1")))
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
