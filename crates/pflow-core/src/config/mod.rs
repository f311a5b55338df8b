//! Engine configuration.
//!
//! All knobs are environment-driven with typed defaults. The cache root
//! defaults to `~/.pflow/cache`; the debug root (trace files) defaults to
//! `~/.pflow/debug`.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::trace::TraceLimits;

/// Environment variable loader with type conversion and default handling.
pub struct EnvLoader;

impl EnvLoader {
    /// Load an optional environment variable with a default value. Parse
    /// failures fall back to the default rather than aborting the engine.
    pub fn load_with_default<T>(key: &str, default: T) -> T
    where
        T: FromStr,
    {
        match env::var(key) {
            Ok(value) => value.parse().unwrap_or(default),
            Err(_) => default,
        }
    }

    /// Load a boolean environment variable accepting the usual variations.
    pub fn load_bool(key: &str, default: bool) -> bool {
        match env::var(key).as_deref() {
            Ok("true" | "True" | "TRUE" | "1" | "yes" | "Yes" | "YES" | "on" | "On" | "ON") => true,
            Ok("false" | "False" | "FALSE" | "0" | "no" | "No" | "NO" | "off" | "Off" | "OFF") => {
                false
            }
            _ => default,
        }
    }

    /// Load a path, expanding a bare default under the user's home.
    pub fn load_path(key: &str, default_under_home: &str) -> PathBuf {
        match env::var(key) {
            Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
            _ => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(default_under_home),
        }
    }
}

/// Resolved engine configuration for one process.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the execution cache (`<cache_root>/registry-run/...`).
    pub cache_root: PathBuf,
    /// Root for trace files (`<debug_root>/workflow-trace-<run-id>.json`).
    pub debug_root: PathBuf,
    pub trace_limits: TraceLimits,
    /// Flattened-path count above which the smart filter engages.
    pub smart_filter_threshold: usize,
    /// Upper bound on repair rounds per run.
    pub max_repair_rounds: usize,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            cache_root: EnvLoader::load_path("PFLOW_CACHE_DIR", ".pflow/cache"),
            debug_root: EnvLoader::load_path("PFLOW_DEBUG_DIR", ".pflow/debug"),
            trace_limits: TraceLimits::from_env(),
            smart_filter_threshold: EnvLoader::load_with_default(
                "PFLOW_SMART_FILTER_THRESHOLD",
                crate::filter::DEFAULT_FILTER_THRESHOLD,
            ),
            max_repair_rounds: EnvLoader::load_with_default("PFLOW_MAX_REPAIR_ROUNDS", 3),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".pflow/cache"),
            debug_root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".pflow/debug"),
            trace_limits: TraceLimits::default(),
            smart_filter_threshold: crate::filter::DEFAULT_FILTER_THRESHOLD,
            max_repair_rounds: 3,
        }
    }
}
