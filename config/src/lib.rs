//! Configuration for pledge worker pools, retry policy, and blocking waits.
//!
//! Read from `~/.pledge/config.toml`, or from the file named by the
//! `PLEDGE_CONFIG` environment variable. Every section and every field is
//! optional; consumers fall back to their own defaults.

use serde::Deserialize;
use std::{env, path::PathBuf, time::Duration};
use thiserror::Error;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "PLEDGE_CONFIG";

#[derive(Debug, Default, Deserialize)]
pub struct PledgeConfig {
    pub pool: Option<PoolConfig>,
    pub retry: Option<RetryConfig>,
    pub wait: Option<WaitConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Worker pool sizing for the multi-worker execution context.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    /// Async worker threads driving timers. Default: number of CPUs.
    pub worker_threads: Option<usize>,
    /// Upper bound on threads running submitted jobs. Default: 512.
    pub max_blocking_threads: Option<usize>,
    /// Thread name prefix. Supports `${ENV_VAR}` expansion.
    pub thread_name: Option<String>,
}

impl PoolConfig {
    pub const DEFAULT_THREAD_NAME: &'static str = "pledge-worker";

    #[must_use]
    pub fn thread_name(&self) -> String {
        self.thread_name
            .as_deref()
            .map(expand_env_vars)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| Self::DEFAULT_THREAD_NAME.to_string())
    }
}

/// Retry/backoff settings. Unset fields keep the retry policy defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    /// Down-jitter factor in `[0.0, 1.0]`.
    pub jitter_factor: Option<f64>,
}

impl RetryConfig {
    #[must_use]
    pub fn initial_delay(&self) -> Option<Duration> {
        self.initial_delay_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct WaitConfig {
    /// Bound applied to blocking waits that don't pass their own timeout.
    pub default_timeout_ms: Option<u64>,
}

impl WaitConfig {
    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}

/// Replace every `${VAR}` with the value of `VAR` (empty when unset).
/// An unclosed `${` is kept verbatim.
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

impl PledgeConfig {
    /// Load the config file. Returns `Ok(None)` when no file exists.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = match config_path() {
            Some(path) => path,
            None => return Ok(None),
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(path).map(Some)
    }

    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read { path, source: err });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "Loaded config");
                Ok(config)
            }
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse { path, source: err })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    #[must_use]
    pub fn pool(&self) -> PoolConfig {
        self.pool.clone().unwrap_or_default()
    }

    #[must_use]
    pub fn retry(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    #[must_use]
    pub fn wait(&self) -> WaitConfig {
        self.wait.clone().unwrap_or_default()
    }
}

pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".pledge").join("config.toml"))
}
