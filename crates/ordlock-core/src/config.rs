//! Process-wide configuration for the synchronization layer.
//!
//! Configuration is layered with `figment`:
//!
//! 1. Built-in defaults
//! 2. `ordlock.toml` in the working directory (or an explicit file)
//! 3. Environment variables prefixed `ORDLOCK_` (e.g. `ORDLOCK_LOG_CONTENTION=true`)
//!
//! The configuration is installed once per process with [`install`]; the
//! first primitive constructed without an installed configuration loads it
//! from the environment instead.
//!
//! # Example
//!
//! ```toml
//! check_lock_order = true
//! backend = "portable"
//! log_contention = true
//! contention_warn_ms = 50
//! ```

use std::path::Path;
use std::sync::OnceLock;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "ordlock.toml";

/// Prefix of environment variables overriding configuration keys.
pub const ENV_PREFIX: &str = "ORDLOCK_";

/// Which wait/wake implementation newly constructed primitives use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Futex on Linux, portable elsewhere.
    #[default]
    Auto,
    /// Direct `futex(2)` syscalls. Linux only.
    Futex,
    /// Address-keyed parking table built on `parking_lot` mutexes and condvars.
    Portable,
}

/// Synchronization layer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Scan the per-thread held-mutex table for ordering violations on every
    /// acquire and wait.
    pub check_lock_order: bool,
    /// Wait/wake backend for new primitives.
    pub backend: BackendKind,
    /// Hand broadcast waiters straight to the guard mutex's queue. When false,
    /// broadcast wakes every waiter and lets them re-race the guard.
    pub requeue_on_broadcast: bool,
    /// Record per-mutex contention statistics.
    pub log_contention: bool,
    /// Warn when a blocked acquire waited longer than this many
    /// milliseconds. 0 disables the warning.
    pub contention_warn_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            check_lock_order: true,
            backend: BackendKind::Auto,
            requeue_on_broadcast: true,
            log_contention: false,
            contention_warn_ms: 0,
        }
    }
}

impl SyncConfig {
    /// Loads defaults, then `ordlock.toml` if present, then `ORDLOCK_*`
    /// environment variables.
    pub fn load() -> Result<Self> {
        Self::extract(
            Self::figment().merge(Toml::file(CONFIG_FILE_NAME)),
        )
    }

    /// Loads defaults, then the given TOML file, then `ORDLOCK_*`
    /// environment variables.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        Self::extract(Self::figment().merge(Toml::file(path)))
    }

    /// Parses a configuration from TOML text layered over the defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = Self::figment().merge(Toml::string(text)).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(SyncConfig::default()))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Self = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the current target cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.backend == BackendKind::Futex && !cfg!(target_os = "linux") {
            return Err(Error::Config(
                "backend = \"futex\" requires Linux".to_string(),
            ));
        }
        Ok(())
    }

    /// The backend `Auto` resolves to on this target.
    #[must_use]
    pub fn resolved_backend(&self) -> BackendKind {
        match self.backend {
            BackendKind::Auto if cfg!(target_os = "linux") => BackendKind::Futex,
            BackendKind::Auto => BackendKind::Portable,
            other => other,
        }
    }
}

static GLOBAL: OnceLock<SyncConfig> = OnceLock::new();

/// Installs the process-wide configuration.
///
/// Must run before the first primitive is constructed; fails if a
/// configuration is already in place.
pub fn install(config: SyncConfig) -> Result<()> {
    config.validate()?;
    GLOBAL
        .set(config)
        .map_err(|_| Error::Config("configuration already installed".to_string()))?;
    tracing::debug!(config = ?global(), "sync configuration installed");
    Ok(())
}

/// Returns the process-wide configuration, loading it on first use.
pub fn global() -> &'static SyncConfig {
    GLOBAL.get_or_init(|| {
        SyncConfig::load().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "invalid sync configuration, using defaults");
            SyncConfig::default()
        })
    })
}
