use crate::backoff::{Backoff, DEFAULT_FACTOR, DEFAULT_JITTER, DEFAULT_MAX_DELAY, DEFAULT_MIN_DELAY};
use crate::util::{format_duration, parse_duration};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const CONFIG_PATH_ENV: &str = "BACKOFF_CONFIG";
pub const ENV_MIN_DELAY: &str = "BACKOFF_MIN_DELAY";
pub const ENV_MAX_DELAY: &str = "BACKOFF_MAX_DELAY";
pub const ENV_FACTOR: &str = "BACKOFF_FACTOR";
pub const ENV_JITTER: &str = "BACKOFF_JITTER";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),
    #[error("invalid factor: {0:?} (expected a finite, non-negative number)")]
    InvalidFactor(String),
    #[error("invalid boolean: {0:?}")]
    InvalidBool(String),
    #[error("min_delay {min} exceeds max_delay {max}")]
    MinExceedsMax { min: String, max: String },
    #[error("unknown config key: {0:?} (expected one of: min_delay, max_delay, factor, jitter)")]
    UnknownKey(String),
}

/// Fully resolved generator settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            factor: DEFAULT_FACTOR,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl From<BackoffConfig> for Config {
    fn from(c: BackoffConfig) -> Self {
        Config {
            min_delay: Some(c.min_delay),
            max_delay: Some(c.max_delay),
            factor: Some(c.factor),
            jitter: Some(c.jitter),
        }
    }
}

/// Layered user settings. `None` means "not set at this layer".
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, with = "crate::util::duration_opt", skip_serializing_if = "Option::is_none")]
    pub min_delay: Option<Duration>,
    #[serde(default, with = "crate::util::duration_opt", skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<bool>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }
        let data = fs::read_to_string(path).context("read config file")?;
        if data.trim().is_empty() {
            return Ok(Config::default());
        }
        let cfg: Config = serde_yaml::from_str(&data).context("parse config yaml")?;
        debug!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&self.path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).context("create config dir")?;
            }
        }
        let data = serde_yaml::to_string(&self).context("serialize config")?;
        fs::write(path, data).context("write config file")?;
        Ok(())
    }

    pub fn path(&self) -> PathBuf {
        Self::config_path()
    }

    /// `$BACKOFF_CONFIG`, else the platform config dir.
    pub fn config_path() -> PathBuf {
        if let Ok(p) = std::env::var(CONFIG_PATH_ENV) {
            if !p.is_empty() {
                return PathBuf::from(p);
            }
        }
        match ProjectDirs::from("", "", "backoff") {
            Some(proj) => proj.config_dir().join("config.yaml"),
            None => PathBuf::from(".backoff").join("config.yaml"),
        }
    }

    pub fn apply_env(&mut self) -> Result<()> {
        for (var, key) in [
            (ENV_MIN_DELAY, "min_delay"),
            (ENV_MAX_DELAY, "max_delay"),
            (ENV_FACTOR, "factor"),
            (ENV_JITTER, "jitter"),
        ] {
            if let Ok(v) = std::env::var(var) {
                if !v.is_empty() {
                    self.set(key, &v).with_context(|| format!("env {}", var))?;
                }
            }
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &crate::cli::Cli) {
        if let Some(d) = cli.min_delay {
            self.min_delay = Some(d);
        }
        if let Some(d) = cli.max_delay {
            self.max_delay = Some(d);
        }
        if let Some(f) = cli.factor {
            self.factor = Some(f);
        }
        if let Some(j) = cli.jitter {
            self.jitter = Some(j);
        }
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "min_delay" => self.min_delay = Some(parse_duration(value)?),
            "max_delay" => self.max_delay = Some(parse_duration(value)?),
            "factor" => self.factor = Some(parse_factor(value)?),
            "jitter" => self.jitter = Some(parse_bool(value)?),
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let v = match key {
            "min_delay" => self.min_delay.map(format_duration),
            "max_delay" => self.max_delay.map(format_duration),
            "factor" => self.factor.map(|f| f.to_string()),
            "jitter" => self.jitter.map(|j| j.to_string()),
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        };
        Ok(v)
    }

    /// Fills unset fields from the defaults and validates the result. Zero
    /// values are backfilled exactly as [`Backoff`] construction does.
    pub fn resolve(&self) -> Result<BackoffConfig, ConfigError> {
        let defaults = BackoffConfig::default();
        let raw = BackoffConfig {
            min_delay: self.min_delay.unwrap_or(defaults.min_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            factor: self.factor.unwrap_or(defaults.factor),
            jitter: self.jitter.unwrap_or(defaults.jitter),
        };
        if !raw.factor.is_finite() || raw.factor < 0.0 {
            return Err(ConfigError::InvalidFactor(raw.factor.to_string()));
        }
        let bo = Backoff::from_config(&raw);
        let resolved = BackoffConfig {
            min_delay: bo.min_delay(),
            max_delay: bo.max_delay(),
            factor: bo.factor(),
            jitter: bo.jitter(),
        };
        if resolved.min_delay > resolved.max_delay {
            return Err(ConfigError::MinExceedsMax {
                min: format_duration(resolved.min_delay),
                max: format_duration(resolved.max_delay),
            });
        }
        Ok(resolved)
    }
}

pub fn parse_factor(s: &str) -> Result<f64, ConfigError> {
    match s.trim().parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 0.0 => Ok(f),
        _ => Err(ConfigError::InvalidFactor(s.to_string())),
    }
}

pub fn parse_bool(s: &str) -> Result<bool, ConfigError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool(s.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults() {
        let cfg = Config::default().resolve().unwrap();
        assert_eq!(cfg, BackoffConfig::default());
    }

    #[test]
    fn test_resolve_backfills_zero() {
        let cfg = Config {
            min_delay: Some(Duration::ZERO),
            factor: Some(0.0),
            ..Default::default()
        };
        let r = cfg.resolve().unwrap();
        assert_eq!(r.min_delay, DEFAULT_MIN_DELAY);
        assert_eq!(r.factor, DEFAULT_FACTOR);
    }

    #[test]
    fn test_resolve_rejects_min_over_max() {
        let cfg = Config {
            min_delay: Some(Duration::from_secs(5)),
            max_delay: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        assert_eq!(
            cfg.resolve().unwrap_err(),
            ConfigError::MinExceedsMax { min: "5s".into(), max: "1s".into() }
        );
    }

    #[test]
    fn test_resolve_rejects_bad_factor() {
        let cfg = Config { factor: Some(-1.0), ..Default::default() };
        assert!(matches!(cfg.resolve(), Err(ConfigError::InvalidFactor(_))));
        let cfg = Config { factor: Some(f64::NAN), ..Default::default() };
        assert!(matches!(cfg.resolve(), Err(ConfigError::InvalidFactor(_))));
    }

    #[test]
    fn test_set_get() {
        let mut cfg = Config::default();
        cfg.set("min_delay", "250ms").unwrap();
        cfg.set("jitter", "yes").unwrap();
        cfg.set("factor", "1.5").unwrap();
        assert_eq!(cfg.get("min_delay").unwrap().as_deref(), Some("250ms"));
        assert_eq!(cfg.get("jitter").unwrap().as_deref(), Some("true"));
        assert_eq!(cfg.get("factor").unwrap().as_deref(), Some("1.5"));
        assert_eq!(cfg.get("max_delay").unwrap(), None);
        assert!(matches!(cfg.set("nope", "1"), Err(ConfigError::UnknownKey(_))));
        assert!(matches!(cfg.set("jitter", "maybe"), Err(ConfigError::InvalidBool(_))));
    }
}
