use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpanlensError};
use crate::time::Granularity;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub default_granularity: Granularity,
    pub max_time_range: Duration,
    pub disabled_workspaces: Vec<String>,
    pub max_group_values: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_granularity: Granularity::Hour,
            max_time_range: Duration::from_secs(60 * 60 * 24 * 30),
            disabled_workspaces: Vec::new(),
            max_group_values: 100,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn is_workspace_disabled(&self, workspace_id: &str) -> bool {
        self.disabled_workspaces.iter().any(|w| w == workspace_id)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    default_granularity: Option<String>,
    max_time_range: Option<String>,
    disabled_workspaces: Option<String>,
    max_group_values: Option<usize>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("SPANLENS_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("spanlens/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| SpanlensError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| SpanlensError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    let max_group_values = match env::var("SPANLENS_MAX_GROUP_VALUES") {
        Ok(v) => Some(v.parse::<usize>().map_err(|e| {
            SpanlensError::Config(format!("bad SPANLENS_MAX_GROUP_VALUES in environment: {e}"))
        })?),
        Err(_) => None,
    };

    Ok(ConfigOverrides {
        default_granularity: env::var("SPANLENS_DEFAULT_GRANULARITY").ok(),
        max_time_range: env::var("SPANLENS_MAX_TIME_RANGE").ok(),
        disabled_workspaces: env::var("SPANLENS_DISABLED_WORKSPACES").ok(),
        max_group_values,
    })
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.default_granularity {
        cfg.default_granularity = v.parse().map_err(|e| {
            SpanlensError::Config(format!("bad default_granularity in {source}: {e}"))
        })?;
    }
    if let Some(v) = overrides.max_time_range {
        cfg.max_time_range = humantime::parse_duration(&v).map_err(|e| {
            SpanlensError::Config(format!("bad max_time_range in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.disabled_workspaces {
        cfg.disabled_workspaces = parse_workspace_list(&v).map_err(|e| {
            SpanlensError::Config(format!(
                "bad disabled_workspaces in {source}: {e} (value={v})"
            ))
        })?;
    }
    if let Some(v) = overrides.max_group_values {
        if v == 0 {
            return Err(SpanlensError::Config(format!(
                "bad max_group_values in {source}: must be positive"
            )));
        }
        cfg.max_group_values = v;
    }
    Ok(())
}

fn parse_workspace_list(raw: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for entry in raw.split(',') {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.contains(char::is_whitespace) {
            return Err(SpanlensError::Config(
                "workspace ids cannot contain whitespace".to_string(),
            ));
        }
        out.push(trimmed.to_string());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_expected_values() {
        let cfg = Config::default();
        assert_eq!(cfg.default_granularity, Granularity::Hour);
        assert_eq!(cfg.max_time_range, Duration::from_secs(30 * 86_400));
        assert!(cfg.disabled_workspaces.is_empty());
        assert_eq!(cfg.max_group_values, 100);
    }

    #[test]
    fn parse_workspace_list_accepts_list() {
        let ids = parse_workspace_list("ws-1, ws-2,,").unwrap();
        assert_eq!(ids, vec!["ws-1".to_string(), "ws-2".to_string()]);
        assert!(parse_workspace_list("ws 1").is_err());
    }

    #[test]
    fn apply_file_overrides_updates_fields() {
        let mut cfg = Config::default();
        let file: ConfigOverrides = toml::from_str(
            r#"
            default_granularity = "1min"
            max_time_range = "7d"
            disabled_workspaces = "ws-9"
            max_group_values = 20
            "#,
        )
        .unwrap();

        apply_overrides(&mut cfg, file, "config file").unwrap();

        assert_eq!(cfg.default_granularity, Granularity::Minute);
        assert_eq!(cfg.max_time_range, Duration::from_secs(7 * 86_400));
        assert!(cfg.is_workspace_disabled("ws-9"));
        assert!(!cfg.is_workspace_disabled("ws-1"));
        assert_eq!(cfg.max_group_values, 20);
    }

    #[test]
    fn apply_overrides_rejects_bad_values() {
        let mut cfg = Config::default();
        let bad_granularity = ConfigOverrides {
            default_granularity: Some("2min".to_string()),
            ..ConfigOverrides::default()
        };
        assert!(apply_overrides(&mut cfg, bad_granularity, "environment").is_err());

        let bad_range = ConfigOverrides {
            max_time_range: Some("soon".to_string()),
            ..ConfigOverrides::default()
        };
        assert!(apply_overrides(&mut cfg, bad_range, "environment").is_err());

        let zero = ConfigOverrides {
            max_group_values: Some(0),
            ..ConfigOverrides::default()
        };
        assert!(apply_overrides(&mut cfg, zero, "environment").is_err());
    }
}
