// Configuration: storage location and domain constants

use crate::sqlite::SqliteStorage;
use crate::storage::{FileStorage, Storage};
use crate::views::ProgressScale;
use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Spend/progress share at which a value counts as "near" its limit
pub const NEAR_THRESHOLD_PCT: f64 = 80.0;
/// Share at which a value counts as "over" its limit
pub const OVER_THRESHOLD_PCT: f64 = 100.0;
/// Budget progress is reported up to this share
pub const BUDGET_CEILING_PCT: f64 = 999.0;
/// Goal progress never exceeds this share
pub const GOAL_CEILING_PCT: f64 = 100.0;
/// Two bookings for the same doctor closer than this conflict
pub const CONFLICT_WINDOW_MINUTES: i64 = 30;
/// Rows in the spending breakdown
pub const TOP_CATEGORIES: usize = 8;

const APP_DIR: &str = "snapstore";

/// Which storage medium snapshots live in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// One `<key>.json` file per app
    #[default]
    File,
    /// One row per app in `snapstore.db`
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: Option<PathBuf>,
    pub backend: Backend,
    pub thresholds: Thresholds,
    pub schedule: Schedule,
    pub views: Views,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub near_pct: f64,
    pub over_pct: f64,
    pub budget_ceiling_pct: f64,
    pub goal_ceiling_pct: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            near_pct: NEAR_THRESHOLD_PCT,
            over_pct: OVER_THRESHOLD_PCT,
            budget_ceiling_pct: BUDGET_CEILING_PCT,
            goal_ceiling_pct: GOAL_CEILING_PCT,
        }
    }
}

impl Thresholds {
    pub fn budget_scale(&self) -> ProgressScale {
        ProgressScale {
            near_pct: self.near_pct,
            over_pct: self.over_pct,
            ceiling_pct: self.budget_ceiling_pct,
        }
    }

    pub fn goal_scale(&self) -> ProgressScale {
        ProgressScale {
            near_pct: self.near_pct,
            over_pct: self.over_pct,
            ceiling_pct: self.goal_ceiling_pct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    pub conflict_window_minutes: i64,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            conflict_window_minutes: CONFLICT_WINDOW_MINUTES,
        }
    }
}

impl Schedule {
    pub fn conflict_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.conflict_window_minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Views {
    pub top_categories: usize,
}

impl Default for Views {
    fn default() -> Self {
        Self {
            top_categories: TOP_CATEGORIES,
        }
    }
}

impl Config {
    /// `<config_dir>/snapstore/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join("config.yaml"))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the default location is
    /// tried and a missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(eyre!("Config file not found: {:?}", p));
                }
                p.to_path_buf()
            }
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => {
                    debug!("No config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let text = fs::read_to_string(&path).with_context(|| format!("Failed to read config {:?}", path))?;
        let config = Self::from_yaml(&text).with_context(|| format!("Invalid config {:?}", path))?;
        debug!(path = ?path, "Loaded config");
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(text).context("Failed to parse YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        let all = [t.near_pct, t.over_pct, t.budget_ceiling_pct, t.goal_ceiling_pct];
        if all.iter().any(|pct| !pct.is_finite()) {
            return Err(eyre!("thresholds must be finite numbers, got {:?}", all));
        }
        if !(t.near_pct > 0.0 && t.near_pct <= t.over_pct) {
            return Err(eyre!(
                "thresholds.near_pct ({}) must be positive and not above over_pct ({})",
                t.near_pct,
                t.over_pct
            ));
        }
        if t.budget_ceiling_pct < t.over_pct || t.goal_ceiling_pct <= 0.0 {
            return Err(eyre!("threshold ceilings must be positive and budget ceiling >= over_pct"));
        }
        if self.schedule.conflict_window_minutes <= 0 {
            return Err(eyre!("schedule.conflict_window_minutes must be positive"));
        }
        if self.views.top_categories == 0 {
            return Err(eyre!("views.top_categories must be at least 1"));
        }
        Ok(())
    }

    /// Directory storage backends write into
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join(APP_DIR)))
            .unwrap_or_else(|| PathBuf::from(".snapstore"))
    }

    /// Open the configured storage backend
    pub fn open_storage(&self) -> Result<Box<dyn Storage>> {
        let dir = self.data_dir();
        let storage: Box<dyn Storage> = match self.backend {
            Backend::File => Box::new(FileStorage::open(&dir)?),
            Backend::Sqlite => Box::new(SqliteStorage::open(dir.join("snapstore.db"))?),
        };
        debug!(dir = ?dir, backend = ?self.backend, "Opened storage");
        Ok(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_constants() {
        let config = Config::default();
        assert_eq!(config.backend, Backend::File);
        assert_eq!(config.thresholds.near_pct, 80.0);
        assert_eq!(config.thresholds.over_pct, 100.0);
        assert_eq!(config.thresholds.budget_ceiling_pct, 999.0);
        assert_eq!(config.schedule.conflict_window_minutes, 30);
        assert_eq!(config.views.top_categories, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml("backend: sqlite\nschedule:\n  conflict_window_minutes: 15\n").unwrap();
        assert_eq!(config.backend, Backend::Sqlite);
        assert_eq!(config.schedule.conflict_window(), chrono::Duration::minutes(15));
        assert_eq!(config.thresholds, Thresholds::default());
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        assert!(Config::from_yaml("backend: floppy\n").is_err());
        assert!(Config::from_yaml("thresholds:\n  near_pct: 120\n").is_err());
        assert!(Config::from_yaml("schedule:\n  conflict_window_minutes: 0\n").is_err());
    }

    #[test]
    fn test_non_finite_thresholds_rejected() {
        assert!(Config::from_yaml("thresholds:\n  budget_ceiling_pct: .nan\n").is_err());
        assert!(Config::from_yaml("thresholds:\n  goal_ceiling_pct: .nan\n").is_err());
        assert!(Config::from_yaml("thresholds:\n  over_pct: .inf\n").is_err());
        assert!(Config::from_yaml("thresholds:\n  near_pct: .nan\n").is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        fs::write(&path, "data_dir: /tmp/snap\nviews:\n  top_categories: 3\n").unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/snap"));
        assert_eq!(config.views.top_categories, 3);

        assert!(Config::load(Some(temp.path().join("missing.yaml").as_path())).is_err());
    }

    #[test]
    fn test_open_storage_backends() {
        let temp = TempDir::new().unwrap();

        let config = Config {
            data_dir: Some(temp.path().to_path_buf()),
            ..Config::default()
        };
        let mut storage = config.open_storage().unwrap();
        storage.set("k", "v").unwrap();
        assert!(temp.path().join("k.json").exists());

        let config = Config {
            data_dir: Some(temp.path().to_path_buf()),
            backend: Backend::Sqlite,
            ..Config::default()
        };
        let _storage = config.open_storage().unwrap();
        assert!(temp.path().join("snapstore.db").exists());
    }

    #[test]
    fn test_scales_follow_thresholds() {
        let t = Thresholds::default();
        assert_eq!(t.budget_scale().ceiling_pct, 999.0);
        assert_eq!(t.goal_scale().ceiling_pct, 100.0);
    }
}
