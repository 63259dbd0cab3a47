//! Configuration management for rollcall.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::detection::DetectionSurface;
use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "rollcall";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "attendance.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `ROLLCALL_`)
/// 2. TOML config file at `~/.config/rollcall/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Collaborator synchronization configuration.
    pub sync: SyncConfig,
    /// Attendance bookkeeping configuration.
    pub attendance: AttendanceConfig,
    /// Detection surface configuration.
    pub detection: DetectionConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/rollcall/attendance.db`
    pub database_path: Option<PathBuf>,
    /// Total items (students plus records) a connected collaborator may hold
    /// before registration is refused.
    pub max_records: usize,
}

/// Startup and write timing for the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Wait before the first readiness probe, in milliseconds.
    pub initial_delay_ms: u64,
    /// Number of readiness probes before giving up.
    pub max_attempts: u32,
    /// Pause between readiness probes, in milliseconds.
    pub backoff_ms: u64,
    /// Upper bound on `init`, in milliseconds.
    pub init_timeout_ms: u64,
    /// Upper bound on each `create`, in milliseconds.
    pub create_timeout_ms: u64,
}

/// Attendance bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttendanceConfig {
    /// Offset from UTC, in minutes, used to decide which day a check-in
    /// belongs to.
    pub utc_offset_minutes: i32,
    /// How many entries the recent-activity views show.
    pub recent_limit: usize,
}

/// Timing and sensitivity of one detection surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceProfile {
    /// Interval between detector samples, in milliseconds.
    pub poll_interval_ms: u64,
    /// Probability that a sample reports a face.
    pub hit_rate: f64,
    /// How long a face must stay in view before recognition, in milliseconds.
    pub confirm_delay_ms: u64,
    /// Extra pause spent "analyzing" before the attempt, in milliseconds.
    pub analysis_delay_ms: u64,
}

/// Per-surface detection profiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Dashboard recognition camera.
    pub recognition: SurfaceProfile,
    /// Quick-attendance camera.
    pub quick_attendance: SurfaceProfile,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            max_records: 999,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2_000,
            max_attempts: 10,
            backoff_ms: 500,
            init_timeout_ms: 10_000,
            create_timeout_ms: 5_000,
        }
    }
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            recent_limit: 5,
        }
    }
}

impl Default for SurfaceProfile {
    fn default() -> Self {
        Self::recognition()
    }
}

impl SurfaceProfile {
    /// Profile of the dashboard recognition camera.
    #[must_use]
    pub fn recognition() -> Self {
        Self {
            poll_interval_ms: 500,
            hit_rate: 0.7,
            confirm_delay_ms: 3_000,
            analysis_delay_ms: 1_500,
        }
    }

    /// Profile of the quick-attendance camera.
    #[must_use]
    pub fn quick_attendance() -> Self {
        Self {
            poll_interval_ms: 800,
            hit_rate: 0.6,
            confirm_delay_ms: 2_000,
            analysis_delay_ms: 0,
        }
    }

    /// Sampling interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// How long a face must stay in view before recognition starts.
    #[must_use]
    pub fn settle_time(&self) -> Duration {
        Duration::from_millis(self.confirm_delay_ms)
    }

    /// Time spent analyzing a settled face. The face may leave meanwhile.
    #[must_use]
    pub fn analysis_delay(&self) -> Duration {
        Duration::from_millis(self.analysis_delay_ms)
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            recognition: SurfaceProfile::recognition(),
            quick_attendance: SurfaceProfile::quick_attendance(),
        }
    }
}

impl DetectionConfig {
    /// Profile for the given surface.
    #[must_use]
    pub fn profile(&self, surface: DetectionSurface) -> &SurfaceProfile {
        match surface {
            DetectionSurface::Recognition => &self.recognition,
            DetectionSurface::QuickAttendance => &self.quick_attendance,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("ROLLCALL_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if FixedOffset::east_opt(self.attendance.utc_offset_minutes.saturating_mul(60)).is_none() {
            return Err(Error::ConfigValidation {
                message: format!(
                    "utc_offset_minutes ({}) must lie strictly within one day",
                    self.attendance.utc_offset_minutes
                ),
            });
        }

        if self.sync.create_timeout_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "create_timeout_ms must be greater than 0".to_string(),
            });
        }

        for (name, profile) in [
            ("recognition", &self.detection.recognition),
            ("quick_attendance", &self.detection.quick_attendance),
        ] {
            if profile.poll_interval_ms == 0 {
                return Err(Error::ConfigValidation {
                    message: format!("{name}.poll_interval_ms must be greater than 0"),
                });
            }
            if !(0.0..=1.0).contains(&profile.hit_rate) {
                return Err(Error::ConfigValidation {
                    message: format!(
                        "{name}.hit_rate ({}) must be between 0 and 1",
                        profile.hit_rate
                    ),
                });
            }
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// The offset used to derive day keys. Falls back to UTC if the
    /// configured value is out of range.
    #[must_use]
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.attendance.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }
}

impl SyncConfig {
    /// Delay before the first readiness probe.
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Pause between readiness probes.
    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Bound on collaborator `init`.
    #[must_use]
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    /// Bound on each collaborator `create`.
    #[must_use]
    pub fn create_timeout(&self) -> Duration {
        Duration::from_millis(self.create_timeout_ms)
    }

    /// Settings with no waiting at all, for tests and embedding hosts that
    /// inject a ready collaborator.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            initial_delay_ms: 0,
            max_attempts: 1,
            backoff_ms: 0,
            ..Self::default()
        }
    }
}
