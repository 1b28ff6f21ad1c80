//! poolscale.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Weekday;
use chrono_tz::Tz;
use poolscale_schedule::{Calendar, TimeWindow};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::PoolBounds;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub const DEFAULT_TIMEZONE: &str = "America/Edmonton";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub pool: PoolConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default, rename = "loop")]
    pub control: LoopConfig,
    #[serde(default)]
    pub converge: ConvergeConfig,
    pub provisioner: Option<ProvisionerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    pub min_units: u32,
    pub max_units: u32,
    #[serde(default)]
    pub extra_capacity: u32,
}

/// Which utilization signal drives the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyConfig {
    /// Keep `extra_capacity` idle units on hand.
    #[default]
    IdleUnits,
    /// Keep `extra_capacity` units' worth of free cores on hand.
    Cores { cores_per_unit: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// IANA time zone the windows are evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Run reactive autoscaling regardless of the windows.
    #[serde(default)]
    pub ignore: bool,
    #[serde(default, rename = "window")]
    pub windows: Vec<WindowConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// "mon", "tuesday", ...
    pub weekday: String,
    #[serde(default)]
    pub start_hour: u32,
    #[serde(default)]
    pub end_hour: u32,
    #[serde(default)]
    pub whole_day: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Pause between ticks (e.g. "15s").
    #[serde(default = "default_interval")]
    pub interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergeConfig {
    /// Pause between convergence polls (e.g. "5s").
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    /// Give up waiting for confirmation after this long (e.g. "10m").
    #[serde(default = "default_converge_timeout")]
    pub timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// host:port of the provisioning API.
    pub endpoint: String,
    /// File holding the bearer token; re-read when the token expires.
    pub token_file: Option<PathBuf>,
    /// Path listing workload placements, for node pools.
    pub workloads_path: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    #[serde(default = "default_max_auth_attempts")]
    pub max_auth_attempts: u32,
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_interval() -> String {
    "15s".to_string()
}

fn default_poll_interval() -> String {
    "5s".to_string()
}

fn default_converge_timeout() -> String {
    "10m".to_string()
}

fn default_request_timeout() -> String {
    "10s".to_string()
}

fn default_max_auth_attempts() -> u32 {
    3
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            ignore: false,
            windows: Vec::new(),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
        }
    }
}

impl Default for ConvergeConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            timeout: default_converge_timeout(),
        }
    }
}

impl PoolConfig {
    pub fn bounds(&self) -> PoolBounds {
        PoolBounds::new(self.min_units, self.max_units, self.extra_capacity)
    }
}

impl ScheduleConfig {
    pub fn timezone(&self) -> ConfigResult<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| ConfigError::Invalid(format!("unknown timezone {:?}: {e}", self.timezone)))
    }

    pub fn calendar(&self) -> ConfigResult<Calendar> {
        let windows = self
            .windows
            .iter()
            .map(WindowConfig::to_window)
            .collect::<ConfigResult<Vec<_>>>()?;
        Calendar::new(windows).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

impl WindowConfig {
    fn to_window(&self) -> ConfigResult<TimeWindow> {
        let weekday = self
            .weekday
            .parse::<Weekday>()
            .map_err(|_| ConfigError::Invalid(format!("unknown weekday {:?}", self.weekday)))?;
        Ok(TimeWindow {
            weekday,
            start_hour: self.start_hour,
            end_hour: self.end_hour,
            whole_day: self.whole_day,
        })
    }

    fn from_window(window: &TimeWindow) -> Self {
        Self {
            weekday: weekday_key(window.weekday).to_string(),
            start_hour: window.start_hour,
            end_hour: window.end_hour,
            whole_day: window.whole_day,
        }
    }
}

impl LoopConfig {
    pub fn interval(&self) -> ConfigResult<Duration> {
        require_nonzero_duration("loop.interval", &self.interval)
    }
}

impl ConvergeConfig {
    pub fn poll_interval(&self) -> ConfigResult<Duration> {
        require_nonzero_duration("converge.poll_interval", &self.poll_interval)
    }

    pub fn timeout(&self) -> ConfigResult<Duration> {
        require_duration("converge.timeout", &self.timeout)
    }
}

impl ProvisionerConfig {
    pub fn request_timeout(&self) -> ConfigResult<Duration> {
        require_nonzero_duration("provisioner.request_timeout", &self.request_timeout)
    }
}

impl Config {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate a config document.
    ///
    /// Pool bounds are not checked here; the policy reports a bad
    /// min/max/extra combination on every tick.
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.schedule.timezone()?;
        self.schedule.calendar()?;
        self.control.interval()?;
        self.converge.poll_interval()?;
        self.converge.timeout()?;
        if let PolicyConfig::Cores { cores_per_unit: 0 } = self.policy {
            return Err(ConfigError::Invalid(
                "policy.cores_per_unit must be positive".to_string(),
            ));
        }
        if let Some(provisioner) = &self.provisioner {
            provisioner.request_timeout()?;
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a starter config for a pool.
    pub fn scaffold(pool_name: &str) -> Self {
        Config {
            pool: PoolConfig {
                name: pool_name.to_string(),
                min_units: 2,
                max_units: 9,
                extra_capacity: 1,
            },
            policy: PolicyConfig::IdleUnits,
            schedule: ScheduleConfig {
                timezone: default_timezone(),
                ignore: false,
                windows: Calendar::weeknights_and_weekends()
                    .windows()
                    .map(WindowConfig::from_window)
                    .collect(),
            },
            control: LoopConfig::default(),
            converge: ConvergeConfig::default(),
            provisioner: Some(ProvisionerConfig {
                endpoint: "127.0.0.1:8080".to_string(),
                token_file: None,
                workloads_path: None,
                request_timeout: default_request_timeout(),
                max_auth_attempts: default_max_auth_attempts(),
            }),
        }
    }
}

/// Parse a duration string like "500ms", "30s", "5m", "1h".
///
/// A bare number is taken as seconds. Values that overflow are rejected.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.trim()
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn require_duration(field: &str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value)
        .ok_or_else(|| ConfigError::Invalid(format!("{field}: invalid duration {value:?}")))
}

fn require_nonzero_duration(field: &str, value: &str) -> ConfigResult<Duration> {
    let duration = require_duration(field, value)?;
    if duration.is_zero() {
        return Err(ConfigError::Invalid(format!("{field} must be positive")));
    }
    Ok(duration)
}

fn weekday_key(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}
