//! Policy file parser.
//!
//! A policy file carries the numeric half of a `Policy`; the callbacks
//! are supplied by the caller when the file is turned into a policy.
//!
//! ```toml
//! min = 1
//! max = 8
//! scale_up_threshold = 100
//! scale_down_threshold = 20
//! interval = "500ms"
//! cool_down = "30s"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::policy::{Policy, SampleFn, SetCapacityFn, StatusFn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFile {
    pub min: i64,
    pub max: i64,
    pub scale_up_threshold: i64,
    pub scale_down_threshold: i64,
    /// Duration string; absent means the controller default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Duration string; absent means the controller default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cool_down: Option<String>,
}

impl PolicyFile {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Strict bound check. The controller itself accepts `min > max`;
    /// callers loading operator-written files can reject it here.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.min > self.max {
            return Err(ConfigError::InvalidBounds {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    /// Build a `Policy` with the supplied collaborators.
    ///
    /// Missing durations become zero, which the controller resolves to
    /// its defaults on install.
    pub fn into_policy(
        &self,
        sample_fn: SampleFn,
        set_capacity_fn: SetCapacityFn,
        status_fn: StatusFn,
    ) -> ConfigResult<Policy> {
        let interval = optional_duration(self.interval.as_deref())?;
        let cool_down = optional_duration(self.cool_down.as_deref())?;

        Ok(Policy::new(
            self.min,
            self.max,
            self.scale_up_threshold,
            self.scale_down_threshold,
            sample_fn,
            set_capacity_fn,
        )
        .with_interval(interval)
        .with_cool_down(cool_down)
        .with_status_fn(status_fn))
    }
}

fn optional_duration(s: Option<&str>) -> ConfigResult<Duration> {
    s.map(parse_duration)
        .transpose()
        .map(Option::unwrap_or_default)
}

/// Parse a duration string like "500ms", "30s", "5m". A bare number is
/// read as seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let trimmed = s.trim();
    let parsed = if let Some(secs) = trimmed.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = trimmed.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        trimmed.parse::<u64>().ok().map(Duration::from_secs)
    };

    parsed.ok_or_else(|| ConfigError::InvalidDuration(s.to_string()))
}
