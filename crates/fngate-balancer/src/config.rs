//! fngate.toml gate configuration.
//!
//! Every field has a default, so an empty file is a valid config.
//! Durations are written as human strings (`"500ms"`, `"8s"`, `"2m"`).

use std::path::Path;
use std::time::Duration;

use fngate_autoscale::ScalerTimeouts;
use fngate_state::RateLimit;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level gate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    pub scaling: ScalingConfig,
    pub limits: LimitsConfig,
    pub invoke: InvokeConfig,
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScalingConfig {
    /// How long spare capacity is kept before stepping down.
    #[serde(with = "human_duration")]
    pub relax: Duration,
    /// Pause between consecutive step-downs.
    #[serde(with = "human_duration")]
    pub step: Duration,
    /// Ceiling for any replica goal.
    pub max_replicas: u32,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            relax: Duration::from_secs(16),
            step: Duration::from_secs(8),
            max_replicas: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Period of the per-tenant limits and usage-baseline refresh.
    #[serde(with = "human_duration")]
    pub refresh_period: Duration,
    /// Gate-wide rate limit. Absent disables the global tier.
    pub global_rate: Option<RateLimit>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            refresh_period: Duration::from_secs(120),
            global_rate: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InvokeConfig {
    /// Call timeout for functions that do not configure one.
    #[serde(with = "human_duration")]
    pub default_timeout: Duration,
    /// Upper bound for any function's call timeout.
    #[serde(with = "human_duration")]
    pub max_timeout: Duration,
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(2),
            max_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatsConfig {
    #[serde(with = "human_duration")]
    pub flush_period: Duration,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            flush_period: Duration::from_secs(8),
        }
    }
}

impl GateConfig {
    /// Parse from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: GateConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scaling.max_replicas == 0 {
            return Err(ConfigError::Invalid(
                "scaling.max_replicas must be at least 1".to_string(),
            ));
        }
        if self.invoke.default_timeout > self.invoke.max_timeout {
            return Err(ConfigError::Invalid(
                "invoke.default_timeout exceeds invoke.max_timeout".to_string(),
            ));
        }
        if self.limits.refresh_period.is_zero() || self.stats.flush_period.is_zero() {
            return Err(ConfigError::Invalid("periods must be non-zero".to_string()));
        }
        if self.scaling.relax.is_zero() || self.scaling.step.is_zero() {
            return Err(ConfigError::Invalid(
                "scaling.relax and scaling.step must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scaler_timeouts(&self) -> ScalerTimeouts {
        ScalerTimeouts {
            relax: self.scaling.relax,
            step: self.scaling.step,
        }
    }

    /// Timeout for one call of a function configured with `timeout_ms`
    /// (0 means the default), capped at the maximum.
    pub fn call_timeout(&self, timeout_ms: u64) -> Duration {
        if timeout_ms == 0 {
            return self.invoke.default_timeout;
        }
        Duration::from_millis(timeout_ms).min(self.invoke.max_timeout)
    }
}

/// Parse a duration such as `"250ms"`, `"8s"`, `"2m"` or `"1h"`.
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(s.to_string()))?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(ConfigError::InvalidDuration(s.to_string())),
    }
}

/// Render a duration in the shortest unit that represents it exactly.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 != 0 {
        return format!("{ms}ms");
    }
    let secs = d.as_secs();
    if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

mod human_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
