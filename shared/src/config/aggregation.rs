//! Metric rollup configuration.
//!
//! Defines the rollup windows and the per-metric policies that decide which
//! windows a metric is rolled up into and which thresholds mark an aggregate
//! as anomalous.

use crate::models::metric::AnomalyLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Rollup window for metric aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollupWindow {
    /// 1 minute window
    #[serde(alias = "1m")]
    OneMinute,
    /// 5 minute window
    #[serde(alias = "5m")]
    FiveMinutes,
    /// 1 hour window
    #[serde(alias = "1h")]
    OneHour,
    /// 1 day window
    #[serde(alias = "1d")]
    OneDay,
}

impl RollupWindow {
    /// All windows, shortest first.
    pub const ALL: [Self; 4] = [
        Self::OneMinute,
        Self::FiveMinutes,
        Self::OneHour,
        Self::OneDay,
    ];

    /// Returns the duration of this window.
    #[must_use]
    pub const fn as_duration(&self) -> Duration {
        match self {
            Self::OneMinute => Duration::from_secs(60),
            Self::FiveMinutes => Duration::from_secs(300),
            Self::OneHour => Duration::from_secs(3600),
            Self::OneDay => Duration::from_secs(86400),
        }
    }

    /// Returns the window in seconds.
    #[must_use]
    pub const fn as_secs(&self) -> u64 {
        self.as_duration().as_secs()
    }

    /// Returns a short string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
        }
    }

    /// Start of the epoch-aligned period containing `ts`.
    #[must_use]
    pub fn period_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        #[allow(clippy::cast_possible_wrap)]
        let secs = self.as_secs() as i64;
        let aligned = ts.timestamp() - ts.timestamp().rem_euclid(secs);
        DateTime::from_timestamp(aligned, 0).unwrap_or(ts)
    }

    /// End (exclusive) of the period starting at `period_start`.
    #[must_use]
    pub fn period_end(&self, period_start: DateTime<Utc>) -> DateTime<Utc> {
        #[allow(clippy::cast_possible_wrap)]
        let secs = self.as_secs() as i64;
        period_start + chrono::Duration::seconds(secs)
    }

    /// Start of the last period that has fully elapsed at `now`.
    #[must_use]
    pub fn last_completed(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        #[allow(clippy::cast_possible_wrap)]
        let secs = self.as_secs() as i64;
        self.period_start(now) - chrono::Duration::seconds(secs)
    }
}

impl std::fmt::Display for RollupWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregate statistic compared against thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdStat {
    /// Mean value.
    #[default]
    Avg,
    /// Minimum value.
    Min,
    /// Maximum value.
    Max,
    /// Sum of values.
    Sum,
    /// Number of samples.
    Count,
}

/// Direction in which a threshold is crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdDirection {
    /// Crossed when the statistic is at or above the threshold.
    #[default]
    Above,
    /// Crossed when the statistic is at or below the threshold.
    Below,
}

/// Rollup and threshold policy for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPolicy {
    /// Metric the policy applies to.
    pub metric_name: String,
    /// Windows the metric is rolled up into.
    pub windows: Vec<RollupWindow>,
    /// Threshold for a warning-level anomaly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_threshold: Option<f64>,
    /// Threshold for a critical-level anomaly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_threshold: Option<f64>,
    /// Statistic compared against the thresholds.
    #[serde(default)]
    pub stat: ThresholdStat,
    /// Direction of comparison.
    #[serde(default)]
    pub direction: ThresholdDirection,
}

impl MetricPolicy {
    /// Creates a policy without thresholds.
    #[must_use]
    pub fn new(metric_name: impl Into<String>, windows: Vec<RollupWindow>) -> Self {
        Self {
            metric_name: metric_name.into(),
            windows,
            warning_threshold: None,
            critical_threshold: None,
            stat: ThresholdStat::default(),
            direction: ThresholdDirection::default(),
        }
    }

    /// Sets the warning threshold.
    #[must_use]
    pub fn with_warning(mut self, threshold: f64) -> Self {
        self.warning_threshold = Some(threshold);
        self
    }

    /// Sets the critical threshold.
    #[must_use]
    pub fn with_critical(mut self, threshold: f64) -> Self {
        self.critical_threshold = Some(threshold);
        self
    }

    /// Sets the compared statistic.
    #[must_use]
    pub fn with_stat(mut self, stat: ThresholdStat) -> Self {
        self.stat = stat;
        self
    }

    /// Sets the comparison direction.
    #[must_use]
    pub fn with_direction(mut self, direction: ThresholdDirection) -> Self {
        self.direction = direction;
        self
    }

    fn crosses(&self, value: f64, threshold: f64) -> bool {
        match self.direction {
            ThresholdDirection::Above => value >= threshold,
            ThresholdDirection::Below => value <= threshold,
        }
    }

    /// Returns the highest threshold level crossed by `value`.
    #[must_use]
    pub fn anomaly_level(&self, value: f64) -> Option<AnomalyLevel> {
        if self
            .critical_threshold
            .is_some_and(|t| self.crosses(value, t))
        {
            return Some(AnomalyLevel::Critical);
        }
        if self
            .warning_threshold
            .is_some_and(|t| self.crosses(value, t))
        {
            return Some(AnomalyLevel::Warning);
        }
        None
    }

    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The metric name is empty
    /// - No window is configured
    /// - A threshold is not finite
    /// - The warning threshold lies beyond the critical threshold
    pub fn validate(&self) -> Result<(), String> {
        if self.metric_name.trim().is_empty() {
            return Err("Metric policy name cannot be empty".to_string());
        }
        if self.windows.is_empty() {
            return Err(format!(
                "Metric policy '{}' must include at least one window",
                self.metric_name
            ));
        }
        for threshold in [self.warning_threshold, self.critical_threshold]
            .into_iter()
            .flatten()
        {
            if !threshold.is_finite() {
                return Err(format!(
                    "Metric policy '{}' has a non-finite threshold",
                    self.metric_name
                ));
            }
        }
        if let (Some(warning), Some(critical)) = (self.warning_threshold, self.critical_threshold)
        {
            let ordered = match self.direction {
                ThresholdDirection::Above => warning <= critical,
                ThresholdDirection::Below => warning >= critical,
            };
            if !ordered {
                return Err(format!(
                    "Metric policy '{}': warning threshold must not lie beyond the critical threshold",
                    self.metric_name
                ));
            }
        }
        Ok(())
    }
}

/// Metric rollup configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Windows used for metrics without a policy.
    pub default_windows: Vec<RollupWindow>,
    /// Per-metric policies.
    pub policies: Vec<MetricPolicy>,
    /// How often the rollup scheduler runs, in seconds.
    pub rollup_interval_secs: u64,
}

impl AggregationConfig {
    /// Creates a configuration with recommended defaults.
    ///
    /// Metrics without a policy are rolled up into 1-minute and 1-hour
    /// aggregates; the scheduler runs every 30 seconds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_windows: vec![RollupWindow::OneMinute, RollupWindow::OneHour],
            policies: Vec::new(),
            rollup_interval_secs: 30,
        }
    }

    /// Adds a metric policy.
    #[must_use]
    pub fn with_policy(mut self, policy: MetricPolicy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any policy is invalid, a metric has two policies,
    /// or the rollup interval is zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.rollup_interval_secs == 0 {
            return Err("Rollup interval must be greater than zero".to_string());
        }
        let mut seen = HashSet::new();
        for policy in &self.policies {
            policy.validate()?;
            if !seen.insert(policy.metric_name.as_str()) {
                return Err(format!(
                    "Duplicate metric policy for '{}'",
                    policy.metric_name
                ));
            }
        }
        Ok(())
    }

    /// Gets the policy for a metric.
    #[must_use]
    pub fn get_policy(&self, metric_name: &str) -> Option<&MetricPolicy> {
        self.policies.iter().find(|p| p.metric_name == metric_name)
    }

    /// Windows a metric is rolled up into.
    #[must_use]
    pub fn windows_for(&self, metric_name: &str) -> &[RollupWindow] {
        self.get_policy(metric_name)
            .map_or(self.default_windows.as_slice(), |p| p.windows.as_slice())
    }

    /// Every window used by the defaults or a policy, shortest first.
    #[must_use]
    pub fn windows_in_use(&self) -> Vec<RollupWindow> {
        let mut windows: Vec<RollupWindow> = self
            .default_windows
            .iter()
            .chain(self.policies.iter().flat_map(|p| p.windows.iter()))
            .copied()
            .collect();
        windows.sort_unstable();
        windows.dedup();
        windows
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self::new()
    }
}
