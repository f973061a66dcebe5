//! Metric rollup.
//!
//! [`MetricsAggregator`] records raw samples and rolls them up into one
//! [`MetricAggregate`] per series, window and epoch-aligned period. A rollup
//! always recomputes from the raw samples and replaces the stored aggregate,
//! so re-running it is idempotent.
//!
//! Scheduled rollups keep a cursor per window and catch up on every period
//! that elapsed since the previous run, so a late or skipped tick never
//! leaves a period without aggregates.

use crate::config::{AggregationConfig, MetricPolicy, RollupWindow, ThresholdStat};
use crate::models::{Labels, MetricAggregate, MetricSample, MetricValidationError};
use crate::storage::{MetricStore, MetricStoreError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, TryLockError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while recording or rolling up metrics.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// The sample is malformed.
    #[error("Invalid metric sample: {0}")]
    InvalidSample(#[from] MetricValidationError),

    /// Another rollup of the same metric and window is in progress.
    #[error("Rollup of {metric_name} ({window}) already in progress")]
    Conflict {
        /// Metric name.
        metric_name: String,
        /// Rollup window.
        window: RollupWindow,
    },

    /// The period start is not aligned to the window.
    #[error("{period_start} is not aligned to the {window} window")]
    MisalignedPeriod {
        /// Rollup window.
        window: RollupWindow,
        /// Requested period start.
        period_start: DateTime<Utc>,
    },

    /// The metric store failed.
    #[error("Metric store error: {0}")]
    Store(#[from] MetricStoreError),
}

/// Summary of one rollup pass over a window and period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollupReport {
    /// Rollup window.
    pub window: RollupWindow,
    /// Start of the rolled-up period.
    pub period_start: DateTime<Utc>,
    /// Metrics rolled up.
    pub metrics: usize,
    /// Aggregates written.
    pub aggregates_written: usize,
    /// Metrics skipped because another rollup held their lock.
    pub conflicts: Vec<String>,
}

/// Records samples and computes aggregates.
pub struct MetricsAggregator {
    store: Arc<dyn MetricStore>,
    config: AggregationConfig,
    locks: DashMap<(String, RollupWindow), Arc<Mutex<()>>>,
    /// Start of the next period each window still has to roll up.
    pending: DashMap<RollupWindow, DateTime<Utc>>,
}

impl MetricsAggregator {
    /// Creates an aggregator over a metric store.
    #[must_use]
    pub fn new(store: Arc<dyn MetricStore>, config: AggregationConfig) -> Self {
        Self {
            store,
            config,
            locks: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    /// The metric store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MetricStore> {
        &self.store
    }

    /// The rollup configuration.
    #[must_use]
    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Validates and stores a raw sample.
    ///
    /// # Errors
    ///
    /// Returns an error if the sample is invalid or the store fails.
    pub fn record_sample(&self, sample: MetricSample) -> Result<(), AggregationError> {
        sample.validate_sample()?;
        self.store.insert_sample(sample)?;
        Ok(())
    }

    /// Rolls up every metric configured for `window` over the period
    /// starting at `period_start`.
    ///
    /// Metrics whose rollup is already running elsewhere are skipped and
    /// listed in the report.
    ///
    /// # Errors
    ///
    /// Returns an error if the period is misaligned or the store fails.
    pub fn rollup(
        &self,
        window: RollupWindow,
        period_start: DateTime<Utc>,
    ) -> Result<RollupReport, AggregationError> {
        check_alignment(window, period_start)?;

        let mut report = RollupReport {
            window,
            period_start,
            metrics: 0,
            aggregates_written: 0,
            conflicts: Vec::new(),
        };

        for metric_name in self.store.metric_names()? {
            if !self.config.windows_for(&metric_name).contains(&window) {
                continue;
            }
            match self.rollup_metric(&metric_name, window, period_start) {
                Ok(aggregates) => {
                    report.metrics += 1;
                    report.aggregates_written += aggregates.len();
                }
                Err(AggregationError::Conflict { metric_name, .. }) => {
                    report.conflicts.push(metric_name);
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            window = %window,
            period_start = %period_start,
            metrics = report.metrics,
            aggregates = report.aggregates_written,
            conflicts = report.conflicts.len(),
            "Rollup finished"
        );
        Ok(report)
    }

    /// Rolls up one metric over one period and stores the aggregates.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError::Conflict`] if a rollup of the same metric
    /// and window is in progress, or another error if the period is
    /// misaligned or the store fails.
    pub fn rollup_metric(
        &self,
        metric_name: &str,
        window: RollupWindow,
        period_start: DateTime<Utc>,
    ) -> Result<Vec<MetricAggregate>, AggregationError> {
        check_alignment(window, period_start)?;

        let lock = Arc::clone(
            self.locks
                .entry((metric_name.to_string(), window))
                .or_default()
                .value(),
        );
        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                warn!(
                    metric_name,
                    window = %window,
                    "Rollup already in progress, skipping"
                );
                return Err(AggregationError::Conflict {
                    metric_name: metric_name.to_string(),
                    window,
                });
            }
        };

        let period_end = window.period_end(period_start);
        let samples = self
            .store
            .samples_in_range(metric_name, period_start, period_end)?;
        let aggregates = compute_aggregates(
            metric_name,
            window,
            period_start,
            samples,
            self.config.get_policy(metric_name),
        );

        for aggregate in &aggregates {
            if aggregate.is_anomaly {
                info!(
                    metric_name,
                    window = %window,
                    period_start = %period_start,
                    level = ?aggregate.anomaly_level,
                    "Aggregate crossed threshold"
                );
            }
            self.store.upsert_aggregate(aggregate.clone())?;
        }
        Ok(aggregates)
    }

    /// Rolls up every fully elapsed period of `window` that has not been
    /// rolled up yet, oldest first, ending with the last one completed at
    /// `now`. The first run starts at the period of the oldest stored sample.
    ///
    /// A period in which a metric was skipped because of a concurrent
    /// rollup stays pending and is retried by the next call.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn rollup_completed(
        &self,
        window: RollupWindow,
        now: DateTime<Utc>,
    ) -> Result<Vec<RollupReport>, AggregationError> {
        let last = window.last_completed(now);
        let pending = self.pending.get(&window).map(|p| *p.value());
        let first = match pending {
            Some(pending) => pending,
            None => match self.store.earliest_sample_time()? {
                Some(ts) => window.period_start(ts),
                None => return Ok(Vec::new()),
            },
        };

        let mut reports = Vec::new();
        let mut period_start = first;
        let mut next_pending = first;
        let mut settled = true;
        while period_start <= last {
            let report = self.rollup(window, period_start)?;
            period_start = window.period_end(period_start);
            if settled && report.conflicts.is_empty() {
                next_pending = period_start;
            } else {
                settled = false;
            }
            reports.push(report);
        }

        self.pending
            .entry(window)
            .and_modify(|p| *p = (*p).max(next_pending))
            .or_insert(next_pending);

        if reports.len() > 1 {
            info!(
                window = %window,
                periods = reports.len(),
                from = %first,
                "Caught up on missed rollup periods"
            );
        }
        Ok(reports)
    }

    /// Drops raw samples older than `samples_cutoff` and aggregates whose
    /// period ended before `aggregates_cutoff`. Returns the removed sample
    /// and aggregate counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn prune(
        &self,
        samples_cutoff: DateTime<Utc>,
        aggregates_cutoff: DateTime<Utc>,
    ) -> Result<(usize, usize), AggregationError> {
        let samples = self.store.prune_samples_before(samples_cutoff)?;
        let aggregates = self.store.prune_aggregates_before(aggregates_cutoff)?;
        Ok((samples, aggregates))
    }

    /// Runs [`Self::rollup_completed`] for every window in use.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn rollup_all_completed(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RollupReport>, AggregationError> {
        let mut reports = Vec::new();
        for window in self.config.windows_in_use() {
            reports.extend(self.rollup_completed(window, now)?);
        }
        Ok(reports)
    }
}

fn check_alignment(
    window: RollupWindow,
    period_start: DateTime<Utc>,
) -> Result<(), AggregationError> {
    if window.period_start(period_start) == period_start {
        Ok(())
    } else {
        Err(AggregationError::MisalignedPeriod {
            window,
            period_start,
        })
    }
}

/// Computes one aggregate per label set.
///
/// Samples are folded in `(timestamp, value)` order so that floating-point
/// sums do not depend on arrival order.
fn compute_aggregates(
    metric_name: &str,
    window: RollupWindow,
    period_start: DateTime<Utc>,
    mut samples: Vec<MetricSample>,
    policy: Option<&MetricPolicy>,
) -> Vec<MetricAggregate> {
    samples.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.value.total_cmp(&b.value))
    });

    let mut series: BTreeMap<Labels, Vec<MetricSample>> = BTreeMap::new();
    for sample in samples {
        series.entry(sample.labels.clone()).or_default().push(sample);
    }

    series
        .into_iter()
        .filter_map(|(labels, samples)| {
            let first = samples.first()?;
            let metric_type = first.metric_type;
            let mut sum = 0.0;
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            for sample in &samples {
                sum += sample.value;
                min = min.min(sample.value);
                max = max.max(sample.value);
            }
            let count = samples.len() as u64;
            #[allow(clippy::cast_precision_loss)]
            let avg = sum / count as f64;

            let anomaly_level = policy.and_then(|p| {
                #[allow(clippy::cast_precision_loss)]
                let value = match p.stat {
                    ThresholdStat::Avg => avg,
                    ThresholdStat::Min => min,
                    ThresholdStat::Max => max,
                    ThresholdStat::Sum => sum,
                    ThresholdStat::Count => count as f64,
                };
                p.anomaly_level(value)
            });

            Some(MetricAggregate {
                metric_name: metric_name.to_string(),
                metric_type,
                labels,
                window,
                period_start,
                period_end: window.period_end(period_start),
                count,
                sum,
                min,
                max,
                avg,
                is_anomaly: anomaly_level.is_some(),
                anomaly_level,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnomalyLevel;
    use crate::storage::{AggregateQuery, InMemoryMetricStore};
    use chrono::{Duration, TimeZone};

    fn period() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap()
    }

    fn aggregator(config: AggregationConfig) -> MetricsAggregator {
        MetricsAggregator::new(InMemoryMetricStore::new_shared(), config)
    }

    fn export_policy() -> MetricPolicy {
        MetricPolicy::new("export_ms", vec![RollupWindow::OneMinute])
            .with_warning(200.0)
            .with_critical(1000.0)
    }

    #[test]
    fn test_record_sample_validates() {
        let aggregator = aggregator(AggregationConfig::default());
        let result = aggregator.record_sample(MetricSample::gauge("cpu", f64::NAN));
        assert!(matches!(result, Err(AggregationError::InvalidSample(_))));
        assert_eq!(aggregator.store().sample_count().unwrap(), 0);
    }

    #[test]
    fn test_rollup_computes_statistics() {
        let aggregator = aggregator(AggregationConfig::default());
        for (offset, value) in [(0, 10.0), (20, 30.0), (59, 20.0), (60, 1000.0)] {
            aggregator
                .record_sample(
                    MetricSample::timer("query_ms", value)
                        .with_timestamp(period() + Duration::seconds(offset)),
                )
                .unwrap();
        }

        let aggregates = aggregator
            .rollup_metric("query_ms", RollupWindow::OneMinute, period())
            .unwrap();

        assert_eq!(aggregates.len(), 1);
        let agg = &aggregates[0];
        assert_eq!(agg.count, 3);
        assert!((agg.sum - 60.0).abs() < f64::EPSILON);
        assert!((agg.min - 10.0).abs() < f64::EPSILON);
        assert!((agg.max - 30.0).abs() < f64::EPSILON);
        assert!((agg.avg - 20.0).abs() < f64::EPSILON);
        assert_eq!(agg.period_end, period() + Duration::minutes(1));
        assert!(!agg.is_anomaly);
    }

    #[test]
    fn test_rollup_groups_by_labels() {
        let aggregator = aggregator(AggregationConfig::default());
        for tenant in ["a", "b", "a"] {
            aggregator
                .record_sample(
                    MetricSample::counter("exports", 1.0)
                        .with_label("tenant", tenant)
                        .with_timestamp(period()),
                )
                .unwrap();
        }

        let report = aggregator.rollup(RollupWindow::OneMinute, period()).unwrap();

        assert_eq!(report.aggregates_written, 2);
        let a = aggregator
            .store()
            .query_aggregates(AggregateQuery::new().with_label("tenant", "a"))
            .unwrap();
        assert_eq!(a.aggregates[0].count, 2);
    }

    #[test]
    fn test_rerun_yields_identical_aggregate() {
        let aggregator = aggregator(AggregationConfig::default());
        for (offset, value) in [(5, 0.1), (1, 0.2), (3, 0.3), (3, 0.7)] {
            aggregator
                .record_sample(
                    MetricSample::gauge("load", value)
                        .with_timestamp(period() + Duration::seconds(offset)),
                )
                .unwrap();
        }

        let first = aggregator
            .rollup_metric("load", RollupWindow::OneMinute, period())
            .unwrap();
        let second = aggregator
            .rollup_metric("load", RollupWindow::OneMinute, period())
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0].sum.to_bits(), second[0].sum.to_bits());
        let stored = aggregator
            .store()
            .query_aggregates(AggregateQuery::new().with_name("load"))
            .unwrap();
        assert_eq!(stored.total_count, 1);
    }

    #[test]
    fn test_threshold_annotation() {
        let config = AggregationConfig::default().with_policy(export_policy());
        let aggregator = aggregator(config);
        aggregator
            .record_sample(MetricSample::timer("export_ms", 250.0).with_timestamp(period()))
            .unwrap();
        aggregator
            .record_sample(
                MetricSample::timer("export_ms", 5000.0)
                    .with_timestamp(period() + Duration::minutes(1)),
            )
            .unwrap();

        let warning = aggregator
            .rollup_metric("export_ms", RollupWindow::OneMinute, period())
            .unwrap();
        let critical = aggregator
            .rollup_metric(
                "export_ms",
                RollupWindow::OneMinute,
                period() + Duration::minutes(1),
            )
            .unwrap();

        assert!(warning[0].is_anomaly);
        assert_eq!(warning[0].anomaly_level, Some(AnomalyLevel::Warning));
        assert_eq!(critical[0].anomaly_level, Some(AnomalyLevel::Critical));
    }

    #[test]
    fn test_rollup_respects_policy_windows() {
        let config = AggregationConfig::default().with_policy(export_policy());
        let aggregator = aggregator(config);
        aggregator
            .record_sample(MetricSample::timer("export_ms", 1.0).with_timestamp(period()))
            .unwrap();

        let report = aggregator.rollup(RollupWindow::OneHour, period()).unwrap();

        assert_eq!(report.metrics, 0);
        assert_eq!(report.aggregates_written, 0);
    }

    #[test]
    fn test_misaligned_period_rejected() {
        let aggregator = aggregator(AggregationConfig::default());
        let result = aggregator.rollup(RollupWindow::OneHour, period() + Duration::minutes(7));
        assert!(matches!(
            result,
            Err(AggregationError::MisalignedPeriod { .. })
        ));
    }

    #[test]
    fn test_concurrent_rollup_loser_reports_conflict() {
        let aggregator = aggregator(AggregationConfig::default());
        aggregator
            .record_sample(MetricSample::gauge("cpu", 1.0).with_timestamp(period()))
            .unwrap();

        let lock = Arc::clone(
            aggregator
                .locks
                .entry(("cpu".to_string(), RollupWindow::OneMinute))
                .or_default()
                .value(),
        );
        let _held = lock.lock().unwrap();

        let direct = aggregator.rollup_metric("cpu", RollupWindow::OneMinute, period());
        assert!(matches!(direct, Err(AggregationError::Conflict { .. })));

        let report = aggregator.rollup(RollupWindow::OneMinute, period()).unwrap();
        assert_eq!(report.conflicts, vec!["cpu".to_string()]);
        assert_eq!(report.aggregates_written, 0);
    }

    #[test]
    fn test_rollup_completed_uses_last_full_period() {
        let aggregator = aggregator(AggregationConfig::default());
        aggregator
            .record_sample(MetricSample::gauge("cpu", 1.0).with_timestamp(period()))
            .unwrap();

        let reports = aggregator
            .rollup_completed(RollupWindow::OneMinute, period() + Duration::seconds(90))
            .unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].period_start, period());
        assert_eq!(reports[0].aggregates_written, 1);

        let again = aggregator
            .rollup_completed(RollupWindow::OneMinute, period() + Duration::seconds(100))
            .unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_sparse_ticks_catch_up_on_every_period() {
        let aggregator = aggregator(AggregationConfig::default());
        for minute in 0..5 {
            aggregator
                .record_sample(
                    MetricSample::timer("query_ms", 10.0)
                        .with_timestamp(period() + Duration::minutes(minute) + Duration::seconds(5)),
                )
                .unwrap();
        }

        let first = aggregator
            .rollup_completed(RollupWindow::OneMinute, period() + Duration::seconds(10))
            .unwrap();
        assert!(first.is_empty());

        let second = aggregator
            .rollup_completed(RollupWindow::OneMinute, period() + Duration::seconds(310))
            .unwrap();
        assert_eq!(second.len(), 5);

        let stored = aggregator
            .store()
            .query_aggregates(
                AggregateQuery::new()
                    .with_name("query_ms")
                    .with_window(RollupWindow::OneMinute),
            )
            .unwrap();
        assert_eq!(stored.total_count, 5);
        assert!(stored.aggregates.iter().all(|a| a.count == 1));
    }

    #[test]
    fn test_conflicting_period_stays_pending() {
        let aggregator = aggregator(AggregationConfig::default());
        aggregator
            .record_sample(MetricSample::gauge("cpu", 1.0).with_timestamp(period()))
            .unwrap();
        let now = period() + Duration::seconds(90);

        let lock = Arc::clone(
            aggregator
                .locks
                .entry(("cpu".to_string(), RollupWindow::OneMinute))
                .or_default()
                .value(),
        );
        let held = lock.lock().unwrap();
        let blocked = aggregator
            .rollup_completed(RollupWindow::OneMinute, now)
            .unwrap();
        assert_eq!(blocked[0].conflicts, vec!["cpu".to_string()]);
        drop(held);

        let retried = aggregator
            .rollup_completed(RollupWindow::OneMinute, now)
            .unwrap();
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].aggregates_written, 1);
    }

    #[test]
    fn test_rollup_all_completed_covers_each_window() {
        let aggregator = aggregator(AggregationConfig::default().with_policy(export_policy()));
        aggregator
            .record_sample(MetricSample::gauge("cpu", 1.0).with_timestamp(period()))
            .unwrap();

        let reports = aggregator
            .rollup_all_completed(period() + Duration::minutes(61))
            .unwrap();

        let mut windows: Vec<RollupWindow> = reports.iter().map(|r| r.window).collect();
        windows.dedup();
        assert_eq!(windows, vec![RollupWindow::OneMinute, RollupWindow::OneHour]);
        assert_eq!(reports.len(), 62);
    }

    #[test]
    fn test_nothing_to_roll_without_samples() {
        let aggregator = aggregator(AggregationConfig::default());
        assert!(aggregator.rollup_all_completed(period()).unwrap().is_empty());
    }
}
