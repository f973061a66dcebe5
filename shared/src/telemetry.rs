//! Producer facade.
//!
//! [`Telemetry`] wires the pipeline components together and is the single
//! entry point for producers: business modules hand it an [`Emission`]
//! together with a [`TelemetryContext`] and never talk to the stores
//! directly.

use crate::aggregation::{MetricsAggregator, RollupReport};
use crate::alerting::{AlertEvaluator, AlertNotification, AlertSignals, TickReport};
use crate::audit::{AuditChainLogger, VerificationReport};
use crate::config::{RetentionPolicy, TelemetryConfig};
use crate::context::TelemetryContext;
use crate::error::TelemetryError;
use crate::grouping::ErrorGrouper;
use crate::ingest::EventIngestor;
use crate::models::{
    ErrorOccurrence, Event, EventCategory, EventDetails, EventId, MetricSample, NewAuditEntry,
    OrphanReason, SecurityDetails, Session, Severity, Span,
};
use crate::sessions::{HealthTracker, SessionTracker};
use crate::storage::{
    AuditStore, EventStore, InMemoryAuditStore, InMemoryEventStore, InMemoryMetricStore,
    InMemoryTraceStore, MetricStore, TraceStore,
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// One piece of telemetry submitted by a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Emission {
    /// A telemetry event.
    Event(Event),
    /// A raw metric sample.
    Metric(MetricSample),
    /// An explicit trace span.
    Span(Span),
    /// A privileged mutation to audit.
    Audit(NewAuditEntry),
}

impl Emission {
    /// Short name of the emission type.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Event(_) => "event",
            Self::Metric(_) => "metric",
            Self::Span(_) => "span",
            Self::Audit(_) => "audit",
        }
    }
}

/// What an accepted emission produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmitReceipt {
    /// The event was stored.
    Event {
        /// Event id.
        id: EventId,
        /// Set when a causal parent was unknown.
        #[serde(skip_serializing_if = "Option::is_none")]
        orphan: Option<OrphanReason>,
        /// Fingerprint of the error group, for error events.
        #[serde(skip_serializing_if = "Option::is_none")]
        error_hash: Option<String>,
    },
    /// The sample was recorded.
    Metric {
        /// Metric name.
        metric_name: String,
    },
    /// The span was registered.
    Span {
        /// Trace id.
        trace_id: String,
        /// Span id.
        span_id: String,
        /// Whether the parent span was unknown.
        orphaned: bool,
    },
    /// The audit entry was appended.
    Audit {
        /// Chain key.
        chain: String,
        /// Sequence in the chain.
        sequence: u64,
        /// Entry checksum.
        checksum: String,
    },
}

/// Storage backends of the pipeline.
#[derive(Clone)]
pub struct Stores {
    /// Event store.
    pub events: Arc<dyn EventStore>,
    /// Span store.
    pub traces: Arc<dyn TraceStore>,
    /// Sample and aggregate store.
    pub metrics: Arc<dyn MetricStore>,
    /// Audit chain store.
    pub audit: Arc<dyn AuditStore>,
}

impl Stores {
    /// Creates empty in-memory stores.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            events: InMemoryEventStore::new_shared(),
            traces: InMemoryTraceStore::new_shared(),
            metrics: InMemoryMetricStore::new_shared(),
            audit: InMemoryAuditStore::new_shared(),
        }
    }
}

/// Items removed by one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    /// Expired events.
    pub events: usize,
    /// Spans of expired traces.
    pub spans: usize,
    /// Expired raw samples.
    pub samples: usize,
    /// Expired aggregates.
    pub aggregates: usize,
    /// Forgotten ended sessions.
    pub sessions: usize,
    /// Expired health check results.
    pub health_checks: usize,
}

impl PruneReport {
    /// Total number of removed items.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.events
            + self.spans
            + self.samples
            + self.aggregates
            + self.sessions
            + self.health_checks
    }
}

fn cutoff(now: DateTime<Utc>, retention: std::time::Duration) -> DateTime<Utc> {
    TimeDelta::from_std(retention)
        .ok()
        .and_then(|ttl| now.checked_sub_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn policy_cutoff(now: DateTime<Utc>, policy: &RetentionPolicy) -> DateTime<Utc> {
    cutoff(now, policy.as_duration())
}

/// The telemetry pipeline.
pub struct Telemetry {
    config: TelemetryConfig,
    ingestor: EventIngestor,
    aggregator: MetricsAggregator,
    grouper: ErrorGrouper,
    audit: AuditChainLogger,
    sessions: SessionTracker,
    health: Arc<HealthTracker>,
    alerts: AlertEvaluator,
}

impl Telemetry {
    /// Builds the pipeline. The returned receiver carries alert
    /// notifications and is meant for a
    /// [`NotificationDispatcher`](crate::alerting::NotificationDispatcher).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: TelemetryConfig,
        stores: Stores,
    ) -> Result<(Self, mpsc::Receiver<AlertNotification>), TelemetryError> {
        config.validate()?;

        let grouper = ErrorGrouper::new(&config.fingerprint)?;
        let audit = AuditChainLogger::new(stores.audit, config.audit.chain_scope);
        let health = Arc::new(HealthTracker::new());
        let (tx, rx) = mpsc::channel(config.alerting.notification_queue_capacity);
        let signals = AlertSignals::new(
            Arc::clone(&stores.metrics),
            Arc::clone(&health),
            Arc::clone(audit.integrity()),
        );
        let alerts = AlertEvaluator::new(config.alerting.definitions.clone(), signals, tx);

        let telemetry = Self {
            ingestor: EventIngestor::new(stores.events, stores.traces),
            aggregator: MetricsAggregator::new(stores.metrics, config.aggregation.clone()),
            grouper,
            audit,
            sessions: SessionTracker::new(),
            health,
            alerts,
            config,
        };
        Ok((telemetry, rx))
    }

    /// Builds the pipeline on in-memory stores.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn in_memory(
        config: TelemetryConfig,
    ) -> Result<(Self, mpsc::Receiver<AlertNotification>), TelemetryError> {
        Self::new(config, Stores::in_memory())
    }

    /// Submits one emission.
    ///
    /// Rejections are logged before they are returned. Error events are
    /// forwarded to the error grouper under the context's environment; a
    /// grouping failure is logged but does not reject the stored event.
    ///
    /// # Errors
    ///
    /// Returns an error if the emission was rejected or a store failed.
    pub fn emit(
        &self,
        ctx: &TelemetryContext,
        emission: Emission,
    ) -> Result<EmitReceipt, TelemetryError> {
        let kind = emission.kind();
        let result = match emission {
            Emission::Event(event) => self.emit_event(ctx, event),
            Emission::Metric(sample) => {
                let metric_name = sample.metric_name.clone();
                self.aggregator
                    .record_sample(sample)
                    .map(|()| EmitReceipt::Metric { metric_name })
                    .map_err(TelemetryError::from)
            }
            Emission::Span(span) => self
                .ingestor
                .ingest_span(span)
                .map(|span| EmitReceipt::Span {
                    trace_id: span.trace_id,
                    span_id: span.span_id,
                    orphaned: span.orphaned,
                })
                .map_err(TelemetryError::from),
            Emission::Audit(mut entry) => {
                if entry.actor.user_id.is_none() {
                    entry.actor.user_id.clone_from(&ctx.user_id);
                }
                if entry.actor.tenant_id.is_none() {
                    entry.actor.tenant_id.clone_from(&ctx.tenant_id);
                }
                self.audit
                    .append(entry)
                    .map(|entry| EmitReceipt::Audit {
                        chain: entry.chain,
                        sequence: entry.sequence,
                        checksum: entry.checksum,
                    })
                    .map_err(TelemetryError::from)
            }
        };

        if let Err(ref e) = result {
            warn!(
                kind,
                tenant_id = ?ctx.tenant_id,
                error = %e,
                "Telemetry emission rejected"
            );
        }
        result
    }

    /// Submits one emission, discarding the error after logging it.
    pub fn emit_best_effort(
        &self,
        ctx: &TelemetryContext,
        emission: Emission,
    ) -> Option<EmitReceipt> {
        self.emit(ctx, emission).ok()
    }

    fn emit_event(
        &self,
        ctx: &TelemetryContext,
        event: Event,
    ) -> Result<EmitReceipt, TelemetryError> {
        let occurrence = event.error_details().map(|details| ErrorOccurrence {
            error_type: details.error_type.clone(),
            message: details.message.clone(),
            stack: details.stack.clone(),
            environment: ctx.environment.clone(),
            timestamp: event.timestamp,
            tenant_id: event.tenant_id.clone().or_else(|| ctx.tenant_id.clone()),
        });

        let outcome = self.ingestor.ingest(ctx, event)?;

        let error_hash = occurrence.and_then(|occurrence| {
            match self.grouper.record_error(occurrence) {
                Ok(record) => Some(record.error_hash),
                Err(e) => {
                    warn!(event_id = %outcome.id, error = %e, "Failed to group error event");
                    None
                }
            }
        });

        Ok(EmitReceipt::Event {
            id: outcome.id,
            orphan: outcome.orphan,
            error_hash,
        })
    }

    /// Verifies a chain range. A failure raises the integrity flag and
    /// records a critical security event.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn verify_audit_chain(
        &self,
        chain: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<VerificationReport, TelemetryError> {
        let report = self.audit.verify(chain, start, end)?;
        if !report.is_valid() {
            self.record_integrity_violation(&report);
        }
        Ok(report)
    }

    /// Verifies every chain from genesis.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn verify_all_chains(&self) -> Result<Vec<VerificationReport>, TelemetryError> {
        let reports = self.audit.verify_all()?;
        for report in reports.iter().filter(|r| !r.is_valid()) {
            self.record_integrity_violation(report);
        }
        Ok(reports)
    }

    fn record_integrity_violation(&self, report: &VerificationReport) {
        let first_invalid = report.first_invalid.unwrap_or_default();
        let event = Event::new("audit_chain_integrity_violation", EventCategory::Security)
            .with_severity(Severity::Critical)
            .with_details(EventDetails::Security(SecurityDetails {
                principal: None,
                outcome: format!(
                    "chain {} diverges at sequence {first_invalid} ({} invalid entries)",
                    report.chain,
                    report.invalid_sequences.len()
                ),
            }));
        if let Err(e) = self.ingestor.ingest(&TelemetryContext::default(), event) {
            error!(chain = %report.chain, error = %e, "Failed to record integrity violation event");
        }
    }

    /// Rolls up every pending completed period of every configured window.
    ///
    /// # Errors
    ///
    /// Returns an error if the metric store fails.
    pub fn run_rollups(&self, now: DateTime<Utc>) -> Result<Vec<RollupReport>, TelemetryError> {
        Ok(self.aggregator.rollup_all_completed(now)?)
    }

    /// Removes telemetry older than its retention policy.
    ///
    /// Raw samples are kept for their TTL plus the longest rollup window so
    /// that a period is never pruned before it could be rolled up. Audit
    /// entries are never removed.
    ///
    /// # Errors
    ///
    /// Returns an error if a store fails.
    pub fn prune(&self, now: DateTime<Utc>) -> Result<PruneReport, TelemetryError> {
        let retention = &self.config.retention;
        let longest_window = self
            .aggregator
            .config()
            .windows_in_use()
            .last()
            .map(|w| w.as_duration())
            .unwrap_or_default();
        let samples_cutoff = cutoff(
            now,
            retention.samples.as_duration().saturating_add(longest_window),
        );

        let (samples, aggregates) = self
            .aggregator
            .prune(samples_cutoff, policy_cutoff(now, &retention.aggregates))?;
        let report = PruneReport {
            events: self
                .ingestor
                .prune_events(policy_cutoff(now, &retention.events))?,
            spans: self
                .ingestor
                .prune_traces(policy_cutoff(now, &retention.traces))?,
            samples,
            aggregates,
            sessions: self
                .sessions
                .prune_ended(policy_cutoff(now, &retention.sessions)),
            health_checks: self
                .health
                .prune_history(policy_cutoff(now, &retention.health_checks)),
        };
        if report.total() > 0 {
            info!(
                events = report.events,
                spans = report.spans,
                samples = report.samples,
                aggregates = report.aggregates,
                sessions = report.sessions,
                health_checks = report.health_checks,
                "Expired telemetry pruned"
            );
        }
        Ok(report)
    }

    /// Evaluates every alert once.
    #[must_use]
    pub fn tick_alerts(&self, now: DateTime<Utc>) -> TickReport {
        self.alerts.tick(now)
    }

    /// Closes sessions idle longer than the configured timeout.
    pub fn sweep_sessions(&self, now: DateTime<Utc>) -> Vec<Session> {
        let idle_timeout =
            TimeDelta::from_std(self.config.sessions.idle_timeout()).unwrap_or(TimeDelta::MAX);
        self.sessions.sweep_idle(now, idle_timeout)
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Event ingestion and the event and trace stores.
    #[must_use]
    pub fn ingestor(&self) -> &EventIngestor {
        &self.ingestor
    }

    /// Metric recording and rollup.
    #[must_use]
    pub fn aggregator(&self) -> &MetricsAggregator {
        &self.aggregator
    }

    /// Error grouping.
    #[must_use]
    pub fn grouper(&self) -> &ErrorGrouper {
        &self.grouper
    }

    /// The audit chain logger.
    #[must_use]
    pub fn audit(&self) -> &AuditChainLogger {
        &self.audit
    }

    /// Session tracking.
    #[must_use]
    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    /// Health check history.
    #[must_use]
    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Alert state and operator actions.
    #[must_use]
    pub fn alerts(&self) -> &AlertEvaluator {
        &self.alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainScope;
    use crate::grouping::ErrorQuery;
    use crate::config::RollupWindow;
    use crate::models::{
        AlertCondition, AlertDefinition, AlertState, AuditAction, EndReason, HealthCheckResult,
        HealthStatus, StackFrame,
    };
    use crate::storage::EventQuery;
    use chrono::TimeZone;

    fn telemetry() -> Telemetry {
        let config = TelemetryConfig::default();
        Telemetry::in_memory(config).unwrap().0
    }

    fn ctx() -> TelemetryContext {
        TelemetryContext::new("staging")
            .with_tenant("zimmerei-nord")
            .with_user("u-42")
    }

    fn failing_export(ts: DateTime<Utc>, invoice: u32) -> Event {
        let mut event = Event::error(
            "invoice_export_failed",
            "ExportError",
            format!("Invoice {invoice} could not be rendered"),
        )
        .with_timestamp(ts);
        if let EventDetails::Error(details) = &mut event.details {
            details
                .stack
                .push(StackFrame::new("render").with_module("export::pdf").at("pdf.rs", 88));
        }
        event
    }

    #[test]
    fn test_error_events_are_grouped_per_environment() {
        let t = telemetry();
        let t1 = Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();
        let t2 = t1 + TimeDelta::minutes(5);
        let t3 = t1 + TimeDelta::minutes(9);

        let mut hashes = Vec::new();
        for (ts, invoice) in [(t2, 2), (t1, 1), (t3, 3)] {
            let receipt = t
                .emit(&ctx(), Emission::Event(failing_export(ts, invoice)))
                .unwrap();
            let EmitReceipt::Event { error_hash, .. } = receipt else {
                panic!("expected event receipt");
            };
            hashes.push(error_hash.unwrap());
        }
        assert!(hashes.windows(2).all(|w| w[0] == w[1]));

        let records = t.grouper().query(&ErrorQuery::new().with_environment("staging"));
        assert_eq!(records.total_count, 1);
        let record = &records.records[0];
        assert_eq!(record.occurrence_count, 3);
        assert_eq!(record.first_seen, t1);
        assert_eq!(record.last_seen, t3);
        assert_eq!(record.normalized_message, "Invoice <n> could not be rendered");
    }

    #[test]
    fn test_event_tenant_filled_from_context() {
        let t = telemetry();
        let receipt = t
            .emit(
                &ctx(),
                Emission::Event(Event::new("project_opened", EventCategory::User)),
            )
            .unwrap();
        let EmitReceipt::Event { id, orphan, .. } = receipt else {
            panic!("expected event receipt");
        };
        assert!(orphan.is_none());

        let stored = t.ingestor().events().get(&id).unwrap();
        assert_eq!(stored.event.tenant_id.as_deref(), Some("zimmerei-nord"));
    }

    #[test]
    fn test_invalid_emission_is_rejected_and_best_effort_swallows() {
        let t = telemetry();
        let bad = Emission::Metric(MetricSample::gauge("open_sessions", f64::NAN));

        let err = t.emit(&ctx(), bad.clone()).unwrap_err();
        assert!(err.is_validation());
        assert!(t.emit_best_effort(&ctx(), bad).is_none());
    }

    #[test]
    fn test_audit_emission_takes_actor_from_context() {
        let t = telemetry();
        let receipt = t
            .emit(
                &ctx(),
                Emission::Audit(NewAuditEntry::new(AuditAction::Delete, "customer", "C-9")),
            )
            .unwrap();
        assert!(matches!(receipt, EmitReceipt::Audit { sequence: 0, .. }));

        let history = t.audit().history("customer", "C-9").unwrap();
        assert_eq!(history[0].actor.user_id.as_deref(), Some("u-42"));
        assert_eq!(history[0].chain, "_global");
    }

    #[test]
    fn test_integrity_violation_escalates() {
        let mut config = TelemetryConfig::default();
        config.audit.chain_scope = ChainScope::Global;
        config.alerting = config.alerting.with_definition(AlertDefinition::new(
            "audit-chain",
            AlertCondition::AuditChainIntegrity,
        ));
        let (t, mut notifications) = Telemetry::in_memory(config).unwrap();
        t.emit(
            &ctx(),
            Emission::Audit(NewAuditEntry::new(AuditAction::Create, "invoice", "INV-1")),
        )
        .unwrap();

        let valid = t.verify_audit_chain("_global", 0, None).unwrap();
        assert!(valid.is_valid());

        let mut entries = t.audit().store().range("_global", 0, None).unwrap();
        entries[0].resource_id = "INV-2".to_string();
        let report = crate::audit::verify_entries(
            "_global",
            0,
            &entries,
            crate::models::GENESIS_CHECKSUM,
        )
        .unwrap();
        t.audit().integrity().raise(report.clone());
        t.record_integrity_violation(&report);

        let security = t
            .ingestor()
            .events()
            .query(EventQuery::new().with_category(EventCategory::Security))
            .unwrap();
        assert_eq!(security.total_count, 1);
        assert_eq!(security.events[0].event.severity, Severity::Critical);

        t.tick_alerts(Utc::now());
        assert_eq!(
            t.alerts().get("audit-chain").unwrap().state,
            AlertState::Triggered
        );
        assert!(notifications.try_recv().is_ok());
    }

    #[test]
    fn test_sweep_uses_configured_timeout() {
        let t = telemetry();
        let start = Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();
        t.sessions().start_session(&ctx(), start).unwrap();

        assert!(t.sweep_sessions(start + TimeDelta::minutes(29)).is_empty());
        assert_eq!(t.sweep_sessions(start + TimeDelta::minutes(30)).len(), 1);
    }

    #[test]
    fn test_prune_applies_each_retention_policy() {
        let t = telemetry();
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();
        let days_ago = |days: i64| now - TimeDelta::days(days);

        for ts in [days_ago(40), days_ago(1)] {
            t.emit(
                &ctx(),
                Emission::Event(Event::new("beam.cut", EventCategory::System).with_timestamp(ts)),
            )
            .unwrap();
        }
        for (trace, ts) in [("old", days_ago(40)), ("new", days_ago(1))] {
            t.emit(
                &ctx(),
                Emission::Span(
                    Span::new(trace, "root", "nesting")
                        .with_start_time(ts)
                        .with_end_time(ts),
                ),
            )
            .unwrap();
        }

        let ancient = days_ago(100);
        for ts in [
            ancient,
            days_ago(3),
            now - TimeDelta::days(2) - TimeDelta::minutes(30),
        ] {
            t.emit(
                &ctx(),
                Emission::Metric(MetricSample::gauge("open_sessions", 4.0).with_timestamp(ts)),
            )
            .unwrap();
        }
        t.aggregator().rollup(RollupWindow::OneMinute, ancient).unwrap();
        t.aggregator().rollup(RollupWindow::OneHour, ancient).unwrap();

        let ended = t.sessions().start_session(&ctx(), days_ago(40)).unwrap();
        t.sessions()
            .end_session(&ended.token, EndReason::Logout, days_ago(39))
            .unwrap();
        let active = t.sessions().start_session(&ctx(), days_ago(40)).unwrap();

        for ts in [days_ago(40), days_ago(35), days_ago(1)] {
            t.health()
                .record_health_check(
                    HealthCheckResult::new("database", HealthStatus::Healthy).with_timestamp(ts),
                )
                .unwrap();
        }

        let report = t.prune(now).unwrap();

        assert_eq!(
            report,
            PruneReport {
                events: 1,
                spans: 1,
                samples: 2,
                aggregates: 2,
                sessions: 1,
                health_checks: 2,
            }
        );
        assert!(t.sessions().get(&active.token).is_some());
        assert_eq!(t.prune(now).unwrap().total(), 0);
    }

    #[test]
    fn test_prune_never_touches_the_audit_chain() {
        let t = telemetry();
        t.emit(
            &ctx(),
            Emission::Audit(NewAuditEntry::new(AuditAction::Update, "invoice", "inv-1")),
        )
        .unwrap();

        t.prune(Utc::now() + TimeDelta::days(5000)).unwrap();

        let report = t.verify_audit_chain("_global", 0, None).unwrap();
        assert!(report.is_valid());
        assert_eq!(report.checked, 1);
    }
}
