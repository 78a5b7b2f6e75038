//! Grace-period verification for first-contact mentions.
//!
//! A mention waits out the grace period, gets one check, then a bounded number
//! of re-checks before it is escalated to the admin channel. A check that could
//! not reach the HR system is retried on the next sweep and does not count.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info};

use crate::analytics::{AnalyticsCategory, AnalyticsEvent, AnalyticsRecorder};
use crate::clock::Clock;
use crate::config::VerificationConfig;
use crate::domain::reconciliation::{ReconciliationOutcome, ReconciliationResult};
use crate::domain::verification::{
    CheckEntry, CheckOutcome, VerificationRecord, VerificationState,
};
use crate::errors::StoreError;
use crate::extraction::calendar::format_dates;
use crate::locks::KeyedLocks;
use crate::notifier::Notifier;
use crate::reconciliation::ReconciliationEngine;
use crate::store::Collection;
use crate::templates::{absence_context, MessageTemplates, Template};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewVerification {
    pub person_id: String,
    pub person_email: String,
    pub message_id: String,
    pub channel_id: String,
    pub dates: Vec<NaiveDate>,
    pub is_remote_work: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationStep {
    Verified { key: String },
    Missing { key: String, checks: u32 },
    Escalated { key: String },
    PersonNotFound { key: String },
    Deferred { key: String, reason: &'static str },
}

pub struct VerificationWorkflow {
    records: Collection<VerificationRecord>,
    reconciler: Arc<ReconciliationEngine>,
    notifier: Arc<Notifier>,
    templates: Arc<MessageTemplates>,
    clock: Arc<dyn Clock>,
    analytics: Arc<dyn AnalyticsRecorder>,
    config: VerificationConfig,
    admin_channel_id: Option<String>,
    locks: KeyedLocks,
}

impl VerificationWorkflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        records: Collection<VerificationRecord>,
        reconciler: Arc<ReconciliationEngine>,
        notifier: Arc<Notifier>,
        templates: Arc<MessageTemplates>,
        clock: Arc<dyn Clock>,
        analytics: Arc<dyn AnalyticsRecorder>,
        config: VerificationConfig,
        admin_channel_id: Option<String>,
    ) -> Self {
        Self {
            records,
            reconciler,
            notifier,
            templates,
            clock,
            analytics,
            config,
            admin_channel_id,
            locks: KeyedLocks::default(),
        }
    }

    pub fn key_for(person_id: &str, message_id: &str) -> String {
        format!("{person_id}_{message_id}")
    }

    pub async fn find(&self, key: &str) -> Option<VerificationRecord> {
        self.records.load(key).await
    }

    /// First check after the configured grace period.
    pub async fn start_grace_period(
        &self,
        verification: NewVerification,
    ) -> Result<VerificationRecord, StoreError> {
        let grace = Duration::minutes(i64::from(self.config.grace_period_minutes));
        self.open(verification, VerificationState::GracePeriod, grace).await
    }

    /// For a mention whose immediate check hit an HR outage: checked again on
    /// the next sweep.
    pub async fn start_after_outage(
        &self,
        verification: NewVerification,
    ) -> Result<VerificationRecord, StoreError> {
        self.open(verification, VerificationState::PendingVerification, Duration::zero()).await
    }

    async fn open(
        &self,
        verification: NewVerification,
        initial: VerificationState,
        first_check_in: Duration,
    ) -> Result<VerificationRecord, StoreError> {
        let key = Self::key_for(&verification.person_id, &verification.message_id);
        let _guard = self.locks.lock(&key).await;

        if let Some(existing) = self.records.load(&key).await {
            return Ok(existing);
        }

        let now = self.clock.now();
        let mut record = VerificationRecord {
            key: key.clone(),
            person_id: verification.person_id,
            person_email: verification.person_email,
            message_id: verification.message_id,
            channel_id: verification.channel_id,
            dates: verification.dates,
            is_remote_work: verification.is_remote_work,
            state: VerificationState::Detected,
            created_at: now,
            updated_at: now,
            grace_until: now + first_check_in,
            next_check_at: Some(now + first_check_in),
            checks_performed: 0,
            check_history: Vec::new(),
            state_history: Vec::new(),
        };
        record.transition(initial, now);

        self.records.save(&key, &record).await?;
        info!(
            event_name = "verification.started",
            correlation_id = %record.message_id,
            person_id = %record.person_id,
            state = ?record.state,
            "verification scheduled"
        );
        self.record_event(&record, "verification.started", now);
        Ok(record)
    }

    pub async fn run_due(&self) -> Vec<VerificationStep> {
        let now = self.clock.now();
        let due = self
            .records
            .matching(|record| {
                !record.state.is_terminal() && record.next_check_at.is_some_and(|at| now >= at)
            })
            .await;

        let mut steps = Vec::with_capacity(due.len());
        for record in due {
            steps.push(self.check(record).await);
        }
        steps
    }

    async fn check(&self, snapshot: VerificationRecord) -> VerificationStep {
        let key = snapshot.key.clone();
        let dates: BTreeSet<NaiveDate> = snapshot.dates.iter().copied().collect();
        let outcome =
            self.reconciler.reconcile(&snapshot.person_email, &dates, snapshot.is_remote_work).await;
        if let ReconciliationOutcome::Unavailable { .. } = outcome {
            debug!(
                event_name = "verification.check.deferred",
                correlation_id = %snapshot.message_id,
                person_id = %snapshot.person_id,
                "HR system unavailable; check not counted"
            );
            return VerificationStep::Deferred { key, reason: "unavailable" };
        }

        let guard = self.locks.lock(&key).await;
        let Some(mut record) = self.records.load(&key).await else {
            return VerificationStep::Deferred { key, reason: "record_missing" };
        };
        if record.updated_at != snapshot.updated_at {
            return VerificationStep::Deferred { key, reason: "changed_concurrently" };
        }

        let now = self.clock.now();
        record.transition(VerificationState::PendingVerification, now);
        let step = match &outcome {
            ReconciliationOutcome::Checked(result) if result.is_found() => {
                self.push_check(&mut record, CheckOutcome::Verified, result, now);
                record.transition(VerificationState::Verified, now);
                record.next_check_at = None;
                VerificationStep::Verified { key: key.clone() }
            }
            ReconciliationOutcome::Checked(result) => {
                let outcome =
                    if result.is_partial() { CheckOutcome::Partial } else { CheckOutcome::NotFound };
                self.push_check(&mut record, outcome, result, now);
                record.transition(VerificationState::NotFound, now);

                let rechecks_done = record.checks_performed.saturating_sub(1);
                if rechecks_done >= self.config.max_rechecks {
                    record.transition(VerificationState::Escalated, now);
                    record.next_check_at = None;
                    VerificationStep::Escalated { key: key.clone() }
                } else {
                    record.next_check_at = Some(self.next_check_at(&record));
                    VerificationStep::Missing { key: key.clone(), checks: record.checks_performed }
                }
            }
            ReconciliationOutcome::PersonNotFound { .. } => {
                record.checks_performed += 1;
                record.check_history.push(CheckEntry {
                    checked_at: now,
                    outcome: CheckOutcome::PersonNotFound,
                    missing: record.dates.clone(),
                });
                record.transition(VerificationState::Resolved, now);
                record.next_check_at = None;
                VerificationStep::PersonNotFound { key: key.clone() }
            }
            ReconciliationOutcome::Unavailable { .. } => {
                return VerificationStep::Deferred { key, reason: "unavailable" };
            }
        };

        if self.records.save(&key, &record).await.is_err() {
            return VerificationStep::Deferred { key, reason: "store_write_failed" };
        }
        drop(guard);

        self.notify(&mut record, &step, &outcome, now).await;
        step
    }

    fn push_check(
        &self,
        record: &mut VerificationRecord,
        outcome: CheckOutcome,
        result: &ReconciliationResult,
        now: DateTime<Utc>,
    ) {
        record.checks_performed += 1;
        record.check_history.push(CheckEntry {
            checked_at: now,
            outcome,
            missing: result.missing.iter().copied().collect(),
        });
    }

    /// Re-check `n` runs at `grace_until + recheck_hours[n - 1]`; the last
    /// interval repeats when fewer intervals than re-checks are configured.
    fn next_check_at(&self, record: &VerificationRecord) -> DateTime<Utc> {
        let index = record.checks_performed.saturating_sub(1) as usize;
        let hours = self
            .config
            .recheck_hours
            .get(index)
            .or_else(|| self.config.recheck_hours.last())
            .copied()
            .unwrap_or(24);
        record.grace_until + Duration::hours(i64::from(hours))
    }

    async fn notify(
        &self,
        record: &mut VerificationRecord,
        step: &VerificationStep,
        outcome: &ReconciliationOutcome,
        now: DateTime<Utc>,
    ) {
        let mut context = absence_context(&record.person_id, record.is_remote_work, &record.dates);
        let (template, event_type) = match (step, outcome) {
            (VerificationStep::Verified { .. }, _) => {
                (Template::ComplianceConfirmed, "verification.verified")
            }
            (VerificationStep::PersonNotFound { .. }, _) => {
                context.insert("email", &record.person_email);
                (Template::PersonNotInHr, "verification.person_not_found")
            }
            (VerificationStep::Escalated { .. }, _) => {
                context.insert("checks", &record.checks_performed);
                if let Some(admin_channel) = &self.admin_channel_id {
                    let alert = self.templates.render(Template::VerificationEscalated, &context);
                    let _ = self.notifier.channel(admin_channel, &alert).await;
                }
                info!(
                    event_name = "verification.escalated",
                    correlation_id = %record.message_id,
                    person_id = %record.person_id,
                    checks = record.checks_performed,
                    "re-checks exhausted; escalated to admin"
                );
                self.record_event(record, "verification.escalated", now);
                return;
            }
            (VerificationStep::Missing { .. }, ReconciliationOutcome::Checked(result))
                if result.is_partial() =>
            {
                context.insert("matched", &format_dates(&to_vec(&result.matched)));
                context.insert("missing", &format_dates(&to_vec(&result.missing)));
                (Template::PartiallyRecorded, "verification.missing")
            }
            (VerificationStep::Missing { .. }, _) => (Template::ApplyInHr, "verification.missing"),
            (VerificationStep::Deferred { .. }, _) => return,
        };

        let text = self.templates.render(template, &context);
        let _ = self.notifier.reply(&record.channel_id, &record.message_id, &text).await;
        info!(
            event_name = event_type,
            correlation_id = %record.message_id,
            person_id = %record.person_id,
            checks = record.checks_performed,
            "verification check completed"
        );

        if matches!(step, VerificationStep::Missing { .. })
            && record.state == VerificationState::NotFound
        {
            let key = record.key.clone();
            let _guard = self.locks.lock(&key).await;
            if let Some(mut latest) = self.records.load(&key).await {
                latest.transition(VerificationState::ReminderSent, now);
                if self.records.save(&key, &latest).await.is_ok() {
                    *record = latest;
                }
            }
        }
        self.record_event(record, event_type, now);
    }

    pub async fn purge_stale(&self) -> usize {
        let cutoff = self.clock.now() - Duration::days(i64::from(self.config.retention_days));
        let stale = self.records.matching(|record| record.updated_at < cutoff).await;

        let mut purged = 0;
        for record in stale {
            let _guard = self.locks.lock(&record.key).await;
            if matches!(self.records.delete(&record.key).await, Ok(true)) {
                purged += 1;
            }
        }
        purged
    }

    fn record_event(&self, record: &VerificationRecord, event_type: &str, now: DateTime<Utc>) {
        self.analytics.record(
            AnalyticsEvent::new(
                AnalyticsCategory::Verification,
                event_type,
                record.message_id.clone(),
                now,
            )
            .with_person(record.person_id.clone())
            .with_metadata("checks", record.checks_performed.to_string()),
        );
    }
}

fn to_vec(dates: &BTreeSet<NaiveDate>) -> Vec<NaiveDate> {
    dates.iter().copied().collect()
}
