//! Escalating reminders for absences missing from the HR system.
//!
//! Each record re-runs reconciliation before it escalates. Level offsets are
//! measured from record creation. The urgent level is sent at most once, read
//! from persisted history. A record is saved with its history entry before any
//! message for that pass goes out.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::analytics::{AnalyticsCategory, AnalyticsEvent, AnalyticsRecorder};
use crate::clock::Clock;
use crate::config::{PartialMatchPolicy, ReminderConfig};
use crate::domain::reconciliation::{ReconciliationOutcome, ReconciliationResult};
use crate::domain::reminder::{EscalationLevel, ReminderKind, ReminderRecord};
use crate::errors::StoreError;
use crate::extraction::calendar::format_dates;
use crate::locks::KeyedLocks;
use crate::notifier::Notifier;
use crate::reconciliation::ReconciliationEngine;
use crate::store::Collection;
use crate::templates::{absence_context, MessageTemplates, Template};

const MANAGER_FALLBACK: &str = "your manager";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewReminder {
    pub person_id: String,
    pub person_email: String,
    pub message_id: String,
    pub channel_id: String,
    pub original_dates: BTreeSet<NaiveDate>,
    pub missing_dates: BTreeSet<NaiveDate>,
    pub is_remote_work: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReminderStep {
    Resolved { key: String },
    /// Some dates appeared; the record kept its level this pass.
    Progress { key: String, remaining: usize },
    Escalated { key: String, level: EscalationLevel },
    Deferred { key: String, reason: &'static str },
}

impl ReminderStep {
    pub fn key(&self) -> &str {
        match self {
            Self::Resolved { key }
            | Self::Progress { key, .. }
            | Self::Escalated { key, .. }
            | Self::Deferred { key, .. } => key,
        }
    }
}

#[derive(Default)]
struct PassPlan {
    resolved: bool,
    progress: bool,
    escalation: Option<EscalationLevel>,
}

impl PassPlan {
    fn is_empty(&self) -> bool {
        !self.resolved && !self.progress && self.escalation.is_none()
    }
}

pub struct ReminderScheduler {
    records: Collection<ReminderRecord>,
    reconciler: Arc<ReconciliationEngine>,
    notifier: Arc<Notifier>,
    templates: Arc<MessageTemplates>,
    clock: Arc<dyn Clock>,
    analytics: Arc<dyn AnalyticsRecorder>,
    config: ReminderConfig,
    admin_channel_id: Option<String>,
    locks: KeyedLocks,
}

impl ReminderScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        records: Collection<ReminderRecord>,
        reconciler: Arc<ReconciliationEngine>,
        notifier: Arc<Notifier>,
        templates: Arc<MessageTemplates>,
        clock: Arc<dyn Clock>,
        analytics: Arc<dyn AnalyticsRecorder>,
        config: ReminderConfig,
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

    pub async fn find(&self, key: &str) -> Option<ReminderRecord> {
        self.records.load(key).await
    }

    /// Idempotent per person and source message.
    pub async fn register(&self, reminder: NewReminder) -> Result<ReminderRecord, StoreError> {
        let key = ReminderRecord::key_for(&reminder.person_id, &reminder.message_id);
        let _guard = self.locks.lock(&key).await;

        if let Some(existing) = self.records.load(&key).await {
            debug!(
                event_name = "reminder.register.duplicate",
                correlation_id = %reminder.message_id,
                person_id = %reminder.person_id,
                "reminder already registered"
            );
            return Ok(existing);
        }

        let now = self.clock.now();
        let mut record = ReminderRecord {
            key: key.clone(),
            person_id: reminder.person_id,
            person_email: reminder.person_email,
            message_id: reminder.message_id,
            channel_id: reminder.channel_id,
            original_dates: reminder.original_dates,
            outstanding_dates: reminder.missing_dates,
            is_remote_work: reminder.is_remote_work,
            level: EscalationLevel::None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
            next_due: None,
            resolved: false,
            resolved_at: None,
        };
        record.next_due = self.config.escalation_hours.first().map(|hours| record.due_at(*hours));

        self.records.save(&key, &record).await?;
        info!(
            event_name = "reminder.registered",
            correlation_id = %record.message_id,
            person_id = %record.person_id,
            outstanding = record.outstanding_dates.len(),
            "reminder registered"
        );
        self.record_event(&record, "reminder.registered", None, now);
        Ok(record)
    }

    pub fn is_due(&self, record: &ReminderRecord, now: DateTime<Utc>) -> bool {
        if record.resolved {
            return false;
        }
        match record.level {
            EscalationLevel::Level3 => {
                let urgent_after = self.config.escalation_hours.get(2).copied().unwrap_or(72);
                !record.level3_sent() && record.hours_since_creation(now) >= i64::from(urgent_after)
            }
            EscalationLevel::Resolved => false,
            _ => record.next_due.is_some_and(|due| now >= due),
        }
    }

    /// One due-check pass over every unresolved record.
    pub async fn run_due(&self) -> Vec<ReminderStep> {
        let now = self.clock.now();
        let due = self.records.matching(|record| self.is_due(record, now)).await;

        let mut steps = Vec::with_capacity(due.len());
        for record in due {
            steps.push(self.process(record).await);
        }
        steps
    }

    async fn process(&self, snapshot: ReminderRecord) -> ReminderStep {
        let key = snapshot.key.clone();
        let result = match self
            .reconciler
            .reconcile(&snapshot.person_email, &snapshot.outstanding_dates, snapshot.is_remote_work)
            .await
        {
            ReconciliationOutcome::Checked(result) => result,
            other => {
                debug!(
                    event_name = "reminder.check.deferred",
                    correlation_id = %snapshot.message_id,
                    person_id = %snapshot.person_id,
                    outcome = other.label(),
                    "HR check inconclusive; retrying next pass"
                );
                return ReminderStep::Deferred { key, reason: other.label() };
            }
        };

        let guard = self.locks.lock(&key).await;
        let Some(mut record) = self.records.load(&key).await else {
            return ReminderStep::Deferred { key, reason: "record_missing" };
        };
        if record.updated_at != snapshot.updated_at || record.level != snapshot.level {
            debug!(
                event_name = "reminder.check.stale",
                correlation_id = %record.message_id,
                person_id = %record.person_id,
                "record changed during the HR check"
            );
            return ReminderStep::Deferred { key, reason: "changed_concurrently" };
        }

        let now = self.clock.now();
        let newly_matched = result.matched.clone();
        let plan = self.plan_pass(&mut record, &result, now);
        if plan.is_empty() {
            return ReminderStep::Deferred { key, reason: "ladder_exhausted" };
        }
        if self.records.save(&key, &record).await.is_err() {
            return ReminderStep::Deferred { key, reason: "store_write_failed" };
        }
        drop(guard);

        self.deliver(&record, &plan, &newly_matched, now).await;

        if plan.resolved {
            ReminderStep::Resolved { key }
        } else if let Some(level) = plan.escalation {
            ReminderStep::Escalated { key, level }
        } else {
            ReminderStep::Progress { key, remaining: record.outstanding_dates.len() }
        }
    }

    fn plan_pass(
        &self,
        record: &mut ReminderRecord,
        result: &ReconciliationResult,
        now: DateTime<Utc>,
    ) -> PassPlan {
        let mut plan = PassPlan::default();

        if result.is_found() {
            record.push_history(record.level, ReminderKind::Resolution, now, "all dates recorded");
            record.mark_resolved(now);
            plan.resolved = true;
            return plan;
        }

        if result.is_partial() {
            record.outstanding_dates = result.missing.clone();
            record.push_history(
                record.level,
                ReminderKind::Progress,
                now,
                format!("{} date(s) still missing", result.missing.len()),
            );
            plan.progress = true;
            if self.config.partial_match_policy == PartialMatchPolicy::HoldLevel {
                return plan;
            }
        }

        let send_level = match record.level {
            EscalationLevel::Level3 if !record.level3_sent() => Some(EscalationLevel::Level3),
            current => current.next(),
        };
        let Some(level) = send_level else {
            return plan;
        };

        record.push_history(level, ReminderKind::Escalation, now, action_for(level));
        record.level = level;
        let next_due = level
            .next()
            .and_then(EscalationLevel::offset_index)
            .and_then(|index| self.config.escalation_hours.get(index))
            .map(|hours| record.due_at(*hours));
        record.next_due = next_due;
        plan.escalation = Some(level);
        plan
    }

    async fn deliver(
        &self,
        record: &ReminderRecord,
        plan: &PassPlan,
        newly_matched: &BTreeSet<NaiveDate>,
        now: DateTime<Utc>,
    ) {
        if plan.resolved {
            let context =
                absence_context(&record.person_id, record.is_remote_work, &record.original_dates);
            self.reply(record, &self.templates.render(Template::ReminderResolved, &context)).await;
            info!(
                event_name = "reminder.resolved",
                correlation_id = %record.message_id,
                person_id = %record.person_id,
                "all outstanding dates recorded"
            );
            self.record_event(record, "reminder.resolved", None, now);
            return;
        }

        if plan.progress {
            let mut context =
                absence_context(&record.person_id, record.is_remote_work, &record.outstanding_dates);
            context.insert("missing", &format_dates(&to_vec(&record.outstanding_dates)));
            self.reply(record, &self.templates.render(Template::ReminderProgress, &context)).await;
            info!(
                event_name = "reminder.progress",
                correlation_id = %record.message_id,
                person_id = %record.person_id,
                matched = newly_matched.len(),
                remaining = record.outstanding_dates.len(),
                "partial match; outstanding dates reduced"
            );
            self.record_event(record, "reminder.progress", None, now);
        }

        if let Some(level) = plan.escalation {
            self.send_level(record, level, now).await;
            info!(
                event_name = "reminder.level.sent",
                correlation_id = %record.message_id,
                person_id = %record.person_id,
                level = level.as_str(),
                "escalation reminder sent"
            );
            self.record_event(record, "reminder.level.sent", Some(level), now);
        }
    }

    async fn send_level(&self, record: &ReminderRecord, level: EscalationLevel, now: DateTime<Utc>) {
        let mut context =
            absence_context(&record.person_id, record.is_remote_work, &record.outstanding_dates);
        context.insert("hours", &record.hours_since_creation(now));

        match level {
            EscalationLevel::Level1 => {
                self.reply(record, &self.templates.render(Template::ReminderLevel1, &context)).await;
            }
            EscalationLevel::Level2 => {
                context.insert("manager", &self.manager_mention(&record.person_email).await);
                self.reply(record, &self.templates.render(Template::ReminderLevel2, &context)).await;
            }
            EscalationLevel::Level3 => {
                context.insert("manager", &self.manager_mention(&record.person_email).await);
                self.reply(record, &self.templates.render(Template::ReminderLevel3, &context)).await;

                let direct = self.templates.render(Template::ReminderLevel3Direct, &context);
                let _ = self.notifier.direct(&record.person_id, &direct).await;

                if let Some(admin_channel) = &self.admin_channel_id {
                    let alert = self.templates.render(Template::NonComplianceAlert, &context);
                    let _ = self.notifier.channel(admin_channel, &alert).await;
                }
            }
            EscalationLevel::None | EscalationLevel::Resolved => {}
        }
    }

    async fn reply(&self, record: &ReminderRecord, text: &str) {
        // Send failures are logged by the notifier; history already records the level.
        let _ = self.notifier.reply(&record.channel_id, &record.message_id, text).await;
    }

    async fn manager_mention(&self, email: &str) -> String {
        let Some(manager) = self.reconciler.manager_of(email).await else {
            return MANAGER_FALLBACK.to_owned();
        };

        match self.notifier.messenger().resolve_person_id_by_email(&manager.email).await {
            Ok(Some(person_id)) => format!("<@{person_id}>"),
            Ok(None) if !manager.name.trim().is_empty() => manager.name,
            Ok(None) => MANAGER_FALLBACK.to_owned(),
            Err(error) => {
                warn!(
                    event_name = "reminder.manager.unresolved",
                    correlation_id = %email,
                    error = %error,
                    "manager identity lookup failed"
                );
                if manager.name.trim().is_empty() {
                    MANAGER_FALLBACK.to_owned()
                } else {
                    manager.name
                }
            }
        }
    }

    /// Removes records untouched for longer than the retention window.
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
        if purged > 0 {
            info!(
                event_name = "reminder.retention.purged",
                correlation_id = "sweep",
                purged,
                "stale reminder records removed"
            );
        }
        purged
    }

    fn record_event(
        &self,
        record: &ReminderRecord,
        event_type: &str,
        level: Option<EscalationLevel>,
        now: DateTime<Utc>,
    ) {
        let mut event = AnalyticsEvent::new(
            AnalyticsCategory::Reminder,
            event_type,
            record.message_id.clone(),
            now,
        )
        .with_person(record.person_id.clone())
        .with_metadata("outstanding", record.outstanding_dates.len().to_string());
        if let Some(level) = level {
            event = event.with_metadata("level", level.as_str());
        }
        self.analytics.record(event);
    }
}

fn action_for(level: EscalationLevel) -> &'static str {
    match level {
        EscalationLevel::Level1 => "thread reminder",
        EscalationLevel::Level2 => "thread reminder, manager cc",
        EscalationLevel::Level3 => "urgent reminder, direct message, admin alert",
        EscalationLevel::None | EscalationLevel::Resolved => "none",
    }
}

fn to_vec(dates: &BTreeSet<NaiveDate>) -> Vec<NaiveDate> {
    dates.iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use chrono::{Duration, NaiveDate};

    use super::{NewReminder, ReminderScheduler, ReminderStep};
    use crate::analytics::InMemoryAnalytics;
    use crate::clock::FixedClock;
    use crate::config::{PartialMatchPolicy, ReminderConfig};
    use crate::domain::approval::fixtures::created_at;
    use crate::domain::reconciliation::ManagerContact;
    use crate::domain::reminder::{EscalationLevel, ReminderKind, ReminderRecord};
    use crate::messaging::{RecordingMessenger, SentMessage};
    use crate::notifier::Notifier;
    use crate::reconciliation::fixtures::{leave, person};
    use crate::reconciliation::{InMemoryHrSystem, ReconciliationEngine};
    use crate::store::testing::FlakyStore;
    use crate::store::{Collection, DocumentStore, InMemoryDocumentStore, REMINDERS, SENT_MESSAGES};
    use crate::templates::MessageTemplates;

    struct Harness {
        scheduler: ReminderScheduler,
        hr: Arc<InMemoryHrSystem>,
        messenger: RecordingMessenger,
        clock: FixedClock,
        analytics: InMemoryAnalytics,
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn two_days() -> BTreeSet<NaiveDate> {
        [date(2024, 3, 11), date(2024, 3, 12)].into_iter().collect()
    }

    async fn harness_with(store: Arc<dyn DocumentStore>, policy: PartialMatchPolicy) -> Harness {
        let hr = Arc::new(InMemoryHrSystem::default());
        hr.add_person(person()).await;
        hr.set_manager(
            "alice@example.com",
            ManagerContact { name: "Bob".to_owned(), email: "bob@example.com".to_owned() },
        )
        .await;

        let messenger = RecordingMessenger::default();
        messenger.add_person("U0BOB", "bob@example.com", "Bob");
        let clock = FixedClock::new(created_at());
        let analytics = InMemoryAnalytics::default();

        let notifier = Notifier::new(
            Arc::new(messenger.clone()),
            Collection::new(Arc::new(InMemoryDocumentStore::default()), SENT_MESSAGES),
            Arc::new(clock.clone()),
            600,
        );
        let scheduler = ReminderScheduler::new(
            Collection::new(store, REMINDERS),
            Arc::new(ReconciliationEngine::new(hr.clone(), StdDuration::from_secs(5))),
            Arc::new(notifier),
            Arc::new(MessageTemplates::builtin()),
            Arc::new(clock.clone()),
            Arc::new(analytics.clone()),
            ReminderConfig { partial_match_policy: policy, ..ReminderConfig::default() },
            Some("C0ADMIN".to_owned()),
        );

        Harness { scheduler, hr, messenger, clock, analytics }
    }

    async fn harness() -> Harness {
        harness_with(Arc::new(InMemoryDocumentStore::default()), PartialMatchPolicy::HoldLevel).await
    }

    fn new_reminder() -> NewReminder {
        NewReminder {
            person_id: "U0ALICE".to_owned(),
            person_email: "alice@example.com".to_owned(),
            message_id: "1710061200.000100".to_owned(),
            channel_id: "C0LEAVE".to_owned(),
            original_dates: two_days(),
            missing_dates: two_days(),
            is_remote_work: false,
        }
    }

    fn key() -> String {
        ReminderRecord::key_for("U0ALICE", "1710061200.000100")
    }

    /// Runs passes at 12h and 48h so the record ends at level 2.
    async fn advance_to_level2(h: &Harness) {
        h.clock.advance(Duration::hours(12));
        h.scheduler.run_due().await;
        h.clock.advance(Duration::hours(36));
        h.scheduler.run_due().await;
    }

    #[tokio::test]
    async fn escalates_at_fixed_offsets_from_creation() {
        let h = harness().await;
        h.scheduler.register(new_reminder()).await.expect("register");

        h.clock.advance(Duration::hours(11));
        assert!(h.scheduler.run_due().await.is_empty());

        h.clock.advance(Duration::hours(1));
        let steps = h.scheduler.run_due().await;
        assert_eq!(steps, vec![ReminderStep::Escalated { key: key(), level: EscalationLevel::Level1 }]);
        let record = h.scheduler.find(&key()).await.expect("record");
        assert_eq!(record.next_due, Some(created_at() + Duration::hours(48)));

        h.clock.advance(Duration::hours(36));
        h.scheduler.run_due().await;
        let sent = h.messenger.sent();
        assert!(sent.last().expect("level 2").text().contains("cc <@U0BOB>"));

        h.clock.advance(Duration::hours(24));
        let steps = h.scheduler.run_due().await;
        assert_eq!(steps, vec![ReminderStep::Escalated { key: key(), level: EscalationLevel::Level3 }]);

        let sent = h.messenger.sent();
        assert!(sent.iter().any(|message| matches!(
            message,
            SentMessage::Direct { person_id, .. } if person_id == "U0ALICE"
        )));
        assert!(sent.iter().any(|message| matches!(
            message,
            SentMessage::Channel { channel_id, text } if channel_id == "C0ADMIN" && text.contains("72 hours")
        )));
        assert_eq!(
            h.analytics.event_types().iter().filter(|kind| *kind == "reminder.level.sent").count(),
            3
        );
    }

    #[tokio::test]
    async fn partial_match_at_level2_holds_the_level() {
        let h = harness().await;
        h.scheduler.register(new_reminder()).await.expect("register");
        advance_to_level2(&h).await;

        h.hr.add_record("EMP-7", leave("LV-1", "11-Mar-2024", "11-Mar-2024")).await;
        h.clock.advance(Duration::hours(24));
        let steps = h.scheduler.run_due().await;

        assert_eq!(steps, vec![ReminderStep::Progress { key: key(), remaining: 1 }]);
        let record = h.scheduler.find(&key()).await.expect("record");
        assert_eq!(record.level, EscalationLevel::Level2);
        assert_eq!(record.outstanding_dates, [date(2024, 3, 12)].into_iter().collect());
        assert!(!record.level3_sent());
        assert!(h.messenger.sent().last().expect("notice").text().contains("Still missing: Mar 12, 2024"));
    }

    #[tokio::test]
    async fn escalate_remaining_policy_sends_progress_and_next_level() {
        let h = harness_with(
            Arc::new(InMemoryDocumentStore::default()),
            PartialMatchPolicy::EscalateRemaining,
        )
        .await;
        h.scheduler.register(new_reminder()).await.expect("register");
        advance_to_level2(&h).await;

        h.hr.add_record("EMP-7", leave("LV-1", "11-Mar-2024", "11-Mar-2024")).await;
        h.clock.advance(Duration::hours(24));
        let steps = h.scheduler.run_due().await;

        assert_eq!(steps, vec![ReminderStep::Escalated { key: key(), level: EscalationLevel::Level3 }]);
        let record = h.scheduler.find(&key()).await.expect("record");
        assert_eq!(record.outstanding_dates.len(), 1);
        let kinds: Vec<ReminderKind> = record.history.iter().map(|entry| entry.kind).collect();
        assert_eq!(kinds.last(), Some(&ReminderKind::Escalation));
        assert!(kinds.contains(&ReminderKind::Progress));
    }

    #[tokio::test]
    async fn urgent_level_is_sent_once_across_replays() {
        let h = harness().await;
        h.scheduler.register(new_reminder()).await.expect("register");
        advance_to_level2(&h).await;

        h.clock.advance(Duration::hours(24));
        assert_eq!(h.scheduler.run_due().await.len(), 1);
        let sent_after_urgent = h.messenger.sent().len();

        assert!(h.scheduler.run_due().await.is_empty());
        h.clock.advance(Duration::hours(48));
        assert!(h.scheduler.run_due().await.is_empty());

        assert_eq!(h.messenger.sent().len(), sent_after_urgent);
        let record = h.scheduler.find(&key()).await.expect("record");
        let urgent_entries = record
            .history
            .iter()
            .filter(|entry| {
                entry.level == EscalationLevel::Level3 && entry.kind == ReminderKind::Escalation
            })
            .count();
        assert_eq!(urgent_entries, 1);
    }

    #[tokio::test]
    async fn level3_without_history_is_sent_once() {
        let store = Arc::new(InMemoryDocumentStore::default());
        let h = harness_with(store.clone(), PartialMatchPolicy::HoldLevel).await;
        let mut record = h.scheduler.register(new_reminder()).await.expect("register");

        // A record restored at the terminal level but with no urgent send on file.
        record.level = EscalationLevel::Level3;
        record.next_due = None;
        Collection::new(store, REMINDERS).save(&key(), &record).await.expect("save");

        h.clock.advance(Duration::hours(71));
        assert!(h.scheduler.run_due().await.is_empty());

        h.clock.advance(Duration::hours(1));
        assert_eq!(
            h.scheduler.run_due().await,
            vec![ReminderStep::Escalated { key: key(), level: EscalationLevel::Level3 }]
        );
        assert!(h.scheduler.run_due().await.is_empty());
    }

    #[tokio::test]
    async fn full_match_resolves_and_stops() {
        let h = harness().await;
        h.scheduler.register(new_reminder()).await.expect("register");
        h.hr.add_record("EMP-7", leave("LV-1", "11-Mar-2024", "12-Mar-2024")).await;

        h.clock.advance(Duration::hours(12));
        assert_eq!(h.scheduler.run_due().await, vec![ReminderStep::Resolved { key: key() }]);

        let record = h.scheduler.find(&key()).await.expect("record");
        assert!(record.resolved);
        assert_eq!(record.level, EscalationLevel::Resolved);
        assert!(h.messenger.sent()[0].text().contains("all of Mar 11 and Mar 12, 2024"));

        h.clock.advance(Duration::hours(100));
        assert!(h.scheduler.run_due().await.is_empty());
    }

    #[tokio::test]
    async fn hr_outage_defers_without_escalating() {
        let h = harness().await;
        h.scheduler.register(new_reminder()).await.expect("register");
        h.hr.set_outage(Some("503 Service Unavailable")).await;

        h.clock.advance(Duration::hours(12));
        assert_eq!(
            h.scheduler.run_due().await,
            vec![ReminderStep::Deferred { key: key(), reason: "unavailable" }]
        );
        assert!(h.messenger.sent().is_empty());
        assert_eq!(
            h.scheduler.find(&key()).await.expect("record").level,
            EscalationLevel::None
        );
    }

    #[tokio::test]
    async fn failed_write_sends_nothing_and_retries() {
        let store = Arc::new(FlakyStore::default());
        let h = harness_with(store.clone(), PartialMatchPolicy::HoldLevel).await;
        h.scheduler.register(new_reminder()).await.expect("register");

        h.clock.advance(Duration::hours(12));
        store.fail_writes(true);
        assert_eq!(
            h.scheduler.run_due().await,
            vec![ReminderStep::Deferred { key: key(), reason: "store_write_failed" }]
        );
        assert!(h.messenger.sent().is_empty());

        store.fail_writes(false);
        assert_eq!(
            h.scheduler.run_due().await,
            vec![ReminderStep::Escalated { key: key(), level: EscalationLevel::Level1 }]
        );
    }

    #[tokio::test]
    async fn register_is_idempotent_and_purge_respects_retention() {
        let h = harness().await;
        let first = h.scheduler.register(new_reminder()).await.expect("register");
        let second = h.scheduler.register(new_reminder()).await.expect("register");
        assert_eq!(first, second);

        h.clock.advance(Duration::days(7));
        assert_eq!(h.scheduler.purge_stale().await, 0);
        h.clock.advance(Duration::hours(1));
        assert_eq!(h.scheduler.purge_stale().await, 1);
        assert!(h.scheduler.find(&key()).await.is_none());
    }
}
