//! The compliance loop: intake of channel mentions, approval decisions and
//! the periodic sweep. Every engine is injected here; the server only builds
//! collaborators and calls into this service.

mod decisions;
mod intake;
mod sweep;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use crate::analytics::{AnalyticsCategory, AnalyticsEvent, AnalyticsRecorder};
use crate::approvals::{ApprovalWorkflow, OrgDirectory};
use crate::claims::MessageClaims;
use crate::clock::Clock;
use crate::config::{AppConfig, FirstContactMode};
use crate::domain::approval::ApprovalRequest;
use crate::domain::reconciliation::ReconciliationOutcome;
use crate::extraction::calendar::format_dates;
use crate::extraction::{DateExtractor, IntentDetector};
use crate::messaging::{ApprovalCard, CardAudience, MessagingClient};
use crate::notifier::Notifier;
use crate::reconciliation::{HrSystem, ReconciliationEngine};
use crate::reminders::{NewReminder, ReminderScheduler};
use crate::store::{
    Collection, DocumentStore, APPROVAL_REQUESTS, CLAIMED_MESSAGES, REMINDERS, SENT_MESSAGES,
    VERIFICATIONS,
};
use crate::templates::{absence_context, MessageTemplates, Template};
use crate::verification::{NewVerification, VerificationWorkflow};

pub use decisions::{ApprovalAction, ApprovalDecision, DecisionOutcome};
pub use intake::{IntakeOutcome, PollReport};
pub use sweep::SweepReport;

/// Upper bound for one HR call.
pub const HR_CALL_TIMEOUT: StdDuration = StdDuration::from_secs(20);

/// Everything the service needs from outside the core.
pub struct Collaborators {
    pub store: Arc<dyn DocumentStore>,
    pub messenger: Arc<dyn MessagingClient>,
    pub hr: Arc<dyn HrSystem>,
    pub directory: Arc<dyn OrgDirectory>,
    pub clock: Arc<dyn Clock>,
    pub analytics: Arc<dyn AnalyticsRecorder>,
    pub templates: Arc<MessageTemplates>,
}

/// Result of the first HR check for an absence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationDisposition {
    Compliant,
    ReminderRegistered { missing: usize },
    PersonNotInHr,
    CheckDeferred,
    GracePeriodStarted,
}

/// The person, dates and thread an HR check is about. Built from a fresh
/// mention or from a granted approval request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct AbsenceSubject {
    pub person_id: String,
    pub email: String,
    pub message_id: String,
    pub channel_id: String,
    pub dates: Vec<NaiveDate>,
    pub is_remote_work: bool,
}

impl AbsenceSubject {
    fn from_request(request: &ApprovalRequest) -> Self {
        Self {
            person_id: request.requester.person_id.clone(),
            email: request.requester.email.clone(),
            message_id: request.message_id.clone(),
            channel_id: request.channel_id.clone(),
            dates: request.dates.clone(),
            is_remote_work: request.is_remote_work,
        }
    }

    fn date_set(&self) -> BTreeSet<NaiveDate> {
        self.dates.iter().copied().collect()
    }
}

pub struct ComplianceService {
    extractor: DateExtractor,
    intents: IntentDetector,
    claims: MessageClaims,
    approvals: ApprovalWorkflow,
    reconciler: Arc<ReconciliationEngine>,
    reminders: ReminderScheduler,
    verification: VerificationWorkflow,
    notifier: Arc<Notifier>,
    templates: Arc<MessageTemplates>,
    clock: Arc<dyn Clock>,
    analytics: Arc<dyn AnalyticsRecorder>,
    approval_enabled: bool,
    first_contact_mode: FirstContactMode,
    leave_channel_id: String,
    admin_channel_id: Option<String>,
}

impl ComplianceService {
    pub fn build(config: &AppConfig, collaborators: Collaborators) -> Self {
        let Collaborators { store, messenger, hr, directory, clock, analytics, templates } =
            collaborators;
        let admin_channel_id = config.slack.admin_channel_id.clone();

        let notifier = Arc::new(Notifier::new(
            messenger,
            Collection::new(Arc::clone(&store), SENT_MESSAGES),
            Arc::clone(&clock),
            config.scheduler.send_dedup_window_secs,
        ));
        let reconciler = Arc::new(ReconciliationEngine::new(hr, HR_CALL_TIMEOUT));

        Self {
            extractor: DateExtractor::new(&config.extraction),
            intents: IntentDetector,
            claims: MessageClaims::new(
                Collection::new(Arc::clone(&store), CLAIMED_MESSAGES),
                Arc::clone(&clock),
            ),
            approvals: ApprovalWorkflow::new(
                Collection::new(Arc::clone(&store), APPROVAL_REQUESTS),
                directory,
                Arc::clone(&clock),
                config.approval.clone(),
            ),
            reminders: ReminderScheduler::new(
                Collection::new(Arc::clone(&store), REMINDERS),
                Arc::clone(&reconciler),
                Arc::clone(&notifier),
                Arc::clone(&templates),
                Arc::clone(&clock),
                Arc::clone(&analytics),
                config.reminders.clone(),
                admin_channel_id.clone(),
            ),
            verification: VerificationWorkflow::new(
                Collection::new(store, VERIFICATIONS),
                Arc::clone(&reconciler),
                Arc::clone(&notifier),
                Arc::clone(&templates),
                Arc::clone(&clock),
                Arc::clone(&analytics),
                config.verification.clone(),
                admin_channel_id.clone(),
            ),
            reconciler,
            notifier,
            templates,
            clock,
            analytics,
            approval_enabled: config.approval.enabled,
            first_contact_mode: config.verification.first_contact_mode,
            leave_channel_id: config.slack.leave_channel_id.clone(),
            admin_channel_id,
        }
    }

    pub fn approvals(&self) -> &ApprovalWorkflow {
        &self.approvals
    }

    pub fn reminders(&self) -> &ReminderScheduler {
        &self.reminders
    }

    pub fn verification(&self) -> &VerificationWorkflow {
        &self.verification
    }

    /// Runs the first HR check for an absence the person is allowed to take
    /// and sets up whatever follow-up the outcome needs.
    pub(crate) async fn verify_absence(&self, subject: &AbsenceSubject) -> VerificationDisposition {
        let mut context = absence_context(&subject.person_id, subject.is_remote_work, &subject.dates);

        if self.first_contact_mode == FirstContactMode::GracePeriod {
            if let Err(error) = self.verification.start_grace_period(new_verification(subject)).await {
                warn!(
                    event_name = "compliance.verification.not_scheduled",
                    correlation_id = %subject.message_id,
                    person_id = %subject.person_id,
                    error = %error,
                    "grace-period verification could not be stored"
                );
            }
            self.reply(subject, Template::MentionNoted, &context).await;
            return VerificationDisposition::GracePeriodStarted;
        }

        let outcome =
            self.reconciler.reconcile(&subject.email, &subject.date_set(), subject.is_remote_work).await;
        self.record(
            AnalyticsEvent::new(
                AnalyticsCategory::Reconciliation,
                "reconciliation.completed",
                subject.message_id.clone(),
                self.clock.now(),
            )
            .with_person(subject.person_id.clone())
            .with_metadata("outcome", outcome.label()),
        );

        match outcome {
            ReconciliationOutcome::Checked(result) if result.is_found() => {
                self.reply(subject, Template::ComplianceConfirmed, &context).await;
                VerificationDisposition::Compliant
            }
            ReconciliationOutcome::Checked(result) => {
                let template = if result.is_partial() {
                    let matched: Vec<NaiveDate> = result.matched.iter().copied().collect();
                    let missing: Vec<NaiveDate> = result.missing.iter().copied().collect();
                    context.insert("matched", &format_dates(&matched));
                    context.insert("missing", &format_dates(&missing));
                    Template::PartiallyRecorded
                } else {
                    Template::ApplyInHr
                };
                let missing = result.missing.len();
                let registered = self
                    .reminders
                    .register(NewReminder {
                        person_id: subject.person_id.clone(),
                        person_email: subject.email.clone(),
                        message_id: subject.message_id.clone(),
                        channel_id: subject.channel_id.clone(),
                        original_dates: subject.date_set(),
                        missing_dates: result.missing,
                        is_remote_work: subject.is_remote_work,
                    })
                    .await;
                if let Err(error) = registered {
                    warn!(
                        event_name = "compliance.reminder.not_registered",
                        correlation_id = %subject.message_id,
                        person_id = %subject.person_id,
                        error = %error,
                        "reminder record could not be stored"
                    );
                }
                self.reply(subject, template, &context).await;
                VerificationDisposition::ReminderRegistered { missing }
            }
            ReconciliationOutcome::PersonNotFound { email } => {
                context.insert("email", &email);
                self.reply(subject, Template::PersonNotInHr, &context).await;
                VerificationDisposition::PersonNotInHr
            }
            ReconciliationOutcome::Unavailable { .. } => {
                if let Err(error) = self.verification.start_after_outage(new_verification(subject)).await
                {
                    warn!(
                        event_name = "compliance.verification.not_scheduled",
                        correlation_id = %subject.message_id,
                        person_id = %subject.person_id,
                        error = %error,
                        "deferred verification could not be stored"
                    );
                }
                self.reply(subject, Template::CheckDeferred, &context).await;
                VerificationDisposition::CheckDeferred
            }
        }
    }

    pub(crate) fn approval_card(
        &self,
        request: &ApprovalRequest,
        level: usize,
        audience: CardAudience,
        recipient: &str,
    ) -> ApprovalCard {
        let mut context = absence_context(
            &request.requester.person_id,
            request.is_remote_work,
            &request.dates,
        );
        context.insert("requester", &request.requester.name);
        context.insert("days", &request.dates.len());
        context.insert("level", &(level + 1));
        context.insert("levels", &request.chain.len().max(1));

        ApprovalCard {
            request_id: request.id.clone(),
            level,
            audience,
            recipient: recipient.to_owned(),
            requester_name: request.requester.name.clone(),
            requester_person_id: request.requester.person_id.clone(),
            dates_label: format_dates(&request.dates),
            day_count: request.dates.len(),
            leave_type: request.leave_type.as_str().to_owned(),
            is_remote_work: request.is_remote_work,
            summary: self.templates.render(Template::ApprovalCardSummary, &context),
        }
    }

    /// Sends the card for the request's current level to its approver.
    pub(crate) async fn send_current_card(&self, request: &ApprovalRequest) {
        let Some(approver) = request.current_approver() else {
            return;
        };
        let card =
            self.approval_card(request, request.current_level, CardAudience::Approver, &approver.person_id);
        if self.notifier.approval_card(&card).await.is_ok() {
            info!(
                event_name = "approval.card.sent",
                correlation_id = %request.id,
                person_id = %approver.person_id,
                level = request.current_level,
                "approval card delivered"
            );
        }
    }

    pub(crate) async fn direct_to_requester(
        &self,
        request: &ApprovalRequest,
        template: Template,
        extra: &[(&str, String)],
    ) {
        let mut context = absence_context(
            &request.requester.person_id,
            request.is_remote_work,
            &request.dates,
        );
        for (key, value) in extra {
            context.insert(*key, value);
        }
        let text = self.templates.render(template, &context);
        let _ = self.notifier.direct(&request.requester.person_id, &text).await;
    }

    pub(crate) async fn reply(
        &self,
        subject: &AbsenceSubject,
        template: Template,
        context: &tera::Context,
    ) {
        let text = self.templates.render(template, context);
        // Failures are logged by the notifier.
        let _ = self.notifier.reply(&subject.channel_id, &subject.message_id, &text).await;
    }

    pub(crate) fn record(&self, event: AnalyticsEvent) {
        self.analytics.record(event);
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

fn new_verification(subject: &AbsenceSubject) -> NewVerification {
    NewVerification {
        person_id: subject.person_id.clone(),
        person_email: subject.email.clone(),
        message_id: subject.message_id.clone(),
        channel_id: subject.channel_id.clone(),
        dates: subject.dates.clone(),
        is_remote_work: subject.is_remote_work,
    }
}
