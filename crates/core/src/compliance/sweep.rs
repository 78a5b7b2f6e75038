use tracing::{info, warn};

use super::ComplianceService;
use crate::analytics::{AnalyticsCategory, AnalyticsEvent};
use crate::approvals::TimeoutAction;
use crate::domain::approval::ApprovalRequest;
use crate::messaging::CardAudience;
use crate::reminders::ReminderStep;
use crate::templates::{absence_context, Template};
use crate::verification::VerificationStep;

/// Claimed message ids are kept long enough to outlive any poll window.
pub const CLAIM_RETENTION_DAYS: u32 = 30;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub approval_actions: usize,
    pub reminder_steps: Vec<ReminderStep>,
    pub verification_steps: Vec<VerificationStep>,
    pub purged: usize,
}

impl ComplianceService {
    /// Approval timeouts, due reminders, due verifications, then retention.
    pub async fn sweep(&self) -> SweepReport {
        let actions = self.approvals.sweep_timeouts().await;
        for action in &actions {
            self.handle_timeout(action).await;
        }

        let reminder_steps = self.reminders.run_due().await;
        let verification_steps = self.verification.run_due().await;

        let purged = self.approvals.purge_stale().await
            + self.reminders.purge_stale().await
            + self.verification.purge_stale().await
            + self.notifier.purge_expired().await
            + self.claims.purge_older_than(CLAIM_RETENTION_DAYS).await;

        let report = SweepReport {
            approval_actions: actions.len(),
            reminder_steps,
            verification_steps,
            purged,
        };
        info!(
            event_name = "compliance.sweep.completed",
            correlation_id = "sweep",
            approval_actions = report.approval_actions,
            reminders = report.reminder_steps.len(),
            verifications = report.verification_steps.len(),
            purged = report.purged,
            "sweep completed"
        );
        report
    }

    async fn handle_timeout(&self, action: &TimeoutAction) {
        let request = action.request();
        let event_type = match action {
            TimeoutAction::ApproverReminded(request) => {
                self.remind_approver(request).await;
                "approval.approver_reminded"
            }
            TimeoutAction::Escalated(request) => {
                self.escalate_to_hr(request).await;
                "approval.escalated"
            }
            TimeoutAction::Expired(request) => {
                self.direct_to_requester(request, Template::ApprovalExpired, &[]).await;
                "approval.expired"
            }
        };
        self.record(
            AnalyticsEvent::new(
                AnalyticsCategory::Approval,
                event_type,
                request.id.to_string(),
                self.now(),
            )
            .with_person(request.requester.person_id.clone()),
        );
    }

    async fn remind_approver(&self, request: &ApprovalRequest) {
        let Some(approver) = request.current_approver() else {
            return;
        };
        let hours_left =
            (request.expires_at(self.approvals.config().timeout_hours) - self.now()).num_hours().max(0);

        let mut context =
            absence_context(&request.requester.person_id, request.is_remote_work, &request.dates);
        context.insert("requester", &request.requester.name);
        context.insert("hours", &hours_left);
        let text = self.templates.render(Template::ApproverReminder, &context);
        let _ = self.notifier.direct(&approver.person_id, &text).await;
    }

    async fn escalate_to_hr(&self, request: &ApprovalRequest) {
        let Some(admin_channel) = &self.admin_channel_id else {
            warn!(
                event_name = "approval.escalation.no_channel",
                correlation_id = %request.id,
                person_id = %request.requester.person_id,
                "escalated request has no admin channel to go to"
            );
            return;
        };

        let approver = request
            .chain
            .get(request.current_level)
            .map(|level| level.approver.name.clone())
            .unwrap_or_else(|| "the approver".to_owned());
        let mut context =
            absence_context(&request.requester.person_id, request.is_remote_work, &request.dates);
        context.insert("requester", &request.requester.name);
        context.insert("approver", &approver);

        let text = self.templates.render(Template::ApprovalEscalatedToHr, &context);
        let _ = self.notifier.channel(admin_channel, &text).await;

        let card =
            self.approval_card(request, request.current_level, CardAudience::HrReview, admin_channel);
        let _ = self.notifier.approval_card(&card).await;
    }
}
