use tracing::info;

use super::{AbsenceSubject, ComplianceService, VerificationDisposition};
use crate::analytics::{AnalyticsCategory, AnalyticsEvent};
use crate::domain::approval::{
    ApprovalId, ApprovalProgress, ApprovalRequest, ApprovalStatus, OverrideDecision,
};
use crate::errors::{ApplicationError, DomainError};
use crate::templates::Template;

const DEFAULT_OVERRIDE_REASON: &str = "HR override";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalAction {
    Approve,
    Reject,
    HrApprove,
    HrReject,
}

impl ApprovalAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::HrApprove => "hr_approve",
            Self::HrReject => "hr_reject",
        }
    }
}

/// A button press on an approval card.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub request_id: ApprovalId,
    pub level: usize,
    pub actor: String,
    pub action: ApprovalAction,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecisionOutcome {
    Advanced { next_level: usize },
    Approved(VerificationDisposition),
    Rejected,
    Overridden { status: ApprovalStatus },
    /// Duplicate press; nothing changed.
    Unchanged,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Advanced { .. } => "advanced",
            Self::Approved(_) => "approved",
            Self::Rejected => "rejected",
            Self::Overridden { .. } => "overridden",
            Self::Unchanged => "unchanged",
        }
    }
}

impl ComplianceService {
    pub async fn handle_decision(
        &self,
        decision: ApprovalDecision,
    ) -> Result<DecisionOutcome, ApplicationError> {
        let id = &decision.request_id;
        let outcome = match decision.action {
            ApprovalAction::Approve => {
                let approved = match self.approvals.approve(id, decision.level, &decision.actor).await {
                    Ok(approved) => approved,
                    Err(error) => return Err(self.notify_if_expired(id, error).await),
                };
                match approved.progress {
                    ApprovalProgress::AlreadyApproved => DecisionOutcome::Unchanged,
                    ApprovalProgress::Advanced { next_level } => {
                        self.send_current_card(&approved.request).await;
                        DecisionOutcome::Advanced { next_level }
                    }
                    ApprovalProgress::Completed => {
                        DecisionOutcome::Approved(self.on_granted(&approved.request).await)
                    }
                }
            }
            ApprovalAction::Reject => {
                let rejected = match self
                    .approvals
                    .reject(id, decision.level, &decision.actor, decision.reason.as_deref())
                    .await
                {
                    Ok(rejected) => rejected,
                    Err(error) => return Err(self.notify_if_expired(id, error).await),
                };
                if rejected.changed {
                    self.on_rejected(&rejected.request).await;
                    DecisionOutcome::Rejected
                } else {
                    DecisionOutcome::Unchanged
                }
            }
            ApprovalAction::HrApprove | ApprovalAction::HrReject => {
                let override_decision = if decision.action == ApprovalAction::HrApprove {
                    OverrideDecision::Approve
                } else {
                    OverrideDecision::Reject
                };
                let reason = decision
                    .reason
                    .as_deref()
                    .map(str::trim)
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or(DEFAULT_OVERRIDE_REASON);
                let request =
                    self.approvals.hr_override(id, &decision.actor, override_decision, reason).await?;

                if request.status.is_granted() {
                    self.on_granted(&request).await;
                } else {
                    self.on_rejected(&request).await;
                }
                DecisionOutcome::Overridden { status: request.status }
            }
        };

        info!(
            event_name = "compliance.decision.handled",
            correlation_id = %id,
            person_id = %decision.actor,
            action = decision.action.as_str(),
            outcome = outcome.as_str(),
            "approval decision handled"
        );
        self.record(
            AnalyticsEvent::new(AnalyticsCategory::Approval, "approval.decision", id.to_string(), self.now())
                .with_person(decision.actor.clone())
                .with_metadata("action", decision.action.as_str())
                .with_metadata("outcome", outcome.as_str()),
        );
        Ok(outcome)
    }

    async fn on_granted(&self, request: &ApprovalRequest) -> VerificationDisposition {
        self.direct_to_requester(request, Template::ApprovalGranted, &[]).await;
        self.verify_absence(&AbsenceSubject::from_request(request)).await
    }

    async fn on_rejected(&self, request: &ApprovalRequest) {
        let reason = request.rejection_reason.clone().unwrap_or_default();
        self.direct_to_requester(request, Template::ApprovalRejected, &[("reason", reason)]).await;
    }

    /// A decision that arrived after the timeout expires the request; the
    /// requester hears about it once.
    async fn notify_if_expired(&self, id: &ApprovalId, error: ApplicationError) -> ApplicationError {
        if error == ApplicationError::Domain(DomainError::Expired) {
            if let Some(request) = self.approvals.find(id).await {
                self.direct_to_requester(&request, Template::ApprovalExpired, &[]).await;
            }
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::{ApprovalAction, ApprovalDecision, DecisionOutcome};
    use crate::compliance::fixtures::{config, harness, message, Harness};
    use crate::compliance::{IntakeOutcome, VerificationDisposition};
    use crate::domain::approval::{ApprovalId, ApprovalStatus};
    use crate::errors::{ApplicationError, DomainError};
    use crate::messaging::SentMessage;

    async fn approval_harness() -> Harness {
        let mut config = config();
        config.approval.enabled = true;
        harness(config).await
    }

    async fn submit(h: &Harness, text: &str) -> ApprovalId {
        match h.service.handle_message(&message("171.1", "U0ALICE", text)).await {
            IntakeOutcome::AwaitingApproval { request_id } => request_id,
            other => panic!("expected a pending approval, got {other:?}"),
        }
    }

    fn decision(id: &ApprovalId, level: usize, actor: &str, action: ApprovalAction) -> ApprovalDecision {
        ApprovalDecision {
            request_id: id.clone(),
            level,
            actor: actor.to_owned(),
            action,
            reason: None,
        }
    }

    fn direct_texts(h: &Harness, person: &str) -> Vec<String> {
        h.messenger
            .sent()
            .into_iter()
            .filter_map(|message| match message {
                SentMessage::Direct { person_id, text } if person_id == person => Some(text),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn two_level_chain_forwards_then_verifies() {
        let h = approval_harness().await;
        let id = submit(&h, "on leave 11th to 18th March").await;

        let first = h
            .service
            .handle_decision(decision(&id, 0, "U0BOB", ApprovalAction::Approve))
            .await
            .expect("level 0");
        assert_eq!(first, DecisionOutcome::Advanced { next_level: 1 });
        assert!(h.messenger.sent().iter().any(|message| matches!(
            message,
            SentMessage::Card(card) if card.recipient == "U0CAROL" && card.level == 1
        )));

        let second = h
            .service
            .handle_decision(decision(&id, 1, "U0CAROL", ApprovalAction::Approve))
            .await
            .expect("level 1");
        assert_eq!(
            second,
            DecisionOutcome::Approved(VerificationDisposition::ReminderRegistered { missing: 6 })
        );
        assert!(direct_texts(&h, "U0ALICE").iter().any(|text| text.contains("was approved")));
    }

    #[tokio::test]
    async fn approvals_from_the_wrong_person_are_refused() {
        let h = approval_harness().await;
        let id = submit(&h, "on leave 11th to 13th March").await;

        let error = h
            .service
            .handle_decision(decision(&id, 0, "U0CAROL", ApprovalAction::Approve))
            .await
            .expect_err("not bob");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::ApproverMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_presses_change_nothing() {
        let h = approval_harness().await;
        let id = submit(&h, "on leave 11th to 13th March").await;

        let first = h
            .service
            .handle_decision(decision(&id, 0, "U0BOB", ApprovalAction::Approve))
            .await
            .expect("approve");
        assert!(matches!(first, DecisionOutcome::Approved(_)));

        let again = h
            .service
            .handle_decision(decision(&id, 0, "U0BOB", ApprovalAction::Approve))
            .await
            .expect("duplicate");
        assert_eq!(again, DecisionOutcome::Unchanged);
    }

    #[tokio::test]
    async fn rejection_tells_the_requester_why() {
        let h = approval_harness().await;
        let id = submit(&h, "on leave 11th to 13th March").await;

        let mut reject = decision(&id, 0, "U0BOB", ApprovalAction::Reject);
        reject.reason = Some("release week".to_owned());
        let outcome = h.service.handle_decision(reject).await.expect("reject");

        assert_eq!(outcome, DecisionOutcome::Rejected);
        assert!(direct_texts(&h, "U0ALICE").iter().any(|text| text.ends_with("rejected: release week")));
    }

    #[tokio::test]
    async fn late_decisions_expire_the_request() {
        let h = approval_harness().await;
        let id = submit(&h, "on leave 11th to 13th March").await;

        h.clock.advance(Duration::hours(49));
        let error = h
            .service
            .handle_decision(decision(&id, 0, "U0BOB", ApprovalAction::Approve))
            .await
            .expect_err("expired");

        assert_eq!(error, ApplicationError::Domain(DomainError::Expired));
        let request = h.service.approvals().find(&id).await.expect("request");
        assert_eq!(request.status, ApprovalStatus::Expired);
        assert!(direct_texts(&h, "U0ALICE").iter().any(|text| text.contains("expired")));
    }

    #[tokio::test]
    async fn only_hr_may_override() {
        let h = approval_harness().await;
        let id = submit(&h, "on leave 11th to 13th March").await;

        let refused = h
            .service
            .handle_decision(decision(&id, 0, "U0BOB", ApprovalAction::HrApprove))
            .await
            .expect_err("bob is not HR");
        assert_eq!(refused, ApplicationError::Domain(DomainError::NotHr("U0BOB".to_owned())));

        let outcome = h
            .service
            .handle_decision(decision(&id, 0, "U0HANK", ApprovalAction::HrApprove))
            .await
            .expect("override");
        assert_eq!(outcome, DecisionOutcome::Overridden { status: ApprovalStatus::Approved });

        let request = h.service.approvals().find(&id).await.expect("request");
        let record = request.hr_override.expect("override recorded");
        assert_eq!(record.overridden_by, "U0HANK");
        assert_eq!(record.override_reason, "HR override");
    }
}
