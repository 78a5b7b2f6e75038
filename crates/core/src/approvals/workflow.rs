use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};

use super::org::OrgDirectory;
use super::policy::{ApprovalPolicy, PolicyDecision};
use crate::clock::Clock;
use crate::config::ApprovalConfig;
use crate::domain::approval::{
    ApprovalId, ApprovalLevel, ApprovalProgress, ApprovalRequest, ApprovalStatus,
    OverrideDecision, Requester,
};
use crate::domain::mention::LeaveType;
use crate::errors::{ApplicationError, DomainError, ValidationError};
use crate::locks::KeyedLocks;
use crate::store::Collection;

pub const MAX_REQUESTED_DATES: usize = 365;
pub const MAX_PAST_DAYS: i64 = 7;
pub const MAX_FUTURE_DAYS: i64 = 365;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewApprovalRequest {
    pub requester: Requester,
    pub message_id: String,
    pub channel_id: String,
    pub dates: Vec<NaiveDate>,
    pub leave_type: LeaveType,
    pub is_remote_work: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalOutcome {
    pub request: ApprovalRequest,
    pub progress: ApprovalProgress,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectionOutcome {
    pub request: ApprovalRequest,
    /// `false` when the same approver had already rejected this level.
    pub changed: bool,
}

/// What one timeout sweep did to a pending request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimeoutAction {
    ApproverReminded(ApprovalRequest),
    Escalated(ApprovalRequest),
    Expired(ApprovalRequest),
}

impl TimeoutAction {
    pub fn request(&self) -> &ApprovalRequest {
        match self {
            Self::ApproverReminded(request) | Self::Escalated(request) | Self::Expired(request) => {
                request
            }
        }
    }
}

pub fn validate_new_request(
    input: &NewApprovalRequest,
    today: NaiveDate,
) -> Result<(), ValidationError> {
    let identity_fields = [
        ("requester.person_id", input.requester.person_id.as_str()),
        ("requester.email", input.requester.email.as_str()),
        ("message_id", input.message_id.as_str()),
    ];
    if let Some((field, _)) = identity_fields.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(ValidationError::EmptyField(*field));
    }

    if input.dates.is_empty() || input.dates.len() > MAX_REQUESTED_DATES {
        return Err(ValidationError::DateCount {
            count: input.dates.len(),
            max: MAX_REQUESTED_DATES,
        });
    }

    let earliest = today - Duration::days(MAX_PAST_DAYS);
    let latest = today + Duration::days(MAX_FUTURE_DAYS);
    if let Some(date) = input.dates.iter().find(|date| **date < earliest || **date > latest) {
        return Err(ValidationError::DateOutOfWindow { date: *date, earliest, latest });
    }
    Ok(())
}

/// Owns every approval request. Each mutation runs under the request's key
/// lock and is persisted before the call returns.
pub struct ApprovalWorkflow {
    requests: Collection<ApprovalRequest>,
    directory: Arc<dyn OrgDirectory>,
    clock: Arc<dyn Clock>,
    policy: ApprovalPolicy,
    config: ApprovalConfig,
    locks: KeyedLocks,
}

impl ApprovalWorkflow {
    pub fn new(
        requests: Collection<ApprovalRequest>,
        directory: Arc<dyn OrgDirectory>,
        clock: Arc<dyn Clock>,
        config: ApprovalConfig,
    ) -> Self {
        Self {
            requests,
            directory,
            clock,
            policy: ApprovalPolicy::from_config(&config),
            config,
            locks: KeyedLocks::default(),
        }
    }

    pub fn config(&self) -> &ApprovalConfig {
        &self.config
    }

    pub fn evaluate(&self, days: usize, is_remote_work: bool) -> PolicyDecision {
        self.policy.evaluate(days, is_remote_work)
    }

    pub async fn create(
        &self,
        input: NewApprovalRequest,
    ) -> Result<ApprovalRequest, ApplicationError> {
        let now = self.clock.now();
        validate_new_request(&input, now.date_naive())?;

        let mut dates = input.dates;
        dates.sort_unstable();
        dates.dedup();

        let decision = self.policy.evaluate(dates.len(), input.is_remote_work);
        let chain = if decision.auto_approve {
            Vec::new()
        } else {
            self.directory.approval_chain(&input.requester.email, decision.chain_length).await?
        };

        let id = ApprovalId::generate();
        let auto_approve = chain.is_empty();
        if auto_approve && !decision.auto_approve {
            warn!(
                event_name = "approval.policy.gap",
                correlation_id = %id,
                person_id = %input.requester.person_id,
                rule = decision.rule.as_str(),
                "no approver could be resolved; auto-approving"
            );
        }

        let request = ApprovalRequest {
            id: id.clone(),
            requester: input.requester,
            message_id: input.message_id,
            channel_id: input.channel_id,
            dates,
            leave_type: input.leave_type,
            is_remote_work: input.is_remote_work,
            chain: chain
                .into_iter()
                .enumerate()
                .map(|(position, approver)| ApprovalLevel::new(approver, position))
                .collect(),
            current_level: 0,
            status: if auto_approve { ApprovalStatus::AutoApproved } else { ApprovalStatus::Pending },
            created_at: now,
            updated_at: now,
            decided_at: auto_approve.then_some(now),
            rejection_reason: None,
            hr_override: None,
            approver_reminded_at: None,
            escalated_at: None,
        };

        self.requests.save(&id.0, &request).await?;
        info!(
            event_name = "approval.request.created",
            correlation_id = %id,
            person_id = %request.requester.person_id,
            status = request.status.as_str(),
            rule = decision.rule.as_str(),
            levels = request.chain.len(),
            days = request.dates.len(),
            "approval request created"
        );
        Ok(request)
    }

    pub async fn find(&self, id: &ApprovalId) -> Option<ApprovalRequest> {
        self.requests.load(&id.0).await
    }

    pub async fn approve(
        &self,
        id: &ApprovalId,
        level: usize,
        actor: &str,
    ) -> Result<ApprovalOutcome, ApplicationError> {
        let _guard = self.locks.lock(&id.0).await;
        let mut request = self.load_for_decision(id).await?;
        let now = self.clock.now();

        let progress = request.approve_level(level, actor, now)?;
        if progress == ApprovalProgress::AlreadyApproved {
            debug!(
                event_name = "approval.level.duplicate",
                correlation_id = %id,
                person_id = %actor,
                level,
                "level already approved by this approver"
            );
            return Ok(ApprovalOutcome { request, progress });
        }

        self.requests.save(&id.0, &request).await?;
        info!(
            event_name = "approval.level.approved",
            correlation_id = %id,
            person_id = %actor,
            level,
            status = request.status.as_str(),
            "approval level approved"
        );
        Ok(ApprovalOutcome { request, progress })
    }

    pub async fn reject(
        &self,
        id: &ApprovalId,
        level: usize,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<RejectionOutcome, ApplicationError> {
        let _guard = self.locks.lock(&id.0).await;
        let mut request = self.load_for_decision(id).await?;
        let now = self.clock.now();

        let changed = request.reject_level(level, actor, reason, now)?;
        if changed {
            self.requests.save(&id.0, &request).await?;
            info!(
                event_name = "approval.request.rejected",
                correlation_id = %id,
                person_id = %actor,
                level,
                "approval request rejected"
            );
        }
        Ok(RejectionOutcome { request, changed })
    }

    /// Forces a decision regardless of chain position or state. Only HR
    /// identities may call it.
    pub async fn hr_override(
        &self,
        id: &ApprovalId,
        actor: &str,
        decision: OverrideDecision,
        reason: &str,
    ) -> Result<ApprovalRequest, ApplicationError> {
        if !self.directory.is_hr(actor).await? {
            return Err(DomainError::NotHr(actor.to_owned()).into());
        }

        let _guard = self.locks.lock(&id.0).await;
        let mut request = self
            .requests
            .load(&id.0)
            .await
            .ok_or_else(|| DomainError::ApprovalNotFound(id.clone()))?;
        let previous = request.status;

        request.apply_override(decision, actor, reason, self.clock.now());
        self.requests.save(&id.0, &request).await?;
        info!(
            event_name = "approval.request.overridden",
            correlation_id = %id,
            person_id = %actor,
            from = previous.as_str(),
            to = request.status.as_str(),
            "HR override applied"
        );
        Ok(request)
    }

    /// Loads a request for an approver decision, expiring it first when its
    /// timeout has passed. The expiry is persisted before the decision is
    /// refused.
    async fn load_for_decision(&self, id: &ApprovalId) -> Result<ApprovalRequest, ApplicationError> {
        let mut request = self
            .requests
            .load(&id.0)
            .await
            .ok_or_else(|| DomainError::ApprovalNotFound(id.clone()))?;
        let now = self.clock.now();

        if request.status == ApprovalStatus::Pending
            && request.is_past_timeout(now, self.config.timeout_hours)
        {
            request.expire(now);
            self.requests.save(&id.0, &request).await?;
            info!(
                event_name = "approval.request.expired",
                correlation_id = %id,
                person_id = %request.requester.person_id,
                "approval request expired on access"
            );
            return Err(DomainError::Expired.into());
        }
        Ok(request)
    }

    /// Reminds approvers shortly before the timeout and closes requests that
    /// passed it. A failed write skips that request until the next sweep.
    pub async fn sweep_timeouts(&self) -> Vec<TimeoutAction> {
        let pending =
            self.requests.matching(|request| request.status == ApprovalStatus::Pending).await;
        let mut actions = Vec::new();

        for candidate in pending {
            let id = candidate.id.clone();
            let _guard = self.locks.lock(&id.0).await;
            let Some(mut request) = self.requests.load(&id.0).await else {
                continue;
            };
            if request.status != ApprovalStatus::Pending {
                continue;
            }

            let now = self.clock.now();
            let action = if request.is_past_timeout(now, self.config.timeout_hours) {
                if self.config.escalation_enabled && self.config.auto_escalate_on_timeout {
                    request.escalate(now);
                    TimeoutAction::Escalated(request.clone())
                } else {
                    request.expire(now);
                    TimeoutAction::Expired(request.clone())
                }
            } else if request.approver_reminded_at.is_none()
                && now >= self.reminder_due_at(&request)
            {
                request.approver_reminded_at = Some(now);
                request.updated_at = now;
                TimeoutAction::ApproverReminded(request.clone())
            } else {
                continue;
            };

            if self.requests.save(&id.0, &request).await.is_err() {
                continue;
            }
            info!(
                event_name = "approval.sweep.action",
                correlation_id = %id,
                person_id = %request.requester.person_id,
                status = request.status.as_str(),
                "timeout sweep updated approval request"
            );
            actions.push(action);
        }
        actions
    }

    fn reminder_due_at(&self, request: &ApprovalRequest) -> DateTime<Utc> {
        request.expires_at(self.config.timeout_hours)
            - Duration::hours(i64::from(self.config.reminder_before_timeout_hours))
    }

    /// Removes closed requests older than the retention window.
    pub async fn purge_stale(&self) -> usize {
        let cutoff = self.clock.now() - Duration::days(i64::from(self.config.retention_days));
        let stale = self
            .requests
            .matching(|request| !request.status.is_open() && request.updated_at < cutoff)
            .await;

        let mut purged = 0;
        for request in stale {
            if matches!(self.requests.delete(&request.id.0).await, Ok(true)) {
                purged += 1;
            }
        }
        if purged > 0 {
            info!(event_name = "approval.retention.purged", purged, "purged closed approval requests");
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, NaiveDate};

    use super::{validate_new_request, ApprovalWorkflow, NewApprovalRequest, TimeoutAction};
    use crate::approvals::org::fixtures::hierarchy;
    use crate::clock::FixedClock;
    use crate::config::ApprovalConfig;
    use crate::domain::approval::fixtures::created_at;
    use crate::domain::approval::{
        ApprovalProgress, ApprovalStatus, OverrideDecision, Requester,
    };
    use crate::domain::mention::LeaveType;
    use crate::errors::{ApplicationError, DomainError, ValidationError};
    use crate::store::testing::FlakyStore;
    use crate::store::{Collection, DocumentStore, InMemoryDocumentStore, APPROVAL_REQUESTS};

    fn days(count: u32) -> Vec<NaiveDate> {
        let first = NaiveDate::from_ymd_opt(2024, 3, 11).expect("valid date");
        (0..count).map(|offset| first + Duration::days(i64::from(offset))).collect()
    }

    fn input(count: u32) -> NewApprovalRequest {
        NewApprovalRequest {
            requester: Requester {
                person_id: "U0ALICE".to_owned(),
                email: "alice@example.com".to_owned(),
                name: "Alice".to_owned(),
            },
            message_id: "1710061200.000100".to_owned(),
            channel_id: "C0LEAVE".to_owned(),
            dates: days(count),
            leave_type: LeaveType::FullDay,
            is_remote_work: false,
        }
    }

    fn workflow_on(store: Arc<dyn DocumentStore>, config: ApprovalConfig) -> (ApprovalWorkflow, FixedClock) {
        let clock = FixedClock::new(created_at());
        let workflow = ApprovalWorkflow::new(
            Collection::new(store, APPROVAL_REQUESTS),
            Arc::new(hierarchy()),
            Arc::new(clock.clone()),
            config,
        );
        (workflow, clock)
    }

    fn workflow() -> (ApprovalWorkflow, FixedClock) {
        workflow_on(Arc::new(InMemoryDocumentStore::default()), ApprovalConfig::default())
    }

    #[tokio::test]
    async fn short_absences_are_auto_approved_without_a_chain() {
        let (workflow, _) = workflow();
        let request = workflow.create(input(2)).await.expect("create");

        assert_eq!(request.status, ApprovalStatus::AutoApproved);
        assert!(request.chain.is_empty());
        assert_eq!(request.decided_at, Some(created_at()));
        assert_eq!(workflow.find(&request.id).await, Some(request));
    }

    #[tokio::test]
    async fn two_level_chain_advances_then_completes() {
        let (workflow, _) = workflow();
        let request = workflow.create(input(6)).await.expect("create");
        assert_eq!(request.status, ApprovalStatus::Pending);
        assert_eq!(request.chain.len(), 2);

        let first = workflow.approve(&request.id, 0, "U0BOB").await.expect("first level");
        assert_eq!(first.progress, ApprovalProgress::Advanced { next_level: 1 });

        let out_of_turn = workflow.approve(&request.id, 0, "U0CAROL").await;
        assert!(out_of_turn.is_err());

        let second = workflow.approve(&request.id, 1, "U0CAROL").await.expect("second level");
        assert_eq!(second.progress, ApprovalProgress::Completed);
        assert_eq!(second.request.status, ApprovalStatus::Approved);
        assert_eq!(second.request.current_level, 2);
    }

    #[tokio::test]
    async fn duplicate_approvals_are_idempotent() {
        let (workflow, _) = workflow();
        let request = workflow.create(input(3)).await.expect("create");

        let first = workflow.approve(&request.id, 0, "U0BOB").await.expect("approve");
        let second = workflow.approve(&request.id, 0, "U0BOB").await.expect("approve again");

        assert_eq!(second.progress, ApprovalProgress::AlreadyApproved);
        assert_eq!(first.request, second.request);
        assert_eq!(workflow.find(&request.id).await, Some(first.request));
    }

    #[tokio::test]
    async fn wrong_approver_is_refused() {
        let (workflow, _) = workflow();
        let request = workflow.create(input(3)).await.expect("create");

        let err = workflow.approve(&request.id, 0, "U0MALLORY").await.expect_err("mismatch");
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::ApproverMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn rejection_terminates_the_request() {
        let (workflow, _) = workflow();
        let request = workflow.create(input(6)).await.expect("create");

        let outcome = workflow
            .reject(&request.id, 0, "U0BOB", Some("team offsite that week"))
            .await
            .expect("reject");
        assert!(outcome.changed);
        assert_eq!(outcome.request.status, ApprovalStatus::Rejected);
        assert_eq!(outcome.request.rejection_reason.as_deref(), Some("team offsite that week"));

        let late = workflow.approve(&request.id, 0, "U0BOB").await;
        assert!(matches!(
            late,
            Err(ApplicationError::Domain(DomainError::NotPending(ApprovalStatus::Rejected)))
        ));
    }

    #[tokio::test]
    async fn decisions_after_the_timeout_expire_the_request() {
        let (workflow, clock) = workflow();
        let request = workflow.create(input(3)).await.expect("create");

        clock.advance(Duration::hours(49));
        let err = workflow.approve(&request.id, 0, "U0BOB").await.expect_err("expired");

        assert_eq!(err, ApplicationError::Domain(DomainError::Expired));
        let stored = workflow.find(&request.id).await.expect("persisted");
        assert_eq!(stored.status, ApprovalStatus::Expired);
    }

    #[tokio::test]
    async fn failed_writes_do_not_advance_the_request() {
        let store = Arc::new(FlakyStore::default());
        let (workflow, _) = workflow_on(store.clone(), ApprovalConfig::default());
        let request = workflow.create(input(3)).await.expect("create");

        store.fail_writes(true);
        assert!(matches!(
            workflow.approve(&request.id, 0, "U0BOB").await,
            Err(ApplicationError::Persistence(_))
        ));
        store.fail_writes(false);

        let stored = workflow.find(&request.id).await.expect("still stored");
        assert_eq!(stored.status, ApprovalStatus::Pending);
        assert_eq!(stored.current_level, 0);
    }

    #[tokio::test]
    async fn only_hr_may_override() {
        let (workflow, _) = workflow();
        let request = workflow.create(input(3)).await.expect("create");

        let refused = workflow
            .hr_override(&request.id, "U0BOB", OverrideDecision::Approve, "urgent")
            .await;
        assert!(matches!(refused, Err(ApplicationError::Domain(DomainError::NotHr(_)))));

        let overridden = workflow
            .hr_override(&request.id, "U0HANK", OverrideDecision::Reject, "policy blackout")
            .await
            .expect("override");
        assert_eq!(overridden.status, ApprovalStatus::Rejected);
        assert!(overridden.is_hr_override());
        assert_eq!(overridden.rejection_reason.as_deref(), Some("policy blackout"));
    }

    #[tokio::test]
    async fn sweep_reminds_once_then_escalates_past_the_timeout() {
        let (workflow, clock) = workflow();
        let request = workflow.create(input(3)).await.expect("create");

        clock.advance(Duration::hours(37));
        let actions = workflow.sweep_timeouts().await;
        assert!(matches!(actions.as_slice(), [TimeoutAction::ApproverReminded(_)]));
        assert!(workflow.sweep_timeouts().await.is_empty(), "reminder is sent once");

        clock.advance(Duration::hours(12));
        let actions = workflow.sweep_timeouts().await;
        assert!(matches!(actions.as_slice(), [TimeoutAction::Escalated(_)]));

        let approve = workflow.approve(&request.id, 0, "U0BOB").await;
        assert!(matches!(
            approve,
            Err(ApplicationError::Domain(DomainError::NotPending(ApprovalStatus::Escalated)))
        ));
        let overridden = workflow
            .hr_override(&request.id, "U0HANK", OverrideDecision::Approve, "manager away")
            .await
            .expect("hr override");
        assert_eq!(overridden.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn sweep_expires_when_auto_escalation_is_off() {
        let config = ApprovalConfig { auto_escalate_on_timeout: false, ..ApprovalConfig::default() };
        let (workflow, clock) = workflow_on(Arc::new(InMemoryDocumentStore::default()), config);
        workflow.create(input(3)).await.expect("create");

        clock.advance(Duration::hours(60));
        let actions = workflow.sweep_timeouts().await;
        assert!(matches!(actions.as_slice(), [TimeoutAction::Expired(request)] if request.status == ApprovalStatus::Expired));
    }

    #[tokio::test]
    async fn retention_purges_only_closed_requests() {
        let (workflow, clock) = workflow();
        let closed = workflow.create(input(1)).await.expect("auto approved");
        let open = workflow.create(input(3)).await.expect("pending");

        clock.advance(Duration::days(91));
        assert_eq!(workflow.purge_stale().await, 1);
        assert!(workflow.find(&closed.id).await.is_none());
        assert!(workflow.find(&open.id).await.is_some());
    }

    #[test]
    fn validation_rejects_bad_input_instead_of_auto_approving() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).expect("valid date");

        let mut empty_person = input(1);
        empty_person.requester.person_id = "  ".to_owned();
        assert_eq!(
            validate_new_request(&empty_person, today),
            Err(ValidationError::EmptyField("requester.person_id"))
        );

        let mut no_dates = input(1);
        no_dates.dates.clear();
        assert!(matches!(
            validate_new_request(&no_dates, today),
            Err(ValidationError::DateCount { count: 0, .. })
        ));

        let mut ancient = input(1);
        ancient.dates = vec![NaiveDate::from_ymd_opt(2024, 2, 1).expect("valid date")];
        assert!(matches!(
            validate_new_request(&ancient, today),
            Err(ValidationError::DateOutOfWindow { .. })
        ));
    }
}
