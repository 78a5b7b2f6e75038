use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::mention::LeaveType;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    pub fn generate() -> Self {
        Self(format!("apr-{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Escalated,
    Expired,
    AutoApproved,
}

impl ApprovalStatus {
    /// Pending and escalated requests still wait for a decision.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Escalated)
    }

    /// Approved and auto-approved requests let verification proceed.
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Approved | Self::AutoApproved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
            Self::Expired => "expired",
            Self::AutoApproved => "auto_approved",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approver {
    /// Messaging identity; decisions are only accepted from this id.
    pub person_id: String,
    pub email: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLevel {
    pub approver: Approver,
    pub position: usize,
    pub status: LevelStatus,
    pub decided_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

impl ApprovalLevel {
    pub fn new(approver: Approver, position: usize) -> Self {
        Self { approver, position, status: LevelStatus::Pending, decided_at: None, rejection_reason: None }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideDecision {
    Approve,
    Reject,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HrOverride {
    pub decision: OverrideDecision,
    pub overridden_by: String,
    pub override_reason: String,
    pub overridden_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub person_id: String,
    pub email: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub requester: Requester,
    pub message_id: String,
    pub channel_id: String,
    pub dates: Vec<NaiveDate>,
    pub leave_type: LeaveType,
    pub is_remote_work: bool,
    pub chain: Vec<ApprovalLevel>,
    pub current_level: usize,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub hr_override: Option<HrOverride>,
    pub approver_reminded_at: Option<DateTime<Utc>>,
    pub escalated_at: Option<DateTime<Utc>>,
}

/// Result of a successful approve call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalProgress {
    /// The level was already approved by the same actor; nothing changed.
    AlreadyApproved,
    /// The request moved on and now waits for `next_level`.
    Advanced { next_level: usize },
    /// The last level approved; the request is approved.
    Completed,
}

impl ApprovalRequest {
    pub fn is_hr_override(&self) -> bool {
        self.hr_override.is_some()
    }

    pub fn current_approver(&self) -> Option<&Approver> {
        if self.status != ApprovalStatus::Pending {
            return None;
        }
        self.chain.get(self.current_level).map(|level| &level.approver)
    }

    pub fn expires_at(&self, timeout_hours: u32) -> DateTime<Utc> {
        self.created_at + Duration::hours(i64::from(timeout_hours))
    }

    pub fn is_past_timeout(&self, now: DateTime<Utc>, timeout_hours: u32) -> bool {
        now > self.expires_at(timeout_hours)
    }

    pub fn approve_level(
        &mut self,
        level: usize,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<ApprovalProgress, DomainError> {
        if self.already_decided_by(level, actor, LevelStatus::Approved) {
            return Ok(ApprovalProgress::AlreadyApproved);
        }
        self.check_turn(level, actor)?;

        let entry = &mut self.chain[level];
        entry.status = LevelStatus::Approved;
        entry.decided_at = Some(now);
        self.current_level += 1;
        self.updated_at = now;

        if self.current_level == self.chain.len() {
            self.status = ApprovalStatus::Approved;
            self.decided_at = Some(now);
            return Ok(ApprovalProgress::Completed);
        }

        Ok(ApprovalProgress::Advanced { next_level: self.current_level })
    }

    /// Returns `false` when the same actor had already rejected this level.
    pub fn reject_level(
        &mut self,
        level: usize,
        actor: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        if self.already_decided_by(level, actor, LevelStatus::Rejected) {
            return Ok(false);
        }
        self.check_turn(level, actor)?;

        let reason = reason
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .unwrap_or("Rejected by approver")
            .to_owned();

        let entry = &mut self.chain[level];
        entry.status = LevelStatus::Rejected;
        entry.decided_at = Some(now);
        entry.rejection_reason = Some(reason.clone());

        self.status = ApprovalStatus::Rejected;
        self.rejection_reason = Some(reason);
        self.decided_at = Some(now);
        self.updated_at = now;
        Ok(true)
    }

    /// Forces a final decision outside the chain. Level bookkeeping is left
    /// untouched so `current_level` stays monotonic.
    pub fn apply_override(
        &mut self,
        decision: OverrideDecision,
        actor: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        self.status = match decision {
            OverrideDecision::Approve => ApprovalStatus::Approved,
            OverrideDecision::Reject => ApprovalStatus::Rejected,
        };
        if decision == OverrideDecision::Reject {
            self.rejection_reason = Some(reason.to_owned());
        }
        self.hr_override = Some(HrOverride {
            decision,
            overridden_by: actor.to_owned(),
            override_reason: reason.to_owned(),
            overridden_at: now,
        });
        self.decided_at = Some(now);
        self.updated_at = now;
    }

    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.status = ApprovalStatus::Expired;
        self.decided_at = Some(now);
        self.updated_at = now;
    }

    pub fn escalate(&mut self, now: DateTime<Utc>) {
        self.status = ApprovalStatus::Escalated;
        self.escalated_at = Some(now);
        self.updated_at = now;
    }

    fn already_decided_by(&self, level: usize, actor: &str, status: LevelStatus) -> bool {
        self.chain
            .get(level)
            .is_some_and(|entry| entry.status == status && entry.approver.person_id == actor)
    }

    fn check_turn(&self, level: usize, actor: &str) -> Result<(), DomainError> {
        if self.status != ApprovalStatus::Pending {
            return Err(DomainError::NotPending(self.status));
        }
        if level != self.current_level || level >= self.chain.len() {
            return Err(DomainError::LevelOutOfTurn { requested: level, current: self.current_level });
        }
        let expected = &self.chain[level].approver.person_id;
        if expected != actor {
            return Err(DomainError::ApproverMismatch {
                actor: actor.to_owned(),
                expected: expected.clone(),
                level,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};

    use super::{
        ApprovalId, ApprovalLevel, ApprovalRequest, ApprovalStatus, Approver, Requester,
    };
    use crate::domain::mention::LeaveType;

    pub fn approver(id: &str) -> Approver {
        Approver {
            person_id: id.to_owned(),
            email: format!("{}@example.com", id.to_ascii_lowercase()),
            name: id.to_owned(),
        }
    }

    pub fn created_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).single().expect("valid timestamp")
    }

    pub fn pending_request(approvers: &[&str]) -> ApprovalRequest {
        ApprovalRequest {
            id: ApprovalId("apr-test".to_owned()),
            requester: Requester {
                person_id: "U0ALICE".to_owned(),
                email: "alice@example.com".to_owned(),
                name: "Alice".to_owned(),
            },
            message_id: "1710061200.000100".to_owned(),
            channel_id: "C0LEAVE".to_owned(),
            dates: vec![
                NaiveDate::from_ymd_opt(2024, 3, 11).expect("valid date"),
                NaiveDate::from_ymd_opt(2024, 3, 12).expect("valid date"),
                NaiveDate::from_ymd_opt(2024, 3, 13).expect("valid date"),
            ],
            leave_type: LeaveType::FullDay,
            is_remote_work: false,
            chain: approvers
                .iter()
                .enumerate()
                .map(|(position, id)| ApprovalLevel::new(approver(id), position))
                .collect(),
            current_level: 0,
            status: ApprovalStatus::Pending,
            created_at: created_at(),
            updated_at: created_at(),
            decided_at: None,
            rejection_reason: None,
            hr_override: None,
            approver_reminded_at: None,
            escalated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::fixtures::{created_at, pending_request};
    use super::{ApprovalProgress, ApprovalStatus, LevelStatus, OverrideDecision};
    use crate::errors::DomainError;

    #[test]
    fn approving_every_level_completes_the_request() {
        let mut request = pending_request(&["U0MGR", "U0SENIOR"]);
        let now = created_at() + Duration::hours(1);

        let first = request.approve_level(0, "U0MGR", now).expect("first level");
        assert_eq!(first, ApprovalProgress::Advanced { next_level: 1 });
        assert_eq!(request.status, ApprovalStatus::Pending);

        let second = request.approve_level(1, "U0SENIOR", now).expect("second level");
        assert_eq!(second, ApprovalProgress::Completed);
        assert_eq!(request.status, ApprovalStatus::Approved);
        assert_eq!(request.current_level, 2);
        assert_eq!(request.decided_at, Some(now));
    }

    #[test]
    fn duplicate_approval_is_a_no_op() {
        let mut request = pending_request(&["U0MGR"]);
        let now = created_at() + Duration::hours(1);

        request.approve_level(0, "U0MGR", now).expect("first press");
        let snapshot = request.clone();
        let again = request
            .approve_level(0, "U0MGR", now + Duration::minutes(1))
            .expect("second press");

        assert_eq!(again, ApprovalProgress::AlreadyApproved);
        assert_eq!(request, snapshot);
    }

    #[test]
    fn out_of_turn_and_wrong_actor_are_refused() {
        let mut request = pending_request(&["U0MGR", "U0SENIOR"]);
        let now = created_at();

        let skipped = request.approve_level(1, "U0SENIOR", now).expect_err("cannot skip");
        assert!(matches!(skipped, DomainError::LevelOutOfTurn { requested: 1, current: 0 }));

        let wrong = request.approve_level(0, "U0SENIOR", now).expect_err("wrong actor");
        assert!(matches!(wrong, DomainError::ApproverMismatch { level: 0, .. }));
        assert_eq!(request.current_level, 0);
    }

    #[test]
    fn rejection_at_any_level_terminates_with_reason() {
        let mut request = pending_request(&["U0MGR", "U0SENIOR"]);
        let now = created_at();
        request.approve_level(0, "U0MGR", now).expect("first level");

        let changed = request.reject_level(1, "U0SENIOR", None, now).expect("reject");
        assert!(changed);
        assert_eq!(request.status, ApprovalStatus::Rejected);
        assert_eq!(request.rejection_reason.as_deref(), Some("Rejected by approver"));
        assert_eq!(request.chain[1].status, LevelStatus::Rejected);

        let later = request.approve_level(1, "U0SENIOR", now).expect_err("terminal");
        assert!(matches!(later, DomainError::NotPending(ApprovalStatus::Rejected)));
    }

    #[test]
    fn override_forces_a_decision_and_records_who_and_why() {
        let mut request = pending_request(&["U0MGR"]);
        request.expire(created_at() + Duration::hours(49));
        let now = created_at() + Duration::hours(50);

        request.apply_override(OverrideDecision::Approve, "U0HR", "manager on leave", now);

        assert_eq!(request.status, ApprovalStatus::Approved);
        assert!(request.is_hr_override());
        let record = request.hr_override.as_ref().expect("override recorded");
        assert_eq!(record.overridden_by, "U0HR");
        assert_eq!(record.override_reason, "manager on leave");
        assert_eq!(record.overridden_at, now);
        assert_eq!(request.current_level, 0);
    }

    #[test]
    fn timeout_is_strictly_after_the_window() {
        let request = pending_request(&["U0MGR"]);
        assert!(!request.is_past_timeout(created_at() + Duration::hours(48), 48));
        assert!(request.is_past_timeout(created_at() + Duration::hours(49), 48));
    }

    #[test]
    fn serde_round_trip_reproduces_the_request() {
        let mut request = pending_request(&["U0MGR", "U0SENIOR"]);
        request.approve_level(0, "U0MGR", created_at()).expect("approve");

        let encoded = serde_json::to_value(&request).expect("encode");
        let decoded: super::ApprovalRequest = serde_json::from_value(encoded).expect("decode");
        assert_eq!(decoded, request);
    }
}
