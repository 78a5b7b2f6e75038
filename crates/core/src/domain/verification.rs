use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Detected,
    GracePeriod,
    PendingVerification,
    Verified,
    NotFound,
    ReminderSent,
    Escalated,
    Resolved,
}

impl VerificationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::Escalated | Self::Resolved)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Verified,
    Partial,
    NotFound,
    PersonNotFound,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckEntry {
    pub checked_at: DateTime<Utc>,
    pub outcome: CheckOutcome,
    pub missing: Vec<NaiveDate>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub from: VerificationState,
    pub to: VerificationState,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub key: String,
    pub person_id: String,
    pub person_email: String,
    pub message_id: String,
    pub channel_id: String,
    pub dates: Vec<NaiveDate>,
    pub is_remote_work: bool,
    pub state: VerificationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub grace_until: DateTime<Utc>,
    pub next_check_at: Option<DateTime<Utc>>,
    pub checks_performed: u32,
    pub check_history: Vec<CheckEntry>,
    pub state_history: Vec<StateChange>,
}

impl VerificationRecord {
    pub fn transition(&mut self, to: VerificationState, now: DateTime<Utc>) {
        if self.state == to {
            return;
        }
        self.state_history.push(StateChange { from: self.state, to, at: now });
        self.state = to;
        self.updated_at = now;
    }
}
