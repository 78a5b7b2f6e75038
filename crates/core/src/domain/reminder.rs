use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    None,
    Level1,
    Level2,
    Level3,
    Resolved,
}

impl EscalationLevel {
    /// Next send level, or `None` once the ladder is exhausted.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::None => Some(Self::Level1),
            Self::Level1 => Some(Self::Level2),
            Self::Level2 => Some(Self::Level3),
            Self::Level3 | Self::Resolved => None,
        }
    }

    /// Zero-based index into the configured hour offsets.
    pub fn offset_index(self) -> Option<usize> {
        match self {
            Self::Level1 => Some(0),
            Self::Level2 => Some(1),
            Self::Level3 => Some(2),
            Self::None | Self::Resolved => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Level1 => "level1",
            Self::Level2 => "level2",
            Self::Level3 => "level3",
            Self::Resolved => "resolved",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    Escalation,
    Progress,
    Resolution,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderHistoryEntry {
    pub level: EscalationLevel,
    pub kind: ReminderKind,
    pub sent_at: DateTime<Utc>,
    pub action: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderRecord {
    pub key: String,
    pub person_id: String,
    pub person_email: String,
    pub message_id: String,
    pub channel_id: String,
    pub original_dates: BTreeSet<NaiveDate>,
    pub outstanding_dates: BTreeSet<NaiveDate>,
    pub is_remote_work: bool,
    pub level: EscalationLevel,
    pub history: Vec<ReminderHistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_due: Option<DateTime<Utc>>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ReminderRecord {
    pub fn key_for(person_id: &str, message_id: &str) -> String {
        format!("{person_id}_{message_id}")
    }

    /// Read from history, never from `level`, so a restart between the send
    /// and the level write cannot produce a second urgent reminder.
    pub fn level3_sent(&self) -> bool {
        self.history.iter().any(|entry| {
            entry.level == EscalationLevel::Level3 && entry.kind == ReminderKind::Escalation
        })
    }

    pub fn hours_since_creation(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_hours()
    }

    /// Offsets are measured from creation, not from the previous send.
    pub fn due_at(&self, offset_hours: u32) -> DateTime<Utc> {
        self.created_at + Duration::hours(i64::from(offset_hours))
    }

    pub fn push_history(
        &mut self,
        level: EscalationLevel,
        kind: ReminderKind,
        now: DateTime<Utc>,
        action: impl Into<String>,
    ) {
        self.history.push(ReminderHistoryEntry { level, kind, sent_at: now, action: action.into() });
        self.updated_at = now;
    }

    pub fn mark_resolved(&mut self, now: DateTime<Utc>) {
        self.resolved = true;
        self.resolved_at = Some(now);
        self.level = EscalationLevel::Resolved;
        self.outstanding_dates.clear();
        self.next_due = None;
        self.updated_at = now;
    }
}
