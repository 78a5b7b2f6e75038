use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveType {
    FullDay,
    HalfDay,
    Hourly,
}

impl LeaveType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullDay => "full_day",
            Self::HalfDay => "half_day",
            Self::Hourly => "hourly",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Output of the date extractor for one piece of text.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedDates {
    pub dates: Vec<NaiveDate>,
    pub range: Option<DateRange>,
    pub leave_type: LeaveType,
    pub confidence: f64,
    /// Name of the strategy that produced the dates, `none` when nothing matched.
    pub strategy: &'static str,
}

impl ExtractedDates {
    pub fn empty() -> Self {
        Self {
            dates: Vec::new(),
            range: None,
            leave_type: LeaveType::FullDay,
            confidence: 0.0,
            strategy: "none",
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// A detected statement of absence. Built once from an inbound message and
/// never mutated afterwards, so the fields are only reachable through getters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AbsenceMention {
    message_id: String,
    channel_id: String,
    person_id: String,
    text: String,
    dates: Vec<NaiveDate>,
    leave_type: LeaveType,
    is_remote_work: bool,
    already_applied: bool,
    confidence: f64,
    detected_at: DateTime<Utc>,
}

pub struct MentionSource<'a> {
    pub message_id: &'a str,
    pub channel_id: &'a str,
    pub person_id: &'a str,
    pub text: &'a str,
}

impl AbsenceMention {
    pub fn new(
        source: MentionSource<'_>,
        extracted: &ExtractedDates,
        is_remote_work: bool,
        already_applied: bool,
        detected_at: DateTime<Utc>,
    ) -> Self {
        let mut dates = extracted.dates.clone();
        dates.sort_unstable();
        dates.dedup();

        Self {
            message_id: source.message_id.to_owned(),
            channel_id: source.channel_id.to_owned(),
            person_id: source.person_id.to_owned(),
            text: source.text.to_owned(),
            dates,
            leave_type: extracted.leave_type,
            is_remote_work,
            already_applied,
            confidence: extracted.confidence,
            detected_at,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn person_id(&self) -> &str {
        &self.person_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn leave_type(&self) -> LeaveType {
        self.leave_type
    }

    pub fn is_remote_work(&self) -> bool {
        self.is_remote_work
    }

    pub fn already_applied(&self) -> bool {
        self.already_applied
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }
}
