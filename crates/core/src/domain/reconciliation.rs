use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A person as known by the HR system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HrPerson {
    pub id: String,
    pub email: String,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Leave,
    RemoteWork,
}

/// Raw absence record as returned by the HR system. Dates stay as strings
/// because the upstream format varies between record types.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HrRecord {
    pub id: String,
    pub kind: RecordKind,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub date: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerContact {
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub hr_person_id: String,
    pub requested: BTreeSet<NaiveDate>,
    pub matched: BTreeSet<NaiveDate>,
    pub missing: BTreeSet<NaiveDate>,
    pub record_ids: BTreeSet<String>,
    pub years_queried: BTreeSet<i32>,
}

impl ReconciliationResult {
    pub fn is_found(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        !self.matched.is_empty() && !self.missing.is_empty()
    }
}

/// Separates "checked and missing" from "could not check", so an outage
/// never reads as non-compliance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    Checked(ReconciliationResult),
    PersonNotFound { email: String },
    Unavailable { reason: String },
}

impl ReconciliationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Checked(result) if result.is_found() => "found",
            Self::Checked(result) if result.is_partial() => "partial",
            Self::Checked(_) => "missing",
            Self::PersonNotFound { .. } => "person_not_found",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}
