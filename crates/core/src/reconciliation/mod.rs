//! Matches requested absence dates against HR records.

pub mod hr;

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Datelike, Duration, NaiveDate};
use tracing::{debug, info, warn};

use crate::domain::reconciliation::{
    HrRecord, ManagerContact, ReconciliationOutcome, ReconciliationResult,
};
use crate::errors::IntegrationError;

pub use hr::{HrSystem, InMemoryHrSystem, RecordQuery, UnavailableHrSystem};

/// Padding around the requested dates when querying one calendar year.
pub const WINDOW_PADDING_DAYS: i64 = 30;

const RECORD_DATE_FORMATS: &[&str] = &["%d-%b-%Y", "%Y-%m-%d", "%d/%m/%Y"];

pub struct ReconciliationEngine {
    hr: Arc<dyn HrSystem>,
    call_timeout: StdDuration,
}

/// Parses one HR date string; `None` for formats we do not know.
pub fn parse_record_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    RECORD_DATE_FORMATS.iter().find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

/// Inclusive span covered by a record, or `None` when it cannot be parsed.
/// A present but unreadable `from_date`/`to_date` voids the whole record;
/// `date` is only consulted when both are absent.
pub fn record_span(record: &HrRecord) -> Option<(NaiveDate, NaiveDate)> {
    let from = parse_present(record.from_date.as_deref())?;
    let to = parse_present(record.to_date.as_deref())?;

    let (from, to) = match (from, to) {
        (Some(from), Some(to)) => (from, to),
        (Some(single), None) | (None, Some(single)) => (single, single),
        (None, None) => {
            let single = parse_record_date(record.date.as_deref()?)?;
            (single, single)
        }
    };
    (from <= to).then_some((from, to))
}

/// `Some(None)` for an absent field, `None` for one that does not parse.
fn parse_present(raw: Option<&str>) -> Option<Option<NaiveDate>> {
    match raw {
        None => Some(None),
        Some(raw) => parse_record_date(raw).map(Some),
    }
}

/// Query window for the dates of one calendar year, clamped to that year.
pub fn year_window(year: i32, dates: &[NaiveDate]) -> Option<(NaiveDate, NaiveDate)> {
    let min = dates.iter().min()?;
    let max = dates.iter().max()?;
    let first_of_year = NaiveDate::from_ymd_opt(year, 1, 1)?;
    let last_of_year = NaiveDate::from_ymd_opt(year, 12, 31)?;

    let from = (*min - Duration::days(WINDOW_PADDING_DAYS)).max(first_of_year);
    let to = (*max + Duration::days(WINDOW_PADDING_DAYS)).min(last_of_year);
    Some((from, to))
}

impl ReconciliationEngine {
    pub fn new(hr: Arc<dyn HrSystem>, call_timeout: StdDuration) -> Self {
        Self { hr, call_timeout }
    }

    pub fn hr(&self) -> &Arc<dyn HrSystem> {
        &self.hr
    }

    pub async fn reconcile(
        &self,
        email: &str,
        dates: &BTreeSet<NaiveDate>,
        is_remote_work: bool,
    ) -> ReconciliationOutcome {
        let person = match self.bounded(self.hr.find_person(email)).await {
            Ok(Some(person)) => person,
            Ok(None) => {
                info!(
                    event_name = "reconciliation.person.not_found",
                    correlation_id = %email,
                    "person is not known to the HR system"
                );
                return ReconciliationOutcome::PersonNotFound { email: email.to_owned() };
            }
            Err(error) => return self.unavailable(email, error),
        };

        let mut by_year: BTreeMap<i32, Vec<NaiveDate>> = BTreeMap::new();
        for date in dates {
            by_year.entry(date.year()).or_default().push(*date);
        }

        let mut records = Vec::new();
        for (year, year_dates) in &by_year {
            let Some((from, to)) = year_window(*year, year_dates) else {
                continue;
            };

            match self.bounded(self.hr.absence_records(&person.id, from, to)).await {
                Ok(found) => records.extend(found),
                Err(error) => return self.unavailable(email, error),
            }
            if is_remote_work {
                match self.bounded(self.hr.remote_work_records(&person.id, from, to)).await {
                    Ok(found) => records.extend(found),
                    Err(error) => return self.unavailable(email, error),
                }
            }
        }

        let spans: Vec<(&HrRecord, NaiveDate, NaiveDate)> = records
            .iter()
            .filter_map(|record| match record_span(record) {
                Some((from, to)) => Some((record, from, to)),
                None => {
                    debug!(
                        event_name = "reconciliation.record.skipped",
                        correlation_id = %email,
                        record_id = %record.id,
                        "record dates could not be parsed"
                    );
                    None
                }
            })
            .collect();

        let mut result = ReconciliationResult {
            hr_person_id: person.id.clone(),
            requested: dates.clone(),
            matched: BTreeSet::new(),
            missing: BTreeSet::new(),
            record_ids: BTreeSet::new(),
            years_queried: by_year.keys().copied().collect(),
        };

        for date in dates {
            let covering: Vec<&str> = spans
                .iter()
                .filter(|(_, from, to)| from <= date && date <= to)
                .map(|(record, _, _)| record.id.as_str())
                .collect();

            if covering.is_empty() {
                result.missing.insert(*date);
            } else {
                result.matched.insert(*date);
                result.record_ids.extend(covering.into_iter().map(str::to_owned));
            }
        }

        info!(
            event_name = "reconciliation.completed",
            correlation_id = %email,
            matched = result.matched.len(),
            missing = result.missing.len(),
            years = result.years_queried.len(),
            "reconciled requested dates against HR records"
        );
        ReconciliationOutcome::Checked(result)
    }

    /// Reporting manager from the HR record. Lookup failures read as unknown.
    pub async fn manager_of(&self, email: &str) -> Option<ManagerContact> {
        match self.bounded(self.hr.manager_of(email)).await {
            Ok(manager) => manager,
            Err(error) => {
                warn!(
                    event_name = "reconciliation.manager.unavailable",
                    correlation_id = %email,
                    error = %error,
                    "manager lookup failed"
                );
                None
            }
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, IntegrationError>>,
    ) -> Result<T, IntegrationError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(IntegrationError::Timeout { service: "hr" }),
        }
    }

    fn unavailable(&self, email: &str, error: IntegrationError) -> ReconciliationOutcome {
        warn!(
            event_name = "reconciliation.hr.unavailable",
            correlation_id = %email,
            error = %error,
            "HR system could not be checked; result is unknown"
        );
        ReconciliationOutcome::Unavailable { reason: error.to_string() }
    }
}
