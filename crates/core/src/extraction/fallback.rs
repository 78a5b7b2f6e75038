use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use super::calendar::cached;
use super::DateStrategy;
use crate::domain::mention::{ExtractedDates, LeaveType};

const CONFIDENCE: f64 = 0.6;

static ISO: OnceLock<Regex> = OnceLock::new();
static SLASHED: OnceLock<Regex> = OnceLock::new();

/// Last resort: ISO `2024-03-11` and day-first `11/03/2024` dates anywhere in
/// the text.
pub struct NumericDateStrategy;

impl DateStrategy for NumericDateStrategy {
    fn name(&self) -> &'static str {
        "numeric"
    }

    fn extract(&self, text: &str, _today: NaiveDate) -> Option<ExtractedDates> {
        let iso = cached(&ISO, r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b");
        let slashed = cached(&SLASHED, r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b");

        let mut dates: Vec<NaiveDate> = iso
            .captures_iter(text)
            .filter_map(|captures| {
                let year = captures.get(1)?.as_str().parse().ok()?;
                let month = captures.get(2)?.as_str().parse().ok()?;
                let day = captures.get(3)?.as_str().parse().ok()?;
                NaiveDate::from_ymd_opt(year, month, day)
            })
            .collect();

        dates.extend(slashed.captures_iter(text).filter_map(|captures| {
            let day = captures.get(1)?.as_str().parse().ok()?;
            let month = captures.get(2)?.as_str().parse().ok()?;
            let year = captures.get(3)?.as_str().parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        }));

        if dates.is_empty() {
            return None;
        }
        Some(ExtractedDates {
            dates,
            range: None,
            leave_type: LeaveType::FullDay,
            confidence: CONFIDENCE,
            strategy: "numeric",
        })
    }
}
