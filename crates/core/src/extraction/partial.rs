use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use super::calendar::cached;
use super::DateStrategy;
use crate::domain::mention::{ExtractedDates, LeaveType};

const CONFIDENCE: f64 = 0.9;

static HALF_DAY: OnceLock<Regex> = OnceLock::new();
static MORNING: OnceLock<Regex> = OnceLock::new();
static AFTERNOON: OnceLock<Regex> = OnceLock::new();
static GREETING: OnceLock<Regex> = OnceLock::new();
static HOURS: OnceLock<Regex> = OnceLock::new();

/// Half-day, morning, afternoon and hour-range markers. A marker only sets
/// the leave type; the calendar date comes from the anchor strategies.
pub struct PartialDayStrategy {
    anchors: Vec<Box<dyn DateStrategy>>,
}

impl PartialDayStrategy {
    pub fn new(anchors: Vec<Box<dyn DateStrategy>>) -> Self {
        Self { anchors }
    }
}

pub fn detect(text: &str) -> Option<LeaveType> {
    if cached(&HALF_DAY, r"half\s*(?:a\s+)?day|1/2\s*day").is_match(text) {
        return Some(LeaveType::HalfDay);
    }

    let without_greetings = cached(&GREETING, r"\bgood\s+(?:morning|afternoon)\b").replace_all(text, "");
    let morning = cached(&MORNING, r"\b(?:morning|forenoon|first\s*half)\b");
    let afternoon = cached(&AFTERNOON, r"\b(?:afternoon|second\s*half|post\s*lunch)\b");
    if morning.is_match(&without_greetings) || afternoon.is_match(&without_greetings) {
        return Some(LeaveType::HalfDay);
    }

    let hours = cached(
        &HOURS,
        r"\b(\d{1,2})(:\d{2})?\s*(am|pm)?\s*(?:to|-|–)\s*(\d{1,2})(:\d{2})?\s*(am|pm)?",
    );
    let is_clock = hours.captures_iter(text).any(|captures| {
        [2, 3, 5, 6].into_iter().any(|index| captures.get(index).is_some())
    });
    is_clock.then_some(LeaveType::Hourly)
}

impl DateStrategy for PartialDayStrategy {
    fn name(&self) -> &'static str {
        "partial_day"
    }

    fn extract(&self, text: &str, today: NaiveDate) -> Option<ExtractedDates> {
        let leave_type = detect(text)?;
        let anchor = self
            .anchors
            .iter()
            .filter_map(|strategy| strategy.extract(text, today))
            .find(|found| !found.dates.is_empty())?;

        Some(ExtractedDates {
            dates: anchor.dates,
            range: None,
            leave_type,
            confidence: CONFIDENCE,
            strategy: "partial_day",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::detect;
    use crate::domain::mention::LeaveType;

    #[test]
    fn recognises_partial_markers() {
        assert_eq!(detect("half day on friday"), Some(LeaveType::HalfDay));
        assert_eq!(detect("off in the afternoon"), Some(LeaveType::HalfDay));
        assert_eq!(detect("out 14:00-17:00 tomorrow"), Some(LeaveType::Hourly));
        assert_eq!(detect("out 2 to 4pm"), Some(LeaveType::Hourly));
    }

    #[test]
    fn greetings_and_plain_numbers_are_not_markers() {
        assert_eq!(detect("good morning, off tomorrow"), None);
        assert_eq!(detect("off 12 to 15 march"), None);
    }
}
