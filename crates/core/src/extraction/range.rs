use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::{Captures, Regex};

use super::calendar::{self, cached, MONTH_ALTERNATION, ORDINAL_SUFFIX};
use super::DateStrategy;
use crate::domain::mention::{DateRange, ExtractedDates, LeaveType};

const CONFIDENCE: f64 = 0.95;
const SEPARATOR: &str = r"\s*(?:to|till|until|through|-|–)\s*";

static DAY_FIRST: OnceLock<Regex> = OnceLock::new();
static MONTH_FIRST: OnceLock<Regex> = OnceLock::new();
static DAY_ONLY: OnceLock<Regex> = OnceLock::new();

/// "A to B" and "A - B" ranges. Patterns run most specific first so a dated
/// range is never swallowed by the bare day-number form.
pub struct RangeStrategy {
    max_range_days: u32,
    working_days_only: bool,
}

struct RangeParts {
    start_day: u32,
    start_month: Option<u32>,
    start_year: Option<i32>,
    end_day: u32,
    end_month: Option<u32>,
    end_year: Option<i32>,
}

impl RangeStrategy {
    pub fn new(max_range_days: u32, working_days_only: bool) -> Self {
        Self { max_range_days, working_days_only }
    }

    fn day_first() -> &'static Regex {
        cached(
            &DAY_FIRST,
            &format!(
                r"\b(\d{{1,2}}){ORDINAL_SUFFIX}\s+(?:of\s+)?({MONTH_ALTERNATION})\b\.?,?(?:\s+(\d{{4}}))?{SEPARATOR}(\d{{1,2}}){ORDINAL_SUFFIX}(?:\s+(?:of\s+)?({MONTH_ALTERNATION})\b\.?)?(?:,?\s+(\d{{4}}))?"
            ),
        )
    }

    fn month_first() -> &'static Regex {
        cached(
            &MONTH_FIRST,
            &format!(
                r"\b({MONTH_ALTERNATION})\b\.?\s+(\d{{1,2}}){ORDINAL_SUFFIX},?(?:\s+(\d{{4}}))?{SEPARATOR}(?:({MONTH_ALTERNATION})\b\.?\s+)?(\d{{1,2}}){ORDINAL_SUFFIX}\b(?:,?\s+(\d{{4}}))?"
            ),
        )
    }

    fn day_only() -> &'static Regex {
        cached(
            &DAY_ONLY,
            &format!(
                r"(\d{{1,2}}){ORDINAL_SUFFIX}{SEPARATOR}(\d{{1,2}}){ORDINAL_SUFFIX}(?:\s+(?:of\s+)?({MONTH_ALTERNATION})\b)?"
            ),
        )
    }

    fn resolve(&self, parts: RangeParts, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        let start_month = parts.start_month.or(parts.end_month);
        let Some(start_month) = start_month else {
            // Bare day numbers read as the current month.
            let start = NaiveDate::from_ymd_opt(today.year(), today.month(), parts.start_day)?;
            let mut end = NaiveDate::from_ymd_opt(today.year(), today.month(), parts.end_day)?;
            if end < start {
                end = calendar::add_one_month(end)?;
            }
            return Some((start, end));
        };

        let explicit_year = parts.start_year.or(parts.end_year);
        let year = explicit_year.unwrap_or_else(|| today.year());
        let (mut start, mut end) = build(year, start_month, &parts)?;

        if explicit_year.is_none() && end < today {
            (start, end) = build(year + 1, start_month, &parts)?;
        }
        Some((start, end))
    }

    fn from_captures(&self, captures: &Captures<'_>, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        let parts = parts_from(captures)?;
        let (start, end) = self.resolve(parts, today)?;
        let span_days = (end - start).num_days() + 1;
        if span_days < 1 || span_days > i64::from(self.max_range_days) {
            return None;
        }
        Some((start, end))
    }
}

fn build(year: i32, start_month: u32, parts: &RangeParts) -> Option<(NaiveDate, NaiveDate)> {
    let mut start =
        NaiveDate::from_ymd_opt(parts.start_year.unwrap_or(year), start_month, parts.start_day)?;
    let end_month = parts.end_month.unwrap_or(start_month);
    let end_year = parts.end_year.unwrap_or(start.year());
    let mut end = NaiveDate::from_ymd_opt(end_year, end_month, parts.end_day)?;

    if end < start && parts.start_month.is_none() {
        // "28th to 2nd april": the trailing month belongs to the end.
        start = calendar::sub_one_month(start)?;
    } else if end < start {
        end = match (parts.end_month, parts.end_year) {
            // "28th dec to 3rd jan" crosses a year boundary.
            (Some(_), None) => NaiveDate::from_ymd_opt(end.year() + 1, end.month(), end.day())?,
            (None, _) => calendar::add_one_month(end)?,
            (Some(_), Some(_)) => return None,
        };
    }
    Some((start, end))
}

/// Groups are numbered per pattern; the slot layout is identified by the
/// number of capture groups each pattern declares.
fn parts_from(captures: &Captures<'_>) -> Option<RangeParts> {
    let number = |index: usize| captures.get(index).and_then(|m| m.as_str().parse::<u32>().ok());
    let month = |index: usize| captures.get(index).and_then(|m| calendar::month_number(m.as_str()));
    let year = |index: usize| calendar::parse_year(captures.get(index).map(|m| m.as_str()));

    let first = captures.get(1)?.as_str();
    if calendar::month_number(first).is_some() && first.parse::<u32>().is_err() {
        // month-first layout: month, day, year, month?, day, year?
        return Some(RangeParts {
            start_day: number(2)?,
            start_month: month(1),
            start_year: year(3),
            end_day: number(5)?,
            end_month: month(4),
            end_year: year(6),
        });
    }

    if captures.len() == 7 {
        // day-first layout: day, month, year?, day, month?, year?
        return Some(RangeParts {
            start_day: number(1)?,
            start_month: month(2),
            start_year: year(3),
            end_day: number(4)?,
            end_month: month(5),
            end_year: year(6),
        });
    }

    // day-only layout: day, day, trailing month?
    Some(RangeParts {
        start_day: number(1)?,
        start_month: None,
        start_year: None,
        end_day: number(2)?,
        end_month: month(3),
        end_year: None,
    })
}

/// The bare day-number form must not start or end inside a longer number,
/// an ISO or slashed date, or a clock time.
fn is_isolated(text: &str, start: usize, end: usize) -> bool {
    let blocked = |c: char| c.is_ascii_digit() || matches!(c, '-' | '/' | ':' | '.');
    let before_ok = text[..start].chars().next_back().map_or(true, |c| !blocked(c));
    let after = &text[end..];
    let after_ok = after.chars().next().map_or(true, |c| !blocked(c));
    let trimmed = after.trim_start();
    let clock_suffix = trimmed.starts_with("am") || trimmed.starts_with("pm");
    before_ok && after_ok && !clock_suffix
}

impl DateStrategy for RangeStrategy {
    fn name(&self) -> &'static str {
        "range"
    }

    fn extract(&self, text: &str, today: NaiveDate) -> Option<ExtractedDates> {
        let patterns = [Self::day_first(), Self::month_first(), Self::day_only()];

        for (index, pattern) in patterns.into_iter().enumerate() {
            let bare_days = index == 2;
            for captures in pattern.captures_iter(text) {
                let Some(whole) = captures.get(0) else {
                    continue;
                };
                if bare_days && !is_isolated(text, whole.start(), whole.end()) {
                    continue;
                }
                let Some((start, end)) = self.from_captures(&captures, today) else {
                    continue;
                };

                let dates = calendar::span(start, end, self.working_days_only);
                if dates.is_empty() {
                    continue;
                }
                return Some(ExtractedDates {
                    dates,
                    range: Some(DateRange { start, end }),
                    leave_type: LeaveType::FullDay,
                    confidence: CONFIDENCE,
                    strategy: "range",
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::RangeStrategy;
    use crate::domain::mention::DateRange;
    use crate::extraction::DateStrategy;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn today() -> NaiveDate {
        date(2024, 3, 10)
    }

    fn range_of(text: &str) -> Option<DateRange> {
        RangeStrategy::new(90, true).extract(text, today()).and_then(|found| found.range)
    }

    #[test]
    fn full_dates_with_years_are_taken_verbatim() {
        let range = range_of("23rd feb 2026 to 25th feb 2026").expect("range");
        assert_eq!(range, DateRange { start: date(2026, 2, 23), end: date(2026, 2, 25) });
    }

    #[test]
    fn end_without_month_inherits_the_start_month() {
        let range = range_of("off from 12th march to 15th").expect("range");
        assert_eq!(range, DateRange { start: date(2024, 3, 12), end: date(2024, 3, 15) });
    }

    #[test]
    fn month_first_ranges_cross_month_boundaries() {
        let range = range_of("march 28 - april 2").expect("range");
        assert_eq!(range, DateRange { start: date(2024, 3, 28), end: date(2024, 4, 2) });
    }

    #[test]
    fn bare_day_range_with_trailing_month() {
        let range = range_of("away 18-20 march").expect("range");
        assert_eq!(range, DateRange { start: date(2024, 3, 18), end: date(2024, 3, 20) });
    }

    #[test]
    fn trailing_month_belongs_to_the_end_of_a_bare_range() {
        let range = range_of("off 28th to 2nd april").expect("range");
        assert_eq!(range, DateRange { start: date(2024, 3, 28), end: date(2024, 4, 2) });
    }

    #[test]
    fn bare_day_end_before_start_moves_to_next_month() {
        let range = range_of("out 28th to 2nd").expect("range");
        assert_eq!(range, DateRange { start: date(2024, 3, 28), end: date(2024, 4, 2) });
    }

    #[test]
    fn year_boundary_with_explicit_months() {
        let range = range_of("28th dec to 3rd jan").expect("range");
        assert_eq!(range, DateRange { start: date(2024, 12, 28), end: date(2025, 1, 3) });
    }

    #[test]
    fn past_ranges_without_a_year_roll_forward() {
        let range = range_of("1st feb to 3rd feb").expect("range");
        assert_eq!(range, DateRange { start: date(2025, 2, 1), end: date(2025, 2, 3) });
    }

    #[test]
    fn weekends_are_dropped_from_working_day_ranges() {
        let found = RangeStrategy::new(90, true)
            .extract("15th march to 18th march", today())
            .expect("range");
        assert_eq!(found.dates, vec![date(2024, 3, 15), date(2024, 3, 18)]);
    }

    #[test]
    fn oversized_spans_are_rejected() {
        assert!(range_of("1st april to 30th september").is_none());
    }

    #[test]
    fn iso_dates_and_clock_times_are_not_day_ranges() {
        assert!(range_of("2024-03-11").is_none());
        assert!(range_of("in a call 10-12am").is_none());
        assert!(range_of("meeting 10:00-11:30").is_none());
    }
}
