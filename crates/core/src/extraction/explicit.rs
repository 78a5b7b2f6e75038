use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use super::calendar::{self, cached, MONTH_ALTERNATION, ORDINAL_SUFFIX};
use super::DateStrategy;
use crate::domain::mention::{ExtractedDates, LeaveType};

const CONFIDENCE: f64 = 0.8;

static MONTH_WORD: OnceLock<Regex> = OnceLock::new();
static DAY_NUMBER: OnceLock<Regex> = OnceLock::new();
static YEAR_AFTER_MONTH: OnceLock<Regex> = OnceLock::new();
static SINGLE: OnceLock<Regex> = OnceLock::new();
static WEEKDAY: OnceLock<Regex> = OnceLock::new();

fn found(dates: Vec<NaiveDate>, strategy: &'static str) -> Option<ExtractedDates> {
    if dates.is_empty() {
        return None;
    }
    Some(ExtractedDates {
        dates,
        range: None,
        leave_type: LeaveType::FullDay,
        confidence: CONFIDENCE,
        strategy,
    })
}

/// "2nd, 3rd and 6th March". Each month name only claims the day numbers
/// written between it and the previous month name, so "5th march and 2nd
/// april" pairs each day with its own month.
pub struct DateListStrategy;

impl DateStrategy for DateListStrategy {
    fn name(&self) -> &'static str {
        "date_list"
    }

    fn extract(&self, text: &str, today: NaiveDate) -> Option<ExtractedDates> {
        let month_word = cached(&MONTH_WORD, &format!(r"\b({MONTH_ALTERNATION})\b"));
        let day_number = cached(&DAY_NUMBER, &format!(r"\b(\d{{1,2}}){ORDINAL_SUFFIX}\b"));
        let year_after = cached(&YEAR_AFTER_MONTH, r"^\s*,?\s*(\d{4})\b");

        let mut dates = Vec::new();
        let mut segment_start = 0;

        for month_match in month_word.find_iter(text) {
            let segment = &text[segment_start..month_match.start()];
            segment_start = month_match.end();

            let Some(month) = calendar::month_number(month_match.as_str()) else {
                continue;
            };
            let explicit_year = year_after
                .captures(&text[month_match.end()..])
                .and_then(|captures| calendar::parse_year(captures.get(1).map(|m| m.as_str())));

            for captures in day_number.captures_iter(segment) {
                let Some(day) = captures.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else {
                    continue;
                };
                let date = match explicit_year {
                    Some(year) => NaiveDate::from_ymd_opt(year, month, day),
                    None => calendar::nearest_future(today, month, day),
                };
                if let Some(date) = date {
                    dates.push(date);
                }
            }
        }

        found(dates, "date_list")
    }
}

/// "Feb 12th", "12 February", "March 5, 2025". An explicit year is kept as
/// written; otherwise the nearest future occurrence is used.
pub struct SingleDateStrategy;

impl DateStrategy for SingleDateStrategy {
    fn name(&self) -> &'static str {
        "single_date"
    }

    fn extract(&self, text: &str, today: NaiveDate) -> Option<ExtractedDates> {
        let pattern = cached(
            &SINGLE,
            &format!(
                r"\b(\d{{1,2}}){ORDINAL_SUFFIX}\s+(?:of\s+)?({MONTH_ALTERNATION})\b(?:,?\s+(\d{{4}}))?|\b({MONTH_ALTERNATION})\.?\s+(\d{{1,2}}){ORDINAL_SUFFIX}\b(?:,?\s+(\d{{4}}))?"
            ),
        );

        let dates = pattern
            .captures_iter(text)
            .filter_map(|captures| {
                let group = |index: usize| captures.get(index).map(|m| m.as_str());
                let (day, month, year) = match group(1) {
                    Some(day) => (day, group(2)?, group(3)),
                    None => (group(5)?, group(4)?, group(6)),
                };
                let day = day.parse::<u32>().ok()?;
                let month = calendar::month_number(month)?;
                match calendar::parse_year(year) {
                    Some(year) => NaiveDate::from_ymd_opt(year, month, day),
                    None => calendar::nearest_future(today, month, day),
                }
            })
            .collect();

        found(dates, "single_date")
    }
}

/// Weekday names resolve to their next occurrence after today.
pub struct WeekdayStrategy;

impl DateStrategy for WeekdayStrategy {
    fn name(&self) -> &'static str {
        "weekday"
    }

    fn extract(&self, text: &str, today: NaiveDate) -> Option<ExtractedDates> {
        let pattern = cached(
            &WEEKDAY,
            r"\b(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b",
        );
        let dates = pattern
            .find_iter(text)
            .filter_map(|m| calendar::weekday_from_name(m.as_str()))
            .map(|weekday| calendar::next_weekday(today, weekday))
            .collect();

        found(dates, "weekday")
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{DateListStrategy, SingleDateStrategy, WeekdayStrategy};
    use crate::extraction::DateStrategy;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn today() -> NaiveDate {
        date(2024, 3, 10)
    }

    #[test]
    fn each_month_claims_only_its_own_day_list() {
        let found = DateListStrategy
            .extract("off 12th, 13th and 15th march and 2nd april", today())
            .expect("dates");
        assert_eq!(
            found.dates,
            vec![date(2024, 3, 12), date(2024, 3, 13), date(2024, 3, 15), date(2024, 4, 2)]
        );
    }

    #[test]
    fn repeated_month_names_pair_with_their_preceding_days() {
        let found = DateListStrategy
            .extract("11th march for the dentist, then 20th march as well", today())
            .expect("dates");
        assert_eq!(found.dates, vec![date(2024, 3, 11), date(2024, 3, 20)]);
    }

    #[test]
    fn past_list_dates_roll_to_next_year_unless_a_year_is_written() {
        let rolled = DateListStrategy.extract("off 5th march", today()).expect("dates");
        assert_eq!(rolled.dates, vec![date(2025, 3, 5)]);

        let pinned = DateListStrategy.extract("off 5th march 2024", today()).expect("dates");
        assert_eq!(pinned.dates, vec![date(2024, 3, 5)]);
    }

    #[test]
    fn single_dates_accept_month_first_form() {
        let found = SingleDateStrategy.extract("out feb 12th", today()).expect("dates");
        assert_eq!(found.dates, vec![date(2025, 2, 12)]);

        let explicit = SingleDateStrategy.extract("out march 5, 2024", today()).expect("dates");
        assert_eq!(explicit.dates, vec![date(2024, 3, 5)]);
    }

    #[test]
    fn weekday_names_resolve_forward() {
        let found = WeekdayStrategy.extract("off monday and friday", today()).expect("dates");
        assert_eq!(found.dates, vec![date(2024, 3, 11), date(2024, 3, 15)]);
    }
}
