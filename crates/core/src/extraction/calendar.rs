use std::sync::OnceLock;

use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};
use regex::Regex;

/// Month names and abbreviations, longest alternatives first.
pub const MONTH_ALTERNATION: &str = "january|february|march|april|may|june|july|august|september|october|november|december|sept|jan|feb|mar|apr|jun|jul|aug|sep|oct|nov|dec";

pub const ORDINAL_SUFFIX: &str = "(?:st|nd|rd|th)?";

pub(crate) fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("built-in date pattern must compile"))
}

pub fn month_number(name: &str) -> Option<u32> {
    let prefix = name.get(..3)?.to_ascii_lowercase();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

pub fn weekday_from_name(name: &str) -> Option<Weekday> {
    match name.to_ascii_lowercase().as_str() {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

pub fn is_working_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Every date in `start..=end`, optionally skipping weekends.
pub fn span(start: NaiveDate, end: NaiveDate, working_days_only: bool) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|date| *date <= end)
        .filter(|date| !working_days_only || is_working_day(*date))
        .collect()
}

pub fn last_day_of_month(date: NaiveDate) -> Option<NaiveDate> {
    let first = date.with_day(1)?;
    first.checked_add_months(Months::new(1)).map(|next| next - Duration::days(1))
}

/// Same day one month later; `None` when that day does not exist.
pub fn add_one_month(date: NaiveDate) -> Option<NaiveDate> {
    let (year, month) =
        if date.month() == 12 { (date.year() + 1, 1) } else { (date.year(), date.month() + 1) };
    NaiveDate::from_ymd_opt(year, month, date.day())
}

pub fn sub_one_month(date: NaiveDate) -> Option<NaiveDate> {
    let (year, month) =
        if date.month() == 1 { (date.year() - 1, 12) } else { (date.year(), date.month() - 1) };
    NaiveDate::from_ymd_opt(year, month, date.day())
}

/// Next occurrence strictly after `today`; the same weekday means a week out.
pub fn next_weekday(today: NaiveDate, target: Weekday) -> NaiveDate {
    let current = i64::from(today.weekday().num_days_from_monday());
    let wanted = i64::from(target.num_days_from_monday());
    let mut ahead = wanted - current;
    if ahead <= 0 {
        ahead += 7;
    }
    today + Duration::days(ahead)
}

/// Resolves a day and month without an explicit year to the nearest
/// occurrence that is not in the past.
pub fn nearest_future(today: NaiveDate, month: u32, day: u32) -> Option<NaiveDate> {
    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day);
    match this_year {
        Some(date) if date >= today => Some(date),
        _ => NaiveDate::from_ymd_opt(today.year() + 1, month, day),
    }
}

pub fn parse_year(value: Option<&str>) -> Option<i32> {
    value.and_then(|raw| raw.trim().parse::<i32>().ok())
}

/// Human rendering used in replies: one date, a pair, or a first-to-last span.
pub fn format_dates(dates: &[NaiveDate]) -> String {
    let mut sorted = dates.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    match sorted.as_slice() {
        [] => "the requested dates".to_owned(),
        [only] => only.format("%b %-d, %Y").to_string(),
        [first, second] => {
            format!("{} and {}", first.format("%b %-d"), second.format("%b %-d, %Y"))
        }
        [first, .., last] => {
            format!("{} to {}", first.format("%b %-d"), last.format("%b %-d, %Y"))
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Weekday};

    use super::{format_dates, last_day_of_month, month_number, nearest_future, next_weekday, span};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn month_names_resolve_by_prefix() {
        assert_eq!(month_number("February"), Some(2));
        assert_eq!(month_number("sept"), Some(9));
        assert_eq!(month_number("mo"), None);
    }

    #[test]
    fn working_day_span_skips_weekends() {
        let dates = span(date(2024, 3, 8), date(2024, 3, 12), true);
        assert_eq!(dates, vec![date(2024, 3, 8), date(2024, 3, 11), date(2024, 3, 12)]);
    }

    #[test]
    fn next_weekday_never_returns_today() {
        let sunday = date(2024, 3, 10);
        assert_eq!(next_weekday(sunday, Weekday::Mon), date(2024, 3, 11));
        assert_eq!(next_weekday(sunday, Weekday::Sun), date(2024, 3, 17));
    }

    #[test]
    fn nearest_future_rolls_past_dates_into_next_year() {
        let today = date(2024, 3, 10);
        assert_eq!(nearest_future(today, 3, 10), Some(date(2024, 3, 10)));
        assert_eq!(nearest_future(today, 2, 12), Some(date(2025, 2, 12)));
        assert_eq!(last_day_of_month(date(2024, 2, 5)), Some(date(2024, 2, 29)));
    }

    #[test]
    fn display_formats_follow_date_count() {
        assert_eq!(format_dates(&[]), "the requested dates");
        assert_eq!(format_dates(&[date(2024, 3, 11)]), "Mar 11, 2024");
        assert_eq!(
            format_dates(&[date(2024, 3, 12), date(2024, 3, 11)]),
            "Mar 11 and Mar 12, 2024"
        );
        assert_eq!(
            format_dates(&[date(2024, 3, 11), date(2024, 3, 13), date(2024, 3, 15)]),
            "Mar 11 to Mar 15, 2024"
        );
    }
}
