use std::sync::OnceLock;

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;

use super::calendar::{self, cached};
use super::DateStrategy;
use crate::domain::mention::{ExtractedDates, LeaveType};

const CONFIDENCE: f64 = 0.9;

static DAY_AFTER_TOMORROW: OnceLock<Regex> = OnceLock::new();
static TODAY: OnceLock<Regex> = OnceLock::new();
static TOMORROW: OnceLock<Regex> = OnceLock::new();
static NEXT_WEEK: OnceLock<Regex> = OnceLock::new();
static THIS_WEEK: OnceLock<Regex> = OnceLock::new();
static REST_OF_WEEK: OnceLock<Regex> = OnceLock::new();
static END_OF_MONTH: OnceLock<Regex> = OnceLock::new();

/// "today", "tomorrow", "next week", "this week", "rest of the week" and
/// "end of month". Every phrase present in the text contributes its dates.
pub struct RelativeStrategy;

fn week_from(monday: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    (0..5).map(move |offset| monday + Duration::days(offset))
}

fn last_working_days_of_month(today: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let Some(last) = calendar::last_day_of_month(today) else {
        return Vec::new();
    };
    let mut days: Vec<NaiveDate> = (0..10)
        .map(|back| last - Duration::days(back))
        .filter(|date| calendar::is_working_day(*date))
        .take(count)
        .collect();
    days.reverse();
    days
}

impl DateStrategy for RelativeStrategy {
    fn name(&self) -> &'static str {
        "relative"
    }

    fn extract(&self, text: &str, today: NaiveDate) -> Option<ExtractedDates> {
        let mut dates = Vec::new();
        let weekday = i64::from(today.weekday().num_days_from_monday());

        let day_after = cached(&DAY_AFTER_TOMORROW, r"\bday\s+after\s+tomorrow\b");
        if day_after.is_match(text) {
            dates.push(today + Duration::days(2));
        }
        let text = day_after.replace_all(text, "");

        if cached(&TODAY, r"\btoday\b").is_match(&text) {
            dates.push(today);
        }
        if cached(&TOMORROW, r"\btomorrow\b").is_match(&text) {
            dates.push(today + Duration::days(1));
        }
        if cached(&NEXT_WEEK, r"\bnext\s+week\b").is_match(&text) {
            let next_monday = today + Duration::days(7 - weekday);
            dates.extend(week_from(next_monday));
        }

        let rest_of_week = cached(&REST_OF_WEEK, r"\brest\s+of\s+(?:the\s+|this\s+)?week\b");
        if rest_of_week.is_match(&text) {
            if weekday <= 4 {
                dates.extend((0..=4 - weekday).map(|offset| today + Duration::days(offset)));
            }
        } else if cached(&THIS_WEEK, r"\bthis\s+week\b").is_match(&text) {
            dates.extend(week_from(today - Duration::days(weekday)));
        }

        if cached(&END_OF_MONTH, r"\bend\s+of\s+(?:the\s+|this\s+)?month\b").is_match(&text) {
            dates.extend(last_working_days_of_month(today, 5));
        }

        if dates.is_empty() {
            return None;
        }

        Some(ExtractedDates {
            dates,
            range: None,
            leave_type: LeaveType::FullDay,
            confidence: CONFIDENCE,
            strategy: "relative",
        })
    }
}
