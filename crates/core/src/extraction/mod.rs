//! Turns free text into calendar dates.
//!
//! Extraction runs a ranked list of [`DateStrategy`] implementations and keeps
//! the first result that carries dates and clears the configured confidence
//! floor. Parsing problems never surface as errors: an unparseable message is
//! an empty result with zero confidence.

pub mod calendar;
pub mod explicit;
pub mod fallback;
pub mod intent;
pub mod partial;
pub mod range;
pub mod relative;

use chrono::NaiveDate;
use tracing::debug;

use crate::config::ExtractionConfig;
use crate::domain::mention::ExtractedDates;

pub use explicit::{DateListStrategy, SingleDateStrategy, WeekdayStrategy};
pub use fallback::NumericDateStrategy;
pub use intent::{Intent, IntentDetector};
pub use partial::PartialDayStrategy;
pub use range::RangeStrategy;
pub use relative::RelativeStrategy;

pub trait DateStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `text` is already lower-cased. Returns `None` when the strategy does
    /// not apply.
    fn extract(&self, text: &str, today: NaiveDate) -> Option<ExtractedDates>;
}

pub struct DateExtractor {
    strategies: Vec<Box<dyn DateStrategy>>,
    min_confidence: f64,
}

impl DateExtractor {
    /// Built-in ranking: ranges, partial days, relative phrases, date lists,
    /// single dates, weekday names, then numeric fallbacks.
    pub fn new(config: &ExtractionConfig) -> Self {
        let strategies: Vec<Box<dyn DateStrategy>> = vec![
            Box::new(RangeStrategy::new(config.max_range_days, config.working_days_only)),
            Box::new(PartialDayStrategy::new(anchor_strategies())),
            Box::new(RelativeStrategy),
            Box::new(DateListStrategy),
            Box::new(SingleDateStrategy),
            Box::new(WeekdayStrategy),
            Box::new(NumericDateStrategy),
        ];
        Self::with_strategies(strategies, config.min_confidence)
    }

    pub fn with_strategies(strategies: Vec<Box<dyn DateStrategy>>, min_confidence: f64) -> Self {
        Self { strategies, min_confidence }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|strategy| strategy.name()).collect()
    }

    pub fn extract(&self, text: &str, today: NaiveDate) -> ExtractedDates {
        let lowered = text.to_lowercase();

        for strategy in &self.strategies {
            let Some(mut found) = strategy.extract(&lowered, today) else {
                continue;
            };
            if found.dates.is_empty() {
                continue;
            }
            if found.confidence < self.min_confidence {
                debug!(
                    event_name = "extraction.strategy.below_threshold",
                    strategy = strategy.name(),
                    confidence = found.confidence,
                    "discarding low-confidence dates"
                );
                continue;
            }

            found.dates.sort_unstable();
            found.dates.dedup();
            return found;
        }

        ExtractedDates::empty()
    }
}

/// Strategies that can anchor a partial-day marker to a calendar date.
fn anchor_strategies() -> Vec<Box<dyn DateStrategy>> {
    vec![
        Box::new(RelativeStrategy),
        Box::new(DateListStrategy),
        Box::new(SingleDateStrategy),
        Box::new(WeekdayStrategy),
        Box::new(NumericDateStrategy),
    ]
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{DateExtractor, DateStrategy};
    use crate::config::ExtractionConfig;
    use crate::domain::mention::{ExtractedDates, LeaveType};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn sunday() -> NaiveDate {
        date(2024, 3, 10)
    }

    fn extractor() -> DateExtractor {
        DateExtractor::new(&ExtractionConfig::default())
    }

    #[test]
    fn tomorrow_on_a_sunday_is_monday() {
        let found = extractor().extract("On leave tomorrow", sunday());

        assert_eq!(found.dates, vec![date(2024, 3, 11)]);
        assert_eq!(found.leave_type, LeaveType::FullDay);
        assert!(found.confidence >= 0.8);
    }

    #[test]
    fn explicit_range_wins_over_day_list() {
        let found = extractor().extract("I'll be out from 12th March to 15th March", sunday());

        assert_eq!(found.strategy, "range");
        assert_eq!(
            found.dates,
            vec![date(2024, 3, 12), date(2024, 3, 13), date(2024, 3, 14), date(2024, 3, 15)]
        );
        assert!((found.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn half_day_is_anchored_to_a_relative_date() {
        let found = extractor().extract("taking a half day tomorrow", sunday());

        assert_eq!(found.dates, vec![date(2024, 3, 11)]);
        assert_eq!(found.leave_type, LeaveType::HalfDay);
        assert_eq!(found.strategy, "partial_day");
    }

    #[test]
    fn hour_range_marks_hourly_leave() {
        let found = extractor().extract("out 2pm to 4pm on Tuesday", sunday());

        assert_eq!(found.dates, vec![date(2024, 3, 12)]);
        assert_eq!(found.leave_type, LeaveType::Hourly);
    }

    #[test]
    fn unrelated_text_yields_zero_confidence() {
        let found = extractor().extract("lunch anyone?", sunday());

        assert!(found.is_empty());
        assert_eq!(found.confidence, 0.0);
    }

    struct Guess;

    impl DateStrategy for Guess {
        fn name(&self) -> &'static str {
            "guess"
        }

        fn extract(&self, _text: &str, today: NaiveDate) -> Option<ExtractedDates> {
            Some(ExtractedDates {
                dates: vec![today],
                range: None,
                leave_type: LeaveType::FullDay,
                confidence: 0.3,
                strategy: "guess",
            })
        }
    }

    #[test]
    fn results_below_the_floor_are_skipped() {
        let extractor = DateExtractor::with_strategies(vec![Box::new(Guess)], 0.5);
        assert!(extractor.extract("whenever", sunday()).is_empty());

        let permissive = DateExtractor::with_strategies(vec![Box::new(Guess)], 0.2);
        assert_eq!(permissive.extract("whenever", sunday()).dates, vec![sunday()]);
    }
}
