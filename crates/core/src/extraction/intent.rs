use std::sync::OnceLock;

use regex::RegexSet;

static ABSENCE: OnceLock<RegexSet> = OnceLock::new();
static REMOTE: OnceLock<RegexSet> = OnceLock::new();
static ALREADY_APPLIED: OnceLock<RegexSet> = OnceLock::new();

const REMOTE_PATTERNS: &[&str] = &[
    r"\bwfh\b",
    r"\bwork\s*(?:ing)?\s*from\s*home\b",
    r"\bremote\b",
    r"\bwork\s*remote(?:ly)?\b",
    r"\bhome\s*office\b",
    r"\btelework\b",
];

const ABSENCE_PATTERNS: &[&str] = &[
    r"\b(?:on\s+)?leave\b",
    r"\bsick\b",
    r"\bout\s+of\s+(?:the\s+)?office\b",
];

const ALREADY_APPLIED_PATTERNS: &[&str] = &[
    r"applied\s+(?:it\s+)?(?:on|in)\s+(?:the\s+)?(?:hr|portal|system)",
    r"\b(?:hr|portal)\s+(?:done|applied|submitted|completed)",
    r"already\s+applied",
    r"applied\s+already",
    r"leave\s+applied",
    r"applied\s+(?:for\s+)?(?:the\s+)?leave",
];

fn set(cell: &'static OnceLock<RegexSet>, patterns: &[&str]) -> &'static RegexSet {
    cell.get_or_init(|| RegexSet::new(patterns).expect("built-in intent patterns must compile"))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Intent {
    pub is_absence: bool,
    pub is_remote_work: bool,
    pub already_applied: bool,
}

/// Keyword classification of channel messages. Remote-work phrasing counts
/// as an absence mention on its own.
#[derive(Clone, Copy, Debug, Default)]
pub struct IntentDetector;

impl IntentDetector {
    pub fn detect(&self, text: &str) -> Intent {
        let lowered = text.to_lowercase();
        let is_remote_work = set(&REMOTE, REMOTE_PATTERNS).is_match(&lowered);
        let is_absence = is_remote_work || set(&ABSENCE, ABSENCE_PATTERNS).is_match(&lowered);
        let already_applied =
            is_absence && set(&ALREADY_APPLIED, ALREADY_APPLIED_PATTERNS).is_match(&lowered);

        Intent { is_absence, is_remote_work, already_applied }
    }
}
