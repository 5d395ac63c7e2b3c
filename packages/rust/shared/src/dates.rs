//! Relative posting-date normalization.
//!
//! Search results show phrases like "Just posted", "3 days ago" or
//! "30+ days ago". These are converted to absolute calendar dates against a
//! reference date. Unparseable phrases yield `None` ("unknown date").
//!
//! Months are a fixed 30 days, not calendar months. Downstream reports rely on
//! that approximation, so it is kept as-is.

use std::sync::LazyLock;

use chrono::{Days, NaiveDate};
use regex::Regex;

/// Days per "month" in relative phrases.
pub const DAYS_PER_MONTH: u64 = 30;

static DAYS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\+?\s*day").expect("valid regex"));
static WEEKS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\+?\s*week").expect("valid regex"));
static MONTHS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\+?\s*month").expect("valid regex"));

/// Convert a relative-time phrase to an absolute date.
///
/// Rules are case-insensitive and the first match wins:
/// "today"/"just posted", "yesterday", "N day", "N week", "N month".
pub fn normalize_posted_date(phrase: &str, reference: NaiveDate) -> Option<NaiveDate> {
    let text = phrase.to_lowercase();

    if text.contains("today") || text.contains("just posted") {
        return Some(reference);
    }
    if text.contains("yesterday") {
        return reference.checked_sub_days(Days::new(1));
    }
    if text.contains("day") {
        let n = leading_count(&DAYS_RE, &text)?;
        return reference.checked_sub_days(Days::new(n));
    }
    if text.contains("week") {
        let n = leading_count(&WEEKS_RE, &text)?;
        return reference.checked_sub_days(Days::new(n.checked_mul(7)?));
    }
    if text.contains("month") {
        let n = leading_count(&MONTHS_RE, &text)?;
        return reference.checked_sub_days(Days::new(n.checked_mul(DAYS_PER_MONTH)?));
    }

    None
}

fn leading_count(re: &Regex, text: &str) -> Option<u64> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn today_and_just_posted() {
        let r = d(2024, 5, 20);
        assert_eq!(normalize_posted_date("Just posted", r), Some(r));
        assert_eq!(normalize_posted_date("Posted Today", r), Some(r));
    }

    #[test]
    fn yesterday() {
        assert_eq!(
            normalize_posted_date("Posted yesterday", d(2024, 3, 1)),
            Some(d(2024, 2, 29))
        );
    }

    #[test]
    fn days_ago() {
        let r = d(2024, 5, 20);
        assert_eq!(normalize_posted_date("3 days ago", r), Some(d(2024, 5, 17)));
        assert_eq!(normalize_posted_date("Posted 30+ days ago", r), Some(d(2024, 4, 20)));
        assert_eq!(normalize_posted_date("1 day ago", r), Some(d(2024, 5, 19)));
    }

    #[test]
    fn day_without_number_is_unknown() {
        assert_eq!(normalize_posted_date("a few days ago", d(2024, 5, 20)), None);
    }

    #[test]
    fn weeks_ago() {
        assert_eq!(
            normalize_posted_date("2 weeks ago", d(2024, 5, 20)),
            Some(d(2024, 5, 6))
        );
    }

    #[test]
    fn months_use_fixed_thirty_days() {
        assert_eq!(
            normalize_posted_date("1 month ago", d(2024, 3, 31)),
            Some(d(2024, 3, 1))
        );
        assert_eq!(
            normalize_posted_date("2 months ago", d(2024, 5, 20)),
            Some(d(2024, 3, 21))
        );
    }

    #[test]
    fn unparseable_is_none() {
        let r = d(2024, 5, 20);
        assert_eq!(normalize_posted_date("", r), None);
        assert_eq!(normalize_posted_date("gibberish", r), None);
        assert_eq!(normalize_posted_date("Hiring ongoing", r), None);
    }

    #[test]
    fn precedence_today_beats_day_rule() {
        // "today" contains "day"; the earlier rule must win.
        let r = d(2024, 5, 20);
        assert_eq!(normalize_posted_date("Active today, 5 days left", r), Some(r));
    }

    #[test]
    fn huge_counts_do_not_panic() {
        let r = d(2024, 5, 20);
        assert_eq!(normalize_posted_date("99999999999999999999 days ago", r), None);
        assert_eq!(normalize_posted_date("9999999999999999999 weeks ago", r), None);
    }
}
