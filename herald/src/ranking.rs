//! Pure ranking functions (spec.md §4.9): time-decay, filter-rule boost,
//! and their composition. No teacher module does this verbatim; the shape
//! follows the recency-boost arithmetic in `press_review.rs`
//! (`(Utc::now() - published_at).num_hours()`), generalized to the
//! Julian-day decay formula spec.md mandates.

use chrono::{DateTime, Utc};

/// Per-day decay constant. Part of the external contract (spec.md §9) —
/// changing it requires a version bump.
pub const DECAY_PER_DAY: f64 = 0.1;

/// Age in whole(ish) days between `published_at` and `now`, computed via
/// Julian-day arithmetic on the UTC calendar (spec.md §4.9). Negative ages
/// (clock skew, future-dated articles) are clamped to zero by the caller.
pub fn age_days(published_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let published_jd = julian_day(published_at);
    let now_jd = julian_day(now);
    now_jd - published_jd
}

fn julian_day(dt: DateTime<Utc>) -> f64 {
    // Days since the Unix epoch, fractional, converted to a Julian Day
    // Number via the standard JD(1970-01-01T00:00:00Z) = 2440587.5 offset.
    let days_since_epoch = dt.timestamp() as f64 / 86_400.0;
    days_since_epoch + 2_440_587.5
}

/// Decayed effective score: `s / (1 + max(0, age_days) * 0.1)` (spec.md §4.9).
pub fn decay(raw_score: f64, age_days: f64) -> f64 {
    let clamped_age = age_days.max(0.0);
    raw_score / (1.0 + clamped_age * DECAY_PER_DAY)
}

/// One axis of a FilterRule match (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAxis {
    Author,
    Category,
    Tag,
}

/// A single filter rule as relevant to ranking — feed_id/axis/value matching
/// is the caller's responsibility (Store query or in-memory filter); this
/// struct only carries what the boost sum needs.
#[derive(Debug, Clone)]
pub struct FilterRule {
    pub axis: FilterAxis,
    pub value: String,
    pub score: i64,
    pub feed_id: Option<i64>,
}

/// Sums the `score` of every rule whose axis/value matches one of the
/// article's tags for that axis, and whose `feed_id` is null or equal to
/// the article's feed (spec.md §4.9).
pub fn filter_boost(
    rules: &[FilterRule],
    article_feed_id: i64,
    authors: &[String],
    categories: &[String],
    tags: &[String],
) -> i64 {
    rules
        .iter()
        .filter(|r| r.feed_id.is_none() || r.feed_id == Some(article_feed_id))
        .filter(|r| {
            let haystack: &[String] = match r.axis {
                FilterAxis::Author => authors,
                FilterAxis::Category => categories,
                FilterAxis::Tag => tags,
            };
            haystack.iter().any(|v| v == &r.value)
        })
        .map(|r| r.score)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn scenario_boundary_decay_values() {
        // spec.md §8: 30-day-old article, raw 9.0 -> ~2.25; 1-day-old -> ~8.18
        let d30 = decay(9.0, 30.0);
        assert!((d30 - 2.25).abs() < 0.01, "got {}", d30);

        let d1 = decay(9.0, 1.0);
        assert!((d1 - 8.1818).abs() < 0.01, "got {}", d1);

        assert!(d1 > d30);
    }

    #[test]
    fn age_days_matches_calendar_difference() {
        let now = Utc::now();
        let published = now - Duration::days(5);
        let age = age_days(published, now);
        assert!((age - 5.0).abs() < 0.01, "got {}", age);
    }

    #[test]
    fn future_published_at_clamped_to_zero_age() {
        let now = Utc::now();
        let published = now + Duration::days(2);
        let age = age_days(published, now);
        // age_days itself may be negative; decay() is what clamps.
        assert!(age < 0.0);
        assert_eq!(decay(9.0, age), 9.0);
    }

    #[test]
    fn filter_boost_scenario_4() {
        // spec.md §8 scenario 4
        let rules = vec![FilterRule {
            axis: FilterAxis::Author,
            value: "Alice".to_string(),
            score: 5,
            feed_id: None,
        }];

        let alice_boost = filter_boost(&rules, 1, &["Alice".to_string()], &[], &[]);
        assert_eq!(alice_boost, 5);

        let bob_boost = filter_boost(&rules, 1, &["Bob".to_string()], &[], &[]);
        assert_eq!(bob_boost, 0);

        let filter_threshold = 3;
        assert!(alice_boost >= filter_threshold);
        assert!(bob_boost < filter_threshold);
    }

    #[test]
    fn filter_boost_respects_feed_scoping() {
        let rules = vec![FilterRule {
            axis: FilterAxis::Category,
            value: "sports".to_string(),
            score: 10,
            feed_id: Some(42),
        }];

        let matching_feed = filter_boost(&rules, 42, &[], &["sports".to_string()], &[]);
        assert_eq!(matching_feed, 10);

        let other_feed = filter_boost(&rules, 99, &[], &["sports".to_string()], &[]);
        assert_eq!(other_feed, 0);
    }
}
