//! Score clamping against the scoring template

/// Constrain a raw score into `[0, max_score]`
///
/// Applied per item before a response is persisted, since every item carries
/// its own maximum.
///
/// ```
/// use sono_common::clamp_score;
///
/// assert_eq!(clamp_score(10.0, 5.0), 5.0);
/// assert_eq!(clamp_score(-5.0, 10.0), 0.0);
/// assert_eq!(clamp_score(3.0, 10.0), 3.0);
/// ```
pub fn clamp_score(score: f64, max_score: f64) -> f64 {
    score.min(max_score).max(0.0)
}

/// Sum of response scores; an empty set totals `0`
pub fn total_score<I>(scores: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    scores.into_iter().sum()
}
