//! Percentage math shared by session results, statistics and leaderboards.

/// Whole-number score for one session, rounded half up.
///
/// Returns 0 when nothing was answered.
///
/// ```
/// use quiz_core::score::score_percentage;
/// assert_eq!(score_percentage(4, 5), 80);
/// assert_eq!(score_percentage(1, 8), 13);
/// assert_eq!(score_percentage(0, 0), 0);
/// ```
#[must_use]
pub fn score_percentage(correct: u32, answered: u32) -> u32 {
    if answered == 0 {
        return 0;
    }
    let correct = u64::from(correct.min(answered));
    let answered = u64::from(answered);
    // (correct * 100 / answered) + 0.5, in integers
    let rounded = (correct * 200 + answered) / (answered * 2);
    u32::try_from(rounded).unwrap_or(100)
}

/// Ratio as a percentage rounded to two decimal places.
///
/// Returns 0.0 for an empty denominator.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percentage(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    round2(numerator as f64 / denominator as f64 * 100.0)
}

/// Mean of `sum / count` rounded to two decimal places.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean(sum: u64, count: u64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    round2(sum as f64 / count as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incremental_mean(previous: f64, n: u64, new_value: f64) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let n = n as f64;
        (previous * (n - 1.0) + new_value) / n
    }

    #[test]
    fn score_rounds_half_up() {
        assert_eq!(score_percentage(4, 5), 80);
        assert_eq!(score_percentage(1, 8), 13);
        assert_eq!(score_percentage(1, 3), 33);
        assert_eq!(score_percentage(2, 3), 67);
        assert_eq!(score_percentage(3, 3), 100);
    }

    #[test]
    fn score_is_zero_when_nothing_answered() {
        assert_eq!(score_percentage(0, 0), 0);
        assert_eq!(score_percentage(0, 4), 0);
    }

    #[test]
    fn percentage_keeps_two_decimals() {
        assert_eq!(percentage(3, 3), 100.0);
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(0, 0), 0.0);
    }

    #[test]
    fn mean_from_sum_matches_incremental_mean() {
        let scores = [80_u64, 60, 95, 41];
        let mut running = 0.0;
        let mut sum = 0;
        for (i, score) in scores.iter().enumerate() {
            let n = i as u64 + 1;
            #[allow(clippy::cast_precision_loss)]
            let value = *score as f64;
            running = incremental_mean(running, n, value);
            sum += score;
            assert!((mean(sum, n) - running).abs() < 0.01);
        }
        assert_eq!(mean(140, 2), 70.0);
    }
}
