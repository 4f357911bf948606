//! Recommendation policy
//!
//! Pure function from (final_score, policy-breach signal, flag counts) to a
//! PASS / REVIEW / FAIL recommendation. FAIL is evaluated first and is never
//! overridden by a high score; a missing score can only ever yield REVIEW
//! (or FAIL), never PASS.

use crate::policy::RecommendationPolicy;
use crate::types::{FlagCounts, Recommendation};

/// Applies the recommendation policy for a session
pub struct RecommendationEvaluator;

impl RecommendationEvaluator {
    pub fn evaluate(
        policy: &RecommendationPolicy,
        final_score: Option<f64>,
        policy_breach: bool,
        counts: &FlagCounts,
    ) -> Recommendation {
        if policy_breach || counts.high >= policy.fail_high_count {
            return Recommendation::Fail;
        }

        // NaN means the scoring layer produced garbage; treat as unavailable
        let score = match final_score.filter(|s| s.is_finite()) {
            Some(score) => score,
            None => return Recommendation::Review,
        };

        if score >= policy.pass_min_score
            && counts.high == 0
            && counts.moderate <= policy.pass_max_moderate
        {
            Recommendation::Pass
        } else {
            Recommendation::Review
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn counts(moderate: u32, high: u32) -> FlagCounts {
        FlagCounts {
            total: moderate + high,
            moderate,
            high,
            by_type: Default::default(),
        }
    }

    fn evaluate(score: Option<f64>, breach: bool, c: &FlagCounts) -> Recommendation {
        RecommendationEvaluator::evaluate(&RecommendationPolicy::default(), score, breach, c)
    }

    #[test]
    fn test_good_score_with_few_moderates_passes() {
        assert_eq!(
            evaluate(Some(8.0), false, &counts(2, 0)),
            Recommendation::Pass
        );
    }

    #[test]
    fn test_high_score_cannot_override_fail() {
        assert_eq!(
            evaluate(Some(9.0), false, &counts(0, 2)),
            Recommendation::Fail
        );
    }

    #[test]
    fn test_missing_score_forces_review() {
        assert_eq!(evaluate(None, false, &counts(0, 0)), Recommendation::Review);
    }

    #[test]
    fn test_nan_score_treated_as_unavailable() {
        assert_eq!(
            evaluate(Some(f64::NAN), false, &counts(0, 0)),
            Recommendation::Review
        );
    }

    #[test]
    fn test_single_high_flag_blocks_pass() {
        assert_eq!(
            evaluate(Some(9.5), false, &counts(0, 1)),
            Recommendation::Review
        );
    }

    #[test]
    fn test_too_many_moderates_demote_to_review() {
        assert_eq!(
            evaluate(Some(8.0), false, &counts(3, 0)),
            Recommendation::Review
        );
    }

    #[test]
    fn test_low_score_is_review_not_fail() {
        assert_eq!(
            evaluate(Some(4.0), false, &counts(0, 0)),
            Recommendation::Review
        );
    }

    #[test]
    fn test_policy_breach_fails_regardless() {
        assert_eq!(
            evaluate(Some(10.0), true, &counts(0, 0)),
            Recommendation::Fail
        );
    }
}
