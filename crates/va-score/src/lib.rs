#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Returned when a record has nothing to score. A real domain value,
/// never an error: downstream tables store it as-is.
pub const NO_DATA_SCORE: f64 = -1.0;

/// Weak and strong counts for one vote outcome, kept together so the
/// kernel signature stays at six arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScorePair {
    pub weak: f64,
    pub strong: f64,
}

impl ScorePair {
    #[must_use]
    pub fn new(weak: f64, strong: f64) -> Self {
        Self { weak, strong }
    }

    #[must_use]
    pub fn add(self, other: Self) -> Self {
        Self {
            weak: self.weak + other.weak,
            strong: self.strong + other.strong,
        }
    }

    #[must_use]
    pub fn divide(self, by: f64) -> Self {
        Self {
            weak: self.weak / by,
            strong: self.strong / by,
        }
    }
}

/// The six count buckets the kernel consumes. All counts are
/// nonnegative; fractional values are expected for comparator rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreInput {
    pub votes_same: ScorePair,
    pub votes_different: ScorePair,
    pub votes_absent: ScorePair,
    pub votes_abstain: ScorePair,
    pub agreements_same: ScorePair,
    pub agreements_different: ScorePair,
}

/// Scoring variants are a closed dispatch, not open polymorphism.
/// `Simplified` is the only variant in production; the historical
/// classic public-whip weighting is retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    Simplified,
}

impl ScoringMethod {
    /// Scalar path. Pure and total: every input produces a value in
    /// [0, 1] or exactly `NO_DATA_SCORE`, never NaN.
    #[must_use]
    pub fn score(self, input: &ScoreInput) -> f64 {
        match self {
            Self::Simplified => simplified_score(input),
        }
    }

    /// Batch path, used by the pipeline once per person. Row `i` of the
    /// output equals the scalar path applied to `inputs[i]`.
    #[must_use]
    pub fn score_batch(self, inputs: &[ScoreInput]) -> Vec<f64> {
        inputs.iter().map(|input| self.score(input)).collect()
    }
}

/// Simplified scoring. Weak votes are informative only and carry no
/// weight. Abstentions count as present at half the value of a vote.
/// Strong agreements count the same as strong votes. Absences never
/// move the score; they cap it (see `apply_absence_caps`).
fn simplified_score(input: &ScoreInput) -> f64 {
    let vote_weight = ScorePair::new(0.0, 10.0);
    let agreement_weight = vote_weight;
    let abstain_total_weight = vote_weight;
    // abstain is half marks
    let abstain_weight = vote_weight.divide(2.0);
    let absence_weight = ScorePair::new(0.0, 0.0);
    let absence_total_weight = ScorePair::new(0.0, 0.0);

    let points = vote_weight.weak * input.votes_different.weak
        + vote_weight.strong * input.votes_different.strong
        + absence_weight.weak * input.votes_absent.weak
        + absence_weight.strong * input.votes_absent.strong
        + abstain_weight.weak * input.votes_abstain.weak
        + abstain_weight.strong * input.votes_abstain.strong
        + agreement_weight.weak * input.agreements_different.weak
        + agreement_weight.strong * input.agreements_different.strong;

    let available = vote_weight.weak * (input.votes_same.weak + input.votes_different.weak)
        + vote_weight.strong * (input.votes_same.strong + input.votes_different.strong)
        + agreement_weight.weak * (input.agreements_same.weak + input.agreements_different.weak)
        + agreement_weight.strong
            * (input.agreements_same.strong + input.agreements_different.strong)
        + absence_total_weight.weak * input.votes_absent.weak
        + absence_total_weight.strong * input.votes_absent.strong
        + abstain_total_weight.weak * input.votes_abstain.weak
        + abstain_total_weight.strong * input.votes_abstain.strong;

    if available == 0.0 {
        return NO_DATA_SCORE;
    }

    let score = points / available;

    let total_strong = input.votes_same.strong
        + input.votes_different.strong
        + input.votes_absent.strong
        + input.votes_abstain.strong;

    apply_absence_caps(score, input.votes_absent.strong, total_strong)
}

/// Clamp the score away from the outermost description bands when the
/// attendance record is thin. More than one strong absence keeps the
/// score out of [0, 0.05] and [0.95, 1]; a third or more strong
/// absences keeps it out of [0, 0.15] and [0.85, 1]. Idempotent: the
/// replacement values sit inside the permitted range.
#[must_use]
pub fn apply_absence_caps(score: f64, absent_strong: f64, total_strong: f64) -> f64 {
    let mut score = score;

    if absent_strong > 1.0 {
        if score <= 0.05 {
            score = 0.06;
        } else if score >= 0.95 {
            score = 0.94;
        }
    }

    if absent_strong > 0.0 && absent_strong >= total_strong / 3.0 {
        if score <= 0.15 {
            score = 0.16;
        } else if score >= 0.85 {
            score = 0.84;
        }
    }

    score
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{NO_DATA_SCORE, ScoreInput, ScorePair, ScoringMethod, apply_absence_caps};

    fn strong(value: f64) -> ScorePair {
        ScorePair::new(0.0, value)
    }

    fn score(input: ScoreInput) -> f64 {
        ScoringMethod::Simplified.score(&input)
    }

    #[test]
    fn lone_abstention_scores_half() {
        let result = score(ScoreInput {
            votes_abstain: strong(1.0),
            ..ScoreInput::default()
        });
        assert_eq!(result, 0.5);
    }

    #[test]
    fn even_split_scores_half() {
        let result = score(ScoreInput {
            votes_same: strong(5.0),
            votes_different: strong(5.0),
            ..ScoreInput::default()
        });
        assert_eq!(result, 0.5);
    }

    #[test]
    fn quarter_different_scores_quarter() {
        let result = score(ScoreInput {
            votes_same: strong(15.0),
            votes_different: strong(5.0),
            ..ScoreInput::default()
        });
        assert_eq!(result, 0.25);
    }

    #[test]
    fn agreements_alone_carry_the_score() {
        let result = score(ScoreInput {
            agreements_same: strong(5.0),
            agreements_different: strong(15.0),
            ..ScoreInput::default()
        });
        assert_eq!(result, 0.75);
    }

    #[test]
    fn strong_agreements_count_like_votes() {
        let votes_only = score(ScoreInput {
            votes_same: strong(5.0),
            votes_different: strong(5.0),
            ..ScoreInput::default()
        });
        let with_agreements = score(ScoreInput {
            votes_same: strong(5.0),
            votes_different: strong(5.0),
            agreements_same: strong(5.0),
            agreements_different: strong(5.0),
            ..ScoreInput::default()
        });
        assert_eq!(votes_only, with_agreements);
    }

    #[test]
    fn two_absences_trigger_the_outer_cap() {
        let result = score(ScoreInput {
            votes_same: strong(10.0),
            votes_absent: strong(2.0),
            ..ScoreInput::default()
        });
        assert_eq!(result, 0.06);
    }

    #[test]
    fn two_absences_cap_the_opposed_end_too() {
        let result = score(ScoreInput {
            votes_different: strong(10.0),
            votes_absent: strong(2.0),
            ..ScoreInput::default()
        });
        assert_eq!(result, 0.94);
    }

    #[test]
    fn one_third_absent_triggers_the_inner_cap() {
        let result = score(ScoreInput {
            votes_same: strong(10.0),
            votes_absent: strong(5.0),
            ..ScoreInput::default()
        });
        assert_eq!(result, 0.16);
    }

    #[test]
    fn one_third_absent_caps_the_opposed_end_too() {
        let result = score(ScoreInput {
            votes_different: strong(10.0),
            votes_absent: strong(5.0),
            ..ScoreInput::default()
        });
        assert_eq!(result, 0.84);
    }

    #[test]
    fn all_zero_input_is_no_data() {
        assert_eq!(score(ScoreInput::default()), NO_DATA_SCORE);
    }

    #[test]
    fn all_absent_is_no_data() {
        let result = score(ScoreInput {
            votes_absent: ScorePair::new(5.0, 5.0),
            ..ScoreInput::default()
        });
        assert_eq!(result, NO_DATA_SCORE);
    }

    #[test]
    fn agreement_only_record_is_not_capped() {
        // total_strong is zero here; the one-third cap must not fire
        // on a record made purely of agreements.
        let result = score(ScoreInput {
            agreements_same: strong(5.0),
            ..ScoreInput::default()
        });
        assert_eq!(result, 0.0);
    }

    #[test]
    fn single_absence_leaves_score_untouched() {
        let base = score(ScoreInput {
            votes_same: strong(5.0),
            ..ScoreInput::default()
        });
        let with_absence = score(ScoreInput {
            votes_same: strong(5.0),
            votes_absent: ScorePair::new(5.0, 1.0),
            ..ScoreInput::default()
        });
        assert_eq!(base, with_absence);
    }

    #[test]
    fn caps_are_idempotent() {
        for raw in [0.0, 0.04, 0.06, 0.5, 0.86, 0.96, 1.0] {
            for (absent, total) in [(2.0, 12.0), (5.0, 15.0), (0.0, 10.0)] {
                let once = apply_absence_caps(raw, absent, total);
                let twice = apply_absence_caps(once, absent, total);
                assert_eq!(once, twice, "raw={raw} absent={absent} total={total}");
            }
        }
    }

    #[test]
    fn batch_path_matches_scalar_path_rowwise() {
        let inputs = vec![
            ScoreInput::default(),
            ScoreInput {
                votes_same: strong(15.0),
                votes_different: strong(5.0),
                ..ScoreInput::default()
            },
            ScoreInput {
                votes_different: strong(10.0),
                votes_absent: strong(2.0),
                ..ScoreInput::default()
            },
        ];
        let batch = ScoringMethod::Simplified.score_batch(&inputs);
        for (input, scored) in inputs.iter().zip(&batch) {
            assert_eq!(*scored, ScoringMethod::Simplified.score(input));
        }
    }

    fn pair_strategy() -> impl Strategy<Value = ScorePair> {
        (0.0..40.0f64, 0.0..40.0f64).prop_map(|(weak, strong)| ScorePair::new(weak, strong))
    }

    fn input_strategy() -> impl Strategy<Value = ScoreInput> {
        (
            pair_strategy(),
            pair_strategy(),
            pair_strategy(),
            pair_strategy(),
            pair_strategy(),
            pair_strategy(),
        )
            .prop_map(
                |(
                    votes_same,
                    votes_different,
                    votes_absent,
                    votes_abstain,
                    agreements_same,
                    agreements_different,
                )| ScoreInput {
                    votes_same,
                    votes_different,
                    votes_absent,
                    votes_abstain,
                    agreements_same,
                    agreements_different,
                },
            )
    }

    proptest! {
        #[test]
        fn score_is_in_range_or_sentinel(input in input_strategy()) {
            let result = ScoringMethod::Simplified.score(&input);
            prop_assert!(result == NO_DATA_SCORE || (0.0..=1.0).contains(&result));
            prop_assert!(!result.is_nan());
        }

        #[test]
        fn sentinel_exactly_when_nothing_available(input in input_strategy()) {
            let available = input.votes_same.strong
                + input.votes_different.strong
                + input.votes_abstain.strong
                + input.agreements_same.strong
                + input.agreements_different.strong;
            let result = ScoringMethod::Simplified.score(&input);
            prop_assert_eq!(result == NO_DATA_SCORE, available == 0.0);
        }

        #[test]
        fn weak_counts_never_move_the_score(input in input_strategy(), weak in 0.0..40.0f64) {
            let mut altered = input;
            altered.votes_same.weak = weak;
            altered.votes_different.weak = weak + 1.0;
            altered.votes_absent.weak = weak + 2.0;
            altered.votes_abstain.weak = weak + 3.0;
            altered.agreements_same.weak = weak + 4.0;
            altered.agreements_different.weak = weak + 5.0;
            prop_assert_eq!(
                ScoringMethod::Simplified.score(&input),
                ScoringMethod::Simplified.score(&altered)
            );
        }

        #[test]
        fn more_disagreement_never_lowers_the_score(input in input_strategy(), extra in 0.0..20.0f64) {
            // Keep absences at zero so neither cap interferes with the
            // monotonicity statement.
            let mut base = input;
            base.votes_absent = ScorePair::new(0.0, 0.0);
            let mut more = base;
            more.votes_different.strong += extra;
            prop_assert!(
                ScoringMethod::Simplified.score(&more)
                    >= ScoringMethod::Simplified.score(&base)
            );
        }

        #[test]
        fn more_agreement_never_raises_the_score(input in input_strategy(), extra in 0.0..20.0f64) {
            let mut base = input;
            base.votes_absent = ScorePair::new(0.0, 0.0);
            let mut more = base;
            more.agreements_same.strong += extra;
            let base_score = ScoringMethod::Simplified.score(&base);
            let more_score = ScoringMethod::Simplified.score(&more);
            if base_score != NO_DATA_SCORE {
                prop_assert!(more_score <= base_score);
            }
        }
    }
}
