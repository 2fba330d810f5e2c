//! The per-person alignment pipeline: evaluate the joined comparison
//! macro, annotate rows with the current policy hash, and score them
//! through the batch kernel.

use std::collections::HashMap;

use va_macros::{ComparisonParams, ComparisonRow, joined_division_agreement_comparison};
use va_score::{ScoreInput, ScorePair, ScoringMethod};
use va_store::PolicyStore;
use va_types::{StrengthMeaning, VoteDistribution};

use crate::PipelineError;

#[must_use]
pub fn scoring_method(meaning: StrengthMeaning) -> ScoringMethod {
    match meaning {
        StrengthMeaning::Simplified => ScoringMethod::Simplified,
    }
}

fn score_input(row: &ComparisonRow) -> ScoreInput {
    ScoreInput {
        votes_same: ScorePair::new(row.num_votes_same, row.num_strong_votes_same),
        votes_different: ScorePair::new(row.num_votes_different, row.num_strong_votes_different),
        votes_absent: ScorePair::new(row.num_votes_absent, row.num_strong_votes_absent),
        votes_abstain: ScorePair::new(row.num_votes_abstain, row.num_strong_votes_abstain),
        agreements_same: ScorePair::new(row.num_agreements_same, row.num_strong_agreements_same),
        agreements_different: ScorePair::new(
            row.num_agreements_different,
            row.num_strong_agreements_different,
        ),
    }
}

/// Produce the distribution rows for one (person, chamber, party)
/// triple, in (period, is_target, policy) order. Scoring dispatches
/// per policy on `strength_meaning` but runs batched per method.
pub fn person_distributions(
    store: &PolicyStore,
    params: &ComparisonParams,
) -> Result<Vec<VoteDistribution>, PipelineError> {
    let rows = joined_division_agreement_comparison(store, params);

    let mut methods = Vec::with_capacity(rows.len());
    let mut hashes = Vec::with_capacity(rows.len());
    for row in &rows {
        let policy =
            store
                .policy(row.policy_id)
                .ok_or(PipelineError::UnknownPolicy {
                    policy_id: row.policy_id,
                })?;
        methods.push(scoring_method(policy.strength_meaning));
        hashes.push(policy.policy_hash.clone());
    }

    let inputs: Vec<ScoreInput> = rows.iter().map(score_input).collect();

    // Batch rows per scoring method, then scatter the scores back to
    // row order.
    let mut by_method = HashMap::<ScoringMethod, Vec<usize>>::new();
    for (idx, method) in methods.iter().enumerate() {
        by_method.entry(*method).or_default().push(idx);
    }
    let mut scores = vec![0.0f64; rows.len()];
    for (method, indexes) in by_method {
        let batch: Vec<ScoreInput> = indexes.iter().map(|&idx| inputs[idx]).collect();
        for (&idx, score) in indexes.iter().zip(method.score_batch(&batch)) {
            scores[idx] = score;
        }
    }

    Ok(rows
        .iter()
        .zip(hashes)
        .zip(scores)
        .map(|((row, policy_hash), distance_score)| VoteDistribution {
            policy_id: row.policy_id,
            person_id: row.person_id,
            period_id: row.period_id,
            chamber_id: row.chamber_id,
            party_id: row.party_id,
            is_target: row.is_target,
            num_votes_same: row.num_votes_same,
            num_strong_votes_same: row.num_strong_votes_same,
            num_votes_different: row.num_votes_different,
            num_strong_votes_different: row.num_strong_votes_different,
            num_votes_absent: row.num_votes_absent,
            num_strong_votes_absent: row.num_strong_votes_absent,
            num_votes_abstain: row.num_votes_abstain,
            num_strong_votes_abstain: row.num_strong_votes_abstain,
            num_agreements_same: row.num_agreements_same,
            num_strong_agreements_same: row.num_strong_agreements_same,
            num_agreements_different: row.num_agreements_different,
            num_strong_agreements_different: row.num_strong_agreements_different,
            start_year: row.start_year,
            end_year: row.end_year,
            distance_score,
            policy_hash,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use va_macros::ComparisonParams;
    use va_store::tables::{MembershipRow, PolicyRow, RelevantDivision, VoteRow};
    use va_store::{PolicyStore, StagingData};
    use va_types::{PolicyStatus, StrengthMeaning};

    use super::person_distributions;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn store() -> PolicyStore {
        PolicyStore::new(StagingData {
            divisions: vec![RelevantDivision {
                policy_id: 10,
                period_id: 1,
                division_id: 100,
                chamber_id: 1,
                date: date(2020, 1, 1),
                division_year: 2020,
                division_number: 1,
                strong_int: 1,
                agree_int: 1,
            }],
            votes: vec![VoteRow {
                division_id: 100,
                person_id: 1,
                membership_id: 1001,
                effective_vote_int: 1,
                abstain_int: 0,
                absent_int: 0,
                effective_party_id: Some(5),
            }],
            memberships: vec![MembershipRow {
                id: 1001,
                person_id: 1,
                chamber_id: 1,
                party_id: Some(5),
                effective_party_id: Some(5),
                start_date: date(2019, 1, 1),
                end_date: date(2024, 1, 1),
            }],
            policies: vec![PolicyRow {
                id: 10,
                chamber_id: 1,
                status: PolicyStatus::Active,
                strength_meaning: StrengthMeaning::Simplified,
                policy_hash: "11223344".to_owned(),
            }],
            ..StagingData::default()
        })
    }

    #[test]
    fn rows_carry_hash_and_score() {
        let rows = person_distributions(
            &store(),
            &ComparisonParams {
                person_id: 1,
                chamber_id: 1,
                party_id: 5,
            },
        )
        .expect("calc");

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.is_target, 1);
        assert_eq!(row.policy_hash, "11223344");
        assert_eq!(row.num_strong_votes_same, 1.0);
        // one aligned strong vote scores fully aligned
        assert_eq!(row.distance_score, 0.0);
    }

    #[test]
    fn unknown_policy_is_fatal() {
        let mut data = StagingData::default();
        data.divisions = vec![RelevantDivision {
            policy_id: 99,
            period_id: 1,
            division_id: 100,
            chamber_id: 1,
            date: date(2020, 1, 1),
            division_year: 2020,
            division_number: 1,
            strong_int: 1,
            agree_int: 1,
        }];
        data.votes = vec![VoteRow {
            division_id: 100,
            person_id: 1,
            membership_id: 1001,
            effective_vote_int: 1,
            abstain_int: 0,
            absent_int: 0,
            effective_party_id: Some(5),
        }];
        data.memberships = vec![MembershipRow {
            id: 1001,
            person_id: 1,
            chamber_id: 1,
            party_id: Some(5),
            effective_party_id: Some(5),
            start_date: date(2019, 1, 1),
            end_date: date(2024, 1, 1),
        }];
        let store = PolicyStore::new(data);

        let err = person_distributions(
            &store,
            &ComparisonParams {
                person_id: 1,
                chamber_id: 1,
                party_id: 5,
            },
        )
        .expect_err("missing policy row");
        assert!(err.to_string().contains("99"));
    }
}
