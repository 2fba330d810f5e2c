#![forbid(unsafe_code)]

//! Differential validation of the materialized distributions. The
//! counts are re-derived by a deliberately different route from the
//! macro dataflow: policy-first iteration with explicit per-division
//! fractionalization. Mismatches beyond tolerance are reported, never
//! repaired.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use va_io::TableError;
use va_score::{NO_DATA_SCORE, ScoreInput, ScorePair, ScoringMethod};
use va_store::tables::RelevantDivision;
use va_store::{DataDirs, PolicyStore, distributions};
use va_types::{
    ChamberId, NO_PARTY, PartyId, PeriodId, PersonId, PolicyId, StrengthMeaning, VoteDistribution,
};

/// Absolute tolerance on count buckets; floating point summation
/// order differs between the two routes.
pub const COUNT_TOLERANCE: f64 = 0.05;
/// Tolerance on the recomputed distance score.
pub const SCORE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("staging references policy {policy_id} which is not in the policies table")]
    UnknownPolicy { policy_id: PolicyId },
    #[error("partition file missing for person {person_id}: {path}")]
    MissingPartition { person_id: PersonId, path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub person_id: PersonId,
    pub policy_id: PolicyId,
    pub period_id: PeriodId,
    pub party_id: PartyId,
    pub is_target: i64,
    pub field: String,
    pub expected: f64,
    pub actual: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub triples_checked: usize,
    pub rows_checked: usize,
    pub failures: Vec<ValidationFailure>,
}

impl ValidationReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct SlowCounts {
    votes_same: f64,
    strong_votes_same: f64,
    votes_different: f64,
    strong_votes_different: f64,
    votes_absent: f64,
    strong_votes_absent: f64,
    votes_abstain: f64,
    strong_votes_abstain: f64,
    agreements_same: f64,
    strong_agreements_same: f64,
    agreements_different: f64,
    strong_agreements_different: f64,
}

impl SlowCounts {
    fn add_vote(&mut self, strong: bool, outcome: VoteOutcome, weight: f64) {
        let bucket = match (strong, outcome) {
            (true, VoteOutcome::Same) => &mut self.strong_votes_same,
            (false, VoteOutcome::Same) => &mut self.votes_same,
            (true, VoteOutcome::Different) => &mut self.strong_votes_different,
            (false, VoteOutcome::Different) => &mut self.votes_different,
            (true, VoteOutcome::Abstain) => &mut self.strong_votes_abstain,
            (false, VoteOutcome::Abstain) => &mut self.votes_abstain,
            (true, VoteOutcome::Absent) => &mut self.strong_votes_absent,
            (false, VoteOutcome::Absent) => &mut self.votes_absent,
        };
        *bucket += weight;
    }

    fn add_agreement(&mut self, strong: bool, same: bool) {
        let bucket = match (strong, same) {
            (true, true) => &mut self.strong_agreements_same,
            (false, true) => &mut self.agreements_same,
            (true, false) => &mut self.strong_agreements_different,
            (false, false) => &mut self.agreements_different,
        };
        *bucket += 1.0;
    }

    fn score_input(&self) -> ScoreInput {
        ScoreInput {
            votes_same: ScorePair::new(self.votes_same, self.strong_votes_same),
            votes_different: ScorePair::new(self.votes_different, self.strong_votes_different),
            votes_absent: ScorePair::new(self.votes_absent, self.strong_votes_absent),
            votes_abstain: ScorePair::new(self.votes_abstain, self.strong_votes_abstain),
            agreements_same: ScorePair::new(self.agreements_same, self.strong_agreements_same),
            agreements_different: ScorePair::new(
                self.agreements_different,
                self.strong_agreements_different,
            ),
        }
    }

    fn fields(&self) -> [(&'static str, f64); 12] {
        [
            ("num_votes_same", self.votes_same),
            ("num_strong_votes_same", self.strong_votes_same),
            ("num_votes_different", self.votes_different),
            ("num_strong_votes_different", self.strong_votes_different),
            ("num_votes_absent", self.votes_absent),
            ("num_strong_votes_absent", self.strong_votes_absent),
            ("num_votes_abstain", self.votes_abstain),
            ("num_strong_votes_abstain", self.strong_votes_abstain),
            ("num_agreements_same", self.agreements_same),
            ("num_strong_agreements_same", self.strong_agreements_same),
            ("num_agreements_different", self.agreements_different),
            (
                "num_strong_agreements_different",
                self.strong_agreements_different,
            ),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoteOutcome {
    Same,
    Different,
    Abstain,
    Absent,
}

fn classify(effective_vote_int: i64, abstain_int: i64, absent_int: i64, agree_int: i64) -> VoteOutcome {
    if absent_int == 1 {
        VoteOutcome::Absent
    } else if abstain_int == 1 {
        VoteOutcome::Abstain
    } else if (effective_vote_int == 1) == (agree_int == 1) {
        VoteOutcome::Same
    } else {
        VoteOutcome::Different
    }
}

type SlowKey = (PeriodId, i64, PolicyId);

/// Re-derive the expected rows for one (person, chamber, party)
/// triple. Returns counts keyed by (period, is_target, policy).
fn slow_rows(
    store: &PolicyStore,
    person_id: PersonId,
    chamber_id: ChamberId,
    party_id: PartyId,
) -> BTreeMap<SlowKey, SlowCounts> {
    let memberships: Vec<_> = store
        .memberships_for_person(person_id)
        .filter(|m| m.chamber_id == chamber_id)
        .collect();
    let in_membership =
        |division: &RelevantDivision| memberships.iter().any(|m| m.covers(division.date));

    let mut rows = BTreeMap::<SlowKey, SlowCounts>::new();

    for division in store.divisions() {
        if division.chamber_id != chamber_id || !in_membership(division) {
            continue;
        }
        let strong = division.strong_int == 1;

        let mut cohort: Vec<VoteOutcome> = Vec::new();
        let mut own: Option<VoteOutcome> = None;
        for vote in store.votes_for_division(division.division_id) {
            let outcome = classify(
                vote.effective_vote_int,
                vote.abstain_int,
                vote.absent_int,
                division.agree_int,
            );
            if vote.person_id == person_id {
                own = Some(outcome);
            } else if vote.effective_party_id == Some(party_id) {
                cohort.push(outcome);
            }
        }

        if let Some(outcome) = own {
            rows.entry((division.period_id, 1, division.policy_id))
                .or_default()
                .add_vote(strong, outcome, 1.0);
        }
        if !cohort.is_empty() {
            let weight = 1.0 / cohort.len() as f64;
            let counts = rows
                .entry((division.period_id, 0, division.policy_id))
                .or_default();
            for outcome in cohort {
                counts.add_vote(strong, outcome, weight);
            }
        }
    }

    // Agreements attach to every row of the (policy, period); a pair
    // with no division rows gets a comparator-side row of its own.
    let present: Vec<_> = store
        .collective_for_person(person_id)
        .map(|p| p.decision_id)
        .collect();
    for decision_id in present {
        for agreement in store.agreement_rows_for_decision(decision_id) {
            let strong = agreement.strong_int == 1;
            let same = agreement.agree_int == 1;
            let keys: Vec<SlowKey> = rows
                .keys()
                .filter(|(period, _, policy)| {
                    *period == agreement.period_id && *policy == agreement.policy_id
                })
                .copied()
                .collect();
            if keys.is_empty() {
                rows.entry((agreement.period_id, 0, agreement.policy_id))
                    .or_default()
                    .add_agreement(strong, same);
            } else {
                for key in keys {
                    if let Some(counts) = rows.get_mut(&key) {
                        counts.add_agreement(strong, same);
                    }
                }
            }
        }
    }

    rows
}

fn scoring_method(meaning: StrengthMeaning) -> ScoringMethod {
    match meaning {
        StrengthMeaning::Simplified => ScoringMethod::Simplified,
    }
}

fn compare_row(
    expected: &SlowCounts,
    actual: &VoteDistribution,
    method: ScoringMethod,
    party_id: PartyId,
    failures: &mut Vec<ValidationFailure>,
) {
    let actual_fields = [
        ("num_votes_same", actual.num_votes_same),
        ("num_strong_votes_same", actual.num_strong_votes_same),
        ("num_votes_different", actual.num_votes_different),
        (
            "num_strong_votes_different",
            actual.num_strong_votes_different,
        ),
        ("num_votes_absent", actual.num_votes_absent),
        ("num_strong_votes_absent", actual.num_strong_votes_absent),
        ("num_votes_abstain", actual.num_votes_abstain),
        ("num_strong_votes_abstain", actual.num_strong_votes_abstain),
        ("num_agreements_same", actual.num_agreements_same),
        (
            "num_strong_agreements_same",
            actual.num_strong_agreements_same,
        ),
        ("num_agreements_different", actual.num_agreements_different),
        (
            "num_strong_agreements_different",
            actual.num_strong_agreements_different,
        ),
    ];

    for ((field, expected_value), (_, actual_value)) in
        expected.fields().into_iter().zip(actual_fields)
    {
        if (expected_value - actual_value).abs() > COUNT_TOLERANCE {
            failures.push(ValidationFailure {
                person_id: actual.person_id,
                policy_id: actual.policy_id,
                period_id: actual.period_id,
                party_id,
                is_target: actual.is_target,
                field: field.to_owned(),
                expected: expected_value,
                actual: actual_value,
            });
        }
    }

    let expected_score = method.score(&expected.score_input());
    let score_matches = if expected_score == NO_DATA_SCORE || actual.distance_score == NO_DATA_SCORE
    {
        expected_score == actual.distance_score
    } else {
        (expected_score - actual.distance_score).abs() <= SCORE_TOLERANCE
    };
    if !score_matches {
        failures.push(ValidationFailure {
            person_id: actual.person_id,
            policy_id: actual.policy_id,
            period_id: actual.period_id,
            party_id,
            is_target: actual.is_target,
            field: "distance_score".to_owned(),
            expected: expected_score,
            actual: actual.distance_score,
        });
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    /// Check at most this many (person, chamber, party) triples;
    /// 0 means all.
    pub sample: usize,
    pub person_ids: Option<Vec<PersonId>>,
    pub policy_ids: Option<Vec<PolicyId>>,
}

/// Compare the materialized partition files against the slow path.
pub fn validate_partitions(
    store: &PolicyStore,
    dirs: &DataDirs,
    options: &ValidationOptions,
) -> Result<ValidationReport, ValidateError> {
    let mut triples = std::collections::BTreeSet::new();
    for entry in store.relevant() {
        if options
            .person_ids
            .as_ref()
            .is_some_and(|ids| !ids.contains(&entry.person_id))
        {
            continue;
        }
        if options
            .policy_ids
            .as_ref()
            .is_some_and(|ids| !ids.contains(&entry.policy_id))
        {
            continue;
        }
        triples.insert((
            entry.person_id,
            entry.chamber_id,
            entry.party_id.unwrap_or(NO_PARTY),
        ));
    }

    let mut report = ValidationReport::default();
    for (person_id, chamber_id, party_id) in triples {
        if options.sample > 0 && report.triples_checked >= options.sample {
            break;
        }
        report.triples_checked += 1;

        let path = dirs.partition_path(person_id, chamber_id, party_id);
        if !path.exists() {
            return Err(ValidateError::MissingPartition { person_id, path });
        }
        let actual_rows = distributions::read_distributions(&path)?;
        let mut actual_by_key = BTreeMap::<SlowKey, &VoteDistribution>::new();
        for row in &actual_rows {
            actual_by_key.insert((row.period_id, row.is_target, row.policy_id), row);
        }

        let expected = slow_rows(store, person_id, chamber_id, party_id);

        for (key, counts) in &expected {
            let (period_id, is_target, policy_id) = *key;
            let method = store
                .policy(policy_id)
                .map(|p| scoring_method(p.strength_meaning))
                .ok_or(ValidateError::UnknownPolicy { policy_id })?;
            match actual_by_key.get(key) {
                Some(actual) => {
                    report.rows_checked += 1;
                    compare_row(counts, actual, method, party_id, &mut report.failures);
                }
                None => report.failures.push(ValidationFailure {
                    person_id,
                    policy_id,
                    period_id,
                    party_id,
                    is_target,
                    field: "row_present".to_owned(),
                    expected: 1.0,
                    actual: 0.0,
                }),
            }
        }
        for (key, row) in &actual_by_key {
            if !expected.contains_key(key) {
                report.failures.push(ValidationFailure {
                    person_id,
                    policy_id: row.policy_id,
                    period_id: row.period_id,
                    party_id,
                    is_target: row.is_target,
                    field: "row_present".to_owned(),
                    expected: 0.0,
                    actual: 1.0,
                });
            }
        }
    }

    info!(
        triples = report.triples_checked,
        rows = report.rows_checked,
        failures = report.failures.len(),
        "validation complete"
    );
    Ok(report)
}
