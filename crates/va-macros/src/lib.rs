#![forbid(unsafe_code)]

//! The relational steps that turn staging tables into per-policy count
//! buckets for one person. Each function is a parameterized relation:
//! it takes the staging store plus the (person, chamber, party)
//! parameters and returns typed rows. They compose by parameter
//! substitution, ending in `joined_division_agreement_comparison`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use va_store::PolicyStore;
use va_store::tables::MembershipRow;
use va_types::{ChamberId, DivisionId, PartyId, PeriodId, PersonId, PolicyId};

/// Parameters shared by the per-person macros. `party_id` may be the
/// `NO_PARTY` sentinel, in which case no comparator rows are produced
/// (stored party ids are never 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonParams {
    pub person_id: PersonId,
    pub chamber_id: ChamberId,
    pub party_id: PartyId,
}

/// Memberships of one person in one chamber.
pub fn target_memberships<'a>(
    store: &'a PolicyStore,
    person_id: PersonId,
    chamber_id: ChamberId,
) -> Vec<&'a MembershipRow> {
    store
        .memberships_for_person(person_id)
        .filter(|m| m.chamber_id == chamber_id)
        .collect()
}

/// Collective agreements a person was in parliament for, counted per
/// (period, policy) and bucketed by (strength, alignment). Identical
/// for target and comparators by definition, so it joins in last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementCountRow {
    pub period_id: PeriodId,
    pub person_id: PersonId,
    pub policy_id: PolicyId,
    pub num_agreements_same: f64,
    pub num_strong_agreements_same: f64,
    pub num_agreements_different: f64,
    pub num_strong_agreements_different: f64,
}

pub fn agreement_count(store: &PolicyStore, person_id: PersonId) -> Vec<AgreementCountRow> {
    #[derive(Default)]
    struct Acc {
        same: f64,
        strong_same: f64,
        different: f64,
        strong_different: f64,
    }

    let mut groups = BTreeMap::<(PeriodId, PolicyId), Acc>::new();
    for presence in store.collective_for_person(person_id) {
        for agreement in store.agreement_rows_for_decision(presence.decision_id) {
            let acc = groups
                .entry((agreement.period_id, agreement.policy_id))
                .or_default();
            match (agreement.strong_int == 1, agreement.agree_int == 1) {
                (true, true) => acc.strong_same += 1.0,
                (false, true) => acc.same += 1.0,
                (true, false) => acc.strong_different += 1.0,
                (false, false) => acc.different += 1.0,
            }
        }
    }

    groups
        .into_iter()
        .map(|((period_id, policy_id), acc)| AgreementCountRow {
            period_id,
            person_id,
            policy_id,
            num_agreements_same: acc.same,
            num_strong_agreements_same: acc.strong_same,
            num_agreements_different: acc.different,
            num_strong_agreements_different: acc.strong_different,
        })
        .collect()
}

/// One row per (period, policy, division, voter), where the voter is
/// the target or a current member of the comparator party. The
/// universe is restricted to divisions the target could have attended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyAlignmentRow {
    pub period_id: PeriodId,
    pub policy_id: PolicyId,
    pub person_id: PersonId,
    pub is_target: i64,
    pub strong_int: i64,
    pub division_id: DivisionId,
    pub division_year: i64,
    pub answer_agreed: i64,
    pub answer_disagreed: i64,
    pub abstained: i64,
    pub absent: i64,
}

pub fn policy_alignment(store: &PolicyStore, params: &ComparisonParams) -> Vec<PolicyAlignmentRow> {
    let memberships = target_memberships(store, params.person_id, params.chamber_id);

    let mut rows = Vec::new();
    for division in store.divisions() {
        if division.chamber_id != params.chamber_id {
            continue;
        }
        // Restrict to divisions inside the target's membership dates.
        if !memberships.iter().any(|m| m.covers(division.date)) {
            continue;
        }

        for vote in store.votes_for_division(division.division_id) {
            let own_vote = vote.person_id == params.person_id;
            if !own_vote && vote.effective_party_id != Some(params.party_id) {
                continue;
            }

            // effective_vote_int is 1 aye / -1 no; agree_int is 1 when
            // the policy agrees with an aye. Aligned is (1,1) or
            // (-1,0); opposed is (1,0) or (-1,1).
            let agreed = (vote.effective_vote_int == 1 && division.agree_int == 1)
                || (vote.effective_vote_int == -1 && division.agree_int == 0);
            let disagreed = (vote.effective_vote_int == 1 && division.agree_int == 0)
                || (vote.effective_vote_int == -1 && division.agree_int == 1);

            rows.push(PolicyAlignmentRow {
                period_id: division.period_id,
                policy_id: division.policy_id,
                person_id: vote.person_id,
                is_target: i64::from(own_vote),
                strong_int: division.strong_int,
                division_id: division.division_id,
                division_year: division.division_year,
                answer_agreed: i64::from(agreed),
                answer_disagreed: i64::from(disagreed),
                abstained: vote.abstain_int,
                absent: vote.absent_int,
            });
        }
    }
    rows
}

/// Per (period, is_target, policy, division): target counts collapse
/// to 0/1; comparator counts are normalized so the four outcomes sum
/// to one vote per division.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivisionComparison {
    pub period_id: PeriodId,
    pub is_target: i64,
    pub policy_id: PolicyId,
    pub division_id: DivisionId,
    pub strong_int: i64,
    pub division_year: i64,
    pub num_divisions_agreed: f64,
    pub num_divisions_disagreed: f64,
    pub num_divisions_abstain: f64,
    pub num_divisions_absent: f64,
    pub num_comparators: f64,
}

pub fn comparisons_by_policy_vote(
    store: &PolicyStore,
    params: &ComparisonParams,
) -> Vec<DivisionComparison> {
    #[derive(Default)]
    struct Acc {
        strong_int: i64,
        division_year: i64,
        total: f64,
        agreed: f64,
        disagreed: f64,
        abstained: f64,
        absent: f64,
    }

    let mut groups = BTreeMap::<(PeriodId, i64, PolicyId, DivisionId), Acc>::new();
    for row in policy_alignment(store, params) {
        let acc = groups
            .entry((row.period_id, row.is_target, row.policy_id, row.division_id))
            .or_default();
        acc.strong_int = row.strong_int;
        acc.division_year = row.division_year;
        acc.total += 1.0;
        acc.agreed += row.answer_agreed as f64;
        acc.disagreed += row.answer_disagreed as f64;
        acc.abstained += row.abstained as f64;
        acc.absent += row.absent as f64;
    }

    // A group exists only if at least one voter row survived the
    // joins, so total >= 1 and the division below cannot produce NaN;
    // divisions with no comparators are simply omitted.
    groups
        .into_iter()
        .map(
            |((period_id, is_target, policy_id, division_id), acc)| DivisionComparison {
                period_id,
                is_target,
                policy_id,
                division_id,
                strong_int: acc.strong_int,
                division_year: acc.division_year,
                num_divisions_agreed: acc.agreed / acc.total,
                num_divisions_disagreed: acc.disagreed / acc.total,
                num_divisions_abstain: acc.abstained / acc.total,
                num_divisions_absent: acc.absent / acc.total,
                num_comparators: acc.total,
            },
        )
        .collect()
}

/// The division comparisons grouped to (period, is_target, policy),
/// pivoted on vote strength into the eight count buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotRow {
    pub period_id: PeriodId,
    pub is_target: i64,
    pub policy_id: PolicyId,
    pub num_votes_same: f64,
    pub num_strong_votes_same: f64,
    pub num_votes_different: f64,
    pub num_strong_votes_different: f64,
    pub num_votes_absent: f64,
    pub num_strong_votes_absent: f64,
    pub num_votes_abstain: f64,
    pub num_strong_votes_abstain: f64,
    pub start_year: i64,
    pub end_year: i64,
}

pub fn comparisons_by_policy_vote_pivot(
    store: &PolicyStore,
    params: &ComparisonParams,
) -> Vec<PivotRow> {
    struct Acc {
        same: [f64; 2],
        different: [f64; 2],
        absent: [f64; 2],
        abstain: [f64; 2],
        start_year: i64,
        end_year: i64,
    }

    impl Default for Acc {
        fn default() -> Self {
            Self {
                same: [0.0; 2],
                different: [0.0; 2],
                absent: [0.0; 2],
                abstain: [0.0; 2],
                start_year: i64::MAX,
                end_year: i64::MIN,
            }
        }
    }

    let mut groups = BTreeMap::<(PeriodId, i64, PolicyId), Acc>::new();
    for comparison in comparisons_by_policy_vote(store, params) {
        let acc = groups
            .entry((
                comparison.period_id,
                comparison.is_target,
                comparison.policy_id,
            ))
            .or_default();
        let strength = usize::from(comparison.strong_int == 1);
        acc.same[strength] += comparison.num_divisions_agreed;
        acc.different[strength] += comparison.num_divisions_disagreed;
        acc.absent[strength] += comparison.num_divisions_absent;
        acc.abstain[strength] += comparison.num_divisions_abstain;
        acc.start_year = acc.start_year.min(comparison.division_year);
        acc.end_year = acc.end_year.max(comparison.division_year);
    }

    groups
        .into_iter()
        .map(|((period_id, is_target, policy_id), acc)| PivotRow {
            period_id,
            is_target,
            policy_id,
            num_votes_same: acc.same[0],
            num_strong_votes_same: acc.same[1],
            num_votes_different: acc.different[0],
            num_strong_votes_different: acc.different[1],
            num_votes_absent: acc.absent[0],
            num_strong_votes_absent: acc.absent[1],
            num_votes_abstain: acc.abstain[0],
            num_strong_votes_abstain: acc.abstain[1],
            start_year: acc.start_year,
            end_year: acc.end_year,
        })
        .collect()
}

/// The pivot full-outer-joined with the agreement counts on
/// (policy, period), with the person/chamber/party constants injected.
/// Agreement counts attach to both target and comparator rows; a
/// (policy, period) seen only on the agreement side yields a single
/// row with `is_target` coalesced to 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub period_id: PeriodId,
    pub policy_id: PolicyId,
    pub is_target: i64,
    pub person_id: PersonId,
    pub chamber_id: ChamberId,
    pub party_id: PartyId,
    pub num_votes_same: f64,
    pub num_strong_votes_same: f64,
    pub num_votes_different: f64,
    pub num_strong_votes_different: f64,
    pub num_votes_absent: f64,
    pub num_strong_votes_absent: f64,
    pub num_votes_abstain: f64,
    pub num_strong_votes_abstain: f64,
    pub num_agreements_same: f64,
    pub num_strong_agreements_same: f64,
    pub num_agreements_different: f64,
    pub num_strong_agreements_different: f64,
    pub start_year: i64,
    pub end_year: i64,
}

pub fn joined_division_agreement_comparison(
    store: &PolicyStore,
    params: &ComparisonParams,
) -> Vec<ComparisonRow> {
    let pivot = comparisons_by_policy_vote_pivot(store, params);
    let agreements = agreement_count(store, params.person_id);
    let agreements_by_key: BTreeMap<(PeriodId, PolicyId), &AgreementCountRow> = agreements
        .iter()
        .map(|row| ((row.period_id, row.policy_id), row))
        .collect();

    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(pivot.len());

    for row in &pivot {
        seen.insert((row.period_id, row.policy_id));
        let agreement = agreements_by_key.get(&(row.period_id, row.policy_id));
        out.push(ComparisonRow {
            period_id: row.period_id,
            policy_id: row.policy_id,
            is_target: row.is_target,
            person_id: params.person_id,
            chamber_id: params.chamber_id,
            party_id: params.party_id,
            num_votes_same: row.num_votes_same,
            num_strong_votes_same: row.num_strong_votes_same,
            num_votes_different: row.num_votes_different,
            num_strong_votes_different: row.num_strong_votes_different,
            num_votes_absent: row.num_votes_absent,
            num_strong_votes_absent: row.num_strong_votes_absent,
            num_votes_abstain: row.num_votes_abstain,
            num_strong_votes_abstain: row.num_strong_votes_abstain,
            num_agreements_same: agreement.map_or(0.0, |a| a.num_agreements_same),
            num_strong_agreements_same: agreement.map_or(0.0, |a| a.num_strong_agreements_same),
            num_agreements_different: agreement.map_or(0.0, |a| a.num_agreements_different),
            num_strong_agreements_different: agreement
                .map_or(0.0, |a| a.num_strong_agreements_different),
            start_year: row.start_year,
            end_year: row.end_year,
        });
    }

    for ((period_id, policy_id), agreement) in &agreements_by_key {
        if seen.contains(&(*period_id, *policy_id)) {
            continue;
        }
        out.push(ComparisonRow {
            period_id: *period_id,
            policy_id: *policy_id,
            is_target: 0,
            person_id: params.person_id,
            chamber_id: params.chamber_id,
            party_id: params.party_id,
            num_votes_same: 0.0,
            num_strong_votes_same: 0.0,
            num_votes_different: 0.0,
            num_strong_votes_different: 0.0,
            num_votes_absent: 0.0,
            num_strong_votes_absent: 0.0,
            num_votes_abstain: 0.0,
            num_strong_votes_abstain: 0.0,
            num_agreements_same: agreement.num_agreements_same,
            num_strong_agreements_same: agreement.num_strong_agreements_same,
            num_agreements_different: agreement.num_agreements_different,
            num_strong_agreements_different: agreement.num_strong_agreements_different,
            start_year: 0,
            end_year: 0,
        });
    }

    out.sort_by_key(|row| (row.period_id, row.is_target, row.policy_id));
    out
}
