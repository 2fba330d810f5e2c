//! Staging preparation: expands policy links into the five relevant
//! tables the macro library consumes. Runs before any calculation and
//! writes each table atomically.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::Datelike;
use tracing::info;
use va_store::tables::{
    AgreementRow, CollectivePresence, DivisionRow, MembershipRow, PeriodRow, PolicyLinkRow,
    RelevantAgreement, RelevantDivision, RelevantPersonPolicyPeriod, VoteRow,
};
use va_store::{DataDirs, RawTables, StagingData};
use va_types::{AgreementId, DivisionId, PolicyDirection};

use crate::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepReport {
    pub divisions: usize,
    pub agreements: usize,
    pub votes: usize,
    pub collective: usize,
    pub relevant: usize,
}

/// Pure construction of the staging tables from the raw inputs.
/// Neutral links contribute nothing to scoring and are dropped here;
/// so is any link whose decision id resolves to nothing (upstream
/// drift is tolerated by dropping, not failing).
#[must_use]
pub fn build_staging(raw: &RawTables) -> StagingData {
    let divisions_by_id: HashMap<DivisionId, &DivisionRow> =
        raw.divisions.iter().map(|d| (d.id, d)).collect();
    let agreements_by_id: HashMap<AgreementId, &AgreementRow> =
        raw.agreements.iter().map(|a| (a.id, a)).collect();
    let memberships_by_id: HashMap<i64, &MembershipRow> =
        raw.memberships.iter().map(|m| (m.id, m)).collect();

    let scored_links = |links: &[PolicyLinkRow]| -> Vec<PolicyLinkRow> {
        links
            .iter()
            .filter(|link| link.alignment != PolicyDirection::Neutral)
            .cloned()
            .collect()
    };

    let mut relevant_divisions = Vec::new();
    for link in scored_links(&raw.division_links) {
        let Some(division) = divisions_by_id.get(&link.decision_id) else {
            continue;
        };
        for period in periods_covering(&raw.periods, division.chamber_id, division.date) {
            relevant_divisions.push(RelevantDivision {
                policy_id: link.policy_id,
                period_id: period.id,
                division_id: division.id,
                chamber_id: division.chamber_id,
                date: division.date,
                division_year: i64::from(division.date.year()),
                division_number: division.division_number,
                strong_int: link.strength.strong_int(),
                agree_int: i64::from(link.alignment == PolicyDirection::Agree),
            });
        }
    }
    relevant_divisions.sort_by_key(|r| (r.division_id, r.policy_id, r.period_id));

    let mut relevant_agreements = Vec::new();
    for link in scored_links(&raw.agreement_links) {
        let Some(agreement) = agreements_by_id.get(&link.decision_id) else {
            continue;
        };
        for period in periods_covering(&raw.periods, agreement.chamber_id, agreement.date) {
            relevant_agreements.push(RelevantAgreement {
                policy_id: link.policy_id,
                period_id: period.id,
                agreement_id: agreement.id,
                chamber_id: agreement.chamber_id,
                date: agreement.date,
                strong_int: link.strength.strong_int(),
                agree_int: i64::from(link.alignment == PolicyDirection::Agree),
            });
        }
    }
    relevant_agreements.sort_by_key(|r| (r.agreement_id, r.policy_id, r.period_id));

    let relevant_division_ids: HashSet<DivisionId> = relevant_divisions
        .iter()
        .map(|r| r.division_id)
        .collect();
    let mut relevant_votes: Vec<VoteRow> = raw
        .votes
        .iter()
        .filter(|v| relevant_division_ids.contains(&v.division_id))
        .cloned()
        .collect();
    relevant_votes.sort_by_key(|v| (v.person_id, v.division_id));

    // Presence rows: one per (person, agreement) where a membership in
    // the agreement's chamber covers the agreement date.
    let linked_agreement_ids: BTreeSet<AgreementId> = relevant_agreements
        .iter()
        .map(|r| r.agreement_id)
        .collect();
    let mut collective = Vec::new();
    for agreement_id in &linked_agreement_ids {
        let Some(agreement) = agreements_by_id.get(agreement_id) else {
            continue;
        };
        for membership in &raw.memberships {
            if membership.chamber_id == agreement.chamber_id && membership.covers(agreement.date) {
                collective.push(CollectivePresence {
                    person_id: membership.person_id,
                    membership_id: membership.id,
                    decision_id: agreement.id,
                    date: agreement.date,
                });
            }
        }
    }
    collective.sort_by_key(|c| (c.person_id, c.date, c.decision_id));

    // The (person, chamber, party, policy, period) universe, from the
    // vote side and the agreement side.
    let mut votes_by_division = HashMap::<DivisionId, Vec<&VoteRow>>::new();
    for vote in &relevant_votes {
        votes_by_division.entry(vote.division_id).or_default().push(vote);
    }
    let mut collective_by_decision = HashMap::<AgreementId, Vec<&CollectivePresence>>::new();
    for presence in &collective {
        collective_by_decision
            .entry(presence.decision_id)
            .or_default()
            .push(presence);
    }

    let mut universe = BTreeSet::new();
    for division in &relevant_divisions {
        for vote in votes_by_division
            .get(&division.division_id)
            .into_iter()
            .flatten()
        {
            universe.insert(RelevantPersonPolicyPeriod {
                person_id: vote.person_id,
                chamber_id: division.chamber_id,
                party_id: vote.effective_party_id,
                policy_id: division.policy_id,
                period_id: division.period_id,
            });
        }
    }
    for agreement in &relevant_agreements {
        for presence in collective_by_decision
            .get(&agreement.agreement_id)
            .into_iter()
            .flatten()
        {
            let party_id = memberships_by_id
                .get(&presence.membership_id)
                .and_then(|m| m.effective_party_id);
            universe.insert(RelevantPersonPolicyPeriod {
                person_id: presence.person_id,
                chamber_id: agreement.chamber_id,
                party_id,
                policy_id: agreement.policy_id,
                period_id: agreement.period_id,
            });
        }
    }

    StagingData {
        divisions: relevant_divisions,
        agreements: relevant_agreements,
        votes: relevant_votes,
        collective,
        relevant: universe.into_iter().collect(),
        memberships: Vec::new(),
        policies: Vec::new(),
    }
}

fn periods_covering(
    periods: &[PeriodRow],
    chamber_id: i64,
    date: chrono::NaiveDate,
) -> impl Iterator<Item = &PeriodRow> {
    periods
        .iter()
        .filter(move |p| p.chamber_id == chamber_id && p.covers(date))
}

/// Materialize the staging tables under the compiled directory.
pub fn run_prep(raw: &RawTables, dirs: &DataDirs) -> Result<PrepReport, PipelineError> {
    let staging = build_staging(raw);

    let compiled = dirs.compiled_dir();
    std::fs::create_dir_all(&compiled).map_err(|source| PipelineError::Io {
        path: compiled.clone(),
        source,
    })?;

    RelevantDivision::write_all(&dirs.relevant_divisions_path(), &staging.divisions)?;
    RelevantAgreement::write_all(&dirs.relevant_agreements_path(), &staging.agreements)?;
    VoteRow::write_all(&dirs.relevant_votes_path(), &staging.votes)?;
    CollectivePresence::write_all(&dirs.collective_path(), &staging.collective)?;
    RelevantPersonPolicyPeriod::write_all(&dirs.relevant_people_path(), &staging.relevant)?;

    let report = PrepReport {
        divisions: staging.divisions.len(),
        agreements: staging.agreements.len(),
        votes: staging.votes.len(),
        collective: staging.collective.len(),
        relevant: staging.relevant.len(),
    };
    info!(
        divisions = report.divisions,
        agreements = report.agreements,
        votes = report.votes,
        collective = report.collective,
        relevant = report.relevant,
        "staging tables written"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use va_store::RawTables;
    use va_store::tables::{
        AgreementRow, DivisionRow, MembershipRow, PeriodRow, PolicyLinkRow, VoteRow,
    };
    use va_types::{PolicyDirection, PolicyStrength};

    use super::build_staging;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn raw_fixture() -> RawTables {
        RawTables {
            divisions: vec![DivisionRow {
                id: 100,
                key: "pw-2020-01-01-1-commons".to_owned(),
                chamber_id: 1,
                date: date(2020, 1, 1),
                division_number: 1,
            }],
            agreements: vec![AgreementRow {
                id: 900,
                key: "a-commons-2020-07-12-b.512.2.2".to_owned(),
                chamber_id: 1,
                date: date(2020, 7, 12),
            }],
            votes: vec![
                VoteRow {
                    division_id: 100,
                    person_id: 1,
                    membership_id: 1001,
                    effective_vote_int: 1,
                    abstain_int: 0,
                    absent_int: 0,
                    effective_party_id: Some(5),
                },
                VoteRow {
                    division_id: 999,
                    person_id: 1,
                    membership_id: 1001,
                    effective_vote_int: 1,
                    abstain_int: 0,
                    absent_int: 0,
                    effective_party_id: Some(5),
                },
            ],
            memberships: vec![MembershipRow {
                id: 1001,
                person_id: 1,
                chamber_id: 1,
                party_id: Some(5),
                effective_party_id: Some(5),
                start_date: date(2019, 12, 13),
                end_date: date(2024, 5, 30),
            }],
            periods: vec![
                PeriodRow {
                    id: 1,
                    slug: "all_time".to_owned(),
                    chamber_id: 1,
                    start_date: date(2010, 1, 1),
                    end_date: date(9999, 12, 31),
                },
                // same dates, wrong chamber: must not match
                PeriodRow {
                    id: 2,
                    slug: "all_time".to_owned(),
                    chamber_id: 2,
                    start_date: date(2010, 1, 1),
                    end_date: date(9999, 12, 31),
                },
            ],
            division_links: vec![
                PolicyLinkRow {
                    policy_id: 10,
                    decision_id: 100,
                    alignment: PolicyDirection::Agree,
                    strength: PolicyStrength::Strong,
                },
                PolicyLinkRow {
                    policy_id: 10,
                    decision_id: 100,
                    alignment: PolicyDirection::Neutral,
                    strength: PolicyStrength::Strong,
                },
            ],
            agreement_links: vec![PolicyLinkRow {
                policy_id: 10,
                decision_id: 900,
                alignment: PolicyDirection::Against,
                strength: PolicyStrength::Weak,
            }],
            ..RawTables::default()
        }
    }

    #[test]
    fn neutral_links_are_dropped() {
        let staging = build_staging(&raw_fixture());
        assert_eq!(staging.divisions.len(), 1);
        assert_eq!(staging.divisions[0].agree_int, 1);
        assert_eq!(staging.divisions[0].strong_int, 1);
    }

    #[test]
    fn periods_match_on_chamber_as_well_as_date() {
        let staging = build_staging(&raw_fixture());
        assert!(staging.divisions.iter().all(|d| d.period_id == 1));
        assert!(staging.agreements.iter().all(|a| a.period_id == 1));
    }

    #[test]
    fn votes_are_restricted_to_relevant_divisions() {
        let staging = build_staging(&raw_fixture());
        assert_eq!(staging.votes.len(), 1);
        assert_eq!(staging.votes[0].division_id, 100);
    }

    #[test]
    fn collective_presence_requires_membership_covering_the_date() {
        let staging = build_staging(&raw_fixture());
        assert_eq!(staging.collective.len(), 1);
        assert_eq!(staging.collective[0].person_id, 1);
        assert_eq!(staging.collective[0].decision_id, 900);
    }

    #[test]
    fn universe_covers_vote_and_agreement_sides() {
        let staging = build_staging(&raw_fixture());
        assert_eq!(staging.relevant.len(), 1);
        let entry = &staging.relevant[0];
        assert_eq!(entry.person_id, 1);
        assert_eq!(entry.policy_id, 10);
        assert_eq!(entry.party_id, Some(5));
    }
}
