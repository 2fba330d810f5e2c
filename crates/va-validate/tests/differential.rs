//! The slow path must agree with the macro dataflow on a fixture that
//! exercises divisions, agreements, cohort fractions, and the party
//! sentinel.

use chrono::NaiveDate;
use va_pipeline::{RunOptions, run_calculations};
use va_store::tables::{
    AgreementRow, DivisionRow, MembershipRow, PeriodRow, PolicyLinkRow, PolicyRow, VoteRow,
};
use va_store::{DataDirs, PolicyStore, RawTables, StagingData};
use va_types::{PolicyDirection, PolicyStatus, PolicyStrength, StrengthMeaning};
use va_validate::{ValidationOptions, validate_partitions};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn vote(division_id: i64, person_id: i64, effective: i64, abstain: bool, absent: bool) -> VoteRow {
    VoteRow {
        division_id,
        person_id,
        membership_id: person_id + 1000,
        effective_vote_int: effective,
        abstain_int: i64::from(abstain),
        absent_int: i64::from(absent),
        effective_party_id: Some(5),
    }
}

fn fixture_store() -> PolicyStore {
    let raw = RawTables {
        divisions: vec![
            DivisionRow {
                id: 100,
                key: "pw-2020-01-01-1-commons".to_owned(),
                chamber_id: 1,
                date: date(2020, 1, 1),
                division_number: 1,
            },
            DivisionRow {
                id: 101,
                key: "pw-2021-03-04-7-commons".to_owned(),
                chamber_id: 1,
                date: date(2021, 3, 4),
                division_number: 7,
            },
        ],
        agreements: vec![AgreementRow {
            id: 900,
            key: "a-commons-2021-07-12-b.512.2.2".to_owned(),
            chamber_id: 1,
            date: date(2021, 7, 12),
        }],
        votes: vec![
            vote(100, 1, 1, false, false),
            vote(101, 1, 0, true, false),
            vote(100, 2, -1, false, false),
            vote(101, 2, 1, false, false),
            vote(100, 3, 0, false, true),
            vote(101, 3, -1, false, false),
        ],
        memberships: (1..=3)
            .map(|person_id| MembershipRow {
                id: person_id + 1000,
                person_id,
                chamber_id: 1,
                party_id: Some(5),
                effective_party_id: Some(5),
                start_date: date(2019, 12, 13),
                end_date: date(2024, 5, 30),
            })
            .collect(),
        periods: vec![PeriodRow {
            id: 1,
            slug: "all_time".to_owned(),
            chamber_id: 1,
            start_date: date(2010, 1, 1),
            end_date: date(9999, 12, 31),
        }],
        division_links: vec![
            PolicyLinkRow {
                policy_id: 10,
                decision_id: 100,
                alignment: PolicyDirection::Agree,
                strength: PolicyStrength::Strong,
            },
            PolicyLinkRow {
                policy_id: 10,
                decision_id: 101,
                alignment: PolicyDirection::Against,
                strength: PolicyStrength::Strong,
            },
        ],
        agreement_links: vec![PolicyLinkRow {
            policy_id: 10,
            decision_id: 900,
            alignment: PolicyDirection::Agree,
            strength: PolicyStrength::Strong,
        }],
        ..RawTables::default()
    };

    let mut staging: StagingData = va_pipeline::build_staging(&raw);
    staging.memberships = raw.memberships.clone();
    staging.policies = vec![PolicyRow {
        id: 10,
        chamber_id: 1,
        status: PolicyStatus::Active,
        strength_meaning: StrengthMeaning::Simplified,
        policy_hash: "aaaa1111".to_owned(),
    }];
    PolicyStore::new(staging)
}

#[test]
fn slow_path_agrees_with_the_pipeline() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let dirs = DataDirs::new(tmp.path());
    let store = fixture_store();

    run_calculations(&store, &dirs, &RunOptions::default()).expect("full run");

    let report =
        validate_partitions(&store, &dirs, &ValidationOptions::default()).expect("validate");
    assert!(report.triples_checked >= 3);
    assert!(report.rows_checked > 0);
    assert!(report.passed(), "failures: {:?}", report.failures);
}

#[test]
fn a_tampered_partition_is_reported() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let dirs = DataDirs::new(tmp.path());
    let store = fixture_store();
    run_calculations(&store, &dirs, &RunOptions::default()).expect("full run");

    // corrupt one partition: double a count bucket
    let path = dirs.partition_path(1, 1, 5);
    let mut rows = va_store::distributions::read_distributions(&path).expect("read");
    rows[0].num_strong_votes_same += 2.0;
    va_store::distributions::write_distributions(&path, &rows).expect("write");

    let report =
        validate_partitions(&store, &dirs, &ValidationOptions::default()).expect("validate");
    assert!(!report.passed());
    assert!(
        report
            .failures
            .iter()
            .any(|f| f.person_id == 1 && f.field == "num_strong_votes_same")
    );
}

#[test]
fn sampling_bounds_the_number_of_triples() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let dirs = DataDirs::new(tmp.path());
    let store = fixture_store();
    run_calculations(&store, &dirs, &RunOptions::default()).expect("full run");

    let report = validate_partitions(
        &store,
        &dirs,
        &ValidationOptions {
            sample: 1,
            ..ValidationOptions::default()
        },
    )
    .expect("validate");
    assert_eq!(report.triples_checked, 1);
}
