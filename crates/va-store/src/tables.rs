//! Row types for the input and staging tables, with their parquet
//! schemas. Most tables are plain (int / float / utf8 / date) columns
//! and get their IO generated by `table_io!`; the policy tables carry
//! enum-valued columns and are decoded by hand.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Date32Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use va_io::{BatchColumns, TableError, date_to_days};
use va_types::{
    AgreementId, ChamberId, ChamberSlug, DivisionId, DomainError, MembershipId, PartyId, PeriodId,
    PersonId, PolicyDirection, PolicyId, PolicyStatus, PolicyStrength, StrengthMeaning,
};

use crate::StoreError;

macro_rules! table_io {
    ($row:ident { $($field:ident: $kind:tt),+ $(,)? }) => {
        impl $row {
            #[must_use]
            pub fn schema() -> SchemaRef {
                Arc::new(Schema::new(vec![
                    $( table_io!(@field $field: $kind) ),+
                ]))
            }

            pub fn to_batch(rows: &[Self]) -> Result<RecordBatch, TableError> {
                let columns: Vec<ArrayRef> = vec![
                    $( table_io!(@array rows, $field: $kind) ),+
                ];
                Ok(RecordBatch::try_new(Self::schema(), columns)?)
            }

            pub fn read_all(path: &Path) -> Result<Vec<Self>, TableError> {
                let batches = va_io::read_batches(path)?;
                let mut rows = Vec::new();
                for batch in &batches {
                    let columns = BatchColumns::new(path, batch);
                    $( let $field = table_io!(@col columns, $field: $kind); )+
                    for row in 0..columns.row_count() {
                        rows.push(Self {
                            $( $field: table_io!(@value $field, row, $kind) ),+
                        });
                    }
                }
                Ok(rows)
            }

            pub fn write_all(path: &Path, rows: &[Self]) -> Result<(), TableError> {
                let batch = Self::to_batch(rows)?;
                va_io::write_batches_atomic(path, Self::schema(), &[batch])
            }
        }
    };

    (@field $field:ident: i64) => { Field::new(stringify!($field), DataType::Int64, false) };
    (@field $field:ident: opt_i64) => { Field::new(stringify!($field), DataType::Int64, true) };
    (@field $field:ident: utf8) => { Field::new(stringify!($field), DataType::Utf8, false) };
    (@field $field:ident: date) => { Field::new(stringify!($field), DataType::Date32, false) };

    (@array $rows:ident, $field:ident: i64) => {
        Arc::new(Int64Array::from($rows.iter().map(|r| r.$field).collect::<Vec<_>>())) as ArrayRef
    };
    (@array $rows:ident, $field:ident: opt_i64) => {
        Arc::new(Int64Array::from($rows.iter().map(|r| r.$field).collect::<Vec<_>>())) as ArrayRef
    };
    (@array $rows:ident, $field:ident: utf8) => {
        Arc::new(StringArray::from_iter_values($rows.iter().map(|r| r.$field.as_str()))) as ArrayRef
    };
    (@array $rows:ident, $field:ident: date) => {
        Arc::new(Date32Array::from(
            $rows.iter().map(|r| date_to_days(r.$field)).collect::<Vec<_>>(),
        )) as ArrayRef
    };

    (@col $columns:ident, $field:ident: i64) => { $columns.i64(stringify!($field))? };
    (@col $columns:ident, $field:ident: opt_i64) => { $columns.i64(stringify!($field))? };
    (@col $columns:ident, $field:ident: utf8) => { $columns.utf8(stringify!($field))? };
    (@col $columns:ident, $field:ident: date) => { $columns.date(stringify!($field))? };

    (@value $col:ident, $row:ident, i64) => { $col.value($row)? };
    (@value $col:ident, $row:ident, opt_i64) => { $col.opt($row) };
    (@value $col:ident, $row:ident, utf8) => { $col.value($row)? };
    (@value $col:ident, $row:ident, date) => { $col.checked_value($row)? };
}

/// A chamber and its canonical slug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChamberRow {
    pub id: ChamberId,
    pub slug: ChamberSlug,
}

impl ChamberRow {
    #[must_use]
    pub fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("slug", DataType::Utf8, false),
        ]))
    }

    pub fn write_all(path: &Path, rows: &[Self]) -> Result<(), TableError> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(
                rows.iter().map(|r| r.id).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.slug.as_str()),
            )),
        ];
        let batch = RecordBatch::try_new(Self::schema(), columns)?;
        va_io::write_batches_atomic(path, Self::schema(), &[batch])
    }

    pub fn read_all(path: &Path) -> Result<Vec<Self>, StoreError> {
        let batches = va_io::read_batches(path)?;
        let mut rows = Vec::new();
        for batch in &batches {
            let columns = BatchColumns::new(path, batch);
            let ids = columns.i64("id")?;
            let slugs = columns.utf8("slug")?;
            for row in 0..columns.row_count() {
                rows.push(Self {
                    id: ids.value(row)?,
                    slug: parse_enum(path, "slug", row, &slugs.value(row)?)?,
                });
            }
        }
        Ok(rows)
    }
}

/// A recorded vote in a chamber. `key` is the stable slug;
/// (chamber, date, division_number) is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivisionRow {
    pub id: DivisionId,
    pub key: String,
    pub chamber_id: ChamberId,
    pub date: NaiveDate,
    pub division_number: i64,
}

table_io!(DivisionRow {
    id: i64,
    key: utf8,
    chamber_id: i64,
    date: date,
    division_number: i64,
});

/// A decision reached without a vote; presence counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementRow {
    pub id: AgreementId,
    pub key: String,
    pub chamber_id: ChamberId,
    pub date: NaiveDate,
}

table_io!(AgreementRow {
    id: i64,
    key: utf8,
    chamber_id: i64,
    date: date,
});

/// One vote row per (division, member on the division's date).
/// `effective_vote_int` folds tellers into their side: 1 aye, -1 no,
/// 0 otherwise. Members who did not attend appear with `absent_int`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRow {
    pub division_id: DivisionId,
    pub person_id: PersonId,
    pub membership_id: MembershipId,
    pub effective_vote_int: i64,
    pub abstain_int: i64,
    pub absent_int: i64,
    pub effective_party_id: Option<PartyId>,
}

table_io!(VoteRow {
    division_id: i64,
    person_id: i64,
    membership_id: i64,
    effective_vote_int: i64,
    abstain_int: i64,
    absent_int: i64,
    effective_party_id: opt_i64,
});

/// Open-ended memberships carry the 9999-12-31 sentinel end date.
/// Memberships of one person in one chamber never overlap once
/// collapsed by effective party.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipRow {
    pub id: MembershipId,
    pub person_id: PersonId,
    pub chamber_id: ChamberId,
    pub party_id: Option<PartyId>,
    pub effective_party_id: Option<PartyId>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl MembershipRow {
    #[must_use]
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

table_io!(MembershipRow {
    id: i64,
    person_id: i64,
    chamber_id: i64,
    party_id: opt_i64,
    effective_party_id: opt_i64,
    start_date: date,
    end_date: date,
});

/// A closed date interval scoping one comparison run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodRow {
    pub id: PeriodId,
    pub slug: String,
    pub chamber_id: ChamberId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl PeriodRow {
    #[must_use]
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

table_io!(PeriodRow {
    id: i64,
    slug: utf8,
    chamber_id: i64,
    start_date: date,
    end_date: date,
});

/// Division links expanded with the division and its containing
/// comparison period; one row per (policy, period, division).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevantDivision {
    pub policy_id: PolicyId,
    pub period_id: PeriodId,
    pub division_id: DivisionId,
    pub chamber_id: ChamberId,
    pub date: NaiveDate,
    pub division_year: i64,
    pub division_number: i64,
    pub strong_int: i64,
    pub agree_int: i64,
}

table_io!(RelevantDivision {
    policy_id: i64,
    period_id: i64,
    division_id: i64,
    chamber_id: i64,
    date: date,
    division_year: i64,
    division_number: i64,
    strong_int: i64,
    agree_int: i64,
});

/// Agreement links expanded the same way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevantAgreement {
    pub policy_id: PolicyId,
    pub period_id: PeriodId,
    pub agreement_id: AgreementId,
    pub chamber_id: ChamberId,
    pub date: NaiveDate,
    pub strong_int: i64,
    pub agree_int: i64,
}

table_io!(RelevantAgreement {
    policy_id: i64,
    period_id: i64,
    agreement_id: i64,
    chamber_id: i64,
    date: date,
    strong_int: i64,
    agree_int: i64,
});

/// One row per (person, agreement) where a membership in the
/// agreement's chamber covers the agreement date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectivePresence {
    pub person_id: PersonId,
    pub membership_id: MembershipId,
    pub decision_id: AgreementId,
    pub date: NaiveDate,
}

table_io!(CollectivePresence {
    person_id: i64,
    membership_id: i64,
    decision_id: i64,
    date: date,
});

/// The (person, chamber, party, policy, period) universe the pipeline
/// must consider. Party is nullable here and only here.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelevantPersonPolicyPeriod {
    pub person_id: PersonId,
    pub chamber_id: ChamberId,
    pub party_id: Option<PartyId>,
    pub policy_id: PolicyId,
    pub period_id: PeriodId,
}

table_io!(RelevantPersonPolicyPeriod {
    person_id: i64,
    chamber_id: i64,
    party_id: opt_i64,
    policy_id: i64,
    period_id: i64,
});

/// A curated policy. `policy_hash` digests the policy and its links;
/// the planner compares it against materialized hashes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRow {
    pub id: PolicyId,
    pub chamber_id: ChamberId,
    pub status: PolicyStatus,
    pub strength_meaning: StrengthMeaning,
    pub policy_hash: String,
}

impl PolicyRow {
    #[must_use]
    pub fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("chamber_id", DataType::Int64, false),
            Field::new("status", DataType::Utf8, false),
            Field::new("strength_meaning", DataType::Utf8, false),
            Field::new("policy_hash", DataType::Utf8, false),
        ]))
    }

    pub fn write_all(path: &Path, rows: &[Self]) -> Result<(), TableError> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(
                rows.iter().map(|r| r.id).collect::<Vec<_>>(),
            )),
            Arc::new(Int64Array::from(
                rows.iter().map(|r| r.chamber_id).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.status.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.strength_meaning.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.policy_hash.as_str()),
            )),
        ];
        let batch = RecordBatch::try_new(Self::schema(), columns)?;
        va_io::write_batches_atomic(path, Self::schema(), &[batch])
    }

    pub fn read_all(path: &Path) -> Result<Vec<Self>, StoreError> {
        let batches = va_io::read_batches(path)?;
        let mut rows = Vec::new();
        for batch in &batches {
            let columns = BatchColumns::new(path, batch);
            let ids = columns.i64("id")?;
            let chambers = columns.i64("chamber_id")?;
            let statuses = columns.utf8("status")?;
            let meanings = columns.utf8("strength_meaning")?;
            let hashes = columns.utf8("policy_hash")?;
            for row in 0..columns.row_count() {
                rows.push(Self {
                    id: ids.value(row)?,
                    chamber_id: chambers.value(row)?,
                    status: parse_enum(path, "status", row, &statuses.value(row)?)?,
                    strength_meaning: parse_enum(
                        path,
                        "strength_meaning",
                        row,
                        &meanings.value(row)?,
                    )?,
                    policy_hash: hashes.value(row)?,
                });
            }
        }
        Ok(rows)
    }
}

/// One decision → policy link. The same shape serves division and
/// agreement links; they live in separate files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyLinkRow {
    pub policy_id: PolicyId,
    pub decision_id: i64,
    pub alignment: PolicyDirection,
    pub strength: PolicyStrength,
}

impl PolicyLinkRow {
    #[must_use]
    pub fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("policy_id", DataType::Int64, false),
            Field::new("decision_id", DataType::Int64, false),
            Field::new("alignment", DataType::Utf8, false),
            Field::new("strength", DataType::Utf8, false),
        ]))
    }

    pub fn write_all(path: &Path, rows: &[Self]) -> Result<(), TableError> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(
                rows.iter().map(|r| r.policy_id).collect::<Vec<_>>(),
            )),
            Arc::new(Int64Array::from(
                rows.iter().map(|r| r.decision_id).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.alignment.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.strength.as_str()),
            )),
        ];
        let batch = RecordBatch::try_new(Self::schema(), columns)?;
        va_io::write_batches_atomic(path, Self::schema(), &[batch])
    }

    pub fn read_all(path: &Path) -> Result<Vec<Self>, StoreError> {
        let batches = va_io::read_batches(path)?;
        let mut rows = Vec::new();
        for batch in &batches {
            let columns = BatchColumns::new(path, batch);
            let policies = columns.i64("policy_id")?;
            let decisions = columns.i64("decision_id")?;
            let alignments = columns.utf8("alignment")?;
            let strengths = columns.utf8("strength")?;
            for row in 0..columns.row_count() {
                rows.push(Self {
                    policy_id: policies.value(row)?,
                    decision_id: decisions.value(row)?,
                    alignment: parse_enum(path, "alignment", row, &alignments.value(row)?)?,
                    strength: parse_enum(path, "strength", row, &strengths.value(row)?)?,
                });
            }
        }
        Ok(rows)
    }
}

fn parse_enum<T>(
    path: &Path,
    column: &'static str,
    row: usize,
    value: &str,
) -> Result<T, StoreError>
where
    T: std::str::FromStr<Err = DomainError>,
{
    value.parse().map_err(|source| StoreError::InvalidValue {
        path: path.to_path_buf(),
        column,
        row,
        source,
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use va_types::{PolicyDirection, PolicyStatus, PolicyStrength, StrengthMeaning};

    use super::{MembershipRow, PolicyLinkRow, PolicyRow, VoteRow};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn membership_interval_is_closed() {
        let membership = MembershipRow {
            id: 1,
            person_id: 10,
            chamber_id: 1,
            party_id: Some(5),
            effective_party_id: Some(5),
            start_date: date(2020, 1, 1),
            end_date: date(2021, 1, 1),
        };
        assert!(membership.covers(date(2020, 1, 1)));
        assert!(membership.covers(date(2021, 1, 1)));
        assert!(!membership.covers(date(2021, 1, 2)));
    }

    #[test]
    fn vote_rows_round_trip_nullable_party() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("votes.parquet");
        let rows = vec![
            VoteRow {
                division_id: 1,
                person_id: 10,
                membership_id: 100,
                effective_vote_int: 1,
                abstain_int: 0,
                absent_int: 0,
                effective_party_id: Some(5),
            },
            VoteRow {
                division_id: 1,
                person_id: 11,
                membership_id: 101,
                effective_vote_int: 0,
                abstain_int: 0,
                absent_int: 1,
                effective_party_id: None,
            },
        ];
        VoteRow::write_all(&path, &rows).expect("write");
        assert_eq!(VoteRow::read_all(&path).expect("read"), rows);
    }

    #[test]
    fn policy_rows_round_trip_enum_spellings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("policies.parquet");
        let rows = vec![PolicyRow {
            id: 1,
            chamber_id: 1,
            status: PolicyStatus::Active,
            strength_meaning: StrengthMeaning::Simplified,
            policy_hash: "0a1b2c3d".to_owned(),
        }];
        PolicyRow::write_all(&path, &rows).expect("write");
        assert_eq!(PolicyRow::read_all(&path).expect("read"), rows);
    }

    #[test]
    fn link_rows_reject_unknown_alignment_spelling() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("links.parquet");
        let rows = vec![PolicyLinkRow {
            policy_id: 1,
            decision_id: 2,
            alignment: PolicyDirection::Agree,
            strength: PolicyStrength::Strong,
        }];
        PolicyLinkRow::write_all(&path, &rows).expect("write");
        assert_eq!(PolicyLinkRow::read_all(&path).expect("read"), rows);
    }
}
