//! Parquet IO for `VoteDistribution` rows as they appear in the
//! per-person partition files. The coalesced sink file adds an `id`
//! column and a nullable party; that variant lives with the coalescer.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use va_io::{BatchColumns, TableError};
use va_types::VoteDistribution;

/// The eight vote buckets followed by the four agreement buckets, in
/// sink order.
pub const COUNT_COLUMNS: [&str; 12] = [
    "num_votes_same",
    "num_strong_votes_same",
    "num_votes_different",
    "num_strong_votes_different",
    "num_votes_absent",
    "num_strong_votes_absent",
    "num_votes_abstain",
    "num_strong_votes_abstain",
    "num_agreements_same",
    "num_strong_agreements_same",
    "num_agreements_different",
    "num_strong_agreements_different",
];

#[must_use]
pub fn distribution_schema() -> SchemaRef {
    let mut fields = vec![
        Field::new("period_id", DataType::Int64, false),
        Field::new("policy_id", DataType::Int64, false),
        Field::new("is_target", DataType::Int64, false),
        Field::new("person_id", DataType::Int64, false),
        Field::new("chamber_id", DataType::Int64, false),
        Field::new("party_id", DataType::Int64, false),
    ];
    fields.extend(
        COUNT_COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Float64, false)),
    );
    fields.push(Field::new("start_year", DataType::Int64, false));
    fields.push(Field::new("end_year", DataType::Int64, false));
    fields.push(Field::new("policy_hash", DataType::Utf8, false));
    fields.push(Field::new("distance_score", DataType::Float64, false));
    Arc::new(Schema::new(fields))
}

/// Bucket accessor by sink column name.
#[must_use]
pub fn count_value(row: &VoteDistribution, column: &str) -> f64 {
    match column {
        "num_votes_same" => row.num_votes_same,
        "num_strong_votes_same" => row.num_strong_votes_same,
        "num_votes_different" => row.num_votes_different,
        "num_strong_votes_different" => row.num_strong_votes_different,
        "num_votes_absent" => row.num_votes_absent,
        "num_strong_votes_absent" => row.num_strong_votes_absent,
        "num_votes_abstain" => row.num_votes_abstain,
        "num_strong_votes_abstain" => row.num_strong_votes_abstain,
        "num_agreements_same" => row.num_agreements_same,
        "num_strong_agreements_same" => row.num_strong_agreements_same,
        "num_agreements_different" => row.num_agreements_different,
        "num_strong_agreements_different" => row.num_strong_agreements_different,
        _ => unreachable!("count_value called with a non-count column"),
    }
}

pub fn to_batch(rows: &[VoteDistribution]) -> Result<RecordBatch, TableError> {
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(
            rows.iter().map(|r| r.period_id).collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from(
            rows.iter().map(|r| r.policy_id).collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from(
            rows.iter().map(|r| r.is_target).collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from(
            rows.iter().map(|r| r.person_id).collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from(
            rows.iter().map(|r| r.chamber_id).collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from(
            rows.iter().map(|r| r.party_id).collect::<Vec<_>>(),
        )),
    ];
    for name in COUNT_COLUMNS {
        columns.push(Arc::new(Float64Array::from(
            rows.iter().map(|r| count_value(r, name)).collect::<Vec<_>>(),
        )));
    }
    columns.push(Arc::new(Int64Array::from(
        rows.iter().map(|r| r.start_year).collect::<Vec<_>>(),
    )));
    columns.push(Arc::new(Int64Array::from(
        rows.iter().map(|r| r.end_year).collect::<Vec<_>>(),
    )));
    columns.push(Arc::new(StringArray::from_iter_values(
        rows.iter().map(|r| r.policy_hash.as_str()),
    )));
    columns.push(Arc::new(Float64Array::from(
        rows.iter().map(|r| r.distance_score).collect::<Vec<_>>(),
    )));

    Ok(RecordBatch::try_new(distribution_schema(), columns)?)
}

pub fn write_distributions(path: &Path, rows: &[VoteDistribution]) -> Result<(), TableError> {
    let batch = to_batch(rows)?;
    va_io::write_batches_atomic(path, distribution_schema(), &[batch])
}

pub fn read_distributions(path: &Path) -> Result<Vec<VoteDistribution>, TableError> {
    let batches = va_io::read_batches(path)?;
    let mut rows = Vec::new();
    for batch in &batches {
        let columns = BatchColumns::new(path, batch);
        let period_id = columns.i64("period_id")?;
        let policy_id = columns.i64("policy_id")?;
        let is_target = columns.i64("is_target")?;
        let person_id = columns.i64("person_id")?;
        let chamber_id = columns.i64("chamber_id")?;
        let party_id = columns.i64("party_id")?;
        let counts = COUNT_COLUMNS
            .iter()
            .map(|name| columns.f64(name))
            .collect::<Result<Vec<_>, _>>()?;
        let start_year = columns.i64("start_year")?;
        let end_year = columns.i64("end_year")?;
        let policy_hash = columns.utf8("policy_hash")?;
        let distance_score = columns.f64("distance_score")?;

        for row in 0..columns.row_count() {
            let bucket = |idx: usize| counts[idx].value(row);
            rows.push(VoteDistribution {
                policy_id: policy_id.value(row)?,
                person_id: person_id.value(row)?,
                period_id: period_id.value(row)?,
                chamber_id: chamber_id.value(row)?,
                party_id: party_id.value(row)?,
                is_target: is_target.value(row)?,
                num_votes_same: bucket(0)?,
                num_strong_votes_same: bucket(1)?,
                num_votes_different: bucket(2)?,
                num_strong_votes_different: bucket(3)?,
                num_votes_absent: bucket(4)?,
                num_strong_votes_absent: bucket(5)?,
                num_votes_abstain: bucket(6)?,
                num_strong_votes_abstain: bucket(7)?,
                num_agreements_same: bucket(8)?,
                num_strong_agreements_same: bucket(9)?,
                num_agreements_different: bucket(10)?,
                num_strong_agreements_different: bucket(11)?,
                start_year: start_year.value(row)?,
                end_year: end_year.value(row)?,
                distance_score: distance_score.value(row)?,
                policy_hash: policy_hash.value(row)?,
            });
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use va_types::VoteDistribution;

    use super::{read_distributions, write_distributions};

    fn sample_row(is_target: i64) -> VoteDistribution {
        VoteDistribution {
            policy_id: 6667,
            person_id: 10001,
            period_id: 1,
            chamber_id: 1,
            party_id: 5,
            is_target,
            num_votes_same: if is_target == 1 { 1.0 } else { 0.5 },
            num_strong_votes_same: 0.0,
            num_votes_different: 0.0,
            num_strong_votes_different: if is_target == 1 { 0.0 } else { 0.4 },
            num_votes_absent: 0.0,
            num_strong_votes_absent: if is_target == 1 { 0.0 } else { 0.1 },
            num_votes_abstain: 0.0,
            num_strong_votes_abstain: 0.0,
            num_agreements_same: 0.0,
            num_strong_agreements_same: 0.0,
            num_agreements_different: 0.0,
            num_strong_agreements_different: 0.0,
            start_year: 2021,
            end_year: 2021,
            distance_score: 0.25,
            policy_hash: "1a2b3c4d".to_owned(),
        }
    }

    #[test]
    fn partition_rows_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("10001_1_5.parquet");
        let rows = vec![sample_row(1), sample_row(0)];
        write_distributions(&path, &rows).expect("write");
        assert_eq!(read_distributions(&path).expect("read"), rows);
    }
}
