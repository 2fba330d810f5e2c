//! The coalescer: merges the per-person partition files into the
//! single load file, assigning a dense row-number id and mapping the
//! party sentinel back to NULL.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use tracing::info;
use va_io::BatchColumns;
use va_store::distributions::{COUNT_COLUMNS, count_value, read_distributions};
use va_store::DataDirs;
use va_types::{NO_PARTY, PartyId, VoteDistribution};

use crate::PipelineError;

/// One row of the coalesced load file; the only place `party_id` is
/// nullable.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkRow {
    pub id: i64,
    pub party_id: Option<PartyId>,
    pub distribution: VoteDistribution,
}

#[must_use]
pub fn sink_schema() -> SchemaRef {
    let mut fields = vec![
        Field::new("id", DataType::Int64, false),
        Field::new("policy_id", DataType::Int64, false),
        Field::new("person_id", DataType::Int64, false),
        Field::new("period_id", DataType::Int64, false),
        Field::new("chamber_id", DataType::Int64, false),
        Field::new("party_id", DataType::Int64, true),
        Field::new("is_target", DataType::Int64, false),
    ];
    fields.extend(
        COUNT_COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Float64, false)),
    );
    fields.push(Field::new("start_year", DataType::Int64, false));
    fields.push(Field::new("end_year", DataType::Int64, false));
    fields.push(Field::new("distance_score", DataType::Float64, false));
    fields.push(Field::new("policy_hash", DataType::Utf8, false));
    Arc::new(Schema::new(fields))
}

fn write_coalesced(path: &Path, rows: &[VoteDistribution]) -> Result<(), PipelineError> {
    let ids: Vec<i64> = (1..=rows.len() as i64).collect();
    let parties: Vec<Option<i64>> = rows
        .iter()
        .map(|r| (r.party_id != NO_PARTY).then_some(r.party_id))
        .collect();

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(ids)),
        Arc::new(Int64Array::from(
            rows.iter().map(|r| r.policy_id).collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from(
            rows.iter().map(|r| r.person_id).collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from(
            rows.iter().map(|r| r.period_id).collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from(
            rows.iter().map(|r| r.chamber_id).collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from(parties)),
        Arc::new(Int64Array::from(
            rows.iter().map(|r| r.is_target).collect::<Vec<_>>(),
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
    columns.push(Arc::new(Float64Array::from(
        rows.iter().map(|r| r.distance_score).collect::<Vec<_>>(),
    )));
    columns.push(Arc::new(StringArray::from_iter_values(
        rows.iter().map(|r| r.policy_hash.as_str()),
    )));

    let batch = RecordBatch::try_new(sink_schema(), columns).map_err(va_io::TableError::from)?;
    va_io::write_batches_atomic(path, sink_schema(), &[batch])?;
    Ok(())
}

pub fn read_coalesced(path: &Path) -> Result<Vec<SinkRow>, PipelineError> {
    let batches = va_io::read_batches(path)?;
    let mut rows = Vec::new();
    for batch in &batches {
        let columns = BatchColumns::new(path, batch);
        let ids = columns.i64("id")?;
        let policy_id = columns.i64("policy_id")?;
        let person_id = columns.i64("person_id")?;
        let period_id = columns.i64("period_id")?;
        let chamber_id = columns.i64("chamber_id")?;
        let party_id = columns.i64("party_id")?;
        let is_target = columns.i64("is_target")?;
        let counts = COUNT_COLUMNS
            .iter()
            .map(|name| columns.f64(name))
            .collect::<Result<Vec<_>, _>>()?;
        let start_year = columns.i64("start_year")?;
        let end_year = columns.i64("end_year")?;
        let distance_score = columns.f64("distance_score")?;
        let policy_hash = columns.utf8("policy_hash")?;

        for row in 0..columns.row_count() {
            let party = party_id.opt(row);
            let bucket = |idx: usize| counts[idx].value(row);
            rows.push(SinkRow {
                id: ids.value(row)?,
                party_id: party,
                distribution: VoteDistribution {
                    policy_id: policy_id.value(row)?,
                    person_id: person_id.value(row)?,
                    period_id: period_id.value(row)?,
                    chamber_id: chamber_id.value(row)?,
                    party_id: party.unwrap_or(NO_PARTY),
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
                },
            });
        }
    }
    Ok(rows)
}

/// Merge every partition file (in sorted filename order) into the
/// coalesced load file. The id is dense and stable for one coalesce
/// but carries no meaning beyond that.
pub fn coalesce_partitions(dirs: &DataDirs) -> Result<usize, PipelineError> {
    let mut rows: Vec<VoteDistribution> = Vec::new();
    for path in crate::partition_paths(&dirs.partitions_dir())? {
        rows.extend(read_distributions(&path)?);
    }

    write_coalesced(&dirs.coalesced_path(), &rows)?;
    info!(rows = rows.len(), "coalesced load file written");
    Ok(rows.len())
}
