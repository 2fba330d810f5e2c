//! The artifact writer: fans the per-person pipeline out over the
//! chosen (person, chamber, party) triples and writes one partition
//! file per triple. Failures are collected per person; the rest of
//! the fan-out continues.

use std::collections::BTreeSet;

use tracing::{info, warn};
use va_macros::ComparisonParams;
use va_store::{DataDirs, PolicyStore, distributions};
use va_types::{NO_PARTY, PersonId, PolicyId};

use crate::{PipelineError, calc, planner};

/// Attempts per partition file before the person is marked failed.
pub const WRITE_RETRY_LIMIT: u32 = 3;

#[derive(Debug, Clone, Default)]
pub struct CalcOptions {
    /// Recompute only people whose policy hashes drifted.
    pub update_from_hash: bool,
    /// Restrict to these people (still all their policies).
    pub person_ids: Option<Vec<PersonId>>,
    /// Restrict to people holding at least one of these policies.
    pub policy_ids: Option<Vec<PolicyId>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonFailure {
    pub person_id: PersonId,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct CalcReport {
    pub partitions_written: usize,
    pub rows_written: usize,
    pub failures: Vec<PersonFailure>,
}

/// Distinct (person, chamber, party) triples from the relevance
/// universe, with the party sentinel applied, optionally filtered.
#[must_use]
pub fn comparison_triples(
    store: &PolicyStore,
    person_filter: Option<&BTreeSet<PersonId>>,
    policy_filter: Option<&BTreeSet<PolicyId>>,
) -> Vec<ComparisonParams> {
    let mut triples = BTreeSet::new();
    for entry in store.relevant() {
        if person_filter.is_some_and(|filter| !filter.contains(&entry.person_id)) {
            continue;
        }
        if policy_filter.is_some_and(|filter| !filter.contains(&entry.policy_id)) {
            continue;
        }
        triples.insert((
            entry.person_id,
            entry.chamber_id,
            entry.party_id.unwrap_or(NO_PARTY),
        ));
    }
    triples
        .into_iter()
        .map(|(person_id, chamber_id, party_id)| ComparisonParams {
            person_id,
            chamber_id,
            party_id,
        })
        .collect()
}

fn clear_partitions(dirs: &DataDirs) -> Result<(), PipelineError> {
    let dir = dirs.partitions_dir();
    if !dir.exists() {
        return Ok(());
    }
    for path in crate::partition_paths(&dir)? {
        std::fs::remove_file(&path).map_err(|source| PipelineError::Io { path, source })?;
    }
    Ok(())
}

fn write_one(
    store: &PolicyStore,
    dirs: &DataDirs,
    params: &ComparisonParams,
) -> Result<usize, PipelineError> {
    let rows = calc::person_distributions(store, params)?;
    let path = dirs.partition_path(params.person_id, params.chamber_id, params.party_id);

    let mut attempt = 1;
    loop {
        match distributions::write_distributions(&path, &rows) {
            Ok(()) => return Ok(rows.len()),
            Err(source) if attempt < WRITE_RETRY_LIMIT => {
                warn!(
                    person_id = params.person_id,
                    attempt,
                    error = %source,
                    "partition write failed, retrying"
                );
                attempt += 1;
            }
            Err(source) => return Err(PipelineError::Table(source)),
        }
    }
}

/// Run the fan-out. On a full recompute the partition directory is
/// cleared first; on incremental runs only the affected people's
/// files are overwritten.
pub fn write_partitions(
    store: &PolicyStore,
    dirs: &DataDirs,
    options: &CalcOptions,
) -> Result<CalcReport, PipelineError> {
    if !options.update_from_hash {
        clear_partitions(dirs)?;
    }
    let partitions_dir = dirs.partitions_dir();
    std::fs::create_dir_all(&partitions_dir).map_err(|source| PipelineError::Io {
        path: partitions_dir.clone(),
        source,
    })?;

    let person_filter: Option<BTreeSet<PersonId>> = match (&options.person_ids, options.update_from_hash)
    {
        (Some(ids), _) => Some(ids.iter().copied().collect()),
        (None, true) => Some(planner::recompute_set(store, &partitions_dir)?),
        (None, false) => None,
    };
    let policy_filter: Option<BTreeSet<PolicyId>> = options
        .policy_ids
        .as_ref()
        .map(|ids| ids.iter().copied().collect());

    let triples = comparison_triples(store, person_filter.as_ref(), policy_filter.as_ref());
    info!(triples = triples.len(), "running per-person calculations");

    let mut report = CalcReport::default();
    for params in &triples {
        match write_one(store, dirs, params) {
            Ok(rows) => {
                report.partitions_written += 1;
                report.rows_written += rows;
            }
            Err(error) => {
                warn!(person_id = params.person_id, error = %error, "person failed");
                report.failures.push(PersonFailure {
                    person_id: params.person_id,
                    error: error.to_string(),
                });
            }
        }
    }

    info!(
        partitions = report.partitions_written,
        rows = report.rows_written,
        failures = report.failures.len(),
        "fan-out complete"
    );
    Ok(report)
}
