#![forbid(unsafe_code)]

//! The batch driver: staging prep, hash-gated per-person fan-out,
//! coalescing, and the sink swap. One process runs the stages in
//! order; per-person work is independent, and the driver runs it
//! sequentially.

pub mod calc;
pub mod coalesce;
#[cfg(feature = "sql-sqlite")]
pub mod loader;
pub mod planner;
pub mod prep;
pub mod writer;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use va_io::TableError;
use va_store::{DataDirs, PolicyStore, StoreError};
use va_types::{PersonId, PolicyId};

pub use crate::calc::person_distributions;
pub use crate::coalesce::{SinkRow, coalesce_partitions};
pub use crate::planner::recompute_set;
pub use crate::prep::{PrepReport, build_staging, run_prep};
pub use crate::writer::{CalcOptions, CalcReport, PersonFailure, write_partitions};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("staging references policy {policy_id} which is not in the policies table")]
    UnknownPolicy { policy_id: PolicyId },
    #[error("calculation failed for person ids {person_ids:?}")]
    PersonsFailed { person_ids: Vec<PersonId> },
    #[error("hash diff non-empty after full recompute for person ids {person_ids:?}")]
    HashMismatchAfterFullCompute { person_ids: Vec<PersonId> },
    #[cfg(feature = "sql-sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Sorted parquet paths directly under `dir`.
pub(crate) fn partition_paths(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let entries = std::fs::read_dir(dir).map_err(|source| PipelineError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "parquet"))
        .collect();
    paths.sort();
    Ok(paths)
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Recompute only hash-stale people instead of everyone.
    pub incremental: bool,
    pub person_ids: Option<Vec<PersonId>>,
    pub policy_ids: Option<Vec<PolicyId>>,
    /// Swap the coalesced file into the SQLite sink at the end.
    pub load_sink: bool,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub calc: CalcReport,
    pub coalesced_rows: usize,
    pub sink_rows: Option<usize>,
}

/// Fan out the per-person calculations, verify the hash invariant on
/// full runs, coalesce, and optionally load the sink. Any failed
/// person aborts the coalesce and surfaces the failing ids.
pub fn run_calculations(
    store: &PolicyStore,
    dirs: &DataDirs,
    options: &RunOptions,
) -> Result<RunReport, PipelineError> {
    let calc_options = CalcOptions {
        update_from_hash: options.incremental,
        person_ids: options.person_ids.clone(),
        policy_ids: options.policy_ids.clone(),
    };
    let calc = writer::write_partitions(store, dirs, &calc_options)?;
    if !calc.failures.is_empty() {
        return Err(PipelineError::PersonsFailed {
            person_ids: calc.failures.iter().map(|f| f.person_id).collect(),
        });
    }

    let full_run =
        !options.incremental && options.person_ids.is_none() && options.policy_ids.is_none();
    if full_run {
        let stale = planner::recompute_set(store, &dirs.partitions_dir())?;
        if !stale.is_empty() {
            return Err(PipelineError::HashMismatchAfterFullCompute {
                person_ids: stale.into_iter().collect(),
            });
        }
    }

    let coalesced_rows = coalesce::coalesce_partitions(dirs)?;

    #[cfg(feature = "sql-sqlite")]
    let sink_rows = if options.load_sink {
        Some(loader::load_sink(dirs)?)
    } else {
        None
    };
    #[cfg(not(feature = "sql-sqlite"))]
    let sink_rows = None;

    info!(
        partitions = calc.partitions_written,
        rows = coalesced_rows,
        "calculation run complete"
    );
    Ok(RunReport {
        calc,
        coalesced_rows,
        sink_rows,
    })
}
