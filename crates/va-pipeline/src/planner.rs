//! The hash-diff planner: decides which people need recomputation by
//! comparing current policy hashes against the hashes carried in the
//! materialized partition files. "Current" is the snapshot loaded
//! into the store at the start of the run.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use tracing::debug;
use va_store::{PolicyStore, distributions};
use va_types::{NO_PARTY, PartyId, PeriodId, PersonId, PolicyId};

use crate::PipelineError;

type CompiledKey = (PersonId, PeriodId, PolicyId, PartyId);

/// Hashes carried in the existing partition files, keyed the way the
/// planner joins them. An absent or unreadable directory means no
/// prior materialization.
fn read_compiled_hashes(
    partitions_dir: &Path,
) -> Result<HashMap<CompiledKey, String>, PipelineError> {
    let mut compiled = HashMap::new();
    if !partitions_dir.exists() {
        return Ok(compiled);
    }

    for path in crate::partition_paths(partitions_dir)? {
        for row in distributions::read_distributions(&path)? {
            compiled.insert(
                (row.person_id, row.period_id, row.policy_id, row.party_id),
                row.policy_hash,
            );
        }
    }
    Ok(compiled)
}

/// People with at least one (policy, period, party) pair whose
/// materialized hash is missing or differs from the current hash.
/// Immediately after a full materialization this set is empty.
pub fn recompute_set(
    store: &PolicyStore,
    partitions_dir: &Path,
) -> Result<BTreeSet<PersonId>, PipelineError> {
    let compiled = read_compiled_hashes(partitions_dir)?;

    let mut stale = BTreeSet::new();
    for entry in store.relevant() {
        if stale.contains(&entry.person_id) {
            continue;
        }
        let current =
            store
                .policy_hash(entry.policy_id)
                .ok_or(PipelineError::UnknownPolicy {
                    policy_id: entry.policy_id,
                })?;
        let key = (
            entry.person_id,
            entry.period_id,
            entry.policy_id,
            entry.party_id.unwrap_or(NO_PARTY),
        );
        match compiled.get(&key) {
            Some(hash) if hash == current => {}
            _ => {
                stale.insert(entry.person_id);
            }
        }
    }

    debug!(stale = stale.len(), "hash diff planned");
    Ok(stale)
}
