//! The sink loader: streams the coalesced file into SQLite and swaps
//! it in as `vote_distribution` inside one transaction, so readers
//! never observe an empty or half-loaded table.

use rusqlite::{Connection, params};
use tracing::info;
use va_store::DataDirs;
use va_store::distributions::count_value;

use crate::{PipelineError, coalesce};

const CREATE_STAGING: &str = "\
CREATE TABLE vote_distribution_staging (
    id INTEGER PRIMARY KEY,
    policy_id INTEGER NOT NULL,
    person_id INTEGER NOT NULL,
    period_id INTEGER NOT NULL,
    chamber_id INTEGER NOT NULL,
    party_id INTEGER,
    is_target INTEGER NOT NULL,
    num_votes_same REAL NOT NULL,
    num_strong_votes_same REAL NOT NULL,
    num_votes_different REAL NOT NULL,
    num_strong_votes_different REAL NOT NULL,
    num_votes_absent REAL NOT NULL,
    num_strong_votes_absent REAL NOT NULL,
    num_votes_abstain REAL NOT NULL,
    num_strong_votes_abstain REAL NOT NULL,
    num_agreements_same REAL NOT NULL,
    num_strong_agreements_same REAL NOT NULL,
    num_agreements_different REAL NOT NULL,
    num_strong_agreements_different REAL NOT NULL,
    start_year INTEGER NOT NULL,
    end_year INTEGER NOT NULL,
    distance_score REAL NOT NULL,
    policy_hash TEXT NOT NULL
)";

const INSERT_ROW: &str = "\
INSERT INTO vote_distribution_staging VALUES (
    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
    ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23
)";

/// Load the coalesced file and swap it in as the sink table.
pub fn load_sink(dirs: &DataDirs) -> Result<usize, PipelineError> {
    let rows = coalesce::read_coalesced(&dirs.coalesced_path())?;

    let mut conn = Connection::open(dirs.sink_path())?;
    let tx = conn.transaction()?;
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS vote_distribution_staging;\n{CREATE_STAGING};"
    ))?;
    {
        let mut insert = tx.prepare(INSERT_ROW)?;
        for row in &rows {
            let d = &row.distribution;
            insert.execute(params![
                row.id,
                d.policy_id,
                d.person_id,
                d.period_id,
                d.chamber_id,
                row.party_id,
                d.is_target,
                count_value(d, "num_votes_same"),
                count_value(d, "num_strong_votes_same"),
                count_value(d, "num_votes_different"),
                count_value(d, "num_strong_votes_different"),
                count_value(d, "num_votes_absent"),
                count_value(d, "num_strong_votes_absent"),
                count_value(d, "num_votes_abstain"),
                count_value(d, "num_strong_votes_abstain"),
                count_value(d, "num_agreements_same"),
                count_value(d, "num_strong_agreements_same"),
                count_value(d, "num_agreements_different"),
                count_value(d, "num_strong_agreements_different"),
                d.start_year,
                d.end_year,
                d.distance_score,
                d.policy_hash,
            ])?;
        }
    }
    tx.execute_batch(
        "DROP TABLE IF EXISTS vote_distribution;\n\
         ALTER TABLE vote_distribution_staging RENAME TO vote_distribution;",
    )?;
    tx.commit()?;

    info!(rows = rows.len(), "sink table swapped");
    Ok(rows.len())
}
