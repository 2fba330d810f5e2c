#![forbid(unsafe_code)]

pub mod distributions;
pub mod policy_file;
pub mod tables;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use va_io::TableError;
use va_types::{
    AgreementId, ChamberId, ChamberSlug, DivisionId, DomainError, PartyId, PersonId, PolicyId,
};

use crate::tables::{
    AgreementRow, ChamberRow, CollectivePresence, DivisionRow, MembershipRow, PeriodRow,
    PolicyLinkRow, PolicyRow, RelevantAgreement, RelevantDivision, RelevantPersonPolicyPeriod,
    VoteRow,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse policy file {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("{path} column {column} row {row}: {source}")]
    InvalidValue {
        path: PathBuf,
        column: &'static str,
        row: usize,
        source: DomainError,
    },
    #[error("policy {policy_id} names unknown chamber {chamber}")]
    UnknownChamber {
        policy_id: PolicyId,
        chamber: ChamberSlug,
    },
    #[error("policy {policy_id} links unknown decision key {key}")]
    UnknownDecisionKey { policy_id: PolicyId, key: String },
}

/// The on-disk layout of one data directory. All paths hang off a
/// single base so tests can point the whole stack at a tempdir.
#[derive(Debug, Clone)]
pub struct DataDirs {
    base: PathBuf,
}

impl DataDirs {
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    #[must_use]
    pub fn input_dir(&self) -> PathBuf {
        self.base.join("input")
    }

    #[must_use]
    pub fn compiled_dir(&self) -> PathBuf {
        self.base.join("compiled")
    }

    /// Per-person partition files live under the compiled directory.
    #[must_use]
    pub fn partitions_dir(&self) -> PathBuf {
        self.compiled_dir().join("policies")
    }

    /// Authored policy YAML definitions.
    #[must_use]
    pub fn policy_files_dir(&self) -> PathBuf {
        self.base.join("policies")
    }

    #[must_use]
    pub fn sink_path(&self) -> PathBuf {
        self.base.join("vote_distributions.sqlite3")
    }

    #[must_use]
    pub fn chambers_path(&self) -> PathBuf {
        self.input_dir().join("chambers.parquet")
    }

    #[must_use]
    pub fn divisions_path(&self) -> PathBuf {
        self.input_dir().join("divisions.parquet")
    }

    #[must_use]
    pub fn agreements_path(&self) -> PathBuf {
        self.input_dir().join("agreements.parquet")
    }

    #[must_use]
    pub fn votes_path(&self) -> PathBuf {
        self.input_dir().join("votes.parquet")
    }

    #[must_use]
    pub fn memberships_path(&self) -> PathBuf {
        self.input_dir().join("memberships.parquet")
    }

    #[must_use]
    pub fn periods_path(&self) -> PathBuf {
        self.input_dir().join("policy_comparison_periods.parquet")
    }

    #[must_use]
    pub fn policies_path(&self) -> PathBuf {
        self.input_dir().join("policies.parquet")
    }

    #[must_use]
    pub fn division_links_path(&self) -> PathBuf {
        self.input_dir().join("policy_division_links.parquet")
    }

    #[must_use]
    pub fn agreement_links_path(&self) -> PathBuf {
        self.input_dir().join("policy_agreement_links.parquet")
    }

    #[must_use]
    pub fn relevant_divisions_path(&self) -> PathBuf {
        self.compiled_dir().join("policy_divisions_relevant.parquet")
    }

    #[must_use]
    pub fn relevant_agreements_path(&self) -> PathBuf {
        self.compiled_dir()
            .join("policy_agreements_relevant.parquet")
    }

    #[must_use]
    pub fn relevant_votes_path(&self) -> PathBuf {
        self.compiled_dir().join("policy_votes_relevant.parquet")
    }

    #[must_use]
    pub fn collective_path(&self) -> PathBuf {
        self.compiled_dir()
            .join("policy_collective_relevant.parquet")
    }

    #[must_use]
    pub fn relevant_people_path(&self) -> PathBuf {
        self.compiled_dir()
            .join("relevant_person_policy_period.parquet")
    }

    #[must_use]
    pub fn coalesced_path(&self) -> PathBuf {
        self.compiled_dir().join("policy_calc_to_load.parquet")
    }

    #[must_use]
    pub fn partition_path(
        &self,
        person_id: PersonId,
        chamber_id: ChamberId,
        party_id: PartyId,
    ) -> PathBuf {
        self.partitions_dir()
            .join(format!("{person_id}_{chamber_id}_{party_id}.parquet"))
    }
}

/// The raw input tables as delivered by ingestion.
#[derive(Debug, Clone, Default)]
pub struct RawTables {
    pub chambers: Vec<ChamberRow>,
    pub divisions: Vec<DivisionRow>,
    pub agreements: Vec<AgreementRow>,
    pub votes: Vec<VoteRow>,
    pub memberships: Vec<MembershipRow>,
    pub periods: Vec<PeriodRow>,
    pub policies: Vec<PolicyRow>,
    pub division_links: Vec<PolicyLinkRow>,
    pub agreement_links: Vec<PolicyLinkRow>,
}

impl RawTables {
    pub fn load(dirs: &DataDirs) -> Result<Self, StoreError> {
        Ok(Self {
            chambers: ChamberRow::read_all(&dirs.chambers_path())?,
            divisions: DivisionRow::read_all(&dirs.divisions_path())?,
            agreements: AgreementRow::read_all(&dirs.agreements_path())?,
            votes: VoteRow::read_all(&dirs.votes_path())?,
            memberships: MembershipRow::read_all(&dirs.memberships_path())?,
            periods: PeriodRow::read_all(&dirs.periods_path())?,
            policies: PolicyRow::read_all(&dirs.policies_path())?,
            division_links: PolicyLinkRow::read_all(&dirs.division_links_path())?,
            agreement_links: PolicyLinkRow::read_all(&dirs.agreement_links_path())?,
        })
    }

    #[must_use]
    pub fn chamber_ids(&self) -> HashMap<ChamberSlug, ChamberId> {
        self.chambers.iter().map(|c| (c.slug, c.id)).collect()
    }
}

/// Everything the macro library consumes, before indexing.
#[derive(Debug, Clone, Default)]
pub struct StagingData {
    pub divisions: Vec<RelevantDivision>,
    pub agreements: Vec<RelevantAgreement>,
    pub votes: Vec<VoteRow>,
    pub collective: Vec<CollectivePresence>,
    pub relevant: Vec<RelevantPersonPolicyPeriod>,
    pub memberships: Vec<MembershipRow>,
    pub policies: Vec<PolicyRow>,
}

/// The staging tables with the lookup indexes the macros probe:
/// votes by division, collective presence by person, memberships by
/// person, agreement staging rows by decision, policies by id.
#[derive(Debug)]
pub struct PolicyStore {
    data: StagingData,
    votes_by_division: HashMap<DivisionId, Vec<usize>>,
    collective_by_person: HashMap<PersonId, Vec<usize>>,
    memberships_by_person: HashMap<PersonId, Vec<usize>>,
    agreements_by_decision: HashMap<AgreementId, Vec<usize>>,
    policy_by_id: HashMap<PolicyId, usize>,
}

impl PolicyStore {
    #[must_use]
    pub fn new(data: StagingData) -> Self {
        let mut votes_by_division = HashMap::<DivisionId, Vec<usize>>::new();
        for (idx, vote) in data.votes.iter().enumerate() {
            votes_by_division
                .entry(vote.division_id)
                .or_default()
                .push(idx);
        }

        let mut collective_by_person = HashMap::<PersonId, Vec<usize>>::new();
        for (idx, presence) in data.collective.iter().enumerate() {
            collective_by_person
                .entry(presence.person_id)
                .or_default()
                .push(idx);
        }

        let mut memberships_by_person = HashMap::<PersonId, Vec<usize>>::new();
        for (idx, membership) in data.memberships.iter().enumerate() {
            memberships_by_person
                .entry(membership.person_id)
                .or_default()
                .push(idx);
        }

        let mut agreements_by_decision = HashMap::<AgreementId, Vec<usize>>::new();
        for (idx, agreement) in data.agreements.iter().enumerate() {
            agreements_by_decision
                .entry(agreement.agreement_id)
                .or_default()
                .push(idx);
        }

        let policy_by_id = data
            .policies
            .iter()
            .enumerate()
            .map(|(idx, policy)| (policy.id, idx))
            .collect();

        Self {
            data,
            votes_by_division,
            collective_by_person,
            memberships_by_person,
            agreements_by_decision,
            policy_by_id,
        }
    }

    /// Load the staging tables plus the memberships and policies the
    /// pipeline joins against. Memberships are cut down to people in
    /// the relevance universe.
    pub fn load(dirs: &DataDirs) -> Result<Self, StoreError> {
        let relevant = RelevantPersonPolicyPeriod::read_all(&dirs.relevant_people_path())?;
        let relevant_people: std::collections::HashSet<PersonId> =
            relevant.iter().map(|r| r.person_id).collect();

        let mut memberships = MembershipRow::read_all(&dirs.memberships_path())?;
        memberships.retain(|m| relevant_people.contains(&m.person_id));
        memberships.sort_by_key(|m| (m.person_id, m.start_date));

        Ok(Self::new(StagingData {
            divisions: RelevantDivision::read_all(&dirs.relevant_divisions_path())?,
            agreements: RelevantAgreement::read_all(&dirs.relevant_agreements_path())?,
            votes: VoteRow::read_all(&dirs.relevant_votes_path())?,
            collective: CollectivePresence::read_all(&dirs.collective_path())?,
            relevant,
            memberships,
            policies: PolicyRow::read_all(&dirs.policies_path())?,
        }))
    }

    #[must_use]
    pub fn divisions(&self) -> &[RelevantDivision] {
        &self.data.divisions
    }

    #[must_use]
    pub fn agreements(&self) -> &[RelevantAgreement] {
        &self.data.agreements
    }

    #[must_use]
    pub fn votes(&self) -> &[VoteRow] {
        &self.data.votes
    }

    #[must_use]
    pub fn collective(&self) -> &[CollectivePresence] {
        &self.data.collective
    }

    #[must_use]
    pub fn relevant(&self) -> &[RelevantPersonPolicyPeriod] {
        &self.data.relevant
    }

    #[must_use]
    pub fn memberships(&self) -> &[MembershipRow] {
        &self.data.memberships
    }

    #[must_use]
    pub fn policies(&self) -> &[PolicyRow] {
        &self.data.policies
    }

    pub fn votes_for_division(&self, id: DivisionId) -> impl Iterator<Item = &VoteRow> {
        self.votes_by_division
            .get(&id)
            .into_iter()
            .flatten()
            .map(|&idx| &self.data.votes[idx])
    }

    pub fn collective_for_person(&self, id: PersonId) -> impl Iterator<Item = &CollectivePresence> {
        self.collective_by_person
            .get(&id)
            .into_iter()
            .flatten()
            .map(|&idx| &self.data.collective[idx])
    }

    pub fn memberships_for_person(&self, id: PersonId) -> impl Iterator<Item = &MembershipRow> {
        self.memberships_by_person
            .get(&id)
            .into_iter()
            .flatten()
            .map(|&idx| &self.data.memberships[idx])
    }

    pub fn agreement_rows_for_decision(
        &self,
        id: AgreementId,
    ) -> impl Iterator<Item = &RelevantAgreement> {
        self.agreements_by_decision
            .get(&id)
            .into_iter()
            .flatten()
            .map(|&idx| &self.data.agreements[idx])
    }

    #[must_use]
    pub fn policy(&self, id: PolicyId) -> Option<&PolicyRow> {
        self.policy_by_id.get(&id).map(|&idx| &self.data.policies[idx])
    }

    #[must_use]
    pub fn policy_hash(&self, id: PolicyId) -> Option<&str> {
        self.policy(id).map(|p| p.policy_hash.as_str())
    }
}
