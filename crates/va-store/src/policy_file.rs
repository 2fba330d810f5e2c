//! Policy definitions as authored: YAML files naming decisions by
//! their stable keys. This layer resolves keys to ids, applies the
//! hard date cutoff, and derives the composite policy hash the
//! incremental planner keys on.

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};
use va_types::{
    ChamberSlug, PolicyDirection, PolicyId, PolicyStatus, PolicyStrength, StrengthMeaning,
};

use crate::tables::{AgreementRow, DivisionRow, PolicyLinkRow, PolicyRow};
use crate::StoreError;

/// Decisions before this date are not linkable; upstream vote data is
/// unreliable for them.
#[must_use]
pub fn link_date_cutoff() -> NaiveDate {
    NaiveDate::from_ymd_opt(2010, 1, 1).expect("static date")
}

fn deserialize_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(serde::de::Error::custom)
}

/// Identifies a division by the components of its stable key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DivisionRef {
    pub chamber_slug: ChamberSlug,
    #[serde(deserialize_with = "deserialize_date")]
    pub date: NaiveDate,
    pub division_number: i64,
}

impl DivisionRef {
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "pw-{}-{}-{}",
            self.date, self.division_number, self.chamber_slug
        )
    }
}

/// Identifies an agreement by chamber, date, and the decision ref
/// after the date in the upstream reference.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgreementRef {
    pub chamber_slug: ChamberSlug,
    #[serde(deserialize_with = "deserialize_date")]
    pub date: NaiveDate,
    pub decision_ref: String,
}

impl AgreementRef {
    #[must_use]
    pub fn key(&self) -> String {
        format!("a-{}-{}-{}", self.chamber_slug, self.date, self.decision_ref)
    }
}

fn default_strength() -> PolicyStrength {
    PolicyStrength::Weak
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PolicyFileLink<R> {
    pub decision: R,
    pub alignment: PolicyDirection,
    #[serde(default = "default_strength")]
    pub strength: PolicyStrength,
    #[serde(default)]
    pub notes: String,
}

impl PolicyFileLink<DivisionRef> {
    #[must_use]
    pub fn link_key(&self) -> String {
        format!("{}-{}-{}", self.decision.key(), self.alignment, self.strength)
    }
}

impl PolicyFileLink<AgreementRef> {
    #[must_use]
    pub fn link_key(&self) -> String {
        format!("{}-{}-{}", self.decision.key(), self.alignment, self.strength)
    }
}

fn default_strength_meaning() -> StrengthMeaning {
    StrengthMeaning::Simplified
}

/// One authored policy definition file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PolicyFile {
    pub id: PolicyId,
    pub name: String,
    #[serde(default)]
    pub context_description: String,
    #[serde(default)]
    pub policy_description: String,
    #[serde(default)]
    pub notes: String,
    pub status: PolicyStatus,
    #[serde(default = "default_strength_meaning")]
    pub strength_meaning: StrengthMeaning,
    pub chamber: ChamberSlug,
    #[serde(default)]
    pub division_links: Vec<PolicyFileLink<DivisionRef>>,
    #[serde(default)]
    pub agreement_links: Vec<PolicyFileLink<AgreementRef>>,
}

impl PolicyFile {
    /// Key sensitive to everything the score depends on: identity,
    /// chamber, strength interpretation, and every link. Link keys
    /// are sorted so authoring order cannot change the digest.
    #[must_use]
    pub fn composite_key(&self) -> String {
        let mut keys: Vec<String> = self
            .division_links
            .iter()
            .map(|l| l.link_key())
            .chain(self.agreement_links.iter().map(|l| l.link_key()))
            .collect();
        keys.sort();
        format!(
            "{}-{}-{}-{}",
            self.id,
            self.chamber,
            self.strength_meaning,
            keys.join("-")
        )
    }

    /// First 8 hex chars of the SHA-256 of the composite key. Enough
    /// to detect in-flight edits across ~10^4 policies; must stay
    /// stable over time, so do not change the digest or truncation
    /// without recomputing every stored hash.
    #[must_use]
    pub fn composite_hash(&self) -> String {
        let digest = Sha256::digest(self.composite_key().as_bytes());
        digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
    }
}

/// Load every `*.yml` / `*.yaml` under `dir`, sorted by file name so
/// repeated runs see the same order.
pub fn load_policy_files(dir: &Path) -> Result<Vec<PolicyFile>, StoreError> {
    let entries = std::fs::read_dir(dir).map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext == "yml" || ext == "yaml")
        })
        .collect();
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let raw = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let file: PolicyFile =
            serde_yaml::from_str(&raw).map_err(|source| StoreError::Yaml { path, source })?;
        files.push(file);
    }
    Ok(files)
}

/// The three policy tables derived from the authored files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicySet {
    pub policies: Vec<PolicyRow>,
    pub division_links: Vec<PolicyLinkRow>,
    pub agreement_links: Vec<PolicyLinkRow>,
}

/// Resolve decision keys against the loaded divisions and agreements
/// and emit the policy tables. Links on decisions before the cutoff
/// are dropped; a key that resolves to nothing is fatal.
pub fn build_policy_tables(
    files: &[PolicyFile],
    divisions: &[DivisionRow],
    agreements: &[AgreementRow],
    chamber_ids: &HashMap<ChamberSlug, i64>,
) -> Result<PolicySet, StoreError> {
    let division_ids: HashMap<&str, i64> = divisions
        .iter()
        .map(|row| (row.key.as_str(), row.id))
        .collect();
    let agreement_ids: HashMap<&str, i64> = agreements
        .iter()
        .map(|row| (row.key.as_str(), row.id))
        .collect();
    let cutoff = link_date_cutoff();

    let mut set = PolicySet::default();

    for file in files {
        let chamber_id =
            chamber_ids
                .get(&file.chamber)
                .copied()
                .ok_or_else(|| StoreError::UnknownChamber {
                    policy_id: file.id,
                    chamber: file.chamber,
                })?;

        set.policies.push(PolicyRow {
            id: file.id,
            chamber_id,
            status: file.status,
            strength_meaning: file.strength_meaning,
            policy_hash: file.composite_hash(),
        });

        for link in &file.division_links {
            if link.decision.date < cutoff {
                continue;
            }
            let key = link.decision.key();
            let decision_id = division_ids.get(key.as_str()).copied().ok_or_else(|| {
                StoreError::UnknownDecisionKey {
                    policy_id: file.id,
                    key: key.clone(),
                }
            })?;
            set.division_links.push(PolicyLinkRow {
                policy_id: file.id,
                decision_id,
                alignment: link.alignment,
                strength: link.strength,
            });
        }

        for link in &file.agreement_links {
            if link.decision.date < cutoff {
                continue;
            }
            let key = link.decision.key();
            let decision_id = agreement_ids.get(key.as_str()).copied().ok_or_else(|| {
                StoreError::UnknownDecisionKey {
                    policy_id: file.id,
                    key: key.clone(),
                }
            })?;
            set.agreement_links.push(PolicyLinkRow {
                policy_id: file.id,
                decision_id,
                alignment: link.alignment,
                strength: link.strength,
            });
        }
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::NaiveDate;
    use va_types::{ChamberSlug, PolicyDirection, PolicyStrength};

    use super::{
        AgreementRef, DivisionRef, PolicyFile, PolicyFileLink, build_policy_tables,
        load_policy_files,
    };
    use crate::tables::{AgreementRow, DivisionRow};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    const POLICY_YAML: &str = r#"
id: 6667
name: Example policy
status: active
chamber: commons
division_links:
  - decision:
      chamber_slug: commons
      date: "2021-06-09"
      division_number: 4
    alignment: agree
    strength: strong
agreement_links:
  - decision:
      chamber_slug: commons
      date: "2021-07-12"
      decision_ref: "b.512.2.2"
    alignment: against
"#;

    fn sample_policy() -> PolicyFile {
        serde_yaml::from_str(POLICY_YAML).expect("yaml parses")
    }

    #[test]
    fn decision_keys_match_the_upstream_format() {
        let policy = sample_policy();
        assert_eq!(
            policy.division_links[0].decision.key(),
            "pw-2021-06-09-4-commons"
        );
        assert_eq!(
            policy.agreement_links[0].decision.key(),
            "a-commons-2021-07-12-b.512.2.2"
        );
    }

    #[test]
    fn link_key_carries_alignment_and_strength() {
        let policy = sample_policy();
        assert_eq!(
            policy.division_links[0].link_key(),
            "pw-2021-06-09-4-commons-agree-strong"
        );
        // unspecified strength defaults to weak
        assert_eq!(
            policy.agreement_links[0].link_key(),
            "a-commons-2021-07-12-b.512.2.2-against-weak"
        );
    }

    #[test]
    fn composite_hash_is_stable_and_order_insensitive() {
        let policy = sample_policy();
        let mut reordered = policy.clone();
        reordered.division_links.reverse();
        reordered.agreement_links.reverse();

        assert_eq!(policy.composite_hash(), reordered.composite_hash());
        assert_eq!(policy.composite_hash().len(), 8);

        let mut edited = policy.clone();
        edited.division_links[0].strength = PolicyStrength::Weak;
        assert_ne!(policy.composite_hash(), edited.composite_hash());
    }

    #[test]
    fn build_drops_links_before_the_cutoff() {
        let mut policy = sample_policy();
        policy.division_links.push(PolicyFileLink {
            decision: DivisionRef {
                chamber_slug: ChamberSlug::Commons,
                date: date(2009, 3, 2),
                division_number: 1,
            },
            alignment: PolicyDirection::Against,
            strength: PolicyStrength::Strong,
            notes: String::new(),
        });

        let divisions = vec![DivisionRow {
            id: 42,
            key: "pw-2021-06-09-4-commons".to_owned(),
            chamber_id: 1,
            date: date(2021, 6, 9),
            division_number: 4,
        }];
        let agreements = vec![AgreementRow {
            id: 7,
            key: "a-commons-2021-07-12-b.512.2.2".to_owned(),
            chamber_id: 1,
            date: date(2021, 7, 12),
        }];
        let chambers = HashMap::from([(ChamberSlug::Commons, 1)]);

        let set =
            build_policy_tables(&[policy], &divisions, &agreements, &chambers).expect("builds");
        assert_eq!(set.division_links.len(), 1);
        assert_eq!(set.division_links[0].decision_id, 42);
        assert_eq!(set.agreement_links[0].decision_id, 7);
        assert_eq!(set.policies[0].policy_hash.len(), 8);
    }

    #[test]
    fn unresolvable_key_is_fatal() {
        let policy = sample_policy();
        let chambers = HashMap::from([(ChamberSlug::Commons, 1)]);
        let err = build_policy_tables(&[policy], &[], &[], &chambers).expect_err("must fail");
        assert!(err.to_string().contains("pw-2021-06-09-4-commons"));
    }

    #[test]
    fn policy_files_load_in_name_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("b.yml"), POLICY_YAML.replace("6667", "2")).expect("write");
        std::fs::write(dir.path().join("a.yml"), POLICY_YAML.replace("6667", "1")).expect("write");
        std::fs::write(dir.path().join("ignored.txt"), "not yaml").expect("write");

        let files = load_policy_files(dir.path()).expect("load");
        let ids: Vec<_> = files.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
