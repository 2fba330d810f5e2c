#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type PersonId = i64;
pub type PolicyId = i64;
pub type ChamberId = i64;
pub type PartyId = i64;
pub type PeriodId = i64;
pub type DivisionId = i64;
pub type AgreementId = i64;
pub type MembershipId = i64;

/// Sentinel party id meaning "no comparator party". Never a legitimate
/// party key; the coalescer maps it back to NULL for the sink.
pub const NO_PARTY: PartyId = 0;

/// Open-ended memberships carry this end date rather than NULL.
#[must_use]
pub fn open_membership_end() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 12, 31).expect("static date")
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    #[error("unknown value {value:?} for {field}")]
    UnknownValue { field: &'static str, value: String },
    #[error("distance score {0} outside [0, 1] and not the no-data sentinel")]
    ScoreOutOfRange(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStrength {
    Weak,
    Strong,
}

impl PolicyStrength {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weak => "weak",
            Self::Strong => "strong",
        }
    }

    /// 0/1 encoding used by the staging tables.
    #[must_use]
    pub fn strong_int(self) -> i64 {
        match self {
            Self::Weak => 0,
            Self::Strong => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDirection {
    Agree,
    Against,
    Neutral,
}

impl PolicyDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agree => "agree",
            Self::Against => "against",
            Self::Neutral => "neutral",
        }
    }
}

/// How strong/weak links are interpreted by the scoring layer. The
/// classic public-whip interpretation existed historically; only the
/// simplified meaning is produced or scored today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrengthMeaning {
    Simplified,
}

impl StrengthMeaning {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simplified => "simplified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Active,
    Candidate,
    Draft,
    Rejected,
    Retired,
}

impl PolicyStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Candidate => "candidate",
            Self::Draft => "draft",
            Self::Rejected => "rejected",
            Self::Retired => "retired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChamberSlug {
    Commons,
    Lords,
    Scotland,
    Senedd,
    Ni,
}

impl ChamberSlug {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Commons => "commons",
            Self::Lords => "lords",
            Self::Scotland => "scotland",
            Self::Senedd => "senedd",
            Self::Ni => "ni",
        }
    }
}

macro_rules! enum_str_traits {
    ($ty:ident, $field:literal, [$($variant:ident),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = DomainError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                $(
                    if value == Self::$variant.as_str() {
                        return Ok(Self::$variant);
                    }
                )+
                Err(DomainError::UnknownValue {
                    field: $field,
                    value: value.to_owned(),
                })
            }
        }
    };
}

enum_str_traits!(PolicyStrength, "strength", [Weak, Strong]);
enum_str_traits!(PolicyDirection, "alignment", [Agree, Against, Neutral]);
enum_str_traits!(StrengthMeaning, "strength_meaning", [Simplified]);
enum_str_traits!(
    PolicyStatus,
    "status",
    [Active, Candidate, Draft, Rejected, Retired]
);
enum_str_traits!(
    ChamberSlug,
    "chamber",
    [Commons, Lords, Scotland, Senedd, Ni]
);

/// One output row of the alignment pipeline: the vote and agreement
/// count buckets for a (policy, person, period, chamber, party) tuple,
/// either for the person themselves (`is_target = 1`) or the
/// fractional average of their comparator cohort (`is_target = 0`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteDistribution {
    pub policy_id: PolicyId,
    pub person_id: PersonId,
    pub period_id: PeriodId,
    pub chamber_id: ChamberId,
    /// `NO_PARTY` inside the pipeline; NULL only in the sink.
    pub party_id: PartyId,
    pub is_target: i64,
    pub num_votes_same: f64,
    pub num_strong_votes_same: f64,
    pub num_votes_different: f64,
    pub num_strong_votes_different: f64,
    pub num_votes_absent: f64,
    pub num_strong_votes_absent: f64,
    pub num_votes_abstain: f64,
    pub num_strong_votes_abstain: f64,
    pub num_agreements_same: f64,
    pub num_strong_agreements_same: f64,
    pub num_agreements_different: f64,
    pub num_strong_agreements_different: f64,
    pub start_year: i64,
    pub end_year: i64,
    pub distance_score: f64,
    pub policy_hash: String,
}

impl VoteDistribution {
    #[must_use]
    pub fn total_votes(&self) -> f64 {
        self.num_votes_same
            + self.num_strong_votes_same
            + self.num_votes_different
            + self.num_strong_votes_different
            + self.num_votes_absent
            + self.num_strong_votes_absent
            + self.num_votes_abstain
            + self.num_strong_votes_abstain
    }

    /// The textual banding behind the distance score. The kernel's
    /// absence caps exist to keep thin records out of the outermost
    /// bands.
    pub fn verbose_score(&self) -> Result<&'static str, DomainError> {
        let score = self.distance_score;
        if score == -1.0 {
            return Ok("No data available");
        }
        let band = match score {
            s if (0.0..=0.05).contains(&s) => "Consistently voted for",
            s if s <= 0.15 => "Almost always voted for",
            s if s <= 0.4 => "Generally voted for",
            s if s <= 0.6 => "Voted a mixture of for and against",
            s if s <= 0.85 => "Generally voted against",
            s if s <= 0.95 => "Almost always voted against",
            s if s <= 1.0 => "Consistently voted against",
            _ => return Err(DomainError::ScoreOutOfRange(score)),
        };
        Ok(band)
    }
}

#[cfg(test)]
mod tests {
    use super::{ChamberSlug, DomainError, PolicyDirection, VoteDistribution};

    fn distribution(score: f64) -> VoteDistribution {
        VoteDistribution {
            policy_id: 1,
            person_id: 10,
            period_id: 1,
            chamber_id: 1,
            party_id: 2,
            is_target: 1,
            num_votes_same: 1.0,
            num_strong_votes_same: 2.0,
            num_votes_different: 0.0,
            num_strong_votes_different: 0.0,
            num_votes_absent: 0.5,
            num_strong_votes_absent: 0.0,
            num_votes_abstain: 0.0,
            num_strong_votes_abstain: 0.0,
            num_agreements_same: 0.0,
            num_strong_agreements_same: 0.0,
            num_agreements_different: 0.0,
            num_strong_agreements_different: 0.0,
            start_year: 2020,
            end_year: 2023,
            distance_score: score,
            policy_hash: "ab12cd34".to_owned(),
        }
    }

    #[test]
    fn enum_round_trips_through_wire_spelling() {
        let parsed: PolicyDirection = "against".parse().expect("known spelling");
        assert_eq!(parsed, PolicyDirection::Against);
        assert_eq!(parsed.to_string(), "against");

        let err = "house-of-commons".parse::<ChamberSlug>().expect_err("unknown");
        assert!(matches!(err, DomainError::UnknownValue { field: "chamber", .. }));
    }

    #[test]
    fn total_votes_sums_the_eight_buckets() {
        assert!((distribution(0.1).total_votes() - 3.5).abs() < 1e-12);
    }

    #[test]
    fn verbose_score_bands_match_cap_boundaries() {
        assert_eq!(distribution(0.05).verbose_score().expect("in range"), "Consistently voted for");
        assert_eq!(
            distribution(0.06).verbose_score().expect("in range"),
            "Almost always voted for"
        );
        assert_eq!(
            distribution(0.16).verbose_score().expect("in range"),
            "Generally voted for"
        );
        assert_eq!(distribution(-1.0).verbose_score().expect("sentinel"), "No data available");
        assert!(distribution(1.2).verbose_score().is_err());
    }

    #[test]
    fn serde_uses_snake_case_spellings() {
        let json = serde_json::to_string(&PolicyDirection::Agree).expect("serialize");
        assert_eq!(json, "\"agree\"");
    }
}
