// ********* Input data structures ***********

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// The jurisdiction marker for candidates that are valid in every booth
/// (presidential-style races).
pub const NATIONWIDE: &str = "BR";

/// The raw selection that a voter enters to cast a blank vote.
pub const BLANK_KEY: &str = "B";

/// The offices on a ballot, declared in voting order.
///
/// The derived `Ord` follows the declaration order, so sorted collections
/// keyed by `Office` iterate in the order the offices are voted on.
#[derive(Eq, PartialEq, Ord, PartialOrd, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
pub enum Office {
    #[serde(rename = "F")]
    FederalDeputy,
    #[serde(rename = "E")]
    StateDeputy,
    #[serde(rename = "S")]
    Senator,
    #[serde(rename = "G")]
    Governor,
    #[serde(rename = "P")]
    President,
}

impl Office {
    /// The complete voting sequence. Every ballot carries exactly one
    /// selection per entry, in this order.
    pub const VOTING_ORDER: [Office; 5] = [
        Office::FederalDeputy,
        Office::StateDeputy,
        Office::Senator,
        Office::Governor,
        Office::President,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Office::FederalDeputy => "F",
            Office::StateDeputy => "E",
            Office::Senator => "S",
            Office::Governor => "G",
            Office::President => "P",
        }
    }

    pub fn from_code(code: &str) -> Option<Office> {
        match code {
            "F" => Some(Office::FederalDeputy),
            "E" => Some(Office::StateDeputy),
            "S" => Some(Office::Senator),
            "G" => Some(Office::Governor),
            "P" => Some(Office::President),
            _ => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Office::FederalDeputy => "Federal Deputy",
            Office::StateDeputy => "State Deputy",
            Office::Senator => "Senator",
            Office::Governor => "Governor",
            Office::President => "President",
        }
    }

    /// The number of digits a candidate number has for this office. This is
    /// a prompt hint for the caller; the validator accepts any shape and
    /// degrades unknown numbers to null votes.
    pub fn digits(&self) -> u32 {
        match self {
            Office::FederalDeputy => 4,
            Office::StateDeputy => 5,
            Office::Senator => 3,
            Office::Governor => 2,
            Office::President => 2,
        }
    }
}

/// One candidate record, as loaded from the candidate roll.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Candidate {
    /// The number the voter types. Unique within the registry.
    pub number: String,
    pub name: String,
    pub party: String,
    pub office: Office,
    /// A region code, or [NATIONWIDE] for candidates valid everywhere.
    pub jurisdiction: String,
}

/// One voter record, as loaded from the voter roll.
///
/// `municipality` and `home_jurisdiction` are carried for display only: the
/// validation rules compare the candidate against the booth's jurisdiction,
/// not the voter's.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Voter {
    /// The voter's registration id. Unique within the registry.
    pub voter_id: String,
    pub name: String,
    pub document_id: String,
    pub municipality: String,
    pub home_jurisdiction: String,
}

/// The outcome of one office's voting step.
///
/// Only the validator produces these: every raw selection maps to exactly
/// one of the three cases, and malformed input degrades to `Null` rather
/// than an error.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    /// A valid vote for the candidate with this number.
    Nominal(String),
    /// An explicit abstention.
    Blank,
    /// A selection that failed validation.
    Null,
}

/// A completed ballot: one selection per office, total over
/// [Office::VOTING_ORDER] by construction.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Ballot {
    booth: String,
    selections: BTreeMap<Office, Selection>,
}

impl Ballot {
    pub(crate) fn new(booth: String, selections: BTreeMap<Office, Selection>) -> Ballot {
        Ballot { booth, selections }
    }

    /// The jurisdiction of the booth this ballot was cast at.
    pub fn booth(&self) -> &str {
        &self.booth
    }

    pub fn selection(&self, office: Office) -> Option<&Selection> {
        self.selections.get(&office)
    }

    /// Selections in voting order.
    pub fn selections(&self) -> impl Iterator<Item = (Office, &Selection)> {
        self.selections.iter().map(|(o, s)| (*o, s))
    }
}

// ******** Output data structures *********

/// Per-office counts produced by tabulation.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct OfficeTally {
    pub blank: u64,
    pub null: u64,
    /// Nominal votes, keyed by candidate name.
    pub nominal: BTreeMap<String, u64>,
}

/// The outcome of one tabulation run.
///
/// Derived data: the ballot log stays authoritative, and the results are
/// recomputed from scratch on every run.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Results {
    /// The number of ballots replayed, captured once for the whole run.
    /// Every ballot carries one selection per office, so this is the
    /// denominator for every office.
    pub total_ballots: u64,
    pub offices: BTreeMap<Office, OfficeTally>,
}

impl Results {
    /// The share of `count` over the total number of ballots, in percent.
    pub fn percentage(&self, count: u64) -> f64 {
        if self.total_ballots == 0 {
            0.0
        } else {
            count as f64 * 100.0 / self.total_ballots as f64
        }
    }
}

// ********* Errors **********

/// Everything that can go wrong inside the ballot box core.
///
/// The validator is absent on purpose: malformed selections become
/// [Selection::Null], never an error.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BallotBoxError {
    #[snafu(display("duplicate key {key} in the {roll} roll"))]
    DuplicateKey { key: String, roll: &'static str },

    #[snafu(display("voter {voter_id} is not in the registry"))]
    VoterNotFound { voter_id: String },

    #[snafu(display("voter {voter_id} has already voted"))]
    AlreadyVoted { voter_id: String },

    #[snafu(display("another booth holds the ballot box lock at {path}"))]
    LockBusy { path: String },

    #[snafu(display("I/O error on {path}"))]
    Io {
        source: std::io::Error,
        path: String,
    },

    #[snafu(display("could not encode a ballot record"))]
    Encode { source: serde_json::Error },

    #[snafu(display("ballot log does not match the registry: {detail}"))]
    InconsistentState { detail: String },
}

pub type BallotBoxResult<T> = Result<T, BallotBoxError>;
