/*!
Core of a simplified electronic ballot box.

This crate holds the parts of the system with real invariants: the
immutable candidate/voter registry, the validation rules that turn a raw
selection into a nominal, blank or null vote, the per-office voting session
with its confirmation gate, the durable append-only ballot log, the
duplicate-vote guard, and the tabulation engine that replays the log into
per-office counts.

Interactive prompting, roll-file parsing and report rendering live in the
calling crate: everything here is driveable without a terminal.

```
use ballot_box::*;

let registry = Registry::from_rolls(
    vec![Candidate {
        number: "13".to_string(),
        name: "Alice".to_string(),
        party: "PXB".to_string(),
        office: Office::President,
        jurisdiction: NATIONWIDE.to_string(),
    }],
    vec![],
)?;
let selection = validate_selection(Office::President, "13", "MG", &registry);
assert_eq!(selection, Selection::Nominal("13".to_string()));
# Ok::<(), BallotBoxError>(())
```
*/

mod config;
mod store;

use log::{debug, info};

use std::collections::{BTreeMap, HashMap};

use snafu::{ensure, OptionExt};

pub use crate::config::*;
pub use crate::store::{BallotReplay, BallotStore, DuplicateGuard, StoreLock};

// **** Registry ****

/// Immutable lookup tables over the candidate and voter rolls.
///
/// Loaded once, then shared by reference with every session and tabulation
/// run. There is no way to mutate a registry after construction.
pub struct Registry {
    candidates: HashMap<String, Candidate>,
    voters: HashMap<String, Voter>,
}

impl Registry {
    /// Builds the registry from already-parsed roll records.
    ///
    /// Two records sharing a candidate number or a voter id are rejected
    /// with `DuplicateKey`: a roll that assigns one number to two
    /// candidates is operator error, and silently keeping either record
    /// would corrupt every later validation.
    pub fn from_rolls(
        candidates: Vec<Candidate>,
        voters: Vec<Voter>,
    ) -> BallotBoxResult<Registry> {
        let mut by_number: HashMap<String, Candidate> = HashMap::new();
        for c in candidates {
            let key = c.number.clone();
            ensure!(
                by_number.insert(key.clone(), c).is_none(),
                DuplicateKeySnafu {
                    key,
                    roll: "candidate"
                }
            );
        }
        let mut by_id: HashMap<String, Voter> = HashMap::new();
        for v in voters {
            let key = v.voter_id.clone();
            ensure!(
                by_id.insert(key.clone(), v).is_none(),
                DuplicateKeySnafu { key, roll: "voter" }
            );
        }
        info!(
            "registry: {} candidates, {} voters",
            by_number.len(),
            by_id.len()
        );
        Ok(Registry {
            candidates: by_number,
            voters: by_id,
        })
    }

    pub fn candidate(&self, number: &str) -> Option<&Candidate> {
        self.candidates.get(number)
    }

    pub fn voter(&self, voter_id: &str) -> Option<&Voter> {
        self.voters.get(voter_id)
    }

    pub fn num_candidates(&self) -> usize {
        self.candidates.len()
    }

    pub fn num_voters(&self) -> usize {
        self.voters.len()
    }
}

// **** Validation ****

/// Decides what one raw selection counts as for one office.
///
/// The rules, in order: the blank sentinel is a blank vote; an unknown
/// number, a number belonging to another office, and a candidate from
/// another jurisdiction (unless marked [NATIONWIDE]) are null votes;
/// everything else is a nominal vote for that number.
///
/// Total and pure: every input maps to a selection, never to an error. A
/// voting machine must not block or crash on operator mistakes, so
/// malformed input degrades to [Selection::Null] and the session moves on.
pub fn validate_selection(
    office: Office,
    raw_selection: &str,
    booth_jurisdiction: &str,
    registry: &Registry,
) -> Selection {
    if raw_selection == BLANK_KEY {
        return Selection::Blank;
    }
    let candidate = match registry.candidate(raw_selection) {
        Some(c) => c,
        None => {
            debug!("validate: {:?} is not a known number", raw_selection);
            return Selection::Null;
        }
    };
    if candidate.office != office {
        debug!(
            "validate: {} belongs to {}, not {}",
            candidate.number,
            candidate.office.code(),
            office.code()
        );
        return Selection::Null;
    }
    if candidate.jurisdiction != booth_jurisdiction && candidate.jurisdiction != NATIONWIDE {
        debug!(
            "validate: {} runs in {}, booth is in {}",
            candidate.number, candidate.jurisdiction, booth_jurisdiction
        );
        return Selection::Null;
    }
    Selection::Nominal(candidate.number.clone())
}

// **** Voting session ****

/// One voter's pass through the ballot, office by office.
///
/// The session starts at the first office of [Office::VOTING_ORDER] and
/// only advances when the caller explicitly confirms the selection it was
/// shown. Re-attempts are unlimited; rejecting a selection changes
/// nothing. The session value itself encodes the state: a live session is
/// always mid-voting, and completing the last office converts it into a
/// [CompletedBallot].
pub struct BallotSession<'a> {
    registry: &'a Registry,
    voter: &'a Voter,
    booth: String,
    cursor: usize,
    filled: BTreeMap<Office, Selection>,
    pending: Option<Selection>,
}

/// What a confirmation step led to.
pub enum SessionProgress<'a> {
    /// Still voting; the session moved to (or stayed on) an office.
    Voting(BallotSession<'a>),
    /// Every office is confirmed; the ballot is ready to commit.
    Complete(CompletedBallot),
}

impl<'a> BallotSession<'a> {
    /// Starts a session for one voter, or rejects it.
    ///
    /// Fails with `VoterNotFound` for an id absent from the registry and
    /// with `AlreadyVoted` when the duplicate guard already has the voter.
    /// Both are recoverable: the caller re-prompts for another voter.
    pub fn identify(
        registry: &'a Registry,
        guard: &DuplicateGuard,
        voter_id: &str,
        booth_jurisdiction: &str,
    ) -> BallotBoxResult<BallotSession<'a>> {
        let voter = registry
            .voter(voter_id)
            .context(VoterNotFoundSnafu { voter_id })?;
        ensure!(!guard.has_voted(voter_id), AlreadyVotedSnafu { voter_id });
        info!(
            "session: voter {} identified at booth {}",
            voter_id, booth_jurisdiction
        );
        Ok(BallotSession {
            registry,
            voter,
            booth: booth_jurisdiction.to_string(),
            cursor: 0,
            filled: BTreeMap::new(),
            pending: None,
        })
    }

    pub fn voter(&self) -> &Voter {
        self.voter
    }

    pub fn booth(&self) -> &str {
        &self.booth
    }

    /// The office currently being voted on.
    pub fn current_office(&self) -> Office {
        Office::VOTING_ORDER[self.cursor]
    }

    /// Computes the selection the raw input would count as for the current
    /// office and holds it for confirmation. The returned selection is what
    /// the caller presents back to the voter.
    pub fn offer(&mut self, raw_selection: &str) -> &Selection {
        let office = self.current_office();
        let selection = validate_selection(office, raw_selection, &self.booth, self.registry);
        debug!(
            "offer: office {} raw {:?} -> {:?}",
            office.code(),
            raw_selection,
            selection
        );
        self.pending.insert(selection)
    }

    /// Resolves the pending selection.
    ///
    /// Confirming commits it to the ballot and advances the cursor;
    /// completing the last office yields the finished ballot. Anything
    /// else (an explicit rejection, or a resolve with nothing offered)
    /// discards the pending selection and stays on the same office.
    pub fn resolve(mut self, confirmed: bool) -> SessionProgress<'a> {
        match self.pending.take() {
            Some(selection) if confirmed => {
                let office = self.current_office();
                self.filled.insert(office, selection);
                self.cursor += 1;
                if self.cursor == Office::VOTING_ORDER.len() {
                    debug!("resolve: ballot complete for voter {}", self.voter.voter_id);
                    SessionProgress::Complete(CompletedBallot {
                        voter_id: self.voter.voter_id.clone(),
                        ballot: Ballot::new(self.booth, self.filled),
                    })
                } else {
                    SessionProgress::Voting(self)
                }
            }
            _ => SessionProgress::Voting(self),
        }
    }
}

/// A ballot with every office confirmed, not yet persisted.
///
/// The only way to obtain one is to drive a [BallotSession] through every
/// office, so a completed ballot is total by construction.
pub struct CompletedBallot {
    voter_id: String,
    ballot: Ballot,
}

impl CompletedBallot {
    pub fn voter_id(&self) -> &str {
        &self.voter_id
    }

    pub fn ballot(&self) -> &Ballot {
        &self.ballot
    }

    /// Persists the ballot and marks the voter, in that order, under the
    /// store lock.
    ///
    /// The ordering is the durability boundary of the whole system: the
    /// voter is marked only after the ballot is durably appended, so an
    /// append failure leaves the voter eligible to retry a fresh session.
    /// A crash between append and mark leaves a persisted ballot and an
    /// unmarked voter; closing that window would take a transaction across
    /// both files, which this design accepts instead of pretending to
    /// solve.
    pub fn commit(
        self,
        store: &BallotStore,
        guard: &mut DuplicateGuard,
    ) -> BallotBoxResult<Ballot> {
        let _lock = StoreLock::acquire(store.lock_path())?;
        guard.refresh()?;
        ensure!(
            !guard.has_voted(&self.voter_id),
            AlreadyVotedSnafu {
                voter_id: self.voter_id
            }
        );
        store.append(&self.ballot)?;
        guard.mark_voted(&self.voter_id)?;
        info!("commit: ballot recorded for voter {}", self.voter_id);
        Ok(self.ballot)
    }
}

// **** Tabulation ****

/// Replays every ballot in the store into per-office results.
///
/// The total ballot count is captured once over the whole replay: every
/// ballot carries one selection per office, so the same denominator serves
/// every office. A nominal vote whose number is missing from the registry
/// means the registry changed between voting and counting; that is
/// surfaced as `InconsistentState`, never skipped.
pub fn tabulate(store: &BallotStore, registry: &Registry) -> BallotBoxResult<Results> {
    let mut offices: BTreeMap<Office, OfficeTally> = Office::VOTING_ORDER
        .iter()
        .map(|&o| (o, OfficeTally::default()))
        .collect();
    let mut total_ballots: u64 = 0;

    for record in store.replay()? {
        let ballot = record?;
        total_ballots += 1;
        for office in Office::VOTING_ORDER {
            let selection = ballot.selection(office).with_context(|| {
                InconsistentStateSnafu {
                    detail: format!(
                        "ballot #{} has no selection for office {}",
                        total_ballots,
                        office.code()
                    ),
                }
            })?;
            let tally = offices.entry(office).or_default();
            match selection {
                Selection::Blank => tally.blank += 1,
                Selection::Null => tally.null += 1,
                Selection::Nominal(number) => {
                    let candidate = registry.candidate(number).with_context(|| {
                        InconsistentStateSnafu {
                            detail: format!(
                                "ballot #{} names unknown candidate {}",
                                total_ballots, number
                            ),
                        }
                    })?;
                    *tally.nominal.entry(candidate.name.clone()).or_insert(0) += 1;
                }
            }
        }
    }

    info!("tabulate: {} ballots processed", total_ballots);
    Ok(Results {
        total_ballots,
        offices,
    })
}
