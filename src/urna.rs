use log::{info, warn};

use ballot_box::*;
use snafu::{prelude::*, Snafu};

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use text_diff::print_diff;

use crate::args::Args;

pub mod report;
pub mod rolls;

// File names under the data directory. Every booth process sharing a data
// directory shares one ballot box.
const BALLOT_LOG_FILE: &str = "ballots.jsonl";
const VOTED_FILE: &str = "voted.txt";
const BOLETIM_FILE: &str = "boletim.txt";

#[derive(Debug, Snafu)]
pub enum UrnaError {
    #[snafu(display("could not open roll file {path}"))]
    OpeningRoll { source: csv::Error, path: String },

    #[snafu(display("could not read a record from roll file {path}"))]
    RollRecord { source: csv::Error, path: String },

    #[snafu(display("{source}"))]
    Ballot { source: BallotBoxError },

    #[snafu(display("I/O error on {path}"))]
    Io {
        source: std::io::Error,
        path: String,
    },

    #[snafu(display(""))]
    OpeningJson { source: std::io::Error },

    #[snafu(display(""))]
    ParsingJson { source: serde_json::Error },

    #[snafu(display("the input stream closed before the session completed"))]
    InputClosed {},

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type UrnaResult<T> = Result<T, UrnaError>;

fn data_dir(args: &Args) -> PathBuf {
    PathBuf::from(args.data_dir.clone().unwrap_or_else(|| ".".to_string()))
}

fn load_registry(args: &Args) -> UrnaResult<Registry> {
    let candidates = rolls::read_candidate_roll(&args.candidates)?;
    let voters = rolls::read_voter_roll(&args.voters)?;
    Registry::from_rolls(candidates, voters).context(BallotSnafu)
}

fn say<W: Write>(out: &mut W, line: &str) -> UrnaResult<()> {
    writeln!(out, "{}", line).context(IoSnafu { path: "stdout" })
}

fn prompt_line<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    prompt: &str,
) -> UrnaResult<String> {
    write!(out, "{}", prompt).context(IoSnafu { path: "stdout" })?;
    out.flush().context(IoSnafu { path: "stdout" })?;
    let mut line = String::new();
    let n = input
        .read_line(&mut line)
        .context(IoSnafu { path: "stdin" })?;
    ensure!(n > 0, InputClosedSnafu);
    Ok(line.trim_end().to_string())
}

/// Explains a computed selection back to the operator before confirmation.
fn describe_selection<W: Write>(
    out: &mut W,
    registry: &Registry,
    office: Office,
    raw: &str,
    selection: &Selection,
) -> UrnaResult<()> {
    match selection {
        Selection::Blank => say(out, "BLANK vote."),
        Selection::Nominal(number) => match registry.candidate(number) {
            Some(c) => say(out, &format!("Candidate: {} | Party: {}", c.name, c.party)),
            None => say(out, &format!("Candidate {}", number)),
        },
        Selection::Null => match registry.candidate(raw) {
            None => say(out, "Unknown number! The vote will be counted as NULL."),
            Some(c) if c.office != office => say(
                out,
                "That number belongs to another office! The vote will be counted as NULL.",
            ),
            Some(_) => say(
                out,
                "Candidate from another jurisdiction! The vote will be counted as NULL.",
            ),
        },
    }
}

/// Conducts one voter's session over the given input/output streams.
///
/// The streams are generic so tests can script the whole dialogue. The
/// identification step re-prompts on the recoverable rejections (unknown
/// voter, already voted); everything later follows the session state
/// machine: offer a selection, show what it counts as, and only advance on
/// an explicit `Y`.
fn conduct_voting<R: BufRead, W: Write>(
    registry: &Registry,
    guard: &mut DuplicateGuard,
    store: &BallotStore,
    booth: &str,
    input: &mut R,
    out: &mut W,
) -> UrnaResult<()> {
    say(out, &format!("Ballot box session at booth {}", booth))?;

    let mut session = loop {
        let voter_id = prompt_line(input, out, "Voter id: ")?;
        let voter_id = voter_id.trim();
        if voter_id.is_empty() {
            continue;
        }
        match BallotSession::identify(registry, guard, voter_id, booth) {
            Result::Ok(s) => break s,
            Err(e @ BallotBoxError::VoterNotFound { .. })
            | Err(e @ BallotBoxError::AlreadyVoted { .. }) => {
                say(out, &format!("Cannot start the session: {}", e))?;
            }
            Err(e) => return Err(e).context(BallotSnafu),
        }
    };

    let voter = session.voter();
    say(
        out,
        &format!(
            "Voter: {} | Document: {} | Home: {} ({})",
            voter.name, voter.document_id, voter.municipality, voter.home_jurisdiction
        ),
    )?;

    let completed = loop {
        let office = session.current_office();
        say(
            out,
            &format!(
                "\n--- Vote for {} ({} digits) ---",
                office.title(),
                office.digits()
            ),
        )?;
        let raw = prompt_line(input, out, "Number (or B for blank): ")?
            .trim()
            .to_uppercase();
        let selection = session.offer(&raw).clone();
        describe_selection(out, registry, office, &raw, &selection)?;
        let confirmation = prompt_line(input, out, "Confirm (Y/N)? ")?
            .trim()
            .to_uppercase();
        match session.resolve(confirmation == "Y") {
            SessionProgress::Voting(s) => session = s,
            SessionProgress::Complete(c) => break c,
        }
    };

    let voter_id = completed.voter_id().to_string();
    completed.commit(store, guard).context(BallotSnafu)?;
    info!("ballot recorded for voter {}", voter_id);
    say(out, "\nBallot recorded. Thank you for voting.")
}

pub fn run_vote(args: &Args, booth: &str) -> UrnaResult<()> {
    let registry = load_registry(args)?;
    let dir = data_dir(args);
    let store = BallotStore::open(dir.join(BALLOT_LOG_FILE));
    let mut guard = DuplicateGuard::open(dir.join(VOTED_FILE)).context(BallotSnafu)?;
    let booth = booth.trim().to_uppercase();

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut out = io::stdout();
    conduct_voting(&registry, &mut guard, &store, &booth, &mut input, &mut out)
}

pub fn run_tally(args: &Args) -> UrnaResult<()> {
    let registry = load_registry(args)?;
    let dir = data_dir(args);
    let store = BallotStore::open(dir.join(BALLOT_LOG_FILE));
    let results = tabulate(&store, &registry).context(BallotSnafu)?;

    let boletim_path = dir.join(BOLETIM_FILE);
    report::write_boletim(&results, &boletim_path)?;
    info!("ballot box report written to {}", boletim_path.display());

    let summary = report::build_summary(&registry, &results);
    let pretty = serde_json::to_string_pretty(&summary).context(ParsingJsonSnafu)?;
    match args.out.as_deref() {
        None | Some("stdout") => println!("{}", pretty),
        Some(path) => fs::write(path, &pretty).context(IoSnafu { path })?,
    }

    // The reference summary, if provided for comparison
    if let Some(summary_p) = args.reference.clone() {
        let reference = report::read_summary(summary_p)?;
        let pretty_ref = serde_json::to_string_pretty(&reference).context(ParsingJsonSnafu)?;
        if pretty_ref != pretty {
            warn!("Found differences with the reference summary");
            print_diff(pretty_ref.as_str(), pretty.as_ref(), "\n");
            whatever!("Difference detected between calculated summary and reference summary");
        }
    }

    Ok(())
}
