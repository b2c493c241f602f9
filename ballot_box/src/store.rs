// Durable state of the ballot box: the append-only ballot log, the
// voted-set file behind the duplicate guard, and the cross-process lock
// taken around the append-then-mark sequence.

use log::{debug, info, warn};

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use snafu::{ensure, ResultExt};

use crate::config::*;

const LOCK_RETRY: Duration = Duration::from_millis(50);
const LOCK_ATTEMPTS: u32 = 100;

fn path_str(path: &Path) -> String {
    path.display().to_string()
}

// ********* Ballot log **********

/// Append-only log of completed ballots, one JSON record per line.
///
/// Appends are flushed and fsynced before they are reported as durable.
/// Replay yields ballots in append order; a trailing record left incomplete
/// by a crash mid-write ends the replay cleanly instead of failing it.
pub struct BallotStore {
    path: PathBuf,
}

impl BallotStore {
    /// Opens a store over the given log path. The file itself is created
    /// lazily, on the first append.
    pub fn open<P: Into<PathBuf>>(path: P) -> BallotStore {
        BallotStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The lock file guarding the append-then-mark sequence, kept next to
    /// the log so that every booth sharing the log shares the lock.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Durably appends one ballot to the log.
    // TODO: fsync the parent directory after the file is first created, so
    // the log's directory entry survives a crash right after the first vote.
    pub fn append(&self, ballot: &Ballot) -> BallotBoxResult<()> {
        let record = serde_json::to_string(ballot).context(EncodeSnafu)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context(IoSnafu {
                path: path_str(&self.path),
            })?;
        file.write_all(record.as_bytes()).context(IoSnafu {
            path: path_str(&self.path),
        })?;
        file.write_all(b"\n").context(IoSnafu {
            path: path_str(&self.path),
        })?;
        file.sync_all().context(IoSnafu {
            path: path_str(&self.path),
        })?;
        debug!("append: recorded ballot for booth {}", ballot.booth());
        Ok(())
    }

    /// Replays the log from the start, in append order.
    ///
    /// A missing log replays as empty. The first record that does not parse
    /// ends the stream: appends are line-atomic under the store lock, so a
    /// bad record is a torn tail from a crash mid-write, and everything
    /// before it is still authoritative.
    pub fn replay(&self) -> BallotBoxResult<BallotReplay> {
        let file = match File::open(&self.path) {
            Result::Ok(f) => Some(f),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).context(IoSnafu {
                    path: path_str(&self.path),
                })
            }
        };
        Ok(BallotReplay {
            lines: file.map(|f| BufReader::new(f).lines()),
            path: path_str(&self.path),
            halted: false,
        })
    }
}

/// Lazy sequential replay of a [BallotStore].
pub struct BallotReplay {
    lines: Option<io::Lines<BufReader<File>>>,
    path: String,
    halted: bool,
}

impl Iterator for BallotReplay {
    type Item = BallotBoxResult<Ballot>;

    fn next(&mut self) -> Option<BallotBoxResult<Ballot>> {
        if self.halted {
            return None;
        }
        let lines = self.lines.as_mut()?;
        loop {
            match lines.next() {
                None => return None,
                Some(Err(e)) => {
                    self.halted = true;
                    return Some(Err(e).context(IoSnafu {
                        path: self.path.clone(),
                    }));
                }
                Some(Result::Ok(line)) if line.trim().is_empty() => continue,
                Some(Result::Ok(line)) => match serde_json::from_str::<Ballot>(&line) {
                    Result::Ok(ballot) => return Some(Ok(ballot)),
                    Err(e) => {
                        // Truncate-on-read: everything from here on is a torn
                        // tail, not data.
                        warn!(
                            "replay: unreadable record in {} ends the stream: {}",
                            self.path, e
                        );
                        self.halted = true;
                        return None;
                    }
                },
            }
        }
    }
}

// ********* Duplicate guard **********

/// The durable set of voters who have completed a ballot.
///
/// Backed by an append-only text file, one voter id per line. The set only
/// grows: there is no operation that makes a voter eligible again.
pub struct DuplicateGuard {
    path: PathBuf,
    voted: HashSet<String>,
}

impl DuplicateGuard {
    /// Opens the guard, rebuilding the in-memory set from the durable file.
    /// Rebuilding is idempotent: repeated ids collapse into the set.
    pub fn open<P: Into<PathBuf>>(path: P) -> BallotBoxResult<DuplicateGuard> {
        let path = path.into();
        let voted = read_voted_file(&path)?;
        info!(
            "duplicate guard: {} voters already marked in {}",
            voted.len(),
            path.display()
        );
        Ok(DuplicateGuard { path, voted })
    }

    pub fn has_voted(&self, voter_id: &str) -> bool {
        self.voted.contains(voter_id)
    }

    /// Re-reads the durable file, picking up marks appended by other booths
    /// since this guard was opened. Called under the store lock before the
    /// append-then-mark sequence.
    pub fn refresh(&mut self) -> BallotBoxResult<()> {
        self.voted = read_voted_file(&self.path)?;
        Ok(())
    }

    /// Durably marks a voter as having voted.
    ///
    /// The durable file is re-read first, so a mark appended by another
    /// booth is seen even if this guard's set is stale. Re-marking fails
    /// with `AlreadyVoted` and performs no write.
    pub fn mark_voted(&mut self, voter_id: &str) -> BallotBoxResult<()> {
        self.refresh()?;
        ensure!(
            !self.voted.contains(voter_id),
            AlreadyVotedSnafu { voter_id }
        );
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context(IoSnafu {
                path: path_str(&self.path),
            })?;
        file.write_all(format!("{}\n", voter_id).as_bytes())
            .context(IoSnafu {
                path: path_str(&self.path),
            })?;
        file.sync_all().context(IoSnafu {
            path: path_str(&self.path),
        })?;
        self.voted.insert(voter_id.to_string());
        debug!("mark_voted: {}", voter_id);
        Ok(())
    }
}

fn read_voted_file(path: &Path) -> BallotBoxResult<HashSet<String>> {
    match fs::read_to_string(path) {
        Result::Ok(contents) => Ok(contents
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .collect()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashSet::new()),
        Err(e) => Err(e).context(IoSnafu {
            path: path_str(path),
        }),
    }
}

// ********* Store lock **********

/// Exclusive lock shared by every booth process writing to the same ballot
/// box files. Held only for the duration of the append-then-mark sequence,
/// never across the interactive confirm-loop.
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    /// Acquires the lock, retrying for a bounded time if another booth
    /// holds it.
    pub fn acquire<P: Into<PathBuf>>(path: P) -> BallotBoxResult<StoreLock> {
        let path = path.into();
        for attempt in 0..LOCK_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Result::Ok(mut file) => {
                    // The pid is informational, for operators inspecting a
                    // stale lock after a crash.
                    let _ = file.write_all(std::process::id().to_string().as_bytes());
                    debug!("lock acquired at {} (attempt {})", path.display(), attempt);
                    return Ok(StoreLock { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    thread::sleep(LOCK_RETRY);
                }
                Err(e) => {
                    return Err(e).context(IoSnafu {
                        path: path_str(&path),
                    })
                }
            }
        }
        LockBusySnafu {
            path: path_str(&path),
        }
        .fail()
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("could not release lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ballot(booth: &str, number: &str) -> Ballot {
        let mut selections = BTreeMap::new();
        for office in Office::VOTING_ORDER {
            selections.insert(office, Selection::Blank);
        }
        selections.insert(
            Office::President,
            Selection::Nominal(number.to_string()),
        );
        Ballot::new(booth.to_string(), selections)
    }

    #[test]
    fn replay_empty_when_log_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = BallotStore::open(dir.path().join("ballots.jsonl"));
        let replayed: Vec<_> = store.replay().unwrap().collect();
        assert!(replayed.is_empty());
    }

    #[test]
    fn append_then_replay_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = BallotStore::open(dir.path().join("ballots.jsonl"));
        for number in ["11", "22", "33"] {
            store.append(&ballot("MG", number)).unwrap();
        }
        let replayed: Vec<Ballot> = store
            .replay()
            .unwrap()
            .collect::<BallotBoxResult<_>>()
            .unwrap();
        assert_eq!(replayed.len(), 3);
        let numbers: Vec<_> = replayed
            .iter()
            .map(|b| b.selection(Office::President).unwrap().clone())
            .collect();
        assert_eq!(
            numbers,
            vec![
                Selection::Nominal("11".to_string()),
                Selection::Nominal("22".to_string()),
                Selection::Nominal("33".to_string())
            ]
        );
    }

    #[test]
    fn replay_is_restartable() {
        let dir = tempfile::tempdir().unwrap();
        let store = BallotStore::open(dir.path().join("ballots.jsonl"));
        store.append(&ballot("MG", "11")).unwrap();
        store.append(&ballot("MG", "22")).unwrap();
        let first: Vec<Ballot> = store
            .replay()
            .unwrap()
            .collect::<BallotBoxResult<_>>()
            .unwrap();
        let second: Vec<Ballot> = store
            .replay()
            .unwrap()
            .collect::<BallotBoxResult<_>>()
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn torn_trailing_record_ends_replay_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ballots.jsonl");
        let store = BallotStore::open(&path);
        store.append(&ballot("MG", "11")).unwrap();
        store.append(&ballot("MG", "22")).unwrap();
        // Simulate a crash mid-write of a third record.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"booth\":\"MG\",\"selec").unwrap();
        drop(file);
        let replayed: Vec<Ballot> = store
            .replay()
            .unwrap()
            .collect::<BallotBoxResult<_>>()
            .unwrap();
        assert_eq!(replayed.len(), 2);
    }

    #[test]
    fn guard_marks_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voted.txt");
        let mut guard = DuplicateGuard::open(&path).unwrap();
        assert!(!guard.has_voted("V1"));
        guard.mark_voted("V1").unwrap();
        assert!(guard.has_voted("V1"));
        match guard.mark_voted("V1") {
            Err(BallotBoxError::AlreadyVoted { voter_id }) => assert_eq!(voter_id, "V1"),
            other => panic!("expected AlreadyVoted, got {:?}", other),
        }
    }

    #[test]
    fn guard_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voted.txt");
        {
            let mut guard = DuplicateGuard::open(&path).unwrap();
            guard.mark_voted("V1").unwrap();
            guard.mark_voted("V2").unwrap();
        }
        let guard = DuplicateGuard::open(&path).unwrap();
        assert!(guard.has_voted("V1"));
        assert!(guard.has_voted("V2"));
        assert!(!guard.has_voted("V3"));
    }

    #[test]
    fn guard_sees_marks_from_other_booths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voted.txt");
        let mut booth_a = DuplicateGuard::open(&path).unwrap();
        let mut booth_b = DuplicateGuard::open(&path).unwrap();
        booth_a.mark_voted("V1").unwrap();
        // Booth B's in-memory set is stale, but the durable re-read wins.
        assert!(!booth_b.has_voted("V1"));
        assert!(matches!(
            booth_b.mark_voted("V1"),
            Err(BallotBoxError::AlreadyVoted { .. })
        ));
        booth_b.refresh().unwrap();
        assert!(booth_b.has_voted("V1"));
    }

    #[test]
    fn lock_is_exclusive_and_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ballots.jsonl.lock");
        let lock = StoreLock::acquire(&path).unwrap();
        assert!(path.exists());
        drop(lock);
        assert!(!path.exists());
        // Re-acquirable after release.
        let _lock = StoreLock::acquire(&path).unwrap();
    }
}
