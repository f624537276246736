//! Durable state store
//!
//! The snapshot is a single JSON file per stack. A run holds an exclusive
//! lock file next to it for its whole duration. Every per-resource commit
//! is appended to a journal and synced before the executor moves on, and
//! [`Transaction::finalize`] folds the journal into a new snapshot written
//! to a temporary file and renamed over the old one, so a crash at any point
//! leaves the previous snapshot intact and the journal replayable.

use crate::error::{Error, Result};
use crate::value::Properties;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Snapshot schema version written by this build.
pub const STATE_VERSION: u32 = 1;

// ============================================================================
// Records and Snapshots
// ============================================================================

/// Last known state of one applied resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub name: String,
    pub kind: String,
    /// Provider-assigned physical ID
    pub id: String,
    /// Inputs as last applied, fully resolved
    #[serde(default)]
    pub inputs: Properties,
    /// Outputs as last observed
    #[serde(default)]
    pub outputs: Properties,
    /// Logical names this resource depended on when it was applied
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub protect: bool,
    /// Time of the last successful operation
    pub updated_at: DateTime<Utc>,
}

/// The persisted state of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    #[serde(default)]
    pub stack: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resources: BTreeMap<String, StateRecord>,
    /// Exported run-level values
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

impl Snapshot {
    /// An empty snapshot, as seen on the first run of a stack.
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            version: STATE_VERSION,
            stack: stack.into(),
            updated_at: None,
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&StateRecord> {
        self.resources.get(name)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Records that list `name` among their dependencies.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.resources
            .values()
            .filter(|r| r.name != name && r.dependencies.iter().any(|d| d == name))
            .map(|r| r.name.as_str())
            .collect()
    }

    fn parse(path: &Path, content: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct VersionProbe {
            version: u32,
        }

        let corrupt = |e: serde_json::Error| Error::CorruptState {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        // Check the version before trusting the rest of the layout
        let probe: VersionProbe = serde_json::from_str(content).map_err(corrupt)?;
        if probe.version > STATE_VERSION {
            return Err(Error::UnsupportedStateVersion {
                found: probe.version,
                supported: STATE_VERSION,
            });
        }
        serde_json::from_str(content).map_err(corrupt)
    }

    fn apply(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::Upsert { record } => {
                self.resources.insert(record.name.clone(), record);
            }
            JournalEntry::Remove { name } => {
                self.resources.remove(&name);
            }
        }
    }
}

/// One durable per-resource change.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalEntry {
    Upsert { record: StateRecord },
    Remove { name: String },
}

// ============================================================================
// Locking
// ============================================================================

/// Contents of a lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub host: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown host".to_string()),
            acquired_at: Utc::now(),
        }
    }

    fn read(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }
}

impl fmt::Display for LockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pid {} on {} since {}",
            self.pid,
            self.host,
            self.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

/// An acquired lock, released on drop.
#[derive(Debug)]
struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    fn acquire(path: &Path) -> Result<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder = LockInfo::read(path)
                    .map(|info| info.to_string())
                    .unwrap_or_else(|| "an unknown run".to_string());
                return Err(Error::Locked {
                    path: path.to_path_buf(),
                    holder,
                });
            }
            Err(e) => return Err(Error::state_io(path, e)),
        };

        let info = serde_json::to_string(&LockInfo::current()).map_err(io::Error::other);
        info.and_then(|info| {
            file.write_all(info.as_bytes())?;
            file.sync_all()
        })
        .map_err(|e| Error::state_io(path, e))?;

        log::debug!("Acquired state lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Released state lock {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to release lock {}: {}", self.path.display(), e),
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// Owner of one stack's snapshot file.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    stack: String,
    lock: Option<LockGuard>,
}

impl StateStore {
    pub fn open(path: impl Into<PathBuf>, stack: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            stack: stack.into(),
            lock: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    fn lock_path(&self) -> PathBuf {
        sibling(&self.path, "lock")
    }

    fn journal_path(&self) -> PathBuf {
        sibling(&self.path, "journal")
    }

    /// Lock the stack and load its snapshot.
    ///
    /// Returns an empty snapshot on the first run. Fails with
    /// [`Error::Locked`] if another run holds the lock.
    pub fn load(&mut self) -> Result<Snapshot> {
        if self.lock.is_none() {
            if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir).map_err(|e| Error::state_io(dir, e))?;
            }
            self.lock = Some(LockGuard::acquire(&self.lock_path())?);
        }

        match self.read() {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                self.lock = None;
                Err(e)
            }
        }
    }

    /// Read the snapshot without taking the lock.
    pub fn read(&self) -> Result<Snapshot> {
        let mut snapshot = if self.path.exists() {
            let content =
                fs::read_to_string(&self.path).map_err(|e| Error::state_io(&self.path, e))?;
            let snapshot = Snapshot::parse(&self.path, &content)?;
            log::debug!(
                "Loaded {} resources from {}",
                snapshot.len(),
                self.path.display()
            );
            snapshot
        } else {
            log::debug!("No snapshot at {}, starting empty", self.path.display());
            Snapshot::new(self.stack.clone())
        };

        self.replay_journal(&mut snapshot)?;
        Ok(snapshot)
    }

    /// Whether an interrupted run left commits that no snapshot holds yet.
    pub fn has_pending_journal(&self) -> bool {
        fs::metadata(self.journal_path()).is_ok_and(|m| m.len() > 0)
    }

    /// Fold in commits left behind by a run that never finalized.
    fn replay_journal(&self, snapshot: &mut Snapshot) -> Result<()> {
        let path = self.journal_path();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::state_io(&path, e)),
        };

        let mut replayed = 0;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| Error::state_io(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(&line) {
                Ok(entry) => {
                    snapshot.apply(entry);
                    replayed += 1;
                }
                Err(e) => {
                    // A torn final line from a crash mid-write
                    log::warn!("Ignoring unreadable journal entry in {}: {}", path.display(), e);
                    break;
                }
            }
        }

        if replayed > 0 {
            log::warn!(
                "Recovered {} uncommitted change(s) from an interrupted run ({})",
                replayed,
                path.display()
            );
        }
        Ok(())
    }

    /// Start a transaction on a loaded snapshot. The lock must be held.
    pub fn begin(&mut self, snapshot: Snapshot) -> Result<Transaction<'_>> {
        if self.lock.is_none() {
            return Err(Error::PlanConflict {
                message: "state transaction started without holding the stack lock".into(),
            });
        }

        let path = self.journal_path();
        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::state_io(&path, e))?;

        Ok(Transaction {
            store: self,
            snapshot,
            journal,
            #[cfg(test)]
            fault: None,
        })
    }

    /// Release the lock without touching the snapshot.
    pub fn abort(&mut self) {
        if self.lock.take().is_some() {
            log::debug!("Aborted run on {}", self.path.display());
        }
    }

    /// Remove a lock left behind by a crashed run.
    pub fn force_unlock(&self) -> Result<Option<LockInfo>> {
        let path = self.lock_path();
        if !path.exists() {
            return Ok(None);
        }
        let info = LockInfo::read(&path);
        fs::remove_file(&path).map_err(|e| Error::state_io(&path, e))?;
        Ok(Some(info.unwrap_or_else(|| LockInfo {
            pid: 0,
            host: "unknown host".into(),
            acquired_at: Utc::now(),
        })))
    }

    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let dir = self.path.parent().filter(|d| !d.as_os_str().is_empty());
        if let Some(dir) = dir {
            fs::create_dir_all(dir).map_err(|e| Error::state_io(dir, e))?;
        }

        let tmp = sibling(&self.path, "tmp");
        let write = || -> io::Result<()> {
            let mut content = serde_json::to_string_pretty(snapshot).map_err(io::Error::other)?;
            content.push('\n');
            let mut file = File::create(&tmp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|e| Error::state_io(&self.path, e))?;

        // Persist the rename itself
        if let Some(dir) = dir
            && let Err(e) = File::open(dir).and_then(|handle| handle.sync_all())
        {
            log::warn!("Could not sync {}: {}", dir.display(), e);
        }
        log::debug!(
            "Wrote {} resources to {}",
            snapshot.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Scoped single-writer handle for recording a run's changes.
#[derive(Debug)]
pub struct Transaction<'a> {
    store: &'a mut StateStore,
    snapshot: Snapshot,
    journal: File,
    /// Fails every journal write once set
    #[cfg(test)]
    pub(crate) fault: Option<std::sync::Arc<std::sync::atomic::AtomicBool>>,
}

impl Transaction<'_> {
    /// Durably record the new state of a resource.
    pub fn commit(&mut self, name: &str, mut record: StateRecord) -> Result<()> {
        record.name = name.to_string();
        self.append(&JournalEntry::Upsert {
            record: record.clone(),
        })?;
        self.snapshot.resources.insert(name.to_string(), record);
        Ok(())
    }

    /// Durably record that a resource no longer exists.
    pub fn remove(&mut self, name: &str) -> Result<Option<StateRecord>> {
        self.append(&JournalEntry::Remove {
            name: name.to_string(),
        })?;
        Ok(self.snapshot.resources.remove(name))
    }

    /// Replace the exported run-level values.
    pub fn set_outputs(&mut self, outputs: BTreeMap<String, Value>) {
        self.snapshot.outputs = outputs;
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    fn append(&mut self, entry: &JournalEntry) -> Result<()> {
        let path = self.store.journal_path();
        let mut line = serde_json::to_string(entry)
            .map_err(|e| Error::state_io(&path, io::Error::other(e)))?;
        line.push('\n');
        if self.injected_fault() {
            return Err(Error::state_io(&path, io::Error::other("injected write failure")));
        }
        self.journal
            .write_all(line.as_bytes())
            .and_then(|()| self.journal.sync_data())
            .map_err(|e| Error::state_io(&path, e))
    }

    #[cfg(test)]
    fn injected_fault(&self) -> bool {
        self.fault
            .as_ref()
            .is_some_and(|f| f.load(std::sync::atomic::Ordering::SeqCst))
    }

    #[cfg(not(test))]
    fn injected_fault(&self) -> bool {
        false
    }

    /// Atomically replace the snapshot and release the lock.
    pub fn finalize(self) -> Result<Snapshot> {
        let Transaction {
            store,
            mut snapshot,
            journal,
            ..
        } = self;

        snapshot.version = STATE_VERSION;
        snapshot.stack.clone_from(&store.stack);
        snapshot.updated_at = Some(Utc::now());
        store.write_snapshot(&snapshot)?;

        drop(journal);
        let journal_path = store.journal_path();
        if let Err(e) = fs::remove_file(&journal_path)
            && e.kind() != io::ErrorKind::NotFound
        {
            log::warn!("Failed to remove journal {}: {}", journal_path.display(), e);
        }

        store.lock = None;
        Ok(snapshot)
    }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".");
    s.push(extension);
    PathBuf::from(s)
}

// ============================================================================
// Tests
// ============================================================================
