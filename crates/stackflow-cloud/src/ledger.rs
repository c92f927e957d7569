//! Run ledger
//!
//! Records every state transition of every node, enforces that status only
//! moves forward within a run, and persists to `.stackflow/ledger.json` so a
//! later run can resume where a crashed or failed one stopped.

use crate::descriptor::{ResourceDescriptor, ResourceKind};
use crate::error::{CloudError, Result};
use crate::graph::DependencyGraph;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

const LEDGER_VERSION: u32 = 1;
const LEDGER_DIR: &str = ".stackflow";
const LEDGER_FILE: &str = "ledger.json";
const LEDGER_BACKUP: &str = "ledger.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Provisioning status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Waiting for dependencies or for a worker
    Pending,
    /// Owned by a worker
    InProgress,
    /// Created and ready
    Ready,
    /// Retry budget exhausted or permanent error
    Failed,
    /// Never attempted because a dependency did not become Ready
    Skipped,
    /// Created, then deleted by the rollback policy
    RolledBack,
}

impl ResourceStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResourceStatus::Pending | ResourceStatus::InProgress)
    }

    /// Forward-only transitions allowed within a single run.
    ///
    /// `InProgress -> Pending` is the retry requeue; the attempt counter has
    /// already moved forward when it happens.
    pub fn can_transition_to(&self, next: ResourceStatus) -> bool {
        use ResourceStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Skipped)
                | (InProgress, Ready)
                | (InProgress, Failed)
                | (InProgress, Pending)
                | (Ready, RolledBack)
        )
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Pending => write!(f, "pending"),
            ResourceStatus::InProgress => write!(f, "in_progress"),
            ResourceStatus::Ready => write!(f, "ready"),
            ResourceStatus::Failed => write!(f, "failed"),
            ResourceStatus::Skipped => write!(f, "skipped"),
            ResourceStatus::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// Current state of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub kind: ResourceKind,

    pub status: ResourceStatus,

    /// Provider-assigned ID, present only while Ready
    pub physical_id: Option<String>,

    /// Provisioning attempts made in the current run
    pub attempt: u32,

    /// Last failure description, cleared on success
    pub last_error: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn pending(kind: ResourceKind) -> Self {
        Self {
            kind,
            status: ResourceStatus::Pending,
            physical_id: None,
            attempt: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

/// One recorded transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Ledger-wide sequence number
    pub seq: u64,
    pub run: u32,
    pub status: ResourceStatus,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Ledger entry: current state plus its append-only transition log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub state: ResourceState,
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

/// Ordered mapping from logical name to state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLedger {
    /// Ledger file version
    pub version: u32,

    /// Number of runs started against this ledger
    pub run: u32,

    /// Last issued transition sequence number
    seq: u64,

    pub updated_at: DateTime<Utc>,

    entries: BTreeMap<String, LedgerEntry>,
}

impl Default for RunLedger {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            run: 0,
            seq: 0,
            updated_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }
}

impl RunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new run against `graph`.
    ///
    /// Ready entries are kept as-is. Every other entry (including one left
    /// InProgress by a crash, or one whose recorded kind no longer matches its
    /// descriptor) goes back to Pending with a fresh attempt count.
    pub fn begin_run(&mut self, graph: &DependencyGraph) {
        self.run += 1;
        for name in graph.order() {
            let Some(descriptor) = graph.descriptor(name) else {
                continue;
            };
            let keep = self.entries.get(name).is_some_and(|entry| {
                entry.state.status == ResourceStatus::Ready && entry.state.kind == descriptor.kind
            });
            if keep {
                continue;
            }

            let previous_error = self.entries.get(name).and_then(|e| e.state.last_error.clone());
            if let Some(entry) = self.entries.get(name) {
                if entry.state.kind != descriptor.kind {
                    tracing::warn!(
                        resource = %name,
                        recorded = %entry.state.kind,
                        declared = %descriptor.kind,
                        "Kind changed since last run; provisioning again"
                    );
                }
            }

            let mut state = ResourceState::pending(descriptor.kind);
            state.last_error = previous_error;
            self.seq += 1;
            let transition = Transition {
                seq: self.seq,
                run: self.run,
                status: ResourceStatus::Pending,
                attempt: 0,
                detail: None,
                at: state.updated_at,
            };
            let entry = self
                .entries
                .entry(name.clone())
                .or_insert_with(|| LedgerEntry {
                    state: state.clone(),
                    transitions: Vec::new(),
                });
            entry.state = state;
            entry.transitions.push(transition);
        }
        self.updated_at = Utc::now();
    }

    /// Append a transition for `name`; status may only move forward.
    pub fn record(&mut self, name: &str, mut state: ResourceState) -> Result<()> {
        let run = self.run;
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| CloudError::StateError(format!("'{name}' is not in the ledger")))?;

        let from = entry.state.status;
        if !from.can_transition_to(state.status) {
            return Err(CloudError::InvalidTransition {
                name: name.to_string(),
                from: from.to_string(),
                to: state.status.to_string(),
            });
        }
        if state.attempt < entry.state.attempt {
            return Err(CloudError::InvalidTransition {
                name: name.to_string(),
                from: format!("attempt {}", entry.state.attempt),
                to: format!("attempt {}", state.attempt),
            });
        }

        state.updated_at = Utc::now();
        self.seq += 1;
        entry.transitions.push(Transition {
            seq: self.seq,
            run,
            status: state.status,
            attempt: state.attempt,
            detail: match state.status {
                ResourceStatus::Pending | ResourceStatus::Failed | ResourceStatus::Skipped => {
                    state.last_error.clone()
                }
                _ => None,
            },
            at: state.updated_at,
        });
        entry.state = state;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_in_progress(&mut self, name: &str) -> Result<u32> {
        let mut state = self.require(name)?.clone();
        state.status = ResourceStatus::InProgress;
        state.attempt += 1;
        let attempt = state.attempt;
        self.record(name, state)?;
        Ok(attempt)
    }

    pub fn mark_ready(&mut self, name: &str, physical_id: impl Into<String>) -> Result<()> {
        let mut state = self.require(name)?.clone();
        state.status = ResourceStatus::Ready;
        state.physical_id = Some(physical_id.into());
        state.last_error = None;
        self.record(name, state)
    }

    /// Put an InProgress node back to Pending after a transient failure
    pub fn requeue(&mut self, name: &str, error: impl Into<String>) -> Result<()> {
        self.finish_with(name, ResourceStatus::Pending, error.into())
    }

    pub fn mark_failed(&mut self, name: &str, error: impl Into<String>) -> Result<()> {
        self.finish_with(name, ResourceStatus::Failed, error.into())
    }

    pub fn mark_skipped(&mut self, name: &str, reason: impl Into<String>) -> Result<()> {
        self.finish_with(name, ResourceStatus::Skipped, reason.into())
    }

    pub fn mark_rolled_back(&mut self, name: &str, reason: impl Into<String>) -> Result<()> {
        let mut state = self.require(name)?.clone();
        state.status = ResourceStatus::RolledBack;
        state.physical_id = None;
        state.last_error = Some(reason.into());
        self.record(name, state)
    }

    /// Note an error on a node without changing its status
    pub fn annotate_error(&mut self, name: &str, error: impl Into<String>) -> Result<()> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| CloudError::StateError(format!("'{name}' is not in the ledger")))?;
        entry.state.last_error = Some(error.into());
        entry.state.updated_at = Utc::now();
        Ok(())
    }

    fn finish_with(&mut self, name: &str, status: ResourceStatus, error: String) -> Result<()> {
        let mut state = self.require(name)?.clone();
        state.status = status;
        state.last_error = Some(error);
        self.record(name, state)
    }

    fn require(&self, name: &str) -> Result<&ResourceState> {
        self.get(name)
            .ok_or_else(|| CloudError::StateError(format!("'{name}' is not in the ledger")))
    }

    pub fn get(&self, name: &str) -> Option<&ResourceState> {
        self.entries.get(name).map(|e| &e.state)
    }

    pub fn status(&self, name: &str) -> Option<ResourceStatus> {
        self.get(name).map(|s| s.status)
    }

    pub fn transitions(&self, name: &str) -> &[Transition] {
        self.entries
            .get(name)
            .map(|e| e.transitions.as_slice())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Immutable copy of every node's current state
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            run: self.run,
            states: self
                .entries
                .iter()
                .map(|(name, entry)| (name.clone(), entry.state.clone()))
                .collect(),
        }
    }

    /// Descriptors that are not yet Ready, in provisioning order
    pub fn resume_filter<'g>(&self, graph: &'g DependencyGraph) -> Vec<&'g ResourceDescriptor> {
        graph
            .order()
            .iter()
            .filter_map(|name| graph.descriptor(name))
            .filter(|d| {
                !self
                    .get(&d.name)
                    .is_some_and(|s| s.status == ResourceStatus::Ready && s.kind == d.kind)
            })
            .collect()
    }
}

/// Read-only view of a ledger at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub run: u32,
    pub states: BTreeMap<String, ResourceState>,
}

impl LedgerSnapshot {
    pub fn get(&self, name: &str) -> Option<&ResourceState> {
        self.states.get(name)
    }
}

/// Reads and writes the ledger file
pub struct LedgerStore {
    dir: PathBuf,
}

impl LedgerStore {
    /// Store the ledger in `dir` directly
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Store the ledger under `<project_root>/.stackflow`
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        Self::new(project_root.as_ref().join(LEDGER_DIR))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ledger_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.dir.join(LEDGER_BACKUP)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).await?;
            tracing::debug!("Created ledger directory: {}", self.dir.display());
        }
        Ok(())
    }

    /// Load the ledger, or an empty one if nothing was saved yet
    pub async fn load(&self) -> Result<RunLedger> {
        let path = self.ledger_path();
        if !path.exists() {
            tracing::debug!("Ledger file not found, starting empty");
            return Ok(RunLedger::new());
        }

        let content = fs::read_to_string(&path).await?;
        let ledger: RunLedger = serde_json::from_str(&content)?;

        if ledger.version > LEDGER_VERSION {
            return Err(CloudError::StateError(format!(
                "Ledger version {} is newer than supported version {}",
                ledger.version, LEDGER_VERSION
            )));
        }

        tracing::debug!("Loaded ledger with {} entries", ledger.len());
        Ok(ledger)
    }

    /// Save the ledger, keeping the previous file as a backup
    pub async fn save(&self, ledger: &RunLedger) -> Result<()> {
        self.ensure_dir().await?;

        let path = self.ledger_path();
        let backup = self.backup_path();

        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
        }

        let content = serde_json::to_string_pretty(ledger)?;
        fs::write(&path, content).await?;

        tracing::debug!("Saved ledger with {} entries", ledger.len());
        Ok(())
    }

    /// Acquire the advisory lock that keeps two runs off the same ledger
    pub async fn acquire_lock(&self) -> Result<LedgerLock> {
        self.ensure_dir().await?;

        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            if !lock_info.is_stale() {
                return Err(CloudError::LockError(format!(
                    "Ledger is locked by {} since {}; remove {} if that run is gone",
                    lock_info.describe_holder(),
                    lock_info.acquired_at,
                    lock_path.display()
                )));
            }

            tracing::warn!(holder = %lock_info.describe_holder(), "Removing stale lock");
        }

        let lock_info = LockInfo {
            holder: local_hostname(),
            pid: Some(std::process::id()),
            acquired_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&lock_info)?;
        fs::write(&lock_path, content).await?;

        tracing::debug!("Acquired ledger lock");
        Ok(LedgerLock {
            lock_path,
            released: false,
        })
    }

    /// Remove the lock regardless of who holds it; returns whether one existed
    pub async fn force_unlock(&self) -> Result<bool> {
        let lock_path = self.lock_path();
        if !lock_path.exists() {
            return Ok(false);
        }
        fs::remove_file(&lock_path).await?;
        tracing::warn!("Removed ledger lock {}", lock_path.display());
        Ok(true)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    #[serde(default)]
    pid: Option<u32>,
    acquired_at: DateTime<Utc>,
}

impl LockInfo {
    /// Abandoned after an hour, or at once when the holding process on
    /// this host has exited
    fn is_stale(&self) -> bool {
        let age = Utc::now().signed_duration_since(self.acquired_at);
        if age.num_hours() >= 1 {
            return true;
        }
        match self.pid {
            Some(pid) if self.holder == local_hostname() => !process_alive(pid),
            _ => false,
        }
    }

    fn describe_holder(&self) -> String {
        match self.pid {
            Some(pid) => format!("{} (pid {})", self.holder, pid),
            None => self.holder.clone(),
        }
    }
}

fn local_hostname() -> String {
    system_hostname()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| std::env::var("HOST").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    let name = nix::unistd::gethostname().ok()?;
    name.into_string().ok().filter(|n| !n.is_empty())
}

#[cfg(not(unix))]
fn system_hostname() -> Option<String> {
    None
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0 only checks existence; EPERM means it exists under another user
    match signal::kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// RAII guard for the ledger lock
pub struct LedgerLock {
    lock_path: PathBuf,
    released: bool,
}

impl LedgerLock {
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released ledger lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
