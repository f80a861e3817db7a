//! In-process registry of refresh runs.
//!
//! Owns every [`RefreshRun`] by id, the active run per universe, and a
//! bounded history of completed runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::model::{RefreshMode, RefreshRun, RunStatus};
use crate::errors::{Error, Result};

/// Completed runs kept by default.
pub const DEFAULT_RUN_HISTORY: usize = 100;

/// Result of [`RunRegistry::begin`].
#[derive(Debug)]
pub enum Begin {
    /// A new PENDING run was registered; the caller must drive it.
    Started {
        run: RefreshRun,
        token: CancellationToken,
    },
    /// A run for the same universe is already active.
    Coalesced(RefreshRun),
}

struct RunEntry {
    run: RefreshRun,
    token: CancellationToken,
    status: watch::Sender<RunStatus>,
}

#[derive(Default)]
struct Inner {
    runs: HashMap<String, RunEntry>,
    /// universe key -> active run id
    active: HashMap<String, String>,
    /// completed run ids, oldest first
    history: VecDeque<String>,
}

pub struct RunRegistry {
    inner: Mutex<Inner>,
    history_limit: usize,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RUN_HISTORY)
    }
}

impl RunRegistry {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            history_limit: history_limit.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("Run registry mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Register a PENDING run for `target` or return the active one.
    ///
    /// The check and the insert happen under one lock, so two concurrent
    /// triggers for the same universe always end up on the same run.
    pub fn begin(
        &self,
        target: &str,
        mode: RefreshMode,
        force: bool,
        symbols: Vec<String>,
        now: DateTime<Utc>,
    ) -> Begin {
        let mut inner = self.lock();

        if let Some(active_id) = inner.active.get(target) {
            if let Some(entry) = inner.runs.get(active_id) {
                debug!("Coalescing refresh for '{}' into run {}", target, active_id);
                return Begin::Coalesced(entry.run.clone());
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let run = RefreshRun::new(id.clone(), target.to_string(), mode, force, symbols, now);
        let token = CancellationToken::new();
        let (status, _) = watch::channel(RunStatus::Pending);

        inner.active.insert(target.to_string(), id.clone());
        inner.runs.insert(
            id,
            RunEntry {
                run: run.clone(),
                token: token.clone(),
                status,
            },
        );

        Begin::Started { run, token }
    }

    /// Apply `f` to a non-terminal run and publish its status.
    pub fn update<F>(&self, run_id: &str, f: F) -> Result<RefreshRun>
    where
        F: FnOnce(&mut RefreshRun),
    {
        let mut inner = self.lock();
        let entry = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| Error::NotFound(format!("Refresh run {}", run_id)))?;

        if !entry.run.status.is_terminal() {
            f(&mut entry.run);
            entry.status.send_replace(entry.run.status);
        }
        Ok(entry.run.clone())
    }

    /// Move a run to its terminal status, release its universe and evict
    /// the oldest completed runs beyond the history limit.
    pub fn finish(&self, run_id: &str, now: DateTime<Utc>) -> Result<RefreshRun> {
        let mut inner = self.lock();
        let entry = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| Error::NotFound(format!("Refresh run {}", run_id)))?;

        if entry.run.status.is_terminal() {
            return Ok(entry.run.clone());
        }

        entry.run.status = entry.run.summary_status();
        entry.run.completed_at = Some(now);
        entry.status.send_replace(entry.run.status);
        let run = entry.run.clone();

        if inner.active.get(&run.target) == Some(&run.id) {
            inner.active.remove(&run.target);
        }
        inner.history.push_back(run.id.clone());
        while inner.history.len() > self.history_limit {
            if let Some(evicted) = inner.history.pop_front() {
                inner.runs.remove(&evicted);
            }
        }

        Ok(run)
    }

    pub fn get(&self, run_id: &str) -> Option<RefreshRun> {
        self.lock().runs.get(run_id).map(|e| e.run.clone())
    }

    /// All known runs, newest first.
    pub fn list(&self) -> Vec<RefreshRun> {
        let mut runs: Vec<RefreshRun> = self.lock().runs.values().map(|e| e.run.clone()).collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        runs
    }

    /// Active run for a universe, if any.
    pub fn active_for(&self, target: &str) -> Option<RefreshRun> {
        let inner = self.lock();
        let id = inner.active.get(target)?;
        inner.runs.get(id).map(|e| e.run.clone())
    }

    /// Request cooperative cancellation. Terminal runs are returned as is.
    pub fn cancel(&self, run_id: &str) -> Result<RefreshRun> {
        let mut inner = self.lock();
        let entry = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| Error::NotFound(format!("Refresh run {}", run_id)))?;

        if !entry.run.status.is_terminal() {
            entry.run.cancel_requested = true;
            entry.token.cancel();
        }
        Ok(entry.run.clone())
    }

    /// Status updates for a run.
    pub fn subscribe(&self, run_id: &str) -> Option<watch::Receiver<RunStatus>> {
        self.lock().runs.get(run_id).map(|e| e.status.subscribe())
    }
}
