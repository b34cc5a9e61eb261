use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::runtime::Handle;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::catalog::ItemId;
use crate::engine::Shared;
use crate::error::{SyncError, SyncResult};
use crate::index::CacheEntry;

/// Whether the periodic revision check is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Stopped,
    Running,
}

/// Outcome of one poll tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Entries re-downloaded because their revision changed
    pub updated: usize,
    /// Entries whose revision matched
    pub unchanged: usize,
    /// Entries never confirmed remotely, or no authorized client
    pub skipped: usize,
    /// Entries whose check failed
    pub failed: usize,
}

struct PollHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Inputs of the Stopped/Running state machine, kept under one lock so a
/// start can never race past a concurrent stop.
#[derive(Default)]
struct LoopState {
    prepared: bool,
    connected: bool,
    closed: bool,
    handle: Option<PollHandle>,
}

/// Cancellable periodic scheduler for poll ticks.
///
/// The loop runs while the engine is both prepared and connected, until
/// it is closed. Each tick is spawned as its own task, so stopping the loop
/// only prevents future ticks; per-entry work already in flight runs to
/// completion.
pub(crate) struct PollLoop {
    state: Mutex<LoopState>,
    runtime: OnceLock<Handle>,
}

impl PollLoop {
    /// Ticks are spawned on the runtime current at construction, or the one
    /// later bound with [`PollLoop::bind_current_runtime`].
    pub(crate) fn new() -> Self {
        let runtime = OnceLock::new();
        if let Ok(handle) = Handle::try_current() {
            let _ = runtime.set(handle);
        }
        Self {
            state: Mutex::new(LoopState::default()),
            runtime,
        }
    }

    /// Remember the calling runtime if none is bound yet.
    pub(crate) fn bind_current_runtime(&self) {
        if self.runtime.get().is_none() {
            if let Ok(handle) = Handle::try_current() {
                let _ = self.runtime.set(handle);
            }
        }
    }

    /// Record a successful remote pass and start ticking if connected.
    pub(crate) fn mark_prepared(&self, shared: &Arc<Shared>) {
        let mut state = self.lock();
        state.prepared = true;
        self.reconcile(&mut state, shared);
    }

    /// Apply a connectivity value. Only transitions have an effect.
    pub(crate) fn set_connected(&self, shared: &Arc<Shared>, online: bool) {
        let mut state = self.lock();
        if state.connected == online {
            return;
        }
        state.connected = online;
        if online {
            debug!("Connectivity restored");
        } else {
            debug!("Connectivity lost");
        }
        self.reconcile(&mut state, shared);
    }

    /// Stop ticking for good. Returns false if it was not running.
    pub(crate) fn close(&self) -> bool {
        let mut state = self.lock();
        state.closed = true;
        Self::halt(&mut state)
    }

    pub(crate) fn is_prepared(&self) -> bool {
        self.lock().prepared
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub(crate) fn state(&self) -> PollState {
        match self.lock().handle.as_ref() {
            Some(handle) if handle.is_running() => PollState::Running,
            _ => PollState::Stopped,
        }
    }

    /// Bring the loop in line with its inputs.
    fn reconcile(&self, state: &mut LoopState, shared: &Arc<Shared>) {
        let should_run = state.prepared && state.connected && !state.closed;
        if !should_run {
            if Self::halt(state) {
                info!("Poll loop stopped");
            }
            return;
        }
        if state.handle.as_ref().is_some_and(PollHandle::is_running) {
            return;
        }

        let Some(runtime) = self
            .runtime
            .get()
            .cloned()
            .or_else(|| Handle::try_current().ok())
        else {
            warn!("No Tokio runtime available, poll loop not started");
            return;
        };

        let (stop, stop_rx) = watch::channel(false);
        let task = runtime.spawn(run(shared.clone(), stop_rx));
        state.handle = Some(PollHandle { stop, task });
        info!(
            "Poll loop started (interval {:?})",
            shared.config.poll_interval
        );
    }

    fn halt(state: &mut LoopState) -> bool {
        match state.handle.take() {
            Some(handle) => {
                let _ = handle.stop.send(true);
                handle.is_running()
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn run(shared: Arc<Shared>, mut stop: watch::Receiver<bool>) {
    let period = shared.config.poll_interval.max(Duration::from_millis(1));
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let shared = shared.clone();
                tokio::spawn(async move {
                    let report = shared.poll_once().await;
                    debug!(
                        "Poll tick: {} updated, {} unchanged, {} skipped, {} failed",
                        report.updated, report.unchanged, report.skipped, report.failed
                    );
                });
            }
        }
    }

    debug!("Poll loop exited");
}

impl Shared {
    /// Check every cached entry once, concurrently, with per-entry isolation.
    pub(crate) async fn poll_once(self: &Arc<Self>) -> PollReport {
        let entries = self.index.snapshot();
        let mut report = PollReport::default();

        if self.authorized_remote().is_none() {
            report.skipped = entries.len();
            return report;
        }

        let mut tasks = JoinSet::new();
        for entry in entries {
            if !entry.is_confirmed() {
                debug!("Skipping {}, not confirmed remotely yet", entry.item);
                report.skipped += 1;
                continue;
            }

            let shared = self.clone();
            tasks.spawn(async move {
                let item = entry.item.clone();
                let outcome = shared.poll_entry(entry).await;
                (item, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(true))) => report.updated += 1,
                Ok((_, Ok(false))) => report.unchanged += 1,
                Ok((item, Err(e))) => {
                    warn!("Failed to refresh {}: {}", item, e);
                    report.failed += 1;
                }
                Err(e) => {
                    warn!("Poll task aborted: {}", e);
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Refresh one entry if its remote revision moved. Returns whether the
    /// entry was updated.
    #[instrument(skip(self, entry), level = "debug", fields(item = %entry.item))]
    async fn poll_entry(&self, entry: CacheEntry) -> SyncResult<bool> {
        let remote = self.authorized_remote().ok_or(SyncError::Unauthorized)?;
        let file_name = entry.item.file_name().to_string();

        let guard = self.index.lock_entry(&file_name).await;
        // A concurrent update may have advanced the entry since the snapshot
        let current = self.index.get(&file_name).unwrap_or(entry);

        let metadata = remote.get_metadata(&current.remote_path).await?;
        if metadata.revision == current.revision {
            debug!("Revision {} unchanged", current.revision);
            return Ok(false);
        }

        let data = remote.download(&current.remote_path).await?;
        self.store.write_atomic(&current.local_path, &data).await?;
        self.index.update_revision(
            &file_name,
            current.local_path.clone(),
            metadata.revision.clone(),
        );
        drop(guard);

        debug!(
            "Revision {} -> {} ({} bytes)",
            current.revision,
            metadata.revision,
            data.len()
        );
        self.notify(current.item);
        Ok(true)
    }

    fn notify(&self, item: ItemId) {
        let receivers = self.notifier.publish(item);
        debug!("Change published to {} subscribers", receivers);
    }
}
