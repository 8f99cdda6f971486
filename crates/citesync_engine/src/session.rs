//! The sync session state machine.
//!
//! One [`SyncClient`] owns a device's synchronization with one server.
//! A cycle is always pull, merge, push, in that order: merging first
//! means pushes are made against fresh base revisions and most would-be
//! rejections are avoided before they happen.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::merge::{decide, LocalState, MergeOutcome, Resolution};
use crate::resolver::{ConflictContext, ConflictResolver, Unattended};
use crate::store::{ItemStore, PendingUpdate};
use crate::transport::SyncTransport;
use citesync_core::CheckpointStore;
use citesync_protocol::{
    ChangeRecord, Checkpoint, ItemId, ItemUpdate, PullRequest, PushRequest, PushResponse,
    Tombstone, TombstoneUpdate,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The phase a sync client is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No session running.
    Idle,
    /// Requesting changes from the server.
    Pulling,
    /// Applying pulled changes locally.
    Merging,
    /// Uploading local changes.
    Pushing,
    /// Caught up; waiting on the change-notification channel.
    EventListening,
    /// The last session failed.
    Error,
}

/// Counters accumulated across the life of a client.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Completed sync cycles.
    pub cycles: u64,
    /// Server changes merged.
    pub items_pulled: u64,
    /// Local changes accepted by the server.
    pub items_pushed: u64,
    /// Conflicts decided by the resolver.
    pub conflicts_resolved: u64,
    /// Conflicts the resolver declined, left for a later cycle.
    pub conflicts_parked: u64,
    /// Push submissions rejected by the server's compare-and-swap.
    pub push_rejections: u64,
    /// The last error, if the previous cycle failed.
    pub last_error: Option<String>,
}

/// The outcome of one sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Server changes merged this cycle.
    pub pulled: usize,
    /// Local changes accepted by the server this cycle.
    pub pushed: usize,
    /// Conflicts decided by the resolver this cycle.
    pub conflicts_resolved: usize,
    /// Conflicts parked this cycle.
    pub parked: usize,
    /// Push submissions rejected this cycle.
    pub rejected: usize,
    /// Wall-clock duration of the cycle.
    pub duration: Duration,
}

/// What a push reference resolves to when the response comes back.
enum PushTarget {
    Update { key: u64 },
    Tombstone(ItemId),
}

/// A synchronizing client for one collection against one server.
///
/// The client is internally synchronized and designed to be driven from
/// a background thread while the application keeps using the store.
/// Cancellation is cooperative: [`SyncClient::cancel`] takes effect at
/// the next phase boundary, never mid-merge, so the checkpoint and the
/// merged state stay consistent.
pub struct SyncClient<T, S, C> {
    config: SyncConfig,
    transport: Arc<T>,
    store: Arc<S>,
    checkpoints: Arc<C>,
    resolver: Arc<dyn ConflictResolver>,
    phase: RwLock<SyncPhase>,
    stats: RwLock<SyncStats>,
    parked: Mutex<HashMap<ItemId, ChangeRecord>>,
    cancelled: AtomicBool,
}

impl<T, S, C> SyncClient<T, S, C>
where
    T: SyncTransport,
    S: ItemStore,
    C: CheckpointStore,
{
    /// Creates a client that parks every conflict.
    pub fn new(config: SyncConfig, transport: Arc<T>, store: Arc<S>, checkpoints: Arc<C>) -> Self {
        Self {
            config,
            transport,
            store,
            checkpoints,
            resolver: Arc::new(Unattended),
            phase: RwLock::new(SyncPhase::Idle),
            stats: RwLock::new(SyncStats::default()),
            parked: Mutex::new(HashMap::new()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Replaces the conflict resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Returns the current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.read()
    }

    /// Returns a snapshot of the lifetime counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Requests cooperative cancellation of the running session.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns the items whose conflicts are parked awaiting resolution.
    pub fn parked_conflicts(&self) -> Vec<ItemId> {
        self.parked.lock().keys().copied().collect()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.write() = phase;
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Runs one full pull-merge-push cycle.
    pub fn sync(&self) -> SyncResult<SyncReport> {
        let result = self.run_cycle();
        match &result {
            Ok(report) => {
                let mut stats = self.stats.write();
                stats.cycles += 1;
                stats.items_pulled += report.pulled as u64;
                stats.items_pushed += report.pushed as u64;
                stats.conflicts_resolved += report.conflicts_resolved as u64;
                stats.conflicts_parked += report.parked as u64;
                stats.push_rejections += report.rejected as u64;
                stats.last_error = None;
                self.set_phase(SyncPhase::Idle);
                info!(
                    pulled = report.pulled,
                    pushed = report.pushed,
                    parked = report.parked,
                    rejected = report.rejected,
                    "sync cycle complete"
                );
            }
            Err(err) => {
                self.stats.write().last_error = Some(err.to_string());
                self.set_phase(SyncPhase::Error);
                warn!(error = %err, "sync cycle failed");
            }
        }
        result
    }

    fn run_cycle(&self) -> SyncResult<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::default();

        self.check_cancelled()?;
        self.retry_parked(&mut report)?;
        self.pull_and_merge(&mut report)?;
        self.check_cancelled()?;
        self.push_pending(&mut report)?;

        report.duration = started.elapsed();
        Ok(report)
    }

    fn pull_and_merge(&self, report: &mut SyncReport) -> SyncResult<()> {
        let mut checkpoint = self.checkpoints.load()?.unwrap_or_else(Checkpoint::origin);
        debug!(since = ?checkpoint, "starting pull");

        loop {
            self.set_phase(SyncPhase::Pulling);
            self.check_cancelled()?;

            let request = PullRequest::new(checkpoint, self.config.pull_batch_size);
            let response = self.with_retry(|| self.transport.pull(&request))?;
            if response.changes.is_empty() {
                if response.to > checkpoint {
                    // The server skipped us past pruned history.
                    self.checkpoints.save(&response.to)?;
                }
                debug!(at = ?response.to, "caught up");
                return Ok(());
            }

            self.set_phase(SyncPhase::Merging);
            for change in &response.changes {
                self.merge_change(change, report)?;
            }
            report.pulled += response.changes.len();

            // The checkpoint moves only after the whole batch is merged;
            // a crash in between replays the batch, which the
            // deterministic decision function makes harmless.
            checkpoint = response.to;
            self.checkpoints.save(&checkpoint)?;
        }
    }

    /// Revisits conflicts parked in earlier cycles.
    ///
    /// The checkpoint has moved past a parked change, so no pull ever
    /// re-delivers it; the session re-runs the decision (and the
    /// resolver) itself until each one resolves or is superseded.
    fn retry_parked(&self, report: &mut SyncReport) -> SyncResult<()> {
        let pending: Vec<ChangeRecord> = {
            let mut parked = self.parked.lock();
            parked.drain().map(|(_, change)| change).collect()
        };
        if pending.is_empty() {
            return Ok(());
        }
        self.set_phase(SyncPhase::Merging);
        debug!(count = pending.len(), "revisiting parked conflicts");
        for change in &pending {
            self.check_cancelled()?;
            self.merge_change(change, report)?;
        }
        Ok(())
    }

    fn merge_change(&self, change: &ChangeRecord, report: &mut SyncReport) -> SyncResult<()> {
        // A fresher change for the item supersedes anything parked.
        self.parked.lock().remove(&change.id);
        let local = self.store.local_state(&change.id);
        let outcome = decide(change.revision, change.tombstone, local).map_err(|regression| {
            SyncError::RevisionRegression {
                id: change.id,
                server_revision: regression.server_revision,
                local_revision: regression.local_revision,
            }
        })?;

        match outcome {
            MergeOutcome::NoOp => {
                if change.tombstone && local.tombstone {
                    // Both sides deleted the item; drop the pending
                    // tombstone so the shared deletion is not re-pushed
                    // and rejected forever.
                    self.store.remove_local(&change.id);
                }
            }
            MergeOutcome::ReplaceLocal => {
                let payload = change
                    .payload
                    .as_deref()
                    .ok_or_else(|| SyncError::Protocol("content change without payload".into()))?;
                self.store.apply_remote(change.id, change.revision, payload)?;
            }
            MergeOutcome::DeleteLocal => {
                debug!(id = %change.id, "applying remote deletion");
                self.store.remove_local(&change.id);
            }
            MergeOutcome::Conflict => {
                if self.adopt_if_identical(change)? {
                    return Ok(());
                }
                self.resolve_conflict(change, local, report)?;
            }
        }
        Ok(())
    }

    /// Handles concurrent edits that produced the same content.
    ///
    /// The revision evidence alone reads as a conflict, but when both
    /// sides arrived at identical content there is nothing to decide:
    /// the change applies as a plain replacement. Payload encoding is
    /// canonical (sorted fields), so byte equality is content equality.
    fn adopt_if_identical(&self, change: &ChangeRecord) -> SyncResult<bool> {
        let Some(remote) = change.payload.as_deref() else {
            return Ok(false);
        };
        let Some(local_payload) = self.store.local_payload(&change.id)? else {
            return Ok(false);
        };
        if local_payload != remote {
            return Ok(false);
        }
        debug!(id = %change.id, "identical concurrent change, adopting server revision");
        self.store.apply_remote(change.id, change.revision, remote)?;
        Ok(true)
    }

    fn resolve_conflict(
        &self,
        change: &ChangeRecord,
        local: LocalState,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let context = ConflictContext {
            id: change.id,
            local: self.store.local_payload(&change.id)?,
            remote: change.payload.clone(),
            server_revision: change.revision,
            local_revision: local.revision,
        };

        match self.resolver.resolve(&context) {
            Some(Resolution::KeepLocal) => {
                // The server revision becomes the new compare-and-swap
                // base; the local content stays dirty and is re-offered
                // in the push phase.
                self.store.adopt_base(&change.id, change.revision)?;
                report.conflicts_resolved += 1;
                info!(id = %change.id, "conflict resolved: keep local");
            }
            Some(Resolution::AcceptRemote) => {
                if change.tombstone {
                    self.store.remove_local(&change.id);
                } else {
                    let payload = change.payload.as_deref().ok_or_else(|| {
                        SyncError::Protocol("content change without payload".into())
                    })?;
                    self.store.apply_remote(change.id, change.revision, payload)?;
                }
                report.conflicts_resolved += 1;
                info!(id = %change.id, "conflict resolved: accept remote");
            }
            None => {
                self.parked.lock().insert(change.id, change.clone());
                report.parked += 1;
                debug!(id = %change.id, "conflict parked");
            }
        }
        Ok(())
    }

    fn push_pending(&self, report: &mut SyncReport) -> SyncResult<()> {
        let updates = self.store.pending_updates()?;
        let tombstones = self.store.pending_tombstones();
        if updates.is_empty() && tombstones.is_empty() {
            return Ok(());
        }
        self.set_phase(SyncPhase::Pushing);
        debug!(
            updates = updates.len(),
            tombstones = tombstones.len(),
            "starting push"
        );

        let in_flight: Vec<ItemId> = updates
            .iter()
            .filter_map(|u| u.id)
            .chain(tombstones.iter().map(|t| t.id))
            .collect();
        self.store.begin_push(&in_flight);
        let result = self.push_batches(updates, tombstones, report);
        self.store.end_push();
        result
    }

    fn push_batches(
        &self,
        updates: Vec<PendingUpdate>,
        tombstones: Vec<Tombstone>,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let batch_size = self.config.push_batch_size.max(1) as usize;
        let mut updates = updates.into_iter().peekable();
        let mut tombstones = tombstones.into_iter().peekable();
        let mut next_reference: u64 = 1;

        while updates.peek().is_some() || tombstones.peek().is_some() {
            self.check_cancelled()?;

            let mut targets: HashMap<u64, PushTarget> = HashMap::new();
            let mut batch_updates = Vec::new();
            let mut batch_tombstones = Vec::new();

            while batch_updates.len() < batch_size {
                let Some(update) = updates.next() else { break };
                let reference = next_reference;
                next_reference += 1;
                targets.insert(reference, PushTarget::Update { key: update.key });
                batch_updates.push(match (update.id, update.revision) {
                    (Some(id), Some(revision)) => {
                        ItemUpdate::update(reference, id, revision, update.payload)
                    }
                    _ => ItemUpdate::create(reference, update.payload),
                });
            }
            while batch_updates.len() + batch_tombstones.len() < batch_size {
                let Some(tombstone) = tombstones.next() else { break };
                let reference = next_reference;
                next_reference += 1;
                targets.insert(reference, PushTarget::Tombstone(tombstone.id));
                batch_tombstones.push(TombstoneUpdate::new(
                    reference,
                    tombstone.id,
                    tombstone.revision,
                ));
            }

            let request = PushRequest::new(batch_updates, batch_tombstones);
            let response = self.with_retry(|| self.transport.push(&request))?;
            self.apply_push_response(&response, &targets, report)?;
        }
        Ok(())
    }

    fn apply_push_response(
        &self,
        response: &PushResponse,
        targets: &HashMap<u64, PushTarget>,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        for accepted in &response.accepted {
            match targets.get(&accepted.reference) {
                Some(PushTarget::Update { key }) => {
                    self.store
                        .confirm_update(*key, accepted.id, accepted.new_revision)?;
                }
                Some(PushTarget::Tombstone(id)) => {
                    self.store.confirm_tombstone(id);
                }
                None => {
                    return Err(SyncError::Protocol(format!(
                        "unknown push reference {}",
                        accepted.reference
                    )));
                }
            }
            report.pushed += 1;
        }

        for rejected in &response.rejected {
            // A rejection is routine: the base revision went stale. The
            // item stays dirty on its current revision; the next cycle
            // surfaces the newer server version, through the pull or a
            // revisited parked conflict.
            warn!(
                id = %rejected.id,
                server_revision = rejected.server_revision,
                "push rejected by compare-and-swap"
            );
            report.rejected += 1;
        }
        Ok(())
    }

    fn with_retry<R>(&self, operation: impl Fn() -> SyncResult<R>) -> SyncResult<R> {
        let mut last_error = None;
        for attempt in 0..self.config.retry.max_attempts {
            self.check_cancelled()?;
            let delay = self.config.retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    warn!(error = %err, attempt, "retryable failure");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or(SyncError::NotConnected))
    }

    /// Waits on the change-notification channel until something changes.
    ///
    /// Returns true when a notification arrived and another cycle should
    /// run, false when cancelled.
    pub fn listen(&self) -> SyncResult<bool> {
        self.set_phase(SyncPhase::EventListening);
        let receiver = self.transport.subscribe()?;
        loop {
            if self.is_cancelled() {
                self.set_phase(SyncPhase::Idle);
                return Ok(false);
            }
            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(notification) => {
                    debug!(changed = notification.changed_ids.len(), "server changes");
                    return Ok(true);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.set_phase(SyncPhase::Error);
                    return Err(SyncError::SubscriptionLost);
                }
            }
        }
    }

    /// Runs cycles and listens for changes until cancelled.
    ///
    /// Retryable failures back off and try again; fatal errors
    /// propagate.
    pub fn run_until_cancelled(&self) -> SyncResult<()> {
        self.cancelled.store(false, Ordering::SeqCst);
        loop {
            match self.sync() {
                Ok(_) => {}
                Err(SyncError::Cancelled) => break,
                Err(err) if err.is_retryable() => {
                    warn!(error = %err, "cycle failed, backing off");
                    thread::sleep(self.config.retry.delay_for_attempt(1));
                    continue;
                }
                Err(err) => return Err(err),
            }

            match self.listen() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(err) if err.is_retryable() => {
                    warn!(error = %err, "subscription lost, re-syncing");
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
        self.set_phase(SyncPhase::Idle);
        Ok(())
    }
}
