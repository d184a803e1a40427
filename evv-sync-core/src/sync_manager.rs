//! Sync Manager. Orchestrates queue drain, server pull, and conflict
//! reconciliation behind a small state machine, with a bounded sync
//! history ring buffer and a single-flight guard around `manual_sync`.

use std::collections::VecDeque;
use std::sync::Arc;

use rand::thread_rng;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::conflict::ConflictResolver;
use crate::error::{CoreError, CoreResult};
use crate::http_client::{ChangeOp, HttpClient, MutationOutcome};
use crate::model::conflict::{ConflictResolution, ConflictStrategy};
use crate::model::queue_item::QueuedAction;
use crate::model::record::{EntityKind, Record};
use crate::network::NetworkProbe;
use crate::offline_queue::{classify_network_error, classify_status, FailureClass, OfflineQueue};
use crate::optimistic::OptimisticUpdateManager;
use crate::store::LocalStore;

const SYNC_HISTORY_CAPACITY: usize = 20;
const BACKOFF_INTERVAL_MS: i64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Draining,
    Pulling,
    Reconciling,
    BackingOff,
}

#[derive(Debug, Clone)]
pub struct SyncHistoryEntry {
    pub timestamp: i64,
    pub success: bool,
    pub error: Option<String>,
    pub changes_count: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub actions_drained: u64,
    pub actions_failed: u64,
    pub changes_pulled: u64,
    pub conflicts_merged: u64,
    pub conflicts_manual: u64,
}

/// A change that a reconciliation pass could not apply automatically.
/// Parked here for a human reviewer; consumed via `drain_exceptions`.
#[derive(Debug, Clone)]
pub struct ExceptionEntry {
    pub kind: EntityKind,
    pub record_id: String,
    pub local: Option<Record>,
    pub remote: Record,
    pub resolution: ConflictResolution,
    pub flagged_at: i64,
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub changes_count: Option<usize>,
}

pub struct SyncManager<'a, C: Clock + Clone + 'static> {
    store: &'a LocalStore,
    queue: &'a OfflineQueue<'a>,
    optimistic: &'a OptimisticUpdateManager<'a, C>,
    network: Arc<dyn NetworkProbe>,
    http: HttpClient,
    clock: C,
    queue_base_delay_ms: u64,
    queue_max_delay_ms: u64,

    state: Mutex<SyncState>,
    history: Mutex<VecDeque<SyncHistoryEntry>>,
    stats: Mutex<SyncStats>,
    exceptions: Mutex<Vec<ExceptionEntry>>,
    cursor: Mutex<Option<String>>,
    last_sync_at: Mutex<Option<i64>>,
    last_sync_success: Mutex<Option<bool>>,
    completion: broadcast::Sender<SyncOutcome>,
}

impl<'a, C: Clock + Clone + 'static> SyncManager<'a, C> {
    pub fn new(
        store: &'a LocalStore,
        queue: &'a OfflineQueue<'a>,
        optimistic: &'a OptimisticUpdateManager<'a, C>,
        network: Arc<dyn NetworkProbe>,
        http: HttpClient,
        clock: C,
        queue_base_delay_ms: u64,
        queue_max_delay_ms: u64,
    ) -> Self {
        let (completion, _) = broadcast::channel(4);
        Self {
            store,
            queue,
            optimistic,
            network,
            http,
            clock,
            queue_base_delay_ms,
            queue_max_delay_ms,
            state: Mutex::new(SyncState::Idle),
            history: Mutex::new(VecDeque::with_capacity(SYNC_HISTORY_CAPACITY)),
            stats: Mutex::new(SyncStats::default()),
            exceptions: Mutex::new(Vec::new()),
            cursor: Mutex::new(None),
            last_sync_at: Mutex::new(None),
            last_sync_success: Mutex::new(None),
            completion,
        }
    }

    pub async fn state(&self) -> SyncState {
        *self.state.lock().await
    }

    pub async fn sync_history(&self) -> Vec<SyncHistoryEntry> {
        self.history.lock().await.iter().cloned().collect()
    }

    pub async fn stats(&self) -> SyncStats {
        self.stats.lock().await.clone()
    }

    pub async fn last_sync_at(&self) -> Option<i64> {
        *self.last_sync_at.lock().await
    }

    pub async fn last_sync_success(&self) -> Option<bool> {
        *self.last_sync_success.lock().await
    }

    pub async fn list_exceptions(&self) -> Vec<ExceptionEntry> {
        self.exceptions.lock().await.clone()
    }

    pub async fn drain_exceptions(&self) -> Vec<ExceptionEntry> {
        std::mem::take(&mut *self.exceptions.lock().await)
    }

    /// Applies a caregiver- or supervisor-supplied decision to a flagged
    /// exception, writes the resulting record, and removes the entry.
    /// Returns an error if no exception with that id is pending.
    pub async fn resolve_exception(
        &self,
        record_id: &str,
        decision: &crate::model::conflict::ManualDecision,
    ) -> CoreResult<()> {
        let mut exceptions = self.exceptions.lock().await;
        let index = exceptions
            .iter()
            .position(|e| e.record_id == record_id)
            .ok_or_else(|| CoreError::Validation(format!("no pending exception for {record_id}")))?;
        let entry = exceptions.remove(index);
        drop(exceptions);

        let local = entry.local.clone().unwrap_or_else(|| entry.remote.clone());
        let resolved = ConflictResolver::apply_manual_resolution(&local, &entry.remote, decision);
        self.store.update(entry.kind, &entry.record_id, |record: &mut Record| {
            record.payload = resolved;
            record.updated_at = entry.remote.updated_at;
            record.sync_meta.server_version = entry.remote.sync_meta.server_version.clone();
            record.sync_meta.is_synced = true;
        })
    }

    /// Idempotent: a concurrent caller while a pass is already running
    /// receives that pass's outcome instead of starting a second one.
    pub async fn manual_sync(&self) -> CoreResult<SyncOutcome> {
        let mut rx = self.completion.subscribe();
        {
            let mut state = self.state.lock().await;
            if *state != SyncState::Idle {
                drop(state);
                return rx
                    .recv()
                    .await
                    .map_err(|_| CoreError::Network("sync pass ended without reporting an outcome".into()));
            }
            *state = SyncState::Draining;
        }

        let outcome = self.run_pass().await;
        *self.state.lock().await = SyncState::Idle;
        let _ = self.completion.send(outcome.clone());
        self.record_history(&outcome).await;
        Ok(outcome)
    }

    async fn record_history(&self, outcome: &SyncOutcome) {
        let now = self.clock.now_ms();
        *self.last_sync_at.lock().await = Some(now);
        *self.last_sync_success.lock().await = Some(outcome.success);

        let mut history = self.history.lock().await;
        if history.len() == SYNC_HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(SyncHistoryEntry {
            timestamp: now,
            success: outcome.success,
            error: outcome.error.clone(),
            changes_count: outcome.changes_count,
        });
    }

    /// Runs drain, then pull, then reconcile. The state field reflects
    /// whichever sub-phase is active; on any network fault the state
    /// moves to `BackingOff` and the pass ends early with a failure.
    async fn run_pass(&self) -> SyncOutcome {
        if !self.network.is_online() {
            return SyncOutcome {
                success: true,
                error: None,
                changes_count: Some(0),
            };
        }

        *self.state.lock().await = SyncState::Draining;
        if let Err(e) = self.drain_queue().await {
            warn!(error = %e, "queue drain failed");
        }

        *self.state.lock().await = SyncState::Pulling;
        let pull_result = self.pull_changes().await;
        let changes = match pull_result {
            Ok(changes) => changes,
            Err(e) => {
                *self.state.lock().await = SyncState::BackingOff;
                self.schedule_backoff_exit();
                return SyncOutcome {
                    success: false,
                    error: Some(e.to_string()),
                    changes_count: None,
                };
            }
        };

        *self.state.lock().await = SyncState::Reconciling;
        let changes_count = changes.len();
        for change in changes {
            if let Err(e) = self.reconcile_one(change).await {
                error!(error = %e, "reconcile failed; will re-fetch on next pull");
            }
        }

        SyncOutcome {
            success: true,
            error: None,
            changes_count: Some(changes_count),
        }
    }

    fn schedule_backoff_exit(&self) {
        // In a single-threaded cooperative model the next periodic tick
        // (driven by the host application's timer) naturally re-enters
        // Idle after the interval; nothing to schedule here beyond
        // letting the state sit until then.
        let _ = BACKOFF_INTERVAL_MS;
    }

    async fn drain_queue(&self) -> CoreResult<()> {
        let ready = self.queue.ready_items();
        for action in ready {
            self.drain_one(action).await;
        }
        Ok(())
    }

    async fn drain_one(&self, action: QueuedAction) {
        let key = format!("{}:{}", action.kind.endpoint(), action.optimistic_update_id);
        if !self.queue.try_claim(&key) {
            return;
        }

        let result = self.http.post_action(action.kind.endpoint(), &action.payload).await;
        match result {
            Ok(MutationOutcome::Success(_)) => {
                let _ = self.queue.mark_succeeded(&action.id);
                let _ = self.optimistic.mark_synced(&action.optimistic_update_id);
                self.stats.lock().await.actions_drained += 1;
            }
            Ok(MutationOutcome::ServerError { status, body }) => {
                let class = classify_status(status);
                let message = body
                    .and_then(|b| b.message)
                    .unwrap_or_else(|| format!("server responded {status}"));
                let mut rng = thread_rng();
                let dropped = self
                    .queue
                    .mark_failed(
                        &action.id,
                        class,
                        Some(status),
                        message,
                        self.queue_base_delay_ms,
                        self.queue_max_delay_ms,
                        &mut rng,
                    )
                    .unwrap_or(false);
                if dropped {
                    let _ = self.optimistic.rollback(&action.optimistic_update_id);
                }
                self.stats.lock().await.actions_failed += 1;
            }
            Err(e) => {
                let mut rng = thread_rng();
                let dropped = self
                    .queue
                    .mark_failed(
                        &action.id,
                        classify_network_error(),
                        None,
                        e.to_string(),
                        self.queue_base_delay_ms,
                        self.queue_max_delay_ms,
                        &mut rng,
                    )
                    .unwrap_or(false);
                if dropped {
                    let _ = self.optimistic.rollback(&action.optimistic_update_id);
                }
                self.stats.lock().await.actions_failed += 1;
            }
        }

        self.queue.release(&key);
    }

    async fn pull_changes(&self) -> CoreResult<Vec<crate::http_client::ServerChange>> {
        let cursor = self.cursor.lock().await.clone();
        let response = self.http.pull_changes(cursor.as_deref()).await?;
        *self.cursor.lock().await = Some(response.cursor);
        self.stats.lock().await.changes_pulled += response.changes.len() as u64;
        Ok(response.changes)
    }

    async fn reconcile_one(&self, change: crate::http_client::ServerChange) -> CoreResult<()> {
        let kind = parse_entity_kind(&change.kind);

        if change.op == ChangeOp::Delete {
            return self.store.mark_deleted(kind, &change.id);
        }

        let remote = Record {
            id: change.id.clone(),
            entity_kind: kind,
            organization_id: change
                .record
                .get("organizationId")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            updated_at: change.updated_at,
            payload: change.record.clone(),
            sync_meta: crate::model::record::SyncMeta {
                is_synced: true,
                sync_pending: false,
                server_version: change.server_version.clone(),
            },
            deleted: false,
        };

        let local = self.store.get(kind, &change.id)?;
        let Some(local) = local else {
            self.store.create(kind, &change.id, &remote.organization_id, remote.updated_at, remote.payload.clone())?;
            return Ok(());
        };

        let resolution = ConflictResolver::resolve(&local, &remote);
        match resolution.strategy {
            ConflictStrategy::Manual => {
                self.stats.lock().await.conflicts_manual += 1;
                self.exceptions.lock().await.push(ExceptionEntry {
                    kind,
                    record_id: change.id.clone(),
                    local: Some(local),
                    remote,
                    resolution,
                    flagged_at: self.clock.now_ms(),
                });
            }
            ConflictStrategy::Merge => {
                self.stats.lock().await.conflicts_merged += 1;
                let resolved = resolution.resolved_record.clone();
                self.store.update(kind, &change.id, |record: &mut Record| {
                    record.payload = resolved;
                    record.updated_at = remote.updated_at;
                    record.sync_meta.server_version = remote.sync_meta.server_version.clone();
                })?;
            }
            ConflictStrategy::ClientWins => {
                info!(id = %change.id, "client wins, leaving local record untouched");
            }
            ConflictStrategy::ServerWins => {
                let resolved = resolution.resolved_record.clone();
                self.store.update(kind, &change.id, |record: &mut Record| {
                    record.payload = resolved;
                    record.updated_at = remote.updated_at;
                    record.sync_meta.server_version = remote.sync_meta.server_version.clone();
                    record.sync_meta.is_synced = true;
                })?;
            }
        }
        Ok(())
    }
}

fn parse_entity_kind(s: &str) -> EntityKind {
    match s {
        "visit" => EntityKind::Visit,
        "time-entry" => EntityKind::TimeEntry,
        "evv-record" => EntityKind::EvvRecord,
        "attachment" => EntityKind::Attachment,
        "note" => EntityKind::Note,
        "geofence" => EntityKind::Geofence,
        "template" => EntityKind::Template,
        "notification" => EntityKind::Notification,
        _ => EntityKind::Note,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::network::DebouncedNetworkProbe;

    fn manager<'a>(
        store: &'a LocalStore,
        queue: &'a OfflineQueue<'a>,
        optimistic: &'a OptimisticUpdateManager<'a, FixedClock>,
    ) -> SyncManager<'a, FixedClock> {
        SyncManager::new(
            store,
            queue,
            optimistic,
            Arc::new(DebouncedNetworkProbe::new(false)),
            HttpClient::new("https://example.test"),
            FixedClock::new(1_000),
            1_000,
            300_000,
        )
    }

    #[tokio::test]
    async fn offline_pass_succeeds_with_zero_changes() {
        let store = LocalStore::open_in_memory().unwrap();
        let queue = OfflineQueue::new(&store, Box::new(FixedClock::new(1_000))).unwrap();
        let optimistic = OptimisticUpdateManager::new(&store, FixedClock::new(1_000)).unwrap();
        let mgr = manager(&store, &queue, &optimistic);
        let outcome = mgr.manual_sync().await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.changes_count, Some(0));
    }

    #[tokio::test]
    async fn sync_history_records_pass() {
        let store = LocalStore::open_in_memory().unwrap();
        let queue = OfflineQueue::new(&store, Box::new(FixedClock::new(1_000))).unwrap();
        let optimistic = OptimisticUpdateManager::new(&store, FixedClock::new(1_000)).unwrap();
        let mgr = manager(&store, &queue, &optimistic);
        mgr.manual_sync().await.unwrap();
        let history = mgr.sync_history().await;
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
    }

    #[tokio::test]
    async fn concurrent_manual_sync_shares_one_pass() {
        let store = LocalStore::open_in_memory().unwrap();
        let queue = OfflineQueue::new(&store, Box::new(FixedClock::new(1_000))).unwrap();
        let optimistic = OptimisticUpdateManager::new(&store, FixedClock::new(1_000)).unwrap();
        let mgr = manager(&store, &queue, &optimistic);
        let (a, b) = tokio::join!(mgr.manual_sync(), mgr.manual_sync());
        assert!(a.unwrap().success);
        assert!(b.unwrap().success);
        // Only one pass should have been recorded; the second call observed
        // the first pass's outcome rather than starting its own.
        assert_eq!(mgr.sync_history().await.len(), 1);
    }
}
