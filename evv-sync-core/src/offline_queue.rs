//! Offline Queue. Durable FIFO-within-priority scheduling of outbound
//! actions, with exponential backoff plus jitter on retry and HTTP
//! status classification deciding whether a failure is retryable or
//! fatal.

use std::sync::Mutex;

use dashmap::DashSet;
use rand::Rng;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::CoreResult;
use crate::model::queue_item::{QueuedAction, QueuedActionKind, QueueError, QueuePriority};
use crate::queue_store::QueueStore;
use crate::store::LocalStore;

/// Outcome of classifying an HTTP response or transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth retrying with backoff: network errors, 429, and 5xx.
    Retryable,
    /// Not worth retrying: 4xx other than 429. The action is dropped and
    /// its optimistic update rolled back.
    Fatal,
}

pub fn classify_status(status: u16) -> FailureClass {
    match status {
        408 => FailureClass::Retryable,
        429 => FailureClass::Retryable,
        500..=599 => FailureClass::Retryable,
        400..=499 => FailureClass::Fatal,
        _ => FailureClass::Retryable,
    }
}

pub fn classify_network_error() -> FailureClass {
    FailureClass::Retryable
}

/// `delay(n) = min(base * 2^n + jitter(±30%), max)`. The exponent is
/// clamped so this stays cheap even if `retries` grows unexpectedly
/// large.
pub fn backoff_delay_ms(base_ms: u64, max_ms: u64, retries: u32, rng: &mut impl Rng) -> u64 {
    let max_ms = max_ms.max(1);
    let base_ms = base_ms.max(1).min(max_ms);
    let exp = retries.min(62);
    let grown = base_ms.saturating_mul(1u64 << exp).min(max_ms);

    let jitter_span = (grown as f64 * 0.3) as i64;
    let jitter = if jitter_span > 0 {
        rng.gen_range(-jitter_span..=jitter_span)
    } else {
        0
    };
    (grown as i64 + jitter).max(0).min(max_ms as i64) as u64
}

pub struct OfflineQueue<'a> {
    store: &'a LocalStore,
    clock: Box<dyn Clock>,
    queue: Mutex<Vec<QueuedAction>>,
    /// Keys (record kind + id) currently being drained, so two drains
    /// never race on the same logical record.
    in_flight_keys: DashSet<String>,
}

impl<'a> OfflineQueue<'a> {
    pub fn new(store: &'a LocalStore, clock: Box<dyn Clock>) -> CoreResult<Self> {
        let queue = QueueStore::new(store).load_queue()?;
        Ok(Self {
            store,
            clock,
            queue: Mutex::new(queue),
            in_flight_keys: DashSet::new(),
        })
    }

    fn persist(&self, queue: &[QueuedAction]) -> CoreResult<()> {
        QueueStore::new(self.store).save_queue(queue)
    }

    pub fn enqueue(
        &self,
        id: impl Into<String>,
        kind: QueuedActionKind,
        payload: serde_json::Value,
        optimistic_update_id: impl Into<String>,
    ) -> CoreResult<()> {
        let now = self.clock.now_ms();
        let action = QueuedAction::new(id, kind, payload, now, optimistic_update_id);
        let mut queue = self.queue.lock().expect("queue mutex poisoned");
        queue.push(action);
        self.persist(&queue)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items ready to attempt right now, ordered by priority (descending)
    /// then enqueue time (ascending) so equal-priority items stay FIFO
    /// and nothing with a past-due `next_retry_at` starves behind newer
    /// high-priority arrivals.
    pub fn ready_items(&self) -> Vec<QueuedAction> {
        let now = self.clock.now_ms();
        let queue = self.queue.lock().expect("queue mutex poisoned");
        let mut ready: Vec<QueuedAction> = queue
            .iter()
            .filter(|a| a.next_retry_at.map_or(true, |t| t <= now))
            .cloned()
            .collect();
        ready.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.enqueued_at.cmp(&b.enqueued_at))
        });
        ready
    }

    /// Claims an item's record key for the duration of an in-flight
    /// network attempt. Returns `false` if another drain already holds
    /// the key for this record.
    pub fn try_claim(&self, key: &str) -> bool {
        self.in_flight_keys.insert(key.to_string())
    }

    pub fn release(&self, key: &str) {
        self.in_flight_keys.remove(key);
    }

    pub fn mark_succeeded(&self, id: &str) -> CoreResult<()> {
        let mut queue = self.queue.lock().expect("queue mutex poisoned");
        queue.retain(|a| a.id != id);
        info!(action_id = id, "queued action succeeded");
        self.persist(&queue)
    }

    /// Records a failure. If the failure is fatal or retries are
    /// exhausted, the item is removed and `true` is returned so the
    /// caller can roll back the matching optimistic update; otherwise
    /// the item's retry count and `next_retry_at` are advanced.
    pub fn mark_failed(
        &self,
        id: &str,
        class: FailureClass,
        status: Option<u16>,
        message: impl Into<String>,
        base_delay_ms: u64,
        max_delay_ms: u64,
        rng: &mut impl Rng,
    ) -> CoreResult<bool> {
        let now = self.clock.now_ms();
        let mut queue = self.queue.lock().expect("queue mutex poisoned");
        let Some(action) = queue.iter_mut().find(|a| a.id == id) else {
            return Ok(false);
        };

        action.errors.push(QueueError {
            at: now,
            message: message.into(),
            status,
        });
        action.last_attempt_at = Some(now);

        let exhausted = action.retries >= action.max_retries;
        let drop_item = class == FailureClass::Fatal || exhausted;

        if drop_item {
            warn!(action_id = id, ?class, exhausted, "dropping queued action");
            queue.retain(|a| a.id != id);
        } else {
            action.retries += 1;
            let delay = backoff_delay_ms(base_delay_ms, max_delay_ms, action.retries, rng);
            action.next_retry_at = Some(now + delay as i64);
        }
        self.persist(&queue)?;
        Ok(drop_item)
    }

    pub fn find(&self, id: &str) -> Option<QueuedAction> {
        self.queue
            .lock()
            .expect("queue mutex poisoned")
            .iter()
            .find(|a| a.id == id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use rand::thread_rng;
    use serde_json::json;

    fn queue(store: &LocalStore, now: i64) -> OfflineQueue<'_> {
        OfflineQueue::new(store, Box::new(FixedClock::new(now))).unwrap()
    }

    #[test]
    fn backoff_never_exceeds_max() {
        let mut rng = thread_rng();
        for retries in 0..30 {
            let d = backoff_delay_ms(1_000, 300_000, retries, &mut rng);
            assert!(d <= 300_000);
        }
    }

    #[test]
    fn ready_items_orders_by_priority_then_fifo() {
        let store = LocalStore::open_in_memory().unwrap();
        let q = queue(&store, 1_000);
        q.enqueue("low1", QueuedActionKind::AttachmentUpload, json!({}), "ou1").unwrap();
        q.enqueue("crit1", QueuedActionKind::VisitCheckIn, json!({}), "ou2").unwrap();
        let ready = q.ready_items();
        assert_eq!(ready[0].id, "crit1");
        assert_eq!(ready[0].priority, QueuePriority::Critical);
    }

    #[test]
    fn fatal_failure_drops_item_immediately() {
        let store = LocalStore::open_in_memory().unwrap();
        let q = queue(&store, 1_000);
        q.enqueue("a1", QueuedActionKind::CareNote, json!({}), "ou1").unwrap();
        let mut rng = thread_rng();
        let dropped = q
            .mark_failed("a1", FailureClass::Fatal, Some(400), "bad request", 1_000, 300_000, &mut rng)
            .unwrap();
        assert!(dropped);
        assert!(q.is_empty());
    }

    #[test]
    fn retryable_failure_schedules_next_attempt() {
        let store = LocalStore::open_in_memory().unwrap();
        let q = queue(&store, 1_000);
        q.enqueue("a1", QueuedActionKind::CareNote, json!({}), "ou1").unwrap();
        let mut rng = thread_rng();
        let dropped = q
            .mark_failed("a1", FailureClass::Retryable, Some(503), "unavailable", 1_000, 300_000, &mut rng)
            .unwrap();
        assert!(!dropped);
        let action = q.find("a1").unwrap();
        assert_eq!(action.retries, 1);
        assert!(action.next_retry_at.unwrap() > 1_000);
    }

    #[test]
    fn exhausted_retries_drop_item() {
        let store = LocalStore::open_in_memory().unwrap();
        let q = queue(&store, 1_000);
        q.enqueue("a1", QueuedActionKind::CareNote, json!({}), "ou1").unwrap();
        let mut rng = thread_rng();
        for _ in 0..5 {
            q.mark_failed("a1", FailureClass::Retryable, Some(503), "x", 1_000, 300_000, &mut rng)
                .unwrap();
        }
        let dropped = q
            .mark_failed("a1", FailureClass::Retryable, Some(503), "x", 1_000, 300_000, &mut rng)
            .unwrap();
        assert!(dropped);
    }
}
