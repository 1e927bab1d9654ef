// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-subscription fan-out for `stream.subscribe`. Each
//! subscription owns a bounded queue fed by its own task subscribed to the
//! shared [`EventBus`]; the connection's writer only ever sees the output
//! of [`SubscriptionQueue::pop`]. One task per subscription means a slow
//! subscription never stalls delivery on a different subscription sharing
//! the same connection.

use std::collections::VecDeque;
use std::sync::Arc;

use harness_core::envelope::ObservedEvent;
use harness_core::ids::SubscriptionId;
use harness_core::json::CanonicalJson;
use harness_core::{EventBus, PublishedEvent};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Whether `event` matches every attribute named in `filters`. Filters are
/// an open-ended JSON object; a subscription with no filters (or a
/// non-object filter value) matches every event. Matching is done by
/// comparing the event's own serialized attributes (sibling fields of its
/// `type` tag) against each filter key — unrecognized keys or mismatched
/// values fail the match, consistent with the rest of the codebase never
/// duck-typing open JSON.
fn event_matches_filters(event: &ObservedEvent, filters: &CanonicalJson) -> bool {
    let Some(filter_map) = filters.as_map() else { return true };
    if filter_map.is_empty() {
        return true;
    }
    let Ok(event_value) = serde_json::to_value(event) else { return false };
    let Some(event_map) = event_value.as_object() else { return false };
    filter_map.iter().all(|(key, expected)| event_map.get(key) == Some(expected))
}

/// Bounded per-subscription queue implementing the backpressure
/// policy: drop the oldest entry on overflow, preferring to evict a
/// `session-output` entry over any other kind. Any queue at capacity is
/// necessarily more than half full for capacity ≥ 1, so "full" and "more
/// than half full" coincide in practice — the session-output-first
/// eviction rule is simply the rule applied whenever eviction is needed.
struct QueueInner {
    entries: VecDeque<PublishedEvent>,
}

pub struct SubscriptionQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
}

impl SubscriptionQueue {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(QueueInner { entries: VecDeque::with_capacity(capacity) }), notify: Notify::new(), capacity }
    }

    async fn push(&self, event: PublishedEvent) {
        let mut guard = self.inner.lock().await;
        if guard.entries.len() >= self.capacity {
            let evict_at = guard
                .entries
                .iter()
                .position(|e| matches!(e.event, ObservedEvent::SessionOutput { .. }))
                .unwrap_or(0);
            guard.entries.remove(evict_at);
        }
        guard.entries.push_back(event);
        drop(guard);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Option<PublishedEvent> {
        loop {
            {
                let mut guard = self.inner.lock().await;
                if let Some(event) = guard.entries.pop_front() {
                    return Some(event);
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Spawns the background task that drives one `stream.subscribe`
/// subscription end to end: filters bus events, applies backpressure via
/// [`SubscriptionQueue`], and forwards survivors to `deliver`. `deliver`
/// returning `Err` means the connection's writer is gone, at which point
/// the task exits.
#[allow(clippy::too_many_arguments)]
pub fn spawn(
    subscription_id: SubscriptionId,
    bus: Arc<EventBus>,
    filters: CanonicalJson,
    include_output: bool,
    after_cursor: Option<u64>,
    queue_capacity: usize,
    cancel: CancellationToken,
    deliver: mpsc::UnboundedSender<(SubscriptionId, PublishedEvent)>,
) {
    let queue = Arc::new(SubscriptionQueue::new(queue_capacity));
    let producer_queue = Arc::clone(&queue);
    let producer_cancel = cancel.clone();
    tokio::spawn(async move {
        // Subscribe before replaying so nothing published in between is
        // missed; replay can therefore overlap with the first few live
        // deliveries, so `lower_bound` is advanced past whatever the
        // replay already covered to rule out re-delivering a duplicate.
        let mut rx = bus.subscribe();
        let mut lower_bound = after_cursor.unwrap_or(0);
        for published in bus.replay_since(lower_bound) {
            if matches!(published.event, ObservedEvent::SessionOutput { .. }) && !include_output {
                lower_bound = lower_bound.max(published.cursor);
                continue;
            }
            if !event_matches_filters(&published.event, &filters) {
                lower_bound = lower_bound.max(published.cursor);
                continue;
            }
            lower_bound = published.cursor;
            producer_queue.push(published).await;
        }
        loop {
            tokio::select! {
                biased;
                _ = producer_cancel.cancelled() => break,
                received = rx.recv() => {
                    match received {
                        Ok(published) => {
                            if published.cursor <= lower_bound {
                                continue;
                            }
                            if matches!(published.event, ObservedEvent::SessionOutput { .. }) && !include_output {
                                continue;
                            }
                            if !event_matches_filters(&published.event, &filters) {
                                continue;
                            }
                            producer_queue.push(published).await;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(%subscription_id, skipped, "subscription lagged behind the event bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    });

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = queue.pop() => {
                    let Some(event) = event else { break };
                    if deliver.send((subscription_id, event)).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "subscription_tests.rs"]
mod tests;
