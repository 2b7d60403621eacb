//! Live aggregate tracker: one standing subscription per scope, reduced to
//! counters on every push.

use std::sync::Arc;
use std::time::Instant;

use dcare_core::{AggregateSnapshot, FeedError, Filter};
use dcare_store::{CancelHandle, DocumentStore};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Message from a tracker task, tagged with the scope generation it serves.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateUpdate {
    pub generation: u64,
    pub result: Result<AggregateSnapshot, FeedError>,
}

/// Spawn a tracker for `filter`. The returned handle tears the subscription
/// down when cancelled or dropped.
pub fn spawn_tracker(
    store: Arc<dyn DocumentStore>,
    filter: Filter,
    generation: u64,
    tx: mpsc::Sender<AggregateUpdate>,
) -> CancelHandle {
    let task = tokio::spawn(async move {
        let t0 = Instant::now();
        let mut sub = match store.subscribe(filter).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(filter = %filter, error = %e, "aggregate: subscribe failed");
                let _ = tx.send(AggregateUpdate { generation, result: Err(FeedError::subscription(e)) }).await;
                return;
            }
        };
        info!(filter = %filter, generation, took_ms = %t0.elapsed().as_millis(), "aggregate: subscription open");
        let mut pushes = 0u64;
        while let Some(item) = sub.rx.recv().await {
            match item {
                Ok(records) => {
                    let snap = AggregateSnapshot::from_records(&records);
                    pushes += 1;
                    counter!("feed_aggregate_pushes_total", 1u64);
                    debug!(filter = %filter, generation, total = snap.total, pushes, "aggregate: push");
                    if tx.send(AggregateUpdate { generation, result: Ok(snap) }).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!(filter = %filter, error = %e, "aggregate: subscription error");
                    let _ = tx.send(AggregateUpdate { generation, result: Err(FeedError::subscription(e)) }).await;
                    return;
                }
            }
        }
        warn!(filter = %filter, pushes, "aggregate: subscription stream ended");
        let _ = tx
            .send(AggregateUpdate { generation, result: Err(FeedError::Subscription("subscription closed".into())) })
            .await;
    });
    CancelHandle::new(task)
}
