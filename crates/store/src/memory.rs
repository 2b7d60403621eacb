//! In-RAM document store. Writes go through a [`CollectionBuilder`], each batch
//! freezes into an immutable snapshot swapped in with `ArcSwap`, and
//! subscribers wake on a `watch` epoch channel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dcare_core::{Department, Filter, Record, RecordPatch, Status, StoreError};
use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::{CancelHandle, DocumentStore, Order, PageQuery, QueryPage, Subscription};

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Upsert(Record),
    Remove(String),
}

/// Submission payload; the store assigns id, timestamp and initial status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub department_tag: Option<Department>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub image_ref: Option<String>,
}

/// Immutable view of the collection, sorted `createdAt desc, id desc`.
#[derive(Debug, Clone, Default)]
pub struct CollectionSnapshot {
    pub epoch: u64,
    pub items: Vec<Record>,
}

impl CollectionSnapshot {
    pub fn matching<'a>(&'a self, filter: &'a Filter) -> impl Iterator<Item = &'a Record> + 'a {
        self.items.iter().filter(move |r| filter.matches(r))
    }

    pub fn page(&self, q: &PageQuery) -> Result<QueryPage, StoreError> {
        if let Some(c) = &q.after {
            if !c.is_bound_to(&q.filter) {
                return Err(StoreError::InvalidCursor(q.filter.to_string()));
            }
        }
        let records: Vec<Record> = match q.order {
            Order::CreatedAtDesc => self
                .matching(&q.filter)
                .filter(|r| q.after.as_ref().map_or(true, |c| c.admits(r)))
                .take(q.limit)
                .cloned()
                .collect(),
        };
        let cursor = records.last().map(|r| dcare_core::PageCursor::after_record(q.filter, r));
        Ok(QueryPage { records, cursor })
    }
}

/// Applies change batches and freezes snapshots.
pub struct CollectionBuilder {
    epoch: u64,
    items: FxHashMap<String, Record>,
    last_ts: i64,
}

impl Default for CollectionBuilder {
    fn default() -> Self { Self::new() }
}

impl CollectionBuilder {
    pub fn new() -> Self { Self { epoch: 0, items: FxHashMap::default(), last_ts: 0 } }

    /// Next server timestamp: wall clock, bumped to stay strictly increasing.
    pub fn next_timestamp(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        self.last_ts = now.max(self.last_ts + 1);
        self.last_ts
    }

    pub fn get(&self, id: &str) -> Option<&Record> { self.items.get(id) }

    pub fn apply(&mut self, batch: Vec<Change>) {
        for c in batch {
            match c {
                Change::Upsert(r) => {
                    self.last_ts = self.last_ts.max(r.created_at);
                    self.items.insert(r.id.clone(), r);
                }
                Change::Remove(id) => {
                    self.items.remove(&id);
                }
            }
        }
        self.epoch = self.epoch.saturating_add(1);
    }

    pub fn freeze(&self) -> Arc<CollectionSnapshot> {
        let mut items: Vec<Record> = self.items.values().cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Arc::new(CollectionSnapshot { epoch: self.epoch, items })
    }
}

#[derive(Default)]
struct Faults {
    query_failures: VecDeque<StoreError>,
    query_delay: Option<Duration>,
    subscribe_error: Option<StoreError>,
}

/// Document store held entirely in memory.
pub struct MemoryStore {
    builder: Mutex<CollectionBuilder>,
    snap: Arc<ArcSwap<CollectionSnapshot>>,
    epoch_tx: watch::Sender<u64>,
    interrupt_tx: watch::Sender<Option<StoreError>>,
    faults: Mutex<Faults>,
    queue_cap: usize,
}

impl Default for MemoryStore {
    fn default() -> Self { Self::new() }
}

impl MemoryStore {
    pub fn new() -> Self { Self::with_queue_cap(256) }

    pub fn with_queue_cap(queue_cap: usize) -> Self {
        let (epoch_tx, _) = watch::channel(0u64);
        let (interrupt_tx, _) = watch::channel(None);
        Self {
            builder: Mutex::new(CollectionBuilder::new()),
            snap: Arc::new(ArcSwap::from_pointee(CollectionSnapshot::default())),
            epoch_tx,
            interrupt_tx,
            faults: Mutex::new(Faults::default()),
            queue_cap: queue_cap.max(1),
        }
    }

    fn builder(&self) -> MutexGuard<'_, CollectionBuilder> { self.builder.lock().unwrap_or_else(|e| e.into_inner()) }

    fn faults(&self) -> MutexGuard<'_, Faults> { self.faults.lock().unwrap_or_else(|e| e.into_inner()) }

    pub fn current(&self) -> Arc<CollectionSnapshot> { self.snap.load_full() }

    /// Apply a batch and publish the resulting snapshot.
    pub fn apply(&self, batch: Vec<Change>) {
        if batch.is_empty() {
            return;
        }
        self.commit(self.builder(), batch);
    }

    /// Apply, freeze and publish while still holding `b`.
    fn commit(&self, mut b: MutexGuard<'_, CollectionBuilder>, batch: Vec<Change>) {
        b.apply(batch);
        let next = b.freeze();
        let epoch = next.epoch;
        let items = next.items.len();
        self.snap.store(next);
        drop(b);
        self.epoch_tx.send_replace(epoch);
        debug!(epoch, items, "store: snapshot published");
    }

    /// Store a submission, stamping id, server timestamp and `pending` status.
    pub fn insert(&self, new: NewRecord) -> Record {
        let mut b = self.builder();
        let record = Record {
            id: uuid::Uuid::new_v4().to_string(),
            title: new.title,
            description: new.description,
            department_tag: new.department_tag.unwrap_or(Department::Electricity),
            status: Status::Pending.as_str().to_string(),
            lat: new.lat,
            lng: new.lng,
            created_at: b.next_timestamp(),
            created_by: new.created_by,
            action_note: String::new(),
            image_ref: new.image_ref,
        };
        self.commit(b, vec![Change::Upsert(record.clone())]);
        record
    }

    /// Load records verbatim, keeping their ids and timestamps.
    pub fn seed(&self, records: impl IntoIterator<Item = Record>) {
        let batch: Vec<Change> = records.into_iter().map(Change::Upsert).collect();
        let n = batch.len();
        self.apply(batch);
        info!(records = n, "store: seeded");
    }

    pub fn remove(&self, id: &str) -> bool {
        let b = self.builder();
        let present = b.get(id).is_some();
        if present {
            self.commit(b, vec![Change::Remove(id.to_string())]);
        }
        present
    }

    /// Make the next `n` queries fail with `err`.
    pub fn fail_next_queries(&self, err: StoreError, n: usize) {
        let mut f = self.faults();
        for _ in 0..n {
            f.query_failures.push_back(err.clone());
        }
    }

    pub fn set_query_delay(&self, delay: Option<Duration>) { self.faults().query_delay = delay; }

    /// Reject new subscriptions with `err` until cleared with `None`.
    pub fn fail_subscriptions(&self, err: Option<StoreError>) { self.faults().subscribe_error = err; }

    /// End every live subscription with `err`.
    pub fn interrupt_subscriptions(&self, err: StoreError) { self.interrupt_tx.send_replace(Some(err)); }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn query(&self, query: PageQuery) -> Result<QueryPage, StoreError> {
        let started = Instant::now();
        let (failure, delay) = {
            let mut f = self.faults();
            (f.query_failures.pop_front(), f.query_delay)
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if let Some(err) = failure {
            counter!("store_query_failures_total", 1u64);
            return Err(err);
        }
        let snap = self.snap.load_full();
        let page = snap.page(&query)?;
        histogram!("store_query_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(filter = %query.filter, limit = query.limit, after = query.after.is_some(), returned = page.records.len(), epoch = snap.epoch, "store: query");
        Ok(page)
    }

    async fn subscribe(&self, filter: Filter) -> Result<Subscription, StoreError> {
        if let Some(err) = self.faults().subscribe_error.clone() {
            return Err(err);
        }
        let (tx, rx) = mpsc::channel(self.queue_cap);
        let snap = Arc::clone(&self.snap);
        let mut epoch_rx = self.epoch_tx.subscribe();
        let mut interrupt_rx = self.interrupt_tx.subscribe();
        epoch_rx.borrow_and_update();
        interrupt_rx.borrow_and_update();
        let task = tokio::spawn(async move {
            debug!(filter = %filter, "store: subscription started");
            loop {
                let cur = snap.load_full();
                let items: Vec<Record> = cur.matching(&filter).cloned().collect();
                if tx.send(Ok(items)).await.is_err() {
                    break;
                }
                tokio::select! {
                    changed = epoch_rx.changed() => {
                        if changed.is_err() { break; }
                    }
                    changed = interrupt_rx.changed() => {
                        if changed.is_err() { break; }
                        let err = interrupt_rx.borrow_and_update().clone();
                        if let Some(err) = err {
                            let _ = tx.send(Err(err)).await;
                            break;
                        }
                    }
                    _ = tx.closed() => break,
                }
            }
            debug!(filter = %filter, "store: subscription ended");
        });
        Ok(Subscription { rx, cancel: CancelHandle::new(task) })
    }

    async fn update(&self, id: &str, patch: RecordPatch) -> Result<(), StoreError> {
        let b = self.builder();
        let mut r = b.get(id).cloned().ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if let Some(st) = patch.status {
            r.status = st.as_str().to_string();
        }
        if let Some(note) = patch.action_note {
            r.action_note = note;
        }
        self.commit(b, vec![Change::Upsert(r)]);
        Ok(())
    }
}
