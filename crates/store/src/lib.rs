//! District Care document store: the narrow interface the feed consumes,
//! plus an in-RAM implementation used by the CLI and tests.

#![forbid(unsafe_code)]

use dcare_core::{Filter, PageCursor, Record, RecordPatch, StoreError};
use tokio::sync::mpsc;

pub mod memory;

pub use memory::{Change, CollectionBuilder, CollectionSnapshot, MemoryStore, NewRecord};

/// Sort orders the store can serve. Cursors are only meaningful within one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// `createdAt` descending, ties broken by id descending.
    #[default]
    CreatedAtDesc,
}

/// Filtered, ordered, limited read starting strictly after `after`.
#[derive(Debug, Clone, PartialEq)]
pub struct PageQuery {
    pub filter: Filter,
    pub order: Order,
    pub limit: usize,
    pub after: Option<PageCursor>,
}

impl PageQuery {
    pub fn first(filter: Filter, limit: usize) -> Self { Self { filter, order: Order::CreatedAtDesc, limit, after: None } }

    pub fn after(filter: Filter, limit: usize, cursor: Option<PageCursor>) -> Self {
        Self { filter, order: Order::CreatedAtDesc, limit, after: cursor }
    }
}

/// One page of results. `cursor` sits on the last record and is `None` for an empty page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    pub records: Vec<Record>,
    pub cursor: Option<PageCursor>,
}

/// Each push carries the full matching set, or the error that ended the stream.
pub type SubscriptionItem = Result<Vec<Record>, StoreError>;

/// Aborts the task backing a stream. Dropping the handle releases it as well.
#[derive(Debug, Default)]
pub struct CancelHandle {
    task: Option<tokio::task::JoinHandle<()>>,
}

impl CancelHandle {
    pub fn new(task: tokio::task::JoinHandle<()>) -> Self { Self { task: Some(task) } }

    pub fn cancel(mut self) {
        if let Some(h) = self.task.take() {
            h.abort();
        }
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        if let Some(h) = self.task.take() {
            h.abort();
        }
    }
}

/// Standing change subscription over a filter.
pub struct Subscription {
    pub rx: mpsc::Receiver<SubscriptionItem>,
    pub cancel: CancelHandle,
}

/// Document store contract consumed by the feed core.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn query(&self, query: PageQuery) -> Result<QueryPage, StoreError>;

    /// Open a subscription delivering the full filtered set on every change.
    async fn subscribe(&self, filter: Filter) -> Result<Subscription, StoreError>;

    async fn update(&self, id: &str, patch: RecordPatch) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<T> {
    async fn query(&self, query: PageQuery) -> Result<QueryPage, StoreError> { (**self).query(query).await }

    async fn subscribe(&self, filter: Filter) -> Result<Subscription, StoreError> { (**self).subscribe(filter).await }

    async fn update(&self, id: &str, patch: RecordPatch) -> Result<(), StoreError> { (**self).update(id, patch).await }
}
