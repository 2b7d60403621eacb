//! Feed handle and the actor behind it.
//!
//! One actor task owns all mutable state of a feed: the active scope, its
//! pager, the aggregate counters and the staged edits. Callers talk to it over
//! a command channel and read a [`FeedView`] published on a `watch` channel.
//! Fetch tasks and the aggregate tracker report back over their own channels,
//! so page navigation and live counts never wait on each other.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dcare_core::{AggregateSnapshot, FeedError, Location, Profile, Record, Scope, Status};
use dcare_store::{CancelHandle, DocumentStore, PageQuery};
use metrics::{counter, histogram};
use serde::Serialize;
use smallvec::SmallVec;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::aggregate::{spawn_tracker, AggregateUpdate};
use crate::config::FeedConfig;
use crate::edits::{PendingEdit, PendingEdits};
use crate::geo::{annotate, AnnotatedRecord};
use crate::pager::{page_window, Applied, FetchPlan, FetchResult, PageLink, PageState, Pager};
use crate::scope::can_edit;

/// What the caller renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedView {
    pub scope: Option<Scope>,
    pub page_number: usize,
    pub records: Vec<Record>,
    pub has_next: bool,
    pub has_prev: bool,
    pub total_pages: usize,
    /// Pagination bar is shown only when there is more than one page of data.
    pub controls_visible: bool,
    pub aggregate: AggregateSnapshot,
    /// At least one aggregate push arrived for the current scope.
    pub aggregate_live: bool,
    pub state: PageState,
    /// Last page fetch failure; cleared by the next successful fetch.
    pub error: Option<FeedError>,
    pub aggregate_error: Option<FeedError>,
    /// Degraded but open, e.g. `NoScope`.
    pub warning: Option<FeedError>,
    /// Terminal; the caller must leave the view.
    pub revoked: Option<FeedError>,
    pub pending_edits: Vec<(String, PendingEdit)>,
}

impl FeedView {
    fn empty(page_size: usize) -> Self {
        Self {
            scope: None,
            page_number: 1,
            records: Vec::new(),
            has_next: false,
            has_prev: false,
            total_pages: AggregateSnapshot::default().total_pages(page_size),
            controls_visible: false,
            aggregate: AggregateSnapshot::default(),
            aggregate_live: false,
            state: PageState::Idle,
            error: None,
            aggregate_error: None,
            warning: None,
            revoked: None,
            pending_edits: Vec::new(),
        }
    }

    pub fn annotated(&self, caller: Option<Location>) -> Vec<AnnotatedRecord> { annotate(self.records.iter().cloned(), caller) }

    pub fn page_window(&self) -> SmallVec<[PageLink; 9]> {
        if self.controls_visible {
            page_window(self.page_number, self.total_pages)
        } else {
            SmallVec::new()
        }
    }

    pub fn is_loading(&self) -> bool { matches!(self.state, PageState::Loading { .. }) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Applied { page: usize },
    /// A later request (or a scope change) took over before this one landed.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// No status staged for the record; nothing was written.
    NothingStaged,
}

type PageReply = oneshot::Sender<Result<PageOutcome, FeedError>>;

enum Command {
    GoTo { page: usize, reply: PageReply },
    SetScope { scope: Option<Scope>, reply: oneshot::Sender<()> },
    Resubscribe,
    Revoke(FeedError),
    Stage { id: String, status: Option<Status>, note: Option<String>, reply: oneshot::Sender<bool> },
    PeekEdit { id: String, reply: oneshot::Sender<(Option<Scope>, Option<PendingEdit>)> },
    EditCommitted { scope: Scope, id: String },
    Close,
}

struct Fetched {
    generation: u64,
    seq: u64,
    result: Result<FetchResult, FeedError>,
}

struct InFlight {
    seq: u64,
    page: usize,
    _task: CancelHandle,
    reply: Option<PageReply>,
}

impl InFlight {
    fn supersede(mut self) {
        if let Some(r) = self.reply.take() {
            let _ = r.send(Ok(PageOutcome::Superseded));
        }
    }
}

/// State owned by exactly one scope; replaced wholesale on scope change.
struct ScopeFeed {
    generation: u64,
    scope: Scope,
    pager: Pager,
    tracker: CancelHandle,
    aggregate: Option<AggregateSnapshot>,
    aggregate_error: Option<FeedError>,
    in_flight: Option<InFlight>,
    edits: PendingEdits,
}

impl Drop for ScopeFeed {
    fn drop(&mut self) {
        if let Some(f) = self.in_flight.take() {
            f.supersede();
        }
    }
}

struct FeedActor {
    store: Arc<dyn DocumentStore>,
    config: FeedConfig,
    generation: u64,
    active: Option<ScopeFeed>,
    warning: Option<FeedError>,
    revoked: Option<FeedError>,
    view_tx: watch::Sender<FeedView>,
    fetch_tx: mpsc::Sender<Fetched>,
    agg_tx: mpsc::Sender<AggregateUpdate>,
}

impl FeedActor {
    fn set_scope(&mut self, scope: Option<Scope>) {
        if self.revoked.is_none() && self.active.as_ref().map(|f| f.scope) == scope && scope.is_some() {
            return;
        }
        // Tear the old scope down before anything of the new one exists.
        if let Some(old) = self.active.take() {
            info!(scope = %old.scope, generation = old.generation, "feed: closing scope");
            drop(old);
        }
        self.revoked = None;
        self.generation += 1;
        match scope {
            None => {
                warn!("feed: no scope resolved; serving empty results");
                self.warning = Some(FeedError::NoScope);
            }
            Some(scope) => {
                self.warning = None;
                let filter = scope.filter();
                let tracker = spawn_tracker(Arc::clone(&self.store), filter, self.generation, self.agg_tx.clone());
                info!(scope = %scope, generation = self.generation, "feed: scope opened");
                self.active = Some(ScopeFeed {
                    generation: self.generation,
                    scope,
                    pager: Pager::new(filter, self.config.page_size),
                    tracker,
                    aggregate: None,
                    aggregate_error: None,
                    in_flight: None,
                    edits: PendingEdits::default(),
                });
                self.start_fetch(1, None);
            }
        }
    }

    fn start_fetch(&mut self, page: usize, reply: Option<PageReply>) {
        let Some(feed) = self.active.as_mut() else {
            if let Some(r) = reply {
                let _ = r.send(Err(self.warning.clone().unwrap_or(FeedError::NoScope)));
            }
            return;
        };
        if let Some(prev) = feed.in_flight.take() {
            debug!(seq = prev.seq, page = prev.page, "feed: superseding in-flight fetch");
            counter!("feed_fetch_total", 1u64, "outcome" => "superseded");
            prev.supersede();
        }
        let plan = feed.pager.plan(page);
        let seq = plan.seq;
        let generation = feed.generation;
        debug!(scope = %feed.scope, page, seq, from_page = plan.from_page, "feed: fetch issued");
        let store = Arc::clone(&self.store);
        let tx = self.fetch_tx.clone();
        let timeout = self.config.fetch_timeout;
        let task = tokio::spawn(async move {
            let result = run_fetch(store.as_ref(), &plan, timeout).await;
            let _ = tx.send(Fetched { generation, seq, result }).await;
        });
        feed.in_flight = Some(InFlight { seq, page, _task: CancelHandle::new(task), reply });
    }

    fn go_to(&mut self, page: usize, reply: PageReply) {
        if let Some(e) = &self.revoked {
            let _ = reply.send(Err(e.clone()));
            return;
        }
        let page = match self.active.as_ref().and_then(|f| f.aggregate) {
            Some(agg) => page.max(1).min(agg.total_pages(self.config.page_size)),
            None => page.max(1),
        };
        self.start_fetch(page, Some(reply));
    }

    fn on_fetched(&mut self, msg: Fetched) {
        let Some(feed) = self.active.as_mut().filter(|f| f.generation == msg.generation) else {
            counter!("feed_stale_responses_total", 1u64);
            debug!(generation = msg.generation, seq = msg.seq, "feed: dropping response for a closed scope");
            return;
        };
        let reply = match feed.in_flight.take() {
            Some(mut f) if f.seq == msg.seq => f.reply.take(),
            other => {
                feed.in_flight = other;
                None
            }
        };
        let answer = match feed.pager.apply(msg.seq, msg.result) {
            Applied::Loaded { page } => {
                counter!("feed_fetch_total", 1u64, "outcome" => "ok");
                feed.edits.observe_page(page);
                debug!(scope = %feed.scope, page, seq = msg.seq, records = feed.pager.records().len(), "feed: page applied");
                Ok(PageOutcome::Applied { page })
            }
            Applied::Failed(e) => {
                counter!("feed_fetch_total", 1u64, "outcome" => "error");
                warn!(scope = %feed.scope, seq = msg.seq, error = %e, timed_out = e.is_timeout(), "feed: page fetch failed");
                Err(e)
            }
            Applied::Stale => {
                counter!("feed_stale_responses_total", 1u64);
                debug!(seq = msg.seq, latest = feed.pager.latest_seq(), "feed: stale response discarded");
                return;
            }
        };
        self.clamp_if_needed();
        // Caller sees the view its request produced.
        self.publish();
        if let Some(r) = reply {
            let _ = r.send(answer);
        }
    }

    fn on_aggregate(&mut self, msg: AggregateUpdate) {
        let Some(feed) = self.active.as_mut().filter(|f| f.generation == msg.generation) else {
            debug!(generation = msg.generation, "feed: dropping aggregate for a closed scope");
            return;
        };
        match msg.result {
            Ok(snap) => {
                feed.aggregate = Some(snap);
                feed.aggregate_error = None;
            }
            // Last good counters stay visible.
            Err(e) => feed.aggregate_error = Some(e),
        }
        self.clamp_if_needed();
    }

    fn clamp_if_needed(&mut self) {
        let Some(feed) = self.active.as_mut() else { return };
        let Some(agg) = feed.aggregate else { return };
        let Some(target) = feed.pager.clamp_target(&agg) else { return };
        info!(scope = %feed.scope, from = feed.pager.page_number(), to = target, total = agg.total, "feed: clamping page");
        counter!("feed_clamps_total", 1u64);
        feed.pager.clamp_to(target);
        feed.edits.observe_page(feed.pager.page_number());
        // An in-flight request that still fits the new bounds stays authoritative.
        if feed.pager.loading().map_or(false, |p| p <= target) {
            debug!(scope = %feed.scope, page = feed.pager.loading(), "feed: in-flight page still in range; no refetch");
            return;
        }
        self.start_fetch(target, None);
    }

    fn resubscribe(&mut self) {
        let Some(feed) = self.active.as_mut() else { return };
        info!(scope = %feed.scope, "feed: resubscribing aggregate");
        let filter = feed.scope.filter();
        let fresh = spawn_tracker(Arc::clone(&self.store), filter, feed.generation, self.agg_tx.clone());
        std::mem::replace(&mut feed.tracker, fresh).cancel();
    }

    fn revoke(&mut self, err: FeedError) {
        warn!(error = %err, "feed: view revoked");
        self.active = None;
        self.generation += 1;
        self.warning = None;
        self.revoked = Some(err);
    }

    fn stage(&mut self, id: &str, status: Option<Status>, note: Option<String>) -> bool {
        let Some(feed) = self.active.as_mut() else { return false };
        if !feed.pager.records().iter().any(|r| r.id == id) {
            return false;
        }
        feed.edits.observe_page(feed.pager.page_number());
        feed.edits.stage(id, status, note);
        true
    }

    fn edit_committed(&mut self, scope: Scope, id: &str) {
        let Some(feed) = self.active.as_mut().filter(|f| f.scope == scope) else { return };
        feed.edits.remove(id);
        let page = feed.pager.page_number();
        self.start_fetch(page, None);
    }

    fn view(&self) -> FeedView {
        let ps = self.config.page_size;
        let mut v = FeedView::empty(ps);
        v.warning = self.warning.clone();
        v.revoked = self.revoked.clone();
        if let Some(feed) = &self.active {
            let total = feed.aggregate.map(|a| a.total);
            let agg = feed.aggregate.unwrap_or_default();
            v.scope = Some(feed.scope);
            v.page_number = feed.pager.page_number();
            v.records = feed.pager.records().to_vec();
            v.has_next = feed.pager.has_next(total);
            v.has_prev = feed.pager.has_prev();
            v.total_pages = agg.total_pages(ps);
            v.controls_visible = agg.total > ps;
            v.aggregate = agg;
            v.aggregate_live = feed.aggregate.is_some();
            v.state = feed.pager.state();
            v.error = feed.pager.error().cloned();
            v.aggregate_error = feed.aggregate_error.clone();
            v.pending_edits = feed.edits.snapshot();
        }
        v
    }

    fn publish(&self) { self.view_tx.send_replace(self.view()); }
}

/// Walk from the nearest known cursor to `plan.page`, one page per round trip.
async fn run_fetch(store: &dyn DocumentStore, plan: &FetchPlan, timeout: Duration) -> Result<FetchResult, FeedError> {
    let t0 = Instant::now();
    let mut cursor = plan.cursor.clone();
    let mut derived = Vec::new();
    let mut records = Vec::new();
    for idx in plan.from_page + 1..=plan.page {
        let q = PageQuery::after(plan.filter, plan.page_size, cursor.clone());
        let page = match tokio::time::timeout(timeout, store.query(q)).await {
            Err(_) => return Err(FeedError::timeout(timeout.as_millis())),
            Ok(Err(e)) => return Err(FeedError::fetch(e)),
            Ok(Ok(p)) => p,
        };
        let exhausted = page.records.len() < plan.page_size;
        if let Some(c) = &page.cursor {
            derived.push((idx, c.clone()));
        }
        cursor = page.cursor;
        if idx == plan.page {
            records = page.records;
        } else if exhausted {
            // target lies past the end of the data
            break;
        }
    }
    histogram!("feed_fetch_ms", t0.elapsed().as_secs_f64() * 1000.0);
    Ok(FetchResult { page: plan.page, records, derived })
}

async fn run_actor(mut actor: FeedActor, mut cmd_rx: mpsc::Receiver<Command>, mut fetch_rx: mpsc::Receiver<Fetched>, mut agg_rx: mpsc::Receiver<AggregateUpdate>) {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(Command::Close) => break,
                    Some(Command::GoTo { page, reply }) => actor.go_to(page, reply),
                    Some(Command::SetScope { scope, reply }) => {
                        actor.set_scope(scope);
                        actor.publish();
                        let _ = reply.send(());
                    }
                    Some(Command::Resubscribe) => actor.resubscribe(),
                    Some(Command::Revoke(e)) => actor.revoke(e),
                    Some(Command::Stage { id, status, note, reply }) => {
                        let ok = actor.stage(&id, status, note);
                        actor.publish();
                        let _ = reply.send(ok);
                    }
                    Some(Command::PeekEdit { id, reply }) => {
                        let scope = actor.active.as_ref().map(|f| f.scope);
                        let edit = actor.active.as_ref().and_then(|f| f.edits.get(&id).cloned());
                        let _ = reply.send((scope, edit));
                    }
                    Some(Command::EditCommitted { scope, id }) => actor.edit_committed(scope, &id),
                }
            }
            Some(msg) = fetch_rx.recv() => actor.on_fetched(msg),
            Some(msg) = agg_rx.recv() => actor.on_aggregate(msg),
        }
        actor.publish();
    }
    if let Some(feed) = actor.active.take() {
        info!(scope = %feed.scope, "feed: closed");
    }
    actor.publish();
}

/// Caller-side handle to a running feed. Cheap to clone; the feed stops on
/// [`FeedHandle::close`] or once every handle is dropped.
#[derive(Clone)]
pub struct FeedHandle {
    cmd_tx: mpsc::Sender<Command>,
    view_rx: watch::Receiver<FeedView>,
    store: Arc<dyn DocumentStore>,
}

/// Start a feed over `scope`. `None` opens it in the `NoScope` warning state.
pub fn open_feed(store: Arc<dyn DocumentStore>, scope: Option<Scope>, config: FeedConfig) -> FeedHandle {
    let cap = config.queue_cap;
    let (cmd_tx, cmd_rx) = mpsc::channel(cap);
    let (fetch_tx, fetch_rx) = mpsc::channel(cap);
    let (agg_tx, agg_rx) = mpsc::channel(cap);
    let (view_tx, view_rx) = watch::channel(FeedView::empty(config.page_size));
    let mut actor = FeedActor {
        store: Arc::clone(&store),
        config,
        generation: 0,
        active: None,
        warning: None,
        revoked: None,
        view_tx,
        fetch_tx,
        agg_tx,
    };
    actor.set_scope(scope);
    actor.publish();
    tokio::spawn(run_actor(actor, cmd_rx, fetch_rx, agg_rx));
    FeedHandle { cmd_tx, view_rx, store }
}

impl FeedHandle {
    pub fn current_page(&self) -> FeedView { self.view_rx.borrow().clone() }

    pub fn subscribe(&self) -> watch::Receiver<FeedView> { self.view_rx.clone() }

    /// Wait until the published view satisfies `pred`.
    pub async fn wait_for(&self, mut pred: impl FnMut(&FeedView) -> bool) -> Result<FeedView, FeedError> {
        let mut rx = self.view_rx.clone();
        loop {
            {
                let v = rx.borrow_and_update();
                if pred(&*v) {
                    return Ok(v.clone());
                }
            }
            rx.changed().await.map_err(|_| FeedError::Closed)?;
        }
    }

    pub async fn go_to_page(&self, page: usize) -> Result<PageOutcome, FeedError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(Command::GoTo { page, reply }).await.map_err(|_| FeedError::Closed)?;
        rx.await.map_err(|_| FeedError::Closed)?
    }

    pub async fn next_page(&self) -> Result<PageOutcome, FeedError> {
        let v = self.current_page();
        if !v.has_next {
            return Ok(PageOutcome::Applied { page: v.page_number });
        }
        self.go_to_page(v.page_number + 1).await
    }

    pub async fn prev_page(&self) -> Result<PageOutcome, FeedError> {
        let v = self.current_page();
        self.go_to_page(v.page_number.saturating_sub(1).max(1)).await
    }

    /// Switch scope. Cursors, counters, edits and in-flight work of the old
    /// scope are discarded; page 1 of the new scope is fetched.
    pub async fn set_scope(&self, scope: Option<Scope>) -> Result<(), FeedError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(Command::SetScope { scope, reply }).await.map_err(|_| FeedError::Closed)?;
        rx.await.map_err(|_| FeedError::Closed)
    }

    /// Re-open the aggregate subscription after a `Subscription` error.
    pub async fn resubscribe(&self) -> Result<(), FeedError> {
        self.cmd_tx.send(Command::Resubscribe).await.map_err(|_| FeedError::Closed)
    }

    /// Put the view into a terminal state (e.g. the session lost access).
    pub async fn revoke(&self, err: FeedError) -> Result<(), FeedError> {
        self.cmd_tx.send(Command::Revoke(err)).await.map_err(|_| FeedError::Closed)
    }

    /// Stage a status and/or note for a record on the displayed page.
    /// Returns false when the record is not on the page.
    pub async fn stage_edit(&self, id: &str, status: Option<Status>, note: Option<String>) -> Result<bool, FeedError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(Command::Stage { id: id.to_string(), status, note, reply }).await.map_err(|_| FeedError::Closed)?;
        rx.await.map_err(|_| FeedError::Closed)
    }

    /// Write the staged edit for `id` on behalf of `editor`.
    pub async fn commit_edit(&self, id: &str, editor: Option<&Profile>) -> Result<CommitOutcome, FeedError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(Command::PeekEdit { id: id.to_string(), reply }).await.map_err(|_| FeedError::Closed)?;
        let (scope, edit) = rx.await.map_err(|_| FeedError::Closed)?;
        let scope = scope.ok_or(FeedError::NoScope)?;
        if !can_edit(editor, &scope) {
            return Err(FeedError::Unauthorized(format!("cannot edit records in {}", scope)));
        }
        let Some(patch) = edit.and_then(|e| e.patch()) else { return Ok(CommitOutcome::NothingStaged) };
        let status = patch.status;
        self.store.update(id, patch).await.map_err(FeedError::update)?;
        info!(id = %id, status = ?status, scope = %scope, "feed: edit committed");
        self.cmd_tx.send(Command::EditCommitted { scope, id: id.to_string() }).await.map_err(|_| FeedError::Closed)?;
        Ok(CommitOutcome::Committed)
    }

    /// Stop the feed; the subscription and any in-flight fetch are released.
    pub async fn close(self) { let _ = self.cmd_tx.send(Command::Close).await; }
}
