//! Cursor-chain paging state for a single scope.
//!
//! The pager holds no I/O. It hands out a [`FetchPlan`] per request and
//! later folds the matching [`FetchResult`] back in. Only the result carrying
//! the most recently issued sequence number is ever applied.

use dcare_core::{AggregateSnapshot, FeedError, Filter, PageCursor, Record};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageState {
    Idle,
    Loading { page: usize },
    Loaded,
    Error,
}

/// Everything a fetch task needs, captured at issue time.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPlan {
    pub seq: u64,
    pub filter: Filter,
    pub page_size: usize,
    /// Target page (1-based).
    pub page: usize,
    /// Last page whose cursor is known; 0 means start from the top.
    pub from_page: usize,
    pub cursor: Option<PageCursor>,
}

impl FetchPlan {
    /// Store round trips this plan costs.
    pub fn round_trips(&self) -> usize { self.page - self.from_page }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResult {
    pub page: usize,
    pub records: Vec<Record>,
    /// Cursors learned on the way, keyed by the page they close.
    pub derived: Vec<(usize, PageCursor)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Loaded { page: usize },
    Failed(FeedError),
    /// Superseded by a later request; nothing changed.
    Stale,
}

pub struct Pager {
    filter: Filter,
    page_size: usize,
    page_number: usize,
    records: Vec<Record>,
    cursors: FxHashMap<usize, PageCursor>,
    issued: u64,
    loading: Option<usize>,
    error: Option<FeedError>,
    loaded_once: bool,
}

impl Pager {
    pub fn new(filter: Filter, page_size: usize) -> Self {
        Self {
            filter,
            page_size: page_size.max(1),
            page_number: 1,
            records: Vec::new(),
            cursors: FxHashMap::default(),
            issued: 0,
            loading: None,
            error: None,
            loaded_once: false,
        }
    }

    pub fn filter(&self) -> Filter { self.filter }
    pub fn page_size(&self) -> usize { self.page_size }
    pub fn page_number(&self) -> usize { self.page_number }
    pub fn records(&self) -> &[Record] { &self.records }
    pub fn error(&self) -> Option<&FeedError> { self.error.as_ref() }
    pub fn loading(&self) -> Option<usize> { self.loading }
    pub fn latest_seq(&self) -> u64 { self.issued }
    pub fn cached_pages(&self) -> usize { self.cursors.len() }

    pub fn state(&self) -> PageState {
        match (self.loading, &self.error) {
            (Some(page), _) => PageState::Loading { page },
            (None, Some(_)) => PageState::Error,
            (None, None) if self.loaded_once => PageState::Loaded,
            (None, None) => PageState::Idle,
        }
    }

    /// Issue a new request for `page`, superseding any earlier one.
    pub fn plan(&mut self, page: usize) -> FetchPlan {
        let page = page.max(1);
        self.issued += 1;
        self.loading = Some(page);
        let (from_page, cursor) = (1..page)
            .rev()
            .find_map(|k| self.cursors.get(&k).map(|c| (k, Some(c.clone()))))
            .unwrap_or((0, None));
        FetchPlan { seq: self.issued, filter: self.filter, page_size: self.page_size, page, from_page, cursor }
    }

    pub fn apply(&mut self, seq: u64, result: Result<FetchResult, FeedError>) -> Applied {
        if seq != self.issued {
            return Applied::Stale;
        }
        self.loading = None;
        match result {
            Ok(res) => {
                for (k, c) in res.derived {
                    if c.is_bound_to(&self.filter) {
                        self.cursors.insert(k, c);
                    }
                }
                self.records = res.records;
                self.page_number = res.page;
                self.error = None;
                self.loaded_once = true;
                Applied::Loaded { page: res.page }
            }
            Err(e) => {
                self.error = Some(e.clone());
                Applied::Failed(e)
            }
        }
    }

    /// Page to fall back to when the aggregate no longer reaches the displayed
    /// or requested page. Never points upward.
    pub fn clamp_target(&self, agg: &AggregateSnapshot) -> Option<usize> {
        let last = agg.total_pages(self.page_size);
        let over = self.page_number > last || self.loading.map_or(false, |p| p > last);
        over.then_some(last)
    }

    /// Move the displayed page number down without touching the records;
    /// they stay visible until the refetch lands.
    pub fn clamp_to(&mut self, page: usize) {
        if page < self.page_number {
            self.page_number = page.max(1);
        }
    }

    /// `total` is the aggregate count when one has arrived. Without it, a
    /// full page is taken to mean more may follow.
    pub fn has_next(&self, total: Option<usize>) -> bool {
        match total {
            Some(total) => self.page_number * self.page_size < total,
            None => self.records.len() == self.page_size,
        }
    }

    pub fn has_prev(&self) -> bool { self.page_number > 1 }
}

/// Entry in a truncated pagination bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageLink {
    Page(usize),
    Ellipsis,
}

/// Pages around `current` plus first/last anchors, eliding the gaps.
pub fn page_window(current: usize, total_pages: usize) -> SmallVec<[PageLink; 9]> {
    let cur = current as isize;
    let total = total_pages as isize;
    let mut out = SmallVec::new();
    if cur > 3 {
        out.push(PageLink::Page(1));
    }
    if cur > 4 {
        out.push(PageLink::Ellipsis);
    }
    for i in (cur - 2).max(1)..=(cur + 2).min(total) {
        out.push(PageLink::Page(i as usize));
    }
    if cur < total - 3 {
        out.push(PageLink::Ellipsis);
    }
    if cur < total - 2 {
        out.push(PageLink::Page(total_pages));
    }
    out
}
