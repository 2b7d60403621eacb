#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dcare_core::{Department, FeedError, Profile, Record, Role, Scope, Status, StoreError};
use dcare_feed::{open_feed, CommitOutcome, FeedConfig, FeedHandle, FeedView, PageOutcome, PageState};
use dcare_store::MemoryStore;

fn rec(id: usize, dept: Department, status: Status) -> Record {
    Record {
        id: format!("r{:03}", id),
        title: format!("report {}", id),
        description: String::new(),
        department_tag: dept,
        status: status.as_str().into(),
        lat: None,
        lng: None,
        created_at: 10_000 + id as i64,
        created_by: "citizen".into(),
        action_note: String::new(),
        image_ref: None,
    }
}

/// 14 Water reports (6 pending, 5 in progress, 3 resolved) and 4 Road reports.
fn water_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let mut records = Vec::new();
    for i in 0..14 {
        let status = match i {
            0..=5 => Status::Pending,
            6..=10 => Status::InProgress,
            _ => Status::Resolved,
        };
        records.push(rec(i, Department::Water, status));
    }
    for i in 100..104 {
        records.push(rec(i, Department::Road, Status::Pending));
    }
    store.seed(records);
    store
}

fn big_store(n: usize) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.seed((0..n).map(|i| rec(i, Department::Water, Status::Pending)));
    store
}

async fn settle(feed: &FeedHandle, pred: impl FnMut(&FeedView) -> bool) -> FeedView {
    tokio::time::timeout(Duration::from_secs(5), feed.wait_for(pred)).await.expect("view settled in time").expect("feed open")
}

async fn loaded(feed: &FeedHandle) -> FeedView { settle(feed, |v| v.state == PageState::Loaded && v.aggregate_live).await }

fn water() -> Option<Scope> { Some(Scope::Fixed(Department::Water)) }

#[tokio::test]
async fn water_scenario_pages_and_counts() {
    let feed = open_feed(water_store(), water(), FeedConfig::default());
    let first = loaded(&feed).await;
    assert_eq!(first.page_number, 1);
    assert_eq!(first.records.len(), 6);
    assert!(first.has_next);
    assert!(!first.has_prev);
    assert_eq!(first.aggregate.total, 14);
    assert_eq!((first.aggregate.pending, first.aggregate.in_progress, first.aggregate.resolved), (6, 5, 3));
    assert_eq!(first.total_pages, 3);
    assert!(first.controls_visible);

    assert_eq!(feed.go_to_page(3).await.unwrap(), PageOutcome::Applied { page: 3 });
    let last = feed.current_page();
    assert_eq!(last.records.len(), 2);
    assert!(!last.has_next);
    assert!(last.has_prev);
    assert!(last.records.iter().all(|r| r.department_tag == Department::Water));
    feed.close().await;
}

#[tokio::test]
async fn pages_are_disjoint_and_newest_first() {
    let feed = open_feed(water_store(), water(), FeedConfig::default());
    loaded(&feed).await;
    let mut all = Vec::new();
    for page in [1, 2, 3] {
        feed.go_to_page(page).await.unwrap();
        all.extend(feed.current_page().records);
    }
    assert_eq!(all.len(), 14);
    let ids: HashSet<_> = all.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids.len(), 14);
    assert!(all.windows(2).all(|w| (w[0].created_at, &w[0].id) > (w[1].created_at, &w[1].id)));

    // going back re-reads the same page
    feed.go_to_page(2).await.unwrap();
    assert_eq!(feed.current_page().records, all[6..12].to_vec());
}

#[tokio::test]
async fn next_and_prev_stop_at_the_edges() {
    let feed = open_feed(water_store(), water(), FeedConfig::default());
    loaded(&feed).await;
    assert_eq!(feed.prev_page().await.unwrap(), PageOutcome::Applied { page: 1 });
    feed.next_page().await.unwrap();
    feed.next_page().await.unwrap();
    assert_eq!(feed.current_page().page_number, 3);
    assert_eq!(feed.next_page().await.unwrap(), PageOutcome::Applied { page: 3 });
    assert_eq!(feed.prev_page().await.unwrap(), PageOutcome::Applied { page: 2 });
}

#[tokio::test]
async fn later_request_supersedes_earlier_one() {
    let store = big_store(42);
    let feed = open_feed(store.clone(), water(), FeedConfig::default());
    loaded(&feed).await;

    store.set_query_delay(Some(Duration::from_millis(80)));
    let early = feed.clone();
    let two = tokio::spawn(async move { early.go_to_page(2).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let five = feed.go_to_page(5).await.unwrap();

    assert_eq!(two.await.unwrap().unwrap(), PageOutcome::Superseded);
    assert_eq!(five, PageOutcome::Applied { page: 5 });
    let view = feed.current_page();
    assert_eq!(view.page_number, 5);
    // newest first: page 5 of 42 covers r017..r012
    assert_eq!(view.records.first().map(|r| r.id.as_str()), Some("r017"));
    assert_eq!(view.records.last().map(|r| r.id.as_str()), Some("r012"));

    // the superseded page never shows up afterwards
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(feed.current_page().page_number, 5);
}

#[tokio::test]
async fn requests_past_the_end_land_on_the_last_page() {
    let feed = open_feed(water_store(), water(), FeedConfig::default());
    loaded(&feed).await;
    assert_eq!(feed.go_to_page(9).await.unwrap(), PageOutcome::Applied { page: 3 });
    assert_eq!(feed.go_to_page(0).await.unwrap(), PageOutcome::Applied { page: 1 });
}

#[tokio::test]
async fn shrinking_scope_clamps_page_down() {
    let store = water_store();
    let feed = open_feed(store.clone(), water(), FeedConfig::default());
    loaded(&feed).await;
    feed.go_to_page(3).await.unwrap();

    for i in 0..9 {
        store.remove(&format!("r{:03}", i));
    }
    let view = settle(&feed, |v| v.aggregate.total == 5 && v.state == PageState::Loaded && v.page_number == 1).await;
    assert_eq!(view.records.len(), 5);
    assert!(!view.has_next);
    assert!(!view.controls_visible);
}

#[tokio::test]
async fn shrinking_scope_keeps_an_in_range_request() {
    let store = water_store();
    let feed = open_feed(store.clone(), water(), FeedConfig::default());
    loaded(&feed).await;
    feed.go_to_page(3).await.unwrap();

    store.set_query_delay(Some(Duration::from_millis(150)));
    let back = feed.clone();
    let first = tokio::spawn(async move { back.go_to_page(1).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    for i in 0..9 {
        store.remove(&format!("r{:03}", i));
    }
    settle(&feed, |v| v.aggregate.total == 5).await;

    assert_eq!(first.await.unwrap().unwrap(), PageOutcome::Applied { page: 1 });
    let view = feed.current_page();
    assert_eq!(view.page_number, 1);
    assert_eq!(view.records.len(), 5);
}

#[tokio::test]
async fn growing_scope_never_moves_the_page() {
    let store = water_store();
    let feed = open_feed(store.clone(), water(), FeedConfig::default());
    loaded(&feed).await;
    feed.go_to_page(2).await.unwrap();
    store.seed((200..220).map(|i| rec(i, Department::Water, Status::Pending)));
    let view = settle(&feed, |v| v.aggregate.total == 34).await;
    assert_eq!(view.page_number, 2);
    assert!(view.has_next);
}

#[tokio::test]
async fn failed_subscription_does_not_block_paging() {
    let store = water_store();
    store.fail_subscriptions(Some(StoreError::PermissionDenied("rules".into())));
    let feed = open_feed(store.clone(), water(), FeedConfig::default());

    let view = settle(&feed, |v| v.state == PageState::Loaded && v.aggregate_error.is_some()).await;
    assert!(matches!(view.aggregate_error, Some(FeedError::Subscription(_))));
    assert!(!view.aggregate_live);
    // full page without counters: assume more may follow
    assert!(view.has_next);
    assert_eq!(feed.go_to_page(2).await.unwrap(), PageOutcome::Applied { page: 2 });

    store.fail_subscriptions(None);
    feed.resubscribe().await.unwrap();
    let view = settle(&feed, |v| v.aggregate_live && v.aggregate_error.is_none()).await;
    assert_eq!(view.aggregate.total, 14);
    assert_eq!(view.page_number, 2);
}

#[tokio::test]
async fn interrupted_subscription_keeps_last_counts() {
    let store = water_store();
    let feed = open_feed(store.clone(), water(), FeedConfig::default());
    loaded(&feed).await;
    store.interrupt_subscriptions(StoreError::Unavailable("backend restart".into()));
    let view = settle(&feed, |v| v.aggregate_error.is_some()).await;
    assert_eq!(view.aggregate.total, 14);
    assert!(view.aggregate_live);
}

#[tokio::test]
async fn failed_fetch_keeps_page_and_counters() {
    let store = water_store();
    let feed = open_feed(store.clone(), water(), FeedConfig::default());
    loaded(&feed).await;

    store.fail_next_queries(StoreError::Unavailable("offline".into()), 1);
    let err = feed.go_to_page(2).await.unwrap_err();
    assert!(matches!(err, FeedError::Fetch { timed_out: false, .. }));
    let view = feed.current_page();
    assert_eq!(view.page_number, 1);
    assert_eq!(view.records.len(), 6);
    assert_eq!(view.aggregate.total, 14);
    assert_eq!(view.state, PageState::Error);
    assert!(view.error.is_some());

    feed.go_to_page(2).await.unwrap();
    let view = feed.current_page();
    assert_eq!(view.state, PageState::Loaded);
    assert!(view.error.is_none());
}

#[tokio::test]
async fn slow_fetch_reports_timeout() {
    let store = water_store();
    let config = FeedConfig::default().with_fetch_timeout(Duration::from_millis(40));
    let feed = open_feed(store.clone(), water(), config);
    loaded(&feed).await;

    store.set_query_delay(Some(Duration::from_millis(200)));
    let err = feed.go_to_page(2).await.unwrap_err();
    assert!(err.is_timeout());
    let view = feed.current_page();
    assert_eq!(view.page_number, 1);
    assert!(view.error.as_ref().map_or(false, FeedError::is_timeout));
}

#[tokio::test]
async fn scope_change_resets_paging() {
    let feed = open_feed(water_store(), water(), FeedConfig::default());
    loaded(&feed).await;
    feed.go_to_page(2).await.unwrap();

    feed.set_scope(Some(Scope::Fixed(Department::Road))).await.unwrap();
    let view = settle(&feed, |v| v.state == PageState::Loaded && v.aggregate_live).await;
    assert_eq!(view.scope, Some(Scope::Fixed(Department::Road)));
    assert_eq!(view.page_number, 1);
    assert_eq!(view.aggregate.total, 4);
    assert!(view.records.iter().all(|r| r.department_tag == Department::Road));
    assert!(!view.controls_visible);
}

#[tokio::test]
async fn scope_change_cancels_the_in_flight_page() {
    let store = water_store();
    let feed = open_feed(store.clone(), water(), FeedConfig::default());
    loaded(&feed).await;

    store.set_query_delay(Some(Duration::from_millis(80)));
    let early = feed.clone();
    let two = tokio::spawn(async move { early.go_to_page(2).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    feed.set_scope(Some(Scope::Fixed(Department::Road))).await.unwrap();
    assert_eq!(two.await.unwrap().unwrap(), PageOutcome::Superseded);

    let view = settle(&feed, |v| v.state == PageState::Loaded && v.aggregate_live).await;
    // well past the point the water page would have landed
    tokio::time::sleep(Duration::from_millis(150)).await;
    let later = feed.current_page();
    assert_eq!(later, view);
    assert_eq!(later.scope, Some(Scope::Fixed(Department::Road)));
    assert_eq!(later.page_number, 1);
    assert_eq!(later.records.len(), 4);
    assert!(later.records.iter().all(|r| r.department_tag == Department::Road));
    assert_eq!((later.aggregate.total, later.aggregate.pending), (4, 4));
}

#[tokio::test]
async fn missing_scope_is_a_warning_that_recovers() {
    let feed = open_feed(water_store(), None, FeedConfig::default());
    let view = feed.current_page();
    assert_eq!(view.warning, Some(FeedError::NoScope));
    assert!(view.records.is_empty());
    assert_eq!(feed.go_to_page(1).await.unwrap_err(), FeedError::NoScope);

    feed.set_scope(Some(Scope::Parametric(Department::Water))).await.unwrap();
    let view = loaded(&feed).await;
    assert_eq!(view.warning, None);
    assert_eq!(view.aggregate.total, 14);
}

#[tokio::test]
async fn revoked_feed_rejects_navigation() {
    let feed = open_feed(water_store(), water(), FeedConfig::default());
    loaded(&feed).await;
    feed.revoke(FeedError::Unauthenticated).await.unwrap();
    let view = settle(&feed, |v| v.revoked.is_some()).await;
    assert!(view.records.is_empty());
    assert_eq!(feed.go_to_page(2).await.unwrap_err(), FeedError::Unauthenticated);
}

#[tokio::test]
async fn closed_feed_reports_closed() {
    let feed = open_feed(water_store(), water(), FeedConfig::default());
    loaded(&feed).await;
    let other = feed.clone();
    feed.close().await;

    let err = other.go_to_page(2).await.unwrap_err();
    assert_eq!(err, FeedError::Closed);
    assert!(!err.is_retriable());
    assert_eq!(other.set_scope(None).await.unwrap_err(), FeedError::Closed);
}

#[tokio::test]
async fn staged_edit_commits_and_refreshes() {
    let store = water_store();
    let feed = open_feed(store.clone(), water(), FeedConfig::default());
    let view = loaded(&feed).await;
    let target = view.records.iter().find(|r| r.known_status() == Some(Status::InProgress)).unwrap().id.clone();

    assert!(!feed.stage_edit("r100", Some(Status::Resolved), None).await.unwrap());
    assert!(feed.stage_edit(&target, Some(Status::Resolved), Some("valve replaced".into())).await.unwrap());
    assert_eq!(feed.current_page().pending_edits.len(), 1);

    let road = Profile { id: "s2".into(), role: Role::Dept, department: Some(Department::Road) };
    assert!(matches!(feed.commit_edit(&target, Some(&road)).await, Err(FeedError::Unauthorized(_))));

    let staff = Profile { id: "s1".into(), role: Role::Dept, department: Some(Department::Water) };
    assert_eq!(feed.commit_edit("r001", Some(&staff)).await.unwrap(), CommitOutcome::NothingStaged);
    assert_eq!(feed.commit_edit(&target, Some(&staff)).await.unwrap(), CommitOutcome::Committed);

    let id = target.clone();
    let view = settle(&feed, move |v| {
        v.pending_edits.is_empty() && v.records.iter().any(|r| r.id == id && r.known_status() == Some(Status::Resolved)) && v.aggregate.resolved == 4
    })
    .await;
    let edited = view.records.iter().find(|r| r.id == target).unwrap();
    assert_eq!(edited.action_note, "valve replaced");
}

#[tokio::test]
async fn edits_are_dropped_on_page_change() {
    let feed = open_feed(water_store(), water(), FeedConfig::default());
    let view = loaded(&feed).await;
    feed.stage_edit(&view.records[0].id, Some(Status::InProgress), None).await.unwrap();
    feed.go_to_page(2).await.unwrap();
    assert!(feed.current_page().pending_edits.is_empty());
}

#[tokio::test]
async fn view_serializes_with_camel_case_keys() {
    let feed = open_feed(water_store(), water(), FeedConfig::default());
    let view = loaded(&feed).await;
    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["pageNumber"], 1);
    assert_eq!(json["hasNext"], true);
    assert_eq!(json["records"].as_array().map(Vec::len), Some(6));
}
