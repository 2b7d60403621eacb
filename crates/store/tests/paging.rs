#![forbid(unsafe_code)]

use std::collections::HashSet;

use dcare_core::{Department, Record, Scope, StoreError, PAGE_SIZE};
use dcare_store::{DocumentStore, MemoryStore, PageQuery};

fn rec(id: usize, dept: Department) -> Record {
    Record {
        id: format!("r{:03}", id),
        title: format!("report {}", id),
        description: String::new(),
        department_tag: dept,
        status: "pending".into(),
        lat: None,
        lng: None,
        created_at: 1_000 + id as i64,
        created_by: "u1".into(),
        action_note: String::new(),
        image_ref: None,
    }
}

fn seeded() -> MemoryStore {
    let store = MemoryStore::new();
    store.seed((0..20).map(|i| rec(i, if i % 2 == 0 { Department::Water } else { Department::Road })));
    store
}

#[tokio::test]
async fn sequential_pages_are_disjoint_and_ordered() {
    let store = seeded();
    let filter = Scope::Fixed(Department::Water).filter();
    let mut cursor = None;
    let mut seen = Vec::new();
    for _ in 0..3 {
        let page = store.query(PageQuery::after(filter, PAGE_SIZE, cursor.clone())).await.unwrap();
        assert!(page.records.len() <= PAGE_SIZE);
        assert!(page.records.iter().all(|r| r.department_tag == Department::Water));
        seen.extend(page.records.iter().map(|r| r.id.clone()));
        cursor = page.cursor;
    }
    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(unique.len(), seen.len());
    assert_eq!(seen.len(), 10);

    let expected: Vec<String> = store.current().matching(&filter).map(|r| r.id.clone()).collect();
    assert_eq!(seen, expected);
    assert_eq!(seen[0], "r018");
}

#[tokio::test]
async fn empty_page_has_no_cursor() {
    let store = MemoryStore::new();
    let page = store.query(PageQuery::first(Scope::All.filter(), PAGE_SIZE)).await.unwrap();
    assert!(page.records.is_empty());
    assert!(page.cursor.is_none());
}

#[tokio::test]
async fn cursor_from_another_scope_is_rejected() {
    let store = seeded();
    let water = Scope::Fixed(Department::Water).filter();
    let road = Scope::Fixed(Department::Road).filter();
    let page = store.query(PageQuery::first(water, PAGE_SIZE)).await.unwrap();
    let err = store.query(PageQuery::after(road, PAGE_SIZE, page.cursor)).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidCursor(_)));
}

#[tokio::test]
async fn injected_failures_are_consumed_in_order() {
    let store = seeded();
    store.fail_next_queries(StoreError::Unavailable("offline".into()), 1);
    let q = PageQuery::first(Scope::All.filter(), PAGE_SIZE);
    assert!(store.query(q.clone()).await.is_err());
    assert_eq!(store.query(q).await.unwrap().records.len(), PAGE_SIZE);
}
