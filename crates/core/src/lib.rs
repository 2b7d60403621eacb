//! District Care core types: departments, profiles, reports and scope filters.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod error;

pub use error::{FeedError, StoreError, UnknownDepartment};

/// Records shown per page on every feed surface.
pub const PAGE_SIZE: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Department {
    Electricity,
    Water,
    Sewage,
    Road,
}

impl Department {
    pub const ALL: [Department; 4] = [Department::Electricity, Department::Water, Department::Sewage, Department::Road];

    pub fn as_str(&self) -> &'static str {
        match self {
            Department::Electricity => "Electricity",
            Department::Water => "Water",
            Department::Sewage => "Sewage",
            Department::Road => "Road",
        }
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Department {
    type Err = UnknownDepartment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Department::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownDepartment(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Public,
    Dept,
    Admin,
}

/// Authenticated identity issued by the session provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
}

/// Authorization attributes attached to a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub department: Option<Department>,
}

impl Profile {
    /// Profile written on a principal's first session.
    pub fn default_for(principal: &Principal) -> Self {
        Self { id: principal.id.clone(), role: Role::Public, department: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Resolved,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Pending, Status::InProgress, Status::Resolved];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Resolved => "resolved",
        }
    }

    /// Map a stored status string; unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Status> {
        Status::ALL.into_iter().find(|st| st.as_str() == s)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

/// A citizen report as stored in the `posts` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub department_tag: Department,
    /// Kept verbatim; stored data may carry values outside [`Status`].
    pub status: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    /// Server timestamp in milliseconds, strictly increasing per store.
    pub created_at: i64,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub action_note: String,
    #[serde(default)]
    pub image_ref: Option<String>,
}

impl Record {
    pub fn known_status(&self) -> Option<Status> { Status::parse(&self.status) }

    pub fn location(&self) -> Option<Location> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Location { lat, lng }),
            _ => None,
        }
    }
}

/// Partial update applied by department staff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    pub status: Option<Status>,
    pub action_note: Option<String>,
}

/// Query filter derived from a scope. `department: None` matches every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Filter {
    pub department: Option<Department>,
}

impl Filter {
    pub fn matches(&self, record: &Record) -> bool {
        match self.department {
            Some(d) => record.department_tag == d,
            None => true,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.department {
            Some(d) => write!(f, "departmentTag=={}", d),
            None => f.write_str("(all)"),
        }
    }
}

/// Visibility scope of a feed, resolved once per navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "department", rename_all = "lowercase")]
pub enum Scope {
    /// Department bound by the route itself.
    Fixed(Department),
    /// Department taken from a route parameter or the caller's profile.
    Parametric(Department),
    All,
}

impl Scope {
    pub fn department(&self) -> Option<Department> {
        match self {
            Scope::Fixed(d) | Scope::Parametric(d) => Some(*d),
            Scope::All => None,
        }
    }

    pub fn filter(&self) -> Filter { Filter { department: self.department() } }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.department() {
            Some(d) => write!(f, "{}", d),
            None => f.write_str("all"),
        }
    }
}

/// Opaque position in the `createdAt desc` ordering of one filter.
///
/// Only the store constructs cursors. A cursor is bound to the filter it was
/// issued under and is rejected when presented with any other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageCursor {
    filter: Filter,
    created_at: i64,
    id: String,
}

impl PageCursor {
    /// Cursor positioned at `record`, the last record of a page.
    pub fn after_record(filter: Filter, record: &Record) -> Self {
        Self { filter, created_at: record.created_at, id: record.id.clone() }
    }

    pub fn filter(&self) -> &Filter { &self.filter }

    pub fn is_bound_to(&self, filter: &Filter) -> bool { &self.filter == filter }

    /// True when `record` sorts strictly after this position.
    pub fn admits(&self, record: &Record) -> bool {
        (record.created_at, record.id.as_str()) < (self.created_at, self.id.as_str())
    }
}

/// Total and per-status counts over a scope's full record set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub resolved: usize,
}

impl AggregateSnapshot {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut agg = Self::default();
        for r in records {
            agg.total += 1;
            match r.known_status() {
                Some(Status::Pending) => agg.pending += 1,
                Some(Status::InProgress) => agg.in_progress += 1,
                Some(Status::Resolved) => agg.resolved += 1,
                None => {}
            }
        }
        agg
    }

    pub fn count(&self, status: Status) -> usize {
        match status {
            Status::Pending => self.pending,
            Status::InProgress => self.in_progress,
            Status::Resolved => self.resolved,
        }
    }

    /// Number of pages needed to show every record (never less than one).
    pub fn total_pages(&self, page_size: usize) -> usize {
        let ps = page_size.max(1);
        ((self.total + ps - 1) / ps).max(1)
    }
}

pub mod prelude {
    pub use super::{
        AggregateSnapshot, Department, FeedError, Filter, Location, PageCursor, Principal, Profile, Record, RecordPatch, Role,
        Scope, Status, StoreError, PAGE_SIZE,
    };
}
