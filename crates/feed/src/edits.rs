//! Staged status/note edits for records on the displayed page.

use dcare_core::{RecordPatch, Status};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEdit {
    pub status: Option<Status>,
    pub note: String,
}

impl PendingEdit {
    /// Patch to send, or `None` while no status has been chosen.
    pub fn patch(&self) -> Option<RecordPatch> {
        let status = self.status?;
        Some(RecordPatch { status: Some(status), action_note: Some(self.note.clone()) })
    }
}

/// Edits keyed by record id, valid for one page only.
#[derive(Debug, Default)]
pub struct PendingEdits {
    page: usize,
    map: FxHashMap<String, PendingEdit>,
}

impl PendingEdits {
    pub fn len(&self) -> usize { self.map.len() }

    pub fn is_empty(&self) -> bool { self.map.is_empty() }

    /// Drop everything once the displayed page changes.
    pub fn observe_page(&mut self, page: usize) {
        if page != self.page {
            self.map.clear();
            self.page = page;
        }
    }

    pub fn stage(&mut self, id: &str, status: Option<Status>, note: Option<String>) {
        let e = self.map.entry(id.to_string()).or_default();
        if status.is_some() {
            e.status = status;
        }
        if let Some(n) = note {
            e.note = n;
        }
    }

    pub fn get(&self, id: &str) -> Option<&PendingEdit> { self.map.get(id) }

    pub fn remove(&mut self, id: &str) -> Option<PendingEdit> { self.map.remove(id) }

    pub fn snapshot(&self) -> Vec<(String, PendingEdit)> {
        let mut v: Vec<_> = self.map.iter().map(|(k, e)| (k.clone(), e.clone())).collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_change_discards_edits() {
        let mut e = PendingEdits::default();
        e.observe_page(1);
        e.stage("a", Some(Status::Resolved), None);
        e.observe_page(1);
        assert_eq!(e.len(), 1);
        e.observe_page(2);
        assert!(e.is_empty());
    }

    #[test]
    fn note_and_status_stage_independently() {
        let mut e = PendingEdits::default();
        e.stage("a", None, Some("crew dispatched".into()));
        assert!(e.get("a").unwrap().patch().is_none());
        e.stage("a", Some(Status::InProgress), None);
        let patch = e.get("a").unwrap().patch().unwrap();
        assert_eq!(patch.status, Some(Status::InProgress));
        assert_eq!(patch.action_note.as_deref(), Some("crew dispatched"));
    }
}
