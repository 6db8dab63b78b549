//! Bookmark list — a user's bookmarks, newest first, with idempotent
//! change reconciliation.
//!
//! DESIGN
//! ======
//! A connection may see the same change twice: once from the local publish
//! right after its own create/delete, and once more when the provider's
//! realtime channel echoes it. `apply` reports whether the visible list
//! actually changed, and callers only forward changes that did.

use uuid::Uuid;

use crate::state::Bookmark;
use crate::supabase::realtime::ChangeEvent;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookmarkList {
    items: Vec<Bookmark>,
}

impl BookmarkList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from rows in any order.
    #[must_use]
    pub fn from_rows(rows: Vec<Bookmark>) -> Self {
        let mut list = Self::new();
        list.replace_all(rows);
        list
    }

    /// Replace the contents with a fresh snapshot.
    pub fn replace_all(&mut self, mut rows: Vec<Bookmark>) {
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.dedup_by_key(|b| b.id);
        self.items = rows;
    }

    /// Apply one change. Returns `true` if the list changed.
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        match event {
            ChangeEvent::Insert(bookmark) => self.upsert(bookmark),
            ChangeEvent::Update(bookmark) => match self.position(bookmark.id) {
                Some(idx) if self.items[idx] != *bookmark => {
                    self.items.remove(idx);
                    self.insert_sorted(bookmark.clone());
                    true
                }
                _ => false,
            },
            ChangeEvent::Delete(id) => match self.position(*id) {
                Some(idx) => {
                    self.items.remove(idx);
                    true
                }
                None => false,
            },
        }
    }

    fn upsert(&mut self, bookmark: &Bookmark) -> bool {
        if let Some(idx) = self.position(bookmark.id) {
            if self.items[idx] == *bookmark {
                return false;
            }
            self.items.remove(idx);
        }
        self.insert_sorted(bookmark.clone());
        true
    }

    fn insert_sorted(&mut self, bookmark: Bookmark) {
        let idx = self
            .items
            .iter()
            .position(|b| b.created_at <= bookmark.created_at)
            .unwrap_or(self.items.len());
        self.items.insert(idx, bookmark);
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.items.iter().position(|b| b.id == id)
    }

    #[must_use]
    pub fn items(&self) -> &[Bookmark] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
#[path = "list_test.rs"]
mod tests;
