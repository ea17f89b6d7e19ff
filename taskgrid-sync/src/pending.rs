//! Tracking of fields the local user is currently editing.
//!
//! A field is pending from the moment the user starts changing it until the
//! corresponding remote write has completed. While pending, remote updates to
//! that field are ignored by the dispatcher so in-progress typing is never
//! overwritten.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use taskgrid_core::RowId;

/// Map of `row_id` → fields with unsaved local edits.
///
/// Owned by the single event timeline; not shared across tasks.
#[derive(Debug, Clone)]
pub struct PendingEditTracker<F> {
    pending: HashMap<RowId, HashSet<F>>,
}

impl<F> Default for PendingEditTracker<F> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }
}

impl<F: Copy + Eq + Hash> PendingEditTracker<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `field` of `row_id` as being edited. Idempotent.
    pub fn mark(&mut self, row_id: &RowId, field: F) {
        self.pending
            .entry(row_id.clone())
            .or_default()
            .insert(field);
    }

    /// Unmark `field`. The row entry is dropped once it has no fields left.
    pub fn clear(&mut self, row_id: &RowId, field: F) {
        if let Some(fields) = self.pending.get_mut(row_id) {
            fields.remove(&field);
            if fields.is_empty() {
                self.pending.remove(row_id);
            }
        }
    }

    /// Drop every pending field of `row_id`.
    pub fn clear_all(&mut self, row_id: &RowId) {
        self.pending.remove(row_id);
    }

    pub fn is_field_pending(&self, row_id: &RowId, field: F) -> bool {
        self.pending
            .get(row_id)
            .map(|fields| fields.contains(&field))
            .unwrap_or(false)
    }

    /// Pending fields of `row_id`, if any.
    pub fn pending_fields(&self, row_id: &RowId) -> Option<&HashSet<F>> {
        self.pending.get(row_id)
    }

    pub fn has_pending(&self, row_id: &RowId) -> bool {
        self.pending.contains_key(row_id)
    }

    /// Number of rows with at least one pending field.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskgrid_core::TaskField;

    #[test]
    fn test_mark_then_clear_restores_empty_state() {
        let mut tracker = PendingEditTracker::new();
        let row = RowId::new("r1");
        tracker.mark(&row, TaskField::Text);
        tracker.mark(&row, TaskField::Text);
        assert!(tracker.is_field_pending(&row, TaskField::Text));
        assert_eq!(tracker.pending_fields(&row).map(HashSet::len), Some(1));

        tracker.clear(&row, TaskField::Text);
        assert!(tracker.is_empty());
        assert!(tracker.pending_fields(&row).is_none());
    }

    #[test]
    fn test_clear_unknown_row_is_noop() {
        let mut tracker: PendingEditTracker<TaskField> = PendingEditTracker::new();
        tracker.clear(&RowId::new("missing"), TaskField::Status);
        tracker.clear_all(&RowId::new("missing"));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_clear_keeps_other_fields() {
        let mut tracker = PendingEditTracker::new();
        let row = RowId::new("r1");
        tracker.mark(&row, TaskField::Text);
        tracker.mark(&row, TaskField::Status);
        tracker.clear(&row, TaskField::Text);
        assert!(!tracker.is_field_pending(&row, TaskField::Text));
        assert!(tracker.is_field_pending(&row, TaskField::Status));

        tracker.clear_all(&row);
        assert!(!tracker.has_pending(&row));
    }
}
