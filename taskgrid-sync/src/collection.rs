//! Local collections of synchronised rows.

use std::collections::HashMap;
use taskgrid_core::{Comment, CommentId, Note, RowId, Task, TaskId};

// ============================================================================
// TASKS
// ============================================================================

/// Tasks of one project, always sorted by `sort_order` (stable) with unique ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskList {
    tasks: Vec<Task>,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from rows in any order. Later duplicates of an id are dropped.
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let mut list = Self::new();
        for task in tasks {
            list.insert(task);
        }
        list
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }

    pub fn as_slice(&self) -> &[Task] {
        &self.tasks
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn find_by_row_id(&self, row_id: &RowId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.row_id == row_id)
    }

    fn position(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    /// Append and re-sort. Returns false (and changes nothing) when a task
    /// with the same id is already present.
    pub fn insert(&mut self, task: Task) -> bool {
        if self.contains(task.id) {
            return false;
        }
        self.tasks.push(task);
        self.sort();
        true
    }

    /// Mutate the task with `id` in place and re-sort. Returns the updated
    /// task, or `None` if absent.
    pub fn update_with<F>(&mut self, id: TaskId, mutate: F) -> Option<&Task>
    where
        F: FnOnce(&mut Task),
    {
        let index = self.position(id)?;
        mutate(&mut self.tasks[index]);
        self.sort();
        self.get(id)
    }

    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        let index = self.position(id)?;
        Some(self.tasks.remove(index))
    }

    /// Replace the whole sequence (after a full reload).
    pub fn replace_all(&mut self, tasks: impl IntoIterator<Item = Task>) {
        *self = Self::from_tasks(tasks);
    }

    fn sort(&mut self) {
        self.tasks.sort_by_key(|t| t.sort_order);
    }
}

impl<'a> IntoIterator for &'a TaskList {
    type Item = &'a Task;
    type IntoIter = std::slice::Iter<'a, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.iter()
    }
}

// ============================================================================
// NOTES
// ============================================================================

/// Notes keyed by the `row_id` of the task they belong to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteCache {
    notes: HashMap<RowId, Note>,
}

impl NoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_notes(notes: impl IntoIterator<Item = Note>) -> Self {
        Self {
            notes: notes.into_iter().map(|n| (n.row_id.clone(), n)).collect(),
        }
    }

    pub fn get(&self, row_id: &RowId) -> Option<&Note> {
        self.notes.get(row_id)
    }

    pub fn get_mut(&mut self, row_id: &RowId) -> Option<&mut Note> {
        self.notes.get_mut(row_id)
    }

    /// Store by `row_id`, returning the previous note if any.
    pub fn upsert(&mut self, note: Note) -> Option<Note> {
        self.notes.insert(note.row_id.clone(), note)
    }

    pub fn remove(&mut self, row_id: &RowId) -> Option<Note> {
        self.notes.remove(row_id)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Note> {
        self.notes.values()
    }
}

// ============================================================================
// COMMENTS
// ============================================================================

/// Comments of a project in arrival order, unique by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentList {
    comments: Vec<Comment>,
}

impl CommentList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_comments(comments: impl IntoIterator<Item = Comment>) -> Self {
        let mut list = Self::new();
        for comment in comments {
            list.insert(comment);
        }
        list
    }

    pub fn get(&self, id: CommentId) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == id)
    }

    /// Append unless the id is already present.
    pub fn insert(&mut self, comment: Comment) -> bool {
        if self.get(comment.id).is_some() {
            return false;
        }
        self.comments.push(comment);
        true
    }

    /// Replace by id. Returns false when absent.
    pub fn replace(&mut self, comment: Comment) -> bool {
        match self.comments.iter_mut().find(|c| c.id == comment.id) {
            Some(slot) => {
                *slot = comment;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: CommentId) -> Option<Comment> {
        let index = self.comments.iter().position(|c| c.id == id)?;
        Some(self.comments.remove(index))
    }

    /// Comments attached to one task row.
    pub fn for_row<'a>(&'a self, row_id: &'a RowId) -> impl Iterator<Item = &'a Comment> + 'a {
        self.comments.iter().filter(move |c| &c.row_id == row_id)
    }

    /// Number of uncleared comments on a task row.
    pub fn open_count(&self, row_id: &RowId) -> usize {
        self.for_row(row_id).filter(|c| !c.cleared).count()
    }

    pub fn len(&self) -> usize {
        self.comments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Comment> {
        self.comments.iter()
    }
}
