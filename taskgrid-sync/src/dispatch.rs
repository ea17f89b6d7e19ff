//! Application of remote change events to local collections.
//!
//! Every applied event produces exactly one render event. Events that change
//! nothing (own echoes, duplicate inserts, updates or deletes of unknown
//! rows) produce none.

use crate::collection::{CommentList, NoteCache, TaskList};
use crate::pending::PendingEditTracker;
use crate::render::{RenderEvent, RenderKind, RenderSink};
use taskgrid_core::{
    ChangeEvent, Comment, FieldMerge, Note, NoteField, Record, SessionContext, Task, TaskField,
};
use tracing::trace;

/// Merges change-feed events into local state on behalf of one session.
#[derive(Debug, Clone)]
pub struct ChangeDispatcher {
    session: SessionContext,
}

impl ChangeDispatcher {
    pub fn new(session: SessionContext) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Whether the event was produced by the local user.
    pub fn is_own_echo<T: Record>(&self, event: &ChangeEvent<T>) -> bool {
        self.session.is_own_change(event.actor())
    }

    /// Apply a task event. Returns the render kind emitted, if any.
    pub fn apply_task_change<S>(
        &self,
        tasks: &mut TaskList,
        pending: &PendingEditTracker<TaskField>,
        event: ChangeEvent<Task>,
        sink: &mut S,
    ) -> Option<RenderKind>
    where
        S: RenderSink<Task> + ?Sized,
    {
        if self.is_own_echo(&event) {
            trace!(kind = event.kind().as_str(), "Ignoring own task echo");
            return None;
        }

        match event {
            ChangeEvent::Insert { new } => {
                if !tasks.insert(new.clone()) {
                    return None;
                }
                sink.render(RenderEvent::new(RenderKind::Insert, new));
                Some(RenderKind::Insert)
            }
            ChangeEvent::Update { new, .. } => {
                let fields = pending.pending_fields(&new.row_id).filter(|f| !f.is_empty());
                tasks.update_with(new.id, |local| match fields {
                    Some(fields) => local.merge_from(&new, fields),
                    None => *local = new.clone(),
                })?;
                sink.render(RenderEvent::new(RenderKind::Update, new));
                Some(RenderKind::Update)
            }
            event @ ChangeEvent::Delete { .. } => {
                let id = event.delete_target_id()?;
                let removed = tasks.remove(id)?;
                sink.render(RenderEvent::new(RenderKind::Delete, removed));
                Some(RenderKind::Delete)
            }
        }
    }

    /// Apply a note event. Inserts and updates are both rendered as upserts.
    pub fn apply_note_change<S>(
        &self,
        notes: &mut NoteCache,
        pending: &PendingEditTracker<NoteField>,
        event: ChangeEvent<Note>,
        sink: &mut S,
    ) -> Option<RenderKind>
    where
        S: RenderSink<Note> + ?Sized,
    {
        if self.is_own_echo(&event) {
            trace!(kind = event.kind().as_str(), "Ignoring own note echo");
            return None;
        }

        match event {
            ChangeEvent::Insert { new } | ChangeEvent::Update { new, .. } => {
                let fields = pending.pending_fields(&new.row_id).filter(|f| !f.is_empty());
                let merged = fields.and_then(|fields| {
                    let local = notes.get_mut(&new.row_id)?;
                    local.merge_from(&new, fields);
                    Some(local.clone())
                });
                let stored = match merged {
                    Some(stored) => stored,
                    None => {
                        notes.upsert(new.clone());
                        new
                    }
                };
                sink.render(RenderEvent::new(RenderKind::Upsert, stored));
                Some(RenderKind::Upsert)
            }
            event @ ChangeEvent::Delete { .. } => {
                let row_id = event.delete_target_row_id().or_else(|| {
                    let id = event.delete_target_id()?;
                    notes.iter().find(|n| n.id == id).map(|n| n.row_id.clone())
                })?;
                let removed = notes.remove(&row_id)?;
                sink.render(RenderEvent::new(RenderKind::Delete, removed));
                Some(RenderKind::Delete)
            }
        }
    }

    /// Apply a comment event. Comments carry no actor, so there is no echo
    /// suppression.
    pub fn apply_comment_change<S>(
        &self,
        comments: &mut CommentList,
        event: ChangeEvent<Comment>,
        sink: &mut S,
    ) -> Option<RenderKind>
    where
        S: RenderSink<Comment> + ?Sized,
    {
        match event {
            ChangeEvent::Insert { new } => {
                if !comments.insert(new.clone()) {
                    return None;
                }
                sink.render(RenderEvent::new(RenderKind::Insert, new));
                Some(RenderKind::Insert)
            }
            ChangeEvent::Update { new, .. } => {
                if !comments.replace(new.clone()) {
                    return None;
                }
                sink.render(RenderEvent::new(RenderKind::Update, new));
                Some(RenderKind::Update)
            }
            event @ ChangeEvent::Delete { .. } => {
                let id = event.delete_target_id()?;
                let removed = comments.remove(id)?;
                sink.render(RenderEvent::new(RenderKind::Delete, removed));
                Some(RenderKind::Delete)
            }
        }
    }
}
