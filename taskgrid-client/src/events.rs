//! Event types for the client event loop.

use crate::commands::Command;
use taskgrid_core::{Task, TaskField, TaskId, TaskgridResult};
use taskgrid_sync::ProjectEvent;

/// Everything the single event timeline reacts to.
#[derive(Debug)]
pub enum ClientEvent {
    /// Forwarded from the project's change and presence channels.
    Project(ProjectEvent),
    /// A line of operator input.
    Input(Command),
    /// A debounced task write settled.
    TaskWritten {
        task_id: TaskId,
        fields: Vec<TaskField>,
        outcome: TaskgridResult<Task>,
    },
    /// Stdin reached end of file.
    InputClosed,
}
