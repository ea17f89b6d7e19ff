//! Property-Based Tests for Change Dispatch
//!
//! **Property 1: Self-echo suppression.** An event whose actor is the local
//! user leaves the collection and the render count unchanged.
//!
//! **Property 2: Pending-field protection.** A remote update never
//! overwrites a field the local user is editing; every other field follows
//! the remote snapshot.
//!
//! **Property 3: Sort invariant.** After any sequence of insert, update and
//! delete events the task list is sorted by `sort_order` and ids are unique.
//!
//! **Property 4: Idempotence.** Re-delivered inserts and deletes of missing
//! rows change nothing.

use proptest::prelude::*;
use std::collections::HashSet;
use taskgrid_core::{
    ChangeEvent, CurrentUser, DeletedRow, EntityIdType, ProjectId, SessionContext, Task,
    TaskField, UserId,
};
use taskgrid_sync::{ChangeDispatcher, PendingEditTracker, RenderEvent, RenderKind, TaskList};
use taskgrid_test_utils::assertions::assert_sorted;
use taskgrid_test_utils::fixtures;
use taskgrid_test_utils::generators::{arb_task, arb_task_field};
use uuid::Uuid;

// ============================================================================
// HELPERS
// ============================================================================

fn project() -> ProjectId {
    ProjectId::new(Uuid::nil())
}

fn dispatcher_for(me: UserId) -> ChangeDispatcher {
    ChangeDispatcher::new(SessionContext::signed_in(CurrentUser::new(
        me,
        "me@example.com",
    )))
}

#[derive(Debug, Clone)]
enum FeedOp {
    Insert(Task),
    /// Move the n-th known task (modulo) to a new position.
    Move(usize, i64),
    /// Delete the n-th known task (modulo).
    Delete(usize),
}

fn feed_op_strategy() -> impl Strategy<Value = FeedOp> {
    prop_oneof![
        3 => arb_task(project()).prop_map(FeedOp::Insert),
        2 => (any::<usize>(), -50i64..50).prop_map(|(n, order)| FeedOp::Move(n, order)),
        1 => any::<usize>().prop_map(FeedOp::Delete),
    ]
}

fn set_field(task: &mut Task, field: TaskField, marker: &str) {
    match field {
        TaskField::SortOrder => task.sort_order += 1000,
        TaskField::Level => task.level += 7,
        TaskField::Collapsed => task.collapsed = !task.collapsed,
        TaskField::Text => task.text = format!("{} text", marker),
        TaskField::Status => task.status = format!("{} status", marker),
        TaskField::Progress => task.progress = (task.progress + 37) % 101,
        TaskField::Manager => task.manager = format!("{} manager", marker),
        TaskField::Ball => task.ball = format!("{} ball", marker),
        TaskField::StartDate => task.start_date = format!("{} start", marker),
        TaskField::EndDate => task.end_date = format!("{} end", marker),
    }
}

fn field_eq(a: &Task, b: &Task, field: TaskField) -> bool {
    match field {
        TaskField::SortOrder => a.sort_order == b.sort_order,
        TaskField::Level => a.level == b.level,
        TaskField::Collapsed => a.collapsed == b.collapsed,
        TaskField::Text => a.text == b.text,
        TaskField::Status => a.status == b.status,
        TaskField::Progress => a.progress == b.progress,
        TaskField::Manager => a.manager == b.manager,
        TaskField::Ball => a.ball == b.ball,
        TaskField::StartDate => a.start_date == b.start_date,
        TaskField::EndDate => a.end_date == b.end_date,
    }
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_own_echo_changes_nothing(
        seed in prop::collection::vec(arb_task(project()), 0..6),
        incoming in arb_task(project()),
        kind in 0u8..3,
    ) {
        let me = UserId::now_v7();
        let dispatcher = dispatcher_for(me);
        let mut tasks = TaskList::from_tasks(seed);
        let before = tasks.as_slice().to_vec();
        let pending = PendingEditTracker::new();
        let mut rendered: Vec<RenderEvent<Task>> = Vec::new();

        let mut own = incoming;
        own.updated_by = Some(me);
        let event = match kind {
            0 => ChangeEvent::Insert { new: own },
            1 => ChangeEvent::Update { new: own, old: None },
            _ => ChangeEvent::Delete { old: None, new: Some(own) },
        };

        prop_assert_eq!(dispatcher.apply_task_change(&mut tasks, &pending, event, &mut rendered), None);
        prop_assert_eq!(tasks.as_slice(), before.as_slice());
        prop_assert!(rendered.is_empty());
    }

    #[test]
    fn prop_pending_fields_survive_remote_update(
        pending_fields in prop::collection::hash_set(arb_task_field(), 0..4),
        remote_fields in prop::collection::hash_set(arb_task_field(), 1..6),
    ) {
        let dispatcher = dispatcher_for(UserId::now_v7());
        let local = fixtures::task("r1", 0);
        let mut tasks = TaskList::from_tasks([local.clone()]);
        let mut pending = PendingEditTracker::new();
        for field in &pending_fields {
            pending.mark(&local.row_id, *field);
        }

        let mut incoming = local.clone();
        incoming.updated_by = Some(UserId::now_v7());
        for field in &remote_fields {
            set_field(&mut incoming, *field, "remote");
        }

        let mut rendered: Vec<RenderEvent<Task>> = Vec::new();
        let kind = dispatcher.apply_task_change(
            &mut tasks,
            &pending,
            ChangeEvent::Update { new: incoming.clone(), old: None },
            &mut rendered,
        );
        prop_assert_eq!(kind, Some(RenderKind::Update));

        let stored = tasks.get(local.id).cloned().expect("task kept");
        for field in TaskField::ALL {
            if pending_fields.contains(&field) {
                prop_assert!(field_eq(&stored, &local, field), "pending {} overwritten", field);
            } else {
                prop_assert!(field_eq(&stored, &incoming, field), "{} not merged", field);
            }
        }
        prop_assert_eq!(stored.updated_by, incoming.updated_by);
    }

    #[test]
    fn prop_mark_then_clear_restores_empty_tracker(
        fields in prop::collection::vec(arb_task_field(), 1..8),
    ) {
        let mut pending = PendingEditTracker::new();
        let row = fixtures::task("r1", 0).row_id;
        for field in &fields {
            pending.mark(&row, *field);
        }
        prop_assert!(pending.has_pending(&row));
        for field in &fields {
            pending.clear(&row, *field);
        }
        prop_assert!(pending.is_empty());
        prop_assert!(pending.pending_fields(&row).is_none());
    }

    #[test]
    fn prop_task_list_stays_sorted(ops in prop::collection::vec(feed_op_strategy(), 1..40)) {
        let dispatcher = dispatcher_for(UserId::now_v7());
        let pending = PendingEditTracker::new();
        let mut tasks = TaskList::new();
        let mut rendered: Vec<RenderEvent<Task>> = Vec::new();

        for op in ops {
            let event = match op {
                FeedOp::Insert(task) => ChangeEvent::Insert { new: task },
                FeedOp::Move(n, order) => {
                    if tasks.is_empty() {
                        continue;
                    }
                    let mut moved = tasks.as_slice()[n % tasks.len()].clone();
                    moved.sort_order = order;
                    moved.updated_by = None;
                    ChangeEvent::Update { new: moved, old: None }
                }
                FeedOp::Delete(n) => {
                    if tasks.is_empty() {
                        continue;
                    }
                    let id = tasks.as_slice()[n % tasks.len()].id;
                    ChangeEvent::Delete { old: Some(DeletedRow::new(Some(id), None)), new: None }
                }
            };
            dispatcher.apply_task_change(&mut tasks, &pending, event, &mut rendered);

            assert_sorted(tasks.as_slice());
            let ids: HashSet<_> = tasks.iter().map(|t| t.id).collect();
            prop_assert_eq!(ids.len(), tasks.len());
        }
    }

    #[test]
    fn prop_redelivery_is_idempotent(task in arb_task(project())) {
        let dispatcher = dispatcher_for(UserId::now_v7());
        let pending = PendingEditTracker::new();
        let mut tasks = TaskList::new();
        let mut rendered: Vec<RenderEvent<Task>> = Vec::new();
        let mut task = task;
        task.updated_by = None;

        let insert = ChangeEvent::Insert { new: task.clone() };
        dispatcher.apply_task_change(&mut tasks, &pending, insert.clone(), &mut rendered);
        prop_assert_eq!(dispatcher.apply_task_change(&mut tasks, &pending, insert, &mut rendered), None);
        prop_assert_eq!(tasks.len(), 1);

        let delete = ChangeEvent::Delete { old: Some(DeletedRow::new(Some(task.id), None)), new: None };
        prop_assert_eq!(
            dispatcher.apply_task_change(&mut tasks, &pending, delete.clone(), &mut rendered),
            Some(RenderKind::Delete)
        );
        prop_assert_eq!(dispatcher.apply_task_change(&mut tasks, &pending, delete, &mut rendered), None);
        prop_assert!(tasks.is_empty());
        prop_assert_eq!(rendered.len(), 2);
    }
}
