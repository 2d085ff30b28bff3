mod common;

use common::*;

use slotwalk::heap::SpaceKind;
use slotwalk::memory_manager;
use slotwalk::roots::{IsolateRootStats, RootEnumerator, RootKind};
use slotwalk::vm::object_model::{self, GcState};
use slotwalk::vm::slot::{Slot, SlotRange};

#[test]
fn roots_come_in_a_fixed_order() {
    let group = new_group(options());
    let first = group.new_isolate("first");
    let second = group.new_isolate("second");
    let old = alloc(&group, SpaceKind::Mature, PAIR, 0);
    let young = alloc(&group, SpaceKind::Nursery, LEAF, 0);

    second.push_frame(1);
    first.push_frame(2);
    first.push_frame(3);
    second.new_global_handle(Some(old));
    first.new_persistent_handle(None);
    first.new_global_handle(None);
    memory_manager::write_field(&group, old, field(1), Some(young));

    let roots = RootEnumerator::new(&group).root_ranges();
    let order: Vec<(RootKind, Option<usize>, usize)> = roots
        .iter()
        .map(|root| (root.kind, root.isolate, root.range.len()))
        .collect();
    assert_eq!(
        order,
        vec![
            (RootKind::Stack, Some(0), 2),
            (RootKind::Stack, Some(0), 3),
            (RootKind::Stack, Some(1), 1),
            (RootKind::GlobalHandle, Some(0), 1),
            (RootKind::GlobalHandle, Some(1), 1),
            (RootKind::PersistentHandle, Some(0), 1),
            (RootKind::RememberedSet, None, 1),
        ]
    );
    assert_eq!(
        roots.last().unwrap().range.start(),
        object_model::field_slot(old, field(1)).as_address()
    );
    // Nothing changed, nothing moves.
    assert_eq!(RootEnumerator::new(&group).root_ranges(), roots);
}

#[test]
fn terminating_isolates_report_empty_roots() {
    let group = new_group(options());
    let live = group.new_isolate("live");
    let dying = group.new_isolate("dying");
    let kept = alloc(&group, SpaceKind::Mature, LEAF, 0);
    let dropped = alloc(&group, SpaceKind::Mature, LEAF, 0);

    let frame = live.push_frame(1);
    live.set_stack_slot(frame, 0, Some(kept));
    let frame = dying.push_frame(4);
    dying.set_stack_slot(frame, 0, Some(dropped));
    dying.new_global_handle(Some(dropped));
    dying.begin_termination();

    let roots = RootEnumerator::new(&group).root_ranges();
    let dying_roots: Vec<_> = roots.iter().filter(|r| r.isolate == Some(1)).collect();
    assert_eq!(dying_roots.len(), 3);
    assert!(dying_roots.iter().all(|r| r.range == SlotRange::EMPTY));
    assert_eq!(
        dying_roots.iter().map(|r| r.kind).collect::<Vec<_>>(),
        vec![
            RootKind::Stack,
            RootKind::GlobalHandle,
            RootKind::PersistentHandle
        ]
    );

    let stats = memory_manager::mark(&group).unwrap();
    assert_eq!(
        stats.roots.per_isolate.get(&1),
        Some(&IsolateRootStats {
            ranges: 3,
            slots: 0
        })
    );
    assert_eq!(stats.roots.slots[RootKind::Stack], 1);
    assert_eq!(object_model::gc_state(kept), GcState::Processed);
    assert_eq!(object_model::gc_state(dropped), GcState::Unvisited);
}

#[test]
fn root_stats_count_slots_per_kind() {
    let group = new_group(options());
    let isolate = group.new_isolate("main");
    isolate.push_frame(5);
    for _ in 0..3 {
        isolate.new_persistent_handle(None);
    }
    let stats = memory_manager::mark(&group).unwrap();
    assert_eq!(stats.roots.slots[RootKind::Stack], 5);
    assert_eq!(stats.roots.slots[RootKind::GlobalHandle], 0);
    assert_eq!(stats.roots.slots[RootKind::PersistentHandle], 3);
    assert_eq!(stats.roots.total_slots(), 8);
    assert_eq!(stats.null_slots, 8);
    assert_eq!(stats.objects_enqueued, 0);
}
