//! The traversal driver: present the roots, then drain the work list.

use crate::error::{CorruptionKind, GcError};
use crate::roots::{RootEnumerator, RootScanStats};
use crate::util::ObjectReference;
use crate::vm::object_model;
use crate::vm::slot::SlotRange;
use crate::visitor::ObjectPointerVisitor;

/// What one pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassStats {
    pub roots: RootScanStats,
    pub objects_enqueued: usize,
    pub objects_scanned: usize,
    pub slots_visited: usize,
    pub null_slots: usize,
    pub slots_updated: usize,
    pub bytes_copied: usize,
    pub worklist_high_water: usize,
    /// Every enqueued object in order, if `record_enqueues` is set.
    pub enqueue_log: Option<Vec<ObjectReference>>,
}

/// Present the slots of `object` to `visitor`: the fixed slots first, then the tail, whose length
/// is read after the fixed slots were visited.
pub fn scan_object<'g, V: ObjectPointerVisitor<'g>>(
    visitor: &mut V,
    object: ObjectReference,
) -> Result<(), GcError> {
    if object_model::load_header(object) == 0 {
        return Err(GcError::corrupt(
            visitor.gc_root_type(),
            object.to_raw_address(),
            CorruptionKind::ZeroHeader,
        ));
    }
    trace!("[{}] scan {}", visitor.gc_root_type(), object);
    let fixed: Vec<SlotRange> = visitor
        .base()
        .describe(object)?
        .fixed_slot_ranges(object)
        .collect();
    for range in fixed {
        visitor.visit_pointers(range)?;
    }
    let tail = visitor
        .base()
        .describe(object)?
        .tail_slot_range(object, object_model::length(object));
    if let Some(range) = tail {
        visitor.visit_pointers(range)?;
    }
    visitor.post_scan_object(object);
    Ok(())
}

/// Scan objects from the work list until it is empty.  Returns the number of objects scanned.
pub fn drain<'g, V: ObjectPointerVisitor<'g>>(visitor: &mut V) -> Result<usize, GcError> {
    let mut scanned = 0;
    while let Some(object) = visitor.base_mut().worklist_mut().pop() {
        scan_object(visitor, object)?;
        scanned += 1;
    }
    Ok(scanned)
}

/// Run a full pass: every root, then everything reachable from them.
pub fn run<'g, V: ObjectPointerVisitor<'g>>(visitor: &mut V) -> Result<PassStats, GcError> {
    let group = visitor.isolate_group();
    debug!("[{}] pass over group {} started", visitor.gc_root_type(), group.name());
    let roots = RootEnumerator::new(group).visit_roots(visitor)?;
    debug!(
        "[{}] {} root slots in {} ranges",
        visitor.gc_root_type(),
        roots.total_slots(),
        roots.ranges
    );
    let objects_scanned = drain(visitor)?;

    let base = visitor.base_mut();
    let stats = PassStats {
        roots,
        objects_enqueued: base.worklist().pushed(),
        objects_scanned,
        slots_visited: base.slots_visited(),
        null_slots: base.null_slots(),
        slots_updated: base.slots_updated(),
        bytes_copied: base.bytes_copied(),
        worklist_high_water: base.worklist().high_water(),
        enqueue_log: base.worklist_mut().take_enqueue_log(),
    };
    info!(
        "[{}] pass over group {} done: {} objects scanned, {} slots visited, {} updated, {} bytes copied",
        base.gc_root_type(),
        group.name(),
        stats.objects_scanned,
        stats.slots_visited,
        stats.slots_updated,
        stats.bytes_copied
    );
    Ok(stats)
}
