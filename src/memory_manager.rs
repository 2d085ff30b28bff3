//! Runtime-to-slotwalk interface: safe Rust APIs.
//!
//! A runtime creates an [`IsolateGroup`], registers its types, allocates objects and stores
//! references through this module, and asks for passes when it wants the heap traversed.  The
//! pass functions return errors so that tests and tools can inspect them; [`collect`] is the
//! entry point for production use, where any error is fatal.

use std::sync::RwLockReadGuard;

use strum_macros::{Display, EnumString};

use crate::error::{self, AllocError, GcError, ShrinkError};
use crate::heap::{object_size, SpaceKind};
use crate::isolate::IsolateGroup;
use crate::traversal::{self, PassStats};
use crate::util::options::Options;
use crate::util::ObjectReference;
use crate::visitor::{Marker, ObjectPointerVisitor, Scavenger, Updater, Verifier, VerifyReport};
use crate::vm::class_table::{ClassTable, ClassTableError, TypeDescriptor, TypeTag, UnknownTypeTag};
use crate::vm::object_model;
use crate::vm::slot::Slot;

/// The passes a runtime can ask for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum PassKind {
    Mark,
    Scavenge,
    UpdateReferences,
}

/// Set an option by name.  Returns `false` if the name is unknown or the value is invalid.
pub fn process(options: &mut Options, name: &str, value: &str) -> bool {
    options.set_from_str(name, value)
}

/// Read access to the class table of `group`.  Registration blocks while the guard is alive.
pub fn class_table_of(group: &IsolateGroup) -> RwLockReadGuard<'_, ClassTable> {
    group.class_table()
}

/// Register a type.  Waits for any running pass to finish.
pub fn register_type(
    group: &IsolateGroup,
    tag: TypeTag,
    descriptor: TypeDescriptor,
) -> Result<(), ClassTableError> {
    group.class_table_mut().register(tag, descriptor)
}

/// Allocate an object of type `tag` in `space`.  For variable-length types, `length` is the
/// number of tail elements; it is ignored otherwise.  All reference slots start out null.
pub fn alloc(
    group: &IsolateGroup,
    space: SpaceKind,
    tag: TypeTag,
    length: usize,
) -> Result<ObjectReference, AllocError> {
    let (bytes, length) = {
        let class_table = group.class_table();
        let descriptor = class_table
            .describe(tag)
            .map_err(|UnknownTypeTag(tag)| AllocError::UnknownTypeTag(tag))?;
        if descriptor.is_variable_length() {
            (descriptor.size_for_length(length), length)
        } else {
            (descriptor.instance_size(), 0)
        }
    };
    let heap = group.heap();
    heap.alloc_object(space, tag, bytes, length)
        .ok_or(AllocError::OutOfMemory {
            space: heap.space(space).name(),
            requested: bytes,
        })
}

/// Load the reference field at byte `offset` of `object`.
pub fn read_field(object: ObjectReference, offset: usize) -> Option<ObjectReference> {
    object_model::load_field(object, offset)
}

/// Store `value` into the reference field at byte `offset` of `object`.
///
/// This is the write barrier: a mature object that starts pointing into the nursery has the
/// slot recorded in the remembered set of the group.
pub fn write_field(
    group: &IsolateGroup,
    object: ObjectReference,
    offset: usize,
    value: Option<ObjectReference>,
) {
    debug_assert!(!object_model::is_forwarded(object), "{} has moved", object);
    object_model::store_field(object, offset, value);
    if let Some(target) = value {
        let heap = group.heap();
        if heap.space_of(object) == Some(SpaceKind::Mature)
            && heap.space_of(target) == Some(SpaceKind::Nursery)
        {
            group.remember_slot(object_model::field_slot(object, offset).as_address());
        }
    }
}

/// Truncate a variable-length object to `new_length` tail elements.  The words no longer covered
/// by the object are zeroed.
pub fn shrink_length(
    group: &IsolateGroup,
    object: ObjectReference,
    new_length: usize,
) -> Result<(), ShrinkError> {
    debug_assert!(!object_model::is_forwarded(object), "{} has moved", object);
    let class_table = group.class_table();
    let tag = object_model::type_tag(object);
    let descriptor = class_table
        .describe(tag)
        .map_err(|UnknownTypeTag(tag)| ShrinkError::UnknownTypeTag(tag))?;
    if !descriptor.is_variable_length() {
        return Err(ShrinkError::FixedSize(tag));
    }
    let old_length = object_model::length(object);
    if new_length > old_length {
        return Err(ShrinkError::WouldGrow {
            length: old_length,
            requested: new_length,
        });
    }
    let old_size = descriptor.size_for_length(old_length);
    let new_size = descriptor.size_for_length(new_length);
    object_model::set_length(object, new_length);
    object_model::zero_words(object.to_raw_address() + new_size, old_size - new_size);
    Ok(())
}

/// Move `object` into `space` and leave a forwarding pointer behind.  Slots still refer to the
/// old copy until a [`PassKind::UpdateReferences`] pass runs.
pub fn relocate(
    group: &IsolateGroup,
    object: ObjectReference,
    space: SpaceKind,
) -> Result<ObjectReference, GcError> {
    let heap = group.heap();
    heap.check_object(object, "relocate")?;
    let tag = object_model::type_tag(object);
    let size = object_size(object, &group.class_table()).map_err(|e| {
        GcError::UnknownTypeTag {
            tag: e.0,
            object,
            root_type: "relocate".to_string(),
        }
    })?;
    let length = object_model::length(object);
    let new_object = heap
        .alloc_object(space, tag, size, length)
        .ok_or(GcError::OutOfMemory {
            space: heap.space(space).name(),
            requested: size,
        })?;
    object_model::copy_words(object.to_raw_address(), new_object.to_raw_address(), size);
    object_model::forward_to(object, new_object, size);
    debug!("Relocated {} -> {} in {}", object, new_object, space);
    Ok(new_object)
}

fn prepare<'g, V: ObjectPointerVisitor<'g>>(visitor: &V) -> Result<(), GcError> {
    let reset = visitor
        .isolate_group()
        .heap()
        .prepare_pass(visitor.class_table(), visitor.gc_root_type())?;
    debug!("[{}] reset {} objects", visitor.gc_root_type(), reset);
    Ok(())
}

fn run_verifier(group: &IsolateGroup) -> Result<VerifyReport, GcError> {
    let mut verifier = Verifier::with_root_type(group, "verify");
    traversal::run(&mut verifier)?;
    let report = verifier.into_report();
    if report.is_clean() {
        info!(
            "Verified group {}: {} objects, {} slots",
            group.name(),
            report.objects_checked,
            report.slots_checked
        );
    } else {
        warn!(
            "Verification of group {} found {} violations",
            group.name(),
            report.violations.len()
        );
    }
    Ok(report)
}

fn verify_if_enabled(group: &IsolateGroup) -> Result<(), GcError> {
    if group.options().verify_after_pass {
        run_verifier(group)?.into_result()?;
    }
    Ok(())
}

/// Mark every object reachable from the roots of `group`.
pub fn mark(group: &IsolateGroup) -> Result<PassStats, GcError> {
    let _scope = group.enter_safepoint();
    let stats = {
        let mut marker = Marker::with_root_type(group, &PassKind::Mark.to_string());
        prepare(&marker)?;
        traversal::run(&mut marker)?
    };
    verify_if_enabled(group)?;
    Ok(stats)
}

/// Evacuate every reachable nursery object into the mature space, then release the nursery.
pub fn scavenge(group: &IsolateGroup) -> Result<PassStats, GcError> {
    let _scope = group.enter_safepoint();
    let stats = {
        let mut scavenger = Scavenger::with_root_type(group, &PassKind::Scavenge.to_string());
        prepare(&scavenger)?;
        let stats = traversal::run(&mut scavenger)?;
        debug!("Scavenged {} objects", scavenger.objects_copied());
        stats
    };
    group.heap().nursery().release();
    group.clear_remembered_set();
    verify_if_enabled(group)?;
    Ok(stats)
}

/// Redirect every reachable slot that refers to a moved object to its final copy.
pub fn update_references(group: &IsolateGroup) -> Result<PassStats, GcError> {
    let _scope = group.enter_safepoint();
    let stats = {
        let mut updater =
            Updater::with_root_type(group, &PassKind::UpdateReferences.to_string());
        prepare(&updater)?;
        traversal::run(&mut updater)?
    };
    verify_if_enabled(group)?;
    Ok(stats)
}

/// Check that the last pass left the heap consistent.  Never writes to the heap.
pub fn verify(group: &IsolateGroup) -> Result<VerifyReport, GcError> {
    let _scope = group.enter_safepoint();
    run_verifier(group)
}

/// Run a pass.  Any error is fatal: it is logged, and the process aborts, or panics if
/// `abort_on_fatal` is off.
pub fn collect(group: &IsolateGroup, kind: PassKind) -> PassStats {
    let result = match kind {
        PassKind::Mark => mark(group),
        PassKind::Scavenge => scavenge(group),
        PassKind::UpdateReferences => update_references(group),
    };
    match result {
        Ok(stats) => stats,
        Err(e) => error::fatal(&e, group.options().abort_on_fatal),
    }
}

/// Is `object` a valid reference into the heap of `group`?
pub fn is_in_heap(group: &IsolateGroup, object: ObjectReference) -> bool {
    group.heap().is_valid_object(object)
}

