//! Pointer visitors.
//!
//! A visitor is presented with ranges of slots, from roots and from objects popped off its work
//! list.  Each variant decides what happens to the object a slot refers to: the
//! [`Marker`] marks it, the [`Scavenger`] evacuates it out of the nursery, the [`Updater`]
//! redirects the slot to where the object has moved, and the [`Verifier`] checks that an earlier
//! pass left the heap consistent.
//!
//! All variants share [`VisitorBase`], which freezes the class table of the group for the
//! lifetime of the visitor.

mod marker;
mod scavenger;
mod updater;
mod verifier;

pub use self::marker::Marker;
pub use self::scavenger::Scavenger;
pub use self::updater::Updater;
pub use self::verifier::{Verifier, VerifyReport};

use std::sync::RwLockReadGuard;

use crate::error::{CorruptionKind, GcError};
use crate::isolate::IsolateGroup;
use crate::util::ObjectReference;
use crate::vm::class_table::{ClassTable, TypeDescriptor};
use crate::vm::object_model::{self, GcState};
use crate::vm::slot::{Slot, SlotRange};
use crate::worklist::WorkList;

/// The label of a visitor created without one.
pub const UNKNOWN_ROOT_TYPE: &str = "unknown";

/// State shared by every visitor variant.
pub struct VisitorBase<'g> {
    group: &'g IsolateGroup,
    /// Held for the lifetime of the visitor, so no type can be registered during a pass.
    class_table: RwLockReadGuard<'g, ClassTable>,
    root_type: String,
    worklist: WorkList,
    slots_visited: usize,
    null_slots: usize,
    slots_updated: usize,
    bytes_copied: usize,
}

impl<'g> VisitorBase<'g> {
    pub fn new(group: &'g IsolateGroup) -> Self {
        Self::with_root_type(group, UNKNOWN_ROOT_TYPE)
    }

    /// Create a visitor state labelled `root_type`.  The label only shows up in diagnostics.
    pub fn with_root_type(group: &'g IsolateGroup, root_type: &str) -> Self {
        let options = group.options();
        let worklist = if options.record_enqueues {
            WorkList::with_log(options.worklist_order)
        } else {
            WorkList::new(options.worklist_order)
        };
        VisitorBase {
            group,
            class_table: group.class_table(),
            root_type: root_type.to_string(),
            worklist,
            slots_visited: 0,
            null_slots: 0,
            slots_updated: 0,
            bytes_copied: 0,
        }
    }

    pub fn isolate_group(&self) -> &'g IsolateGroup {
        self.group
    }

    pub fn class_table(&self) -> &ClassTable {
        &self.class_table
    }

    pub fn gc_root_type(&self) -> &str {
        &self.root_type
    }

    pub fn worklist(&self) -> &WorkList {
        &self.worklist
    }

    pub fn worklist_mut(&mut self) -> &mut WorkList {
        &mut self.worklist
    }

    pub fn enqueue(&mut self, object: ObjectReference) {
        trace!("[{}] enqueue {}", self.root_type, object);
        self.worklist.push(object);
    }

    /// Look up the descriptor of `object`.  An unregistered tag is a corrupt heap.
    pub fn describe(&self, object: ObjectReference) -> Result<&TypeDescriptor, GcError> {
        let tag = object_model::type_tag(object);
        self.class_table
            .describe(tag)
            .map_err(|_| GcError::UnknownTypeTag {
                tag,
                object,
                root_type: self.root_type.clone(),
            })
    }

    /// See [`crate::heap::Heap::check_reference`].
    pub fn check_reference(&self, object: ObjectReference) -> Result<(), GcError> {
        self.group.heap().check_reference(object, &self.root_type)
    }

    /// See [`crate::heap::Heap::check_object`].
    pub fn check_object(&self, object: ObjectReference) -> Result<(), GcError> {
        self.group.heap().check_object(object, &self.root_type)
    }

    pub fn slots_visited(&self) -> usize {
        self.slots_visited
    }

    pub fn null_slots(&self) -> usize {
        self.null_slots
    }

    pub fn slots_updated(&self) -> usize {
        self.slots_updated
    }

    pub fn bytes_copied(&self) -> usize {
        self.bytes_copied
    }

    pub(crate) fn count_copy(&mut self, bytes: usize) {
        self.bytes_copied += bytes;
    }
}

/// The interface the traversal driver and the root enumerator use to present slots.
pub trait ObjectPointerVisitor<'g> {
    /// Does this visitor write the result of [`ObjectPointerVisitor::trace_object`] back into
    /// the slot?
    const OVERWRITE_REFERENCE: bool;

    fn base(&self) -> &VisitorBase<'g>;

    fn base_mut(&mut self) -> &mut VisitorBase<'g>;

    /// Handle a non-null reference found in a slot.  Returns the reference the slot should hold
    /// from now on.
    fn trace_object(&mut self, object: ObjectReference) -> Result<ObjectReference, GcError>;

    /// Called once all slots of `object` were presented.
    fn post_scan_object(&mut self, object: ObjectReference) {
        object_model::set_gc_state(object, GcState::Processed);
    }

    /// Visit every slot in `range`, in address order.
    fn visit_pointers(&mut self, range: SlotRange) -> Result<(), GcError> {
        if !range.is_well_formed() {
            return Err(GcError::corrupt(
                self.gc_root_type(),
                range.start(),
                CorruptionKind::MisalignedSlotRange,
            ));
        }
        trace!(
            "[{}] visit {} slots at {}",
            self.gc_root_type(),
            range.len(),
            range.start()
        );
        for slot in range.iter_slots() {
            self.visit_slot(slot)?;
        }
        Ok(())
    }

    /// Visit one slot.  Null slots are skipped.
    fn visit_slot<S: Slot>(&mut self, slot: S) -> Result<(), GcError> {
        self.base_mut().slots_visited += 1;
        let Some(object) = slot.load() else {
            self.base_mut().null_slots += 1;
            return Ok(());
        };
        let new_object = self.trace_object(object)?;
        if Self::OVERWRITE_REFERENCE && new_object != object {
            trace!("Update slot {}: {} -> {}", slot.as_address(), object, new_object);
            slot.store(new_object);
            self.base_mut().slots_updated += 1;
        }
        Ok(())
    }

    fn isolate_group(&self) -> &'g IsolateGroup {
        self.base().isolate_group()
    }

    fn class_table<'a>(&'a self) -> &'a ClassTable
    where
        'g: 'a,
    {
        self.base().class_table()
    }

    fn gc_root_type<'a>(&'a self) -> &'a str
    where
        'g: 'a,
    {
        self.base().gc_root_type()
    }
}
