use crate::error::GcError;
use crate::heap::SpaceKind;
use crate::isolate::IsolateGroup;
use crate::util::ObjectReference;
use crate::vm::object_model::{self, GcState};

use super::{ObjectPointerVisitor, VisitorBase};

/// Evacuates reachable nursery objects into the mature space and redirects slots to the copies.
///
/// Mature objects are marked and scanned like the [`super::Marker`] does, so that nursery
/// references inside them are found.  A slot that still refers to the old copy of an object
/// moved before the pass is a corrupt heap, as it is for the Marker.  The nursery holds nothing live once the pass is over and
/// can be released.
pub struct Scavenger<'g> {
    base: VisitorBase<'g>,
    objects_copied: usize,
}

impl<'g> Scavenger<'g> {
    pub fn new(group: &'g IsolateGroup) -> Self {
        Scavenger {
            base: VisitorBase::new(group),
            objects_copied: 0,
        }
    }

    pub fn with_root_type(group: &'g IsolateGroup, root_type: &str) -> Self {
        Scavenger {
            base: VisitorBase::with_root_type(group, root_type),
            objects_copied: 0,
        }
    }

    pub fn objects_copied(&self) -> usize {
        self.objects_copied
    }

    fn evacuate(&mut self, object: ObjectReference) -> Result<ObjectReference, GcError> {
        let descriptor = self.base.describe(object)?;
        let length = if descriptor.is_variable_length() {
            object_model::length(object)
        } else {
            0
        };
        let size = descriptor.size_for_length(length);
        let tag = object_model::type_tag(object);
        let heap = self.base.isolate_group().heap();
        let new_object = heap
            .alloc_object(SpaceKind::Mature, tag, size, length)
            .ok_or(GcError::OutOfMemory {
                space: heap.mature().name(),
                requested: size,
            })?;
        object_model::copy_words(object.to_raw_address(), new_object.to_raw_address(), size);
        object_model::set_gc_state(new_object, GcState::Reachable);
        object_model::forward_to(object, new_object, size);
        trace!("Evacuated {} -> {} ({} bytes)", object, new_object, size);
        self.base.count_copy(size);
        self.objects_copied += 1;
        self.base.enqueue(new_object);
        Ok(new_object)
    }
}

impl<'g> ObjectPointerVisitor<'g> for Scavenger<'g> {
    const OVERWRITE_REFERENCE: bool = true;

    fn base(&self) -> &VisitorBase<'g> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut VisitorBase<'g> {
        &mut self.base
    }

    fn trace_object(&mut self, object: ObjectReference) -> Result<ObjectReference, GcError> {
        self.base.check_reference(object)?;
        let heap = self.base.isolate_group().heap();
        if heap.nursery().contains_object(object) {
            // The mark claims the object.  Whoever claimed it has already left a forwarding
            // pointer behind.  If this call claims an object that is already forwarded, the
            // object moved before the pass and the slot is stale.
            if object_model::attempt_mark(object) {
                self.base.check_object(object)?;
                self.evacuate(object)
            } else {
                Ok(object_model::forwarding_pointer(object).unwrap_or(object))
            }
        } else {
            self.base.check_object(object)?;
            if object_model::attempt_mark(object) {
                self.base.enqueue(object);
            }
            Ok(object)
        }
    }
}
