use crate::error::GcError;
use crate::isolate::IsolateGroup;
use crate::util::ObjectReference;
use crate::vm::object_model;

use super::{ObjectPointerVisitor, VisitorBase};

/// Redirects every slot that refers to a moved object to its final copy.
///
/// Objects are moved beforehand, e.g. by [`crate::memory_manager::relocate`].  The updater marks
/// and scans the final copies so that every reachable slot is updated exactly once.
pub struct Updater<'g> {
    base: VisitorBase<'g>,
}

impl<'g> Updater<'g> {
    pub fn new(group: &'g IsolateGroup) -> Self {
        Updater {
            base: VisitorBase::new(group),
        }
    }

    pub fn with_root_type(group: &'g IsolateGroup, root_type: &str) -> Self {
        Updater {
            base: VisitorBase::with_root_type(group, root_type),
        }
    }
}

impl<'g> ObjectPointerVisitor<'g> for Updater<'g> {
    const OVERWRITE_REFERENCE: bool = true;

    fn base(&self) -> &VisitorBase<'g> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut VisitorBase<'g> {
        &mut self.base
    }

    fn trace_object(&mut self, object: ObjectReference) -> Result<ObjectReference, GcError> {
        self.base.check_reference(object)?;
        let target = object_model::resolve_forwarding(object);
        self.base.check_object(target)?;
        if object_model::attempt_mark(target) {
            self.base.enqueue(target);
        }
        Ok(target)
    }
}
