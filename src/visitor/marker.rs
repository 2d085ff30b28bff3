use crate::error::GcError;
use crate::isolate::IsolateGroup;
use crate::util::ObjectReference;
use crate::vm::object_model;

use super::{ObjectPointerVisitor, VisitorBase};

/// Marks every reachable object.  Never rewrites slots.
pub struct Marker<'g> {
    base: VisitorBase<'g>,
}

impl<'g> Marker<'g> {
    pub fn new(group: &'g IsolateGroup) -> Self {
        Marker {
            base: VisitorBase::new(group),
        }
    }

    pub fn with_root_type(group: &'g IsolateGroup, root_type: &str) -> Self {
        Marker {
            base: VisitorBase::with_root_type(group, root_type),
        }
    }
}

impl<'g> ObjectPointerVisitor<'g> for Marker<'g> {
    const OVERWRITE_REFERENCE: bool = false;

    fn base(&self) -> &VisitorBase<'g> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut VisitorBase<'g> {
        &mut self.base
    }

    fn trace_object(&mut self, object: ObjectReference) -> Result<ObjectReference, GcError> {
        self.base.check_object(object)?;
        if object_model::attempt_mark(object) {
            self.base.enqueue(object);
        }
        Ok(object)
    }
}
