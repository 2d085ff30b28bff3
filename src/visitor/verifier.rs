use std::collections::HashSet;

use crate::error::{CorruptionKind, GcError, InvariantViolation, ViolationKind};
use crate::isolate::IsolateGroup;
use crate::util::{Address, ObjectReference};
use crate::vm::object_model::{self, GcState};
use crate::vm::slot::Slot;

use super::{ObjectPointerVisitor, VisitorBase};

/// The outcome of a verification pass.
#[derive(Clone, Debug, Default)]
pub struct VerifyReport {
    pub root_type: String,
    pub violations: Vec<InvariantViolation>,
    /// Distinct objects reached.
    pub objects_checked: usize,
    pub slots_checked: usize,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Turn the first violation, if any, into an error.
    pub fn into_result(self) -> Result<(), GcError> {
        match self.violations.into_iter().next() {
            None => Ok(()),
            Some(v) => Err(v.into()),
        }
    }
}

/// Checks, without writing to the heap, that the last pass left every reachable slot pointing to
/// a live, processed object.
///
/// Reachability is tracked in a side table, so the verifier can run any number of times after
/// a pass.
pub struct Verifier<'g> {
    base: VisitorBase<'g>,
    seen: HashSet<ObjectReference>,
    violations: Vec<InvariantViolation>,
    fail_fast: bool,
    current_slot: Option<Address>,
}

impl<'g> Verifier<'g> {
    pub fn new(group: &'g IsolateGroup) -> Self {
        Self::from_base(VisitorBase::new(group))
    }

    pub fn with_root_type(group: &'g IsolateGroup, root_type: &str) -> Self {
        Self::from_base(VisitorBase::with_root_type(group, root_type))
    }

    fn from_base(base: VisitorBase<'g>) -> Self {
        let fail_fast = base.isolate_group().options().verifier_fail_fast;
        Verifier {
            base,
            seen: HashSet::new(),
            violations: Vec::new(),
            fail_fast,
            current_slot: None,
        }
    }

    pub fn violations(&self) -> &[InvariantViolation] {
        &self.violations
    }

    pub fn into_report(self) -> VerifyReport {
        VerifyReport {
            root_type: self.base.gc_root_type().to_string(),
            objects_checked: self.seen.len(),
            slots_checked: self.base.slots_visited(),
            violations: self.violations,
        }
    }

    fn report(&mut self, object: ObjectReference, kind: ViolationKind) -> Result<(), GcError> {
        let violation = InvariantViolation {
            root_type: self.base.gc_root_type().to_string(),
            slot: self.current_slot,
            object,
            kind,
        };
        warn!("Verification failed: {}", violation);
        if self.fail_fast {
            return Err(violation.into());
        }
        self.violations.push(violation);
        Ok(())
    }
}

impl<'g> ObjectPointerVisitor<'g> for Verifier<'g> {
    const OVERWRITE_REFERENCE: bool = false;

    fn base(&self) -> &VisitorBase<'g> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut VisitorBase<'g> {
        &mut self.base
    }

    fn visit_slot<S: Slot>(&mut self, slot: S) -> Result<(), GcError> {
        self.current_slot = Some(slot.as_address());
        self.base.slots_visited += 1;
        let result = match slot.load() {
            Some(object) => self.trace_object(object).map(|_| ()),
            None => {
                self.base.null_slots += 1;
                Ok(())
            }
        };
        self.current_slot = None;
        result
    }

    fn trace_object(&mut self, object: ObjectReference) -> Result<ObjectReference, GcError> {
        if !object.is_aligned() {
            return Err(GcError::corrupt(
                self.base.gc_root_type(),
                self.current_slot.unwrap_or(object.to_raw_address()),
                CorruptionKind::MisalignedReference,
            ));
        }
        if !self.base.isolate_group().heap().contains_object(object) {
            self.report(object, ViolationKind::DanglingReference)?;
            return Ok(object);
        }
        if object_model::is_forwarded(object) {
            self.report(object, ViolationKind::StaleReference)?;
            return Ok(object);
        }
        match object_model::gc_state(object) {
            GcState::Unvisited => self.report(object, ViolationKind::UnvisitedTarget)?,
            GcState::Reachable => self.report(object, ViolationKind::NotProcessed)?,
            GcState::Processed => {}
        }
        if self.seen.insert(object) {
            self.base.enqueue(object);
        }
        Ok(object)
    }

    fn post_scan_object(&mut self, _object: ObjectReference) {}
}
