//! Root enumeration for an isolate group.
//!
//! Roots are reported in a fixed order: the stacks of every isolate (isolates in id order, frames
//! bottom to top), then global handles, then persistent handles, then the remembered set of the
//! group.  The order only depends on the state of the group, so two passes over an unchanged
//! group see the same sequence of ranges.

use std::collections::BTreeMap;

use enum_map::{Enum, EnumMap};
use strum_macros::Display;

use crate::error::GcError;
use crate::isolate::{Isolate, IsolateGroup, IsolateId};
use crate::vm::slot::SlotRange;
use crate::visitor::ObjectPointerVisitor;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Enum, Display)]
pub enum RootKind {
    Stack,
    GlobalHandle,
    PersistentHandle,
    RememberedSet,
}

/// One contiguous range of root slots.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RootRange {
    pub kind: RootKind,
    /// The isolate owning the slots.  `None` for group-level roots.
    pub isolate: Option<IsolateId>,
    pub range: SlotRange,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IsolateRootStats {
    pub ranges: usize,
    pub slots: usize,
}

/// What a root scan presented to a visitor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RootScanStats {
    pub ranges: usize,
    pub slots: EnumMap<RootKind, usize>,
    pub per_isolate: BTreeMap<IsolateId, IsolateRootStats>,
}

impl RootScanStats {
    pub fn total_slots(&self) -> usize {
        self.slots.values().sum()
    }

    fn record(&mut self, root: &RootRange) {
        let len = root.range.len();
        self.ranges += 1;
        self.slots[root.kind] += len;
        if let Some(id) = root.isolate {
            let entry = self.per_isolate.entry(id).or_default();
            entry.ranges += 1;
            entry.slots += len;
        }
    }
}

pub struct RootEnumerator<'g> {
    group: &'g IsolateGroup,
}

impl<'g> RootEnumerator<'g> {
    pub fn new(group: &'g IsolateGroup) -> Self {
        RootEnumerator { group }
    }

    fn isolate_ranges(
        isolate: &Isolate,
        kind: RootKind,
        ranges: impl FnOnce(&Isolate) -> Vec<SlotRange>,
        out: &mut Vec<RootRange>,
    ) {
        let isolate_id = Some(isolate.id());
        if isolate.is_terminating() {
            // A terminating isolate still reports, but with nothing in it.
            out.push(RootRange {
                kind,
                isolate: isolate_id,
                range: SlotRange::EMPTY,
            });
            return;
        }
        out.extend(ranges(isolate).into_iter().map(|range| RootRange {
            kind,
            isolate: isolate_id,
            range,
        }));
    }

    /// All root ranges of the group, in reporting order.
    pub fn root_ranges(&self) -> Vec<RootRange> {
        let isolates = self.group.isolates();
        let mut out = Vec::new();
        for isolate in isolates.iter() {
            Self::isolate_ranges(isolate, RootKind::Stack, Isolate::stack_ranges, &mut out);
        }
        for isolate in isolates.iter() {
            Self::isolate_ranges(
                isolate,
                RootKind::GlobalHandle,
                Isolate::global_handle_ranges,
                &mut out,
            );
        }
        for isolate in isolates.iter() {
            Self::isolate_ranges(
                isolate,
                RootKind::PersistentHandle,
                Isolate::persistent_handle_ranges,
                &mut out,
            );
        }
        out.extend(
            self.group
                .remembered_set()
                .into_iter()
                .map(|slot| RootRange {
                    kind: RootKind::RememberedSet,
                    isolate: None,
                    range: SlotRange::single(slot),
                }),
        );
        out
    }

    /// Present every root range to `visitor`, in reporting order.
    pub fn visit_roots<V: ObjectPointerVisitor<'g>>(
        &self,
        visitor: &mut V,
    ) -> Result<RootScanStats, GcError> {
        let mut stats = RootScanStats::default();
        for root in self.root_ranges() {
            debug!(
                "[{}] {} roots of isolate {:?}: {} slots at {}",
                visitor.gc_root_type(),
                root.kind,
                root.isolate,
                root.range.len(),
                root.range.start()
            );
            visitor.visit_pointers(root.range)?;
            stats.record(&root);
        }
        Ok(stats)
    }
}
