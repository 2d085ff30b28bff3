//! A minimal two-space heap: a nursery and a mature space, both bump allocated.

mod space;

pub use self::space::{object_size, ObjectIterator, Space, UnknownObject};

use enum_map::{Enum, EnumMap};
use strum_macros::Display;

use crate::error::{CorruptionKind, GcError};
use crate::util::options::Options;
use crate::util::ObjectReference;
use crate::vm::class_table::{ClassTable, TypeTag};
use crate::vm::object_model::{self, GcState};

/// The spaces of a heap.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Enum, Display)]
pub enum SpaceKind {
    /// Young objects.  Evacuated by a scavenge.
    Nursery,
    /// Old objects, and survivors of a scavenge.
    Mature,
}

pub struct Heap {
    spaces: EnumMap<SpaceKind, Space>,
}

impl Heap {
    pub fn new(options: &Options) -> Self {
        Heap {
            spaces: EnumMap::from_fn(|kind| match kind {
                SpaceKind::Nursery => Space::new("nursery", options.nursery_size),
                SpaceKind::Mature => Space::new("mature", options.mature_size),
            }),
        }
    }

    pub fn space(&self, kind: SpaceKind) -> &Space {
        &self.spaces[kind]
    }

    pub fn nursery(&self) -> &Space {
        self.space(SpaceKind::Nursery)
    }

    pub fn mature(&self) -> &Space {
        self.space(SpaceKind::Mature)
    }

    /// The space whose allocated part holds `object`.
    pub fn space_of(&self, object: ObjectReference) -> Option<SpaceKind> {
        self.spaces
            .iter()
            .find(|(_, space)| space.contains_object(object))
            .map(|(kind, _)| kind)
    }

    pub fn contains_object(&self, object: ObjectReference) -> bool {
        self.space_of(object).is_some()
    }

    /// Is `object` an aligned reference into an allocated region, with a non-zero header?
    pub fn is_valid_object(&self, object: ObjectReference) -> bool {
        object.is_aligned()
            && self.contains_object(object)
            && object_model::load_header(object) != 0
    }

    /// Allocate `size` bytes in `kind` and write a fresh header.  Returns `None` if the space is
    /// full.
    pub fn alloc_object(
        &self,
        kind: SpaceKind,
        tag: TypeTag,
        size: usize,
        length: usize,
    ) -> Option<ObjectReference> {
        let start = self.space(kind).alloc(size)?;
        object_model::initialize_header(start, tag, length);
        trace!("Allocated {} bytes for tag {} at {} in {}", size, tag, start, kind);
        // A bump allocator never hands out address 0.
        Some(unsafe { ObjectReference::from_raw_address_unchecked(start) })
    }

    /// Reset every object to `Unvisited` so the next pass starts from a clean slate.  Old copies
    /// of moved objects are reset too, so a pass can tell them from copies it forwarded itself.
    /// Returns the number of live (not forwarded) objects.
    pub fn prepare_pass(&self, class_table: &ClassTable, root_type: &str) -> Result<usize, GcError> {
        let mut count = 0;
        for (kind, space) in self.spaces.iter() {
            for object in space.objects(class_table) {
                let object = object.map_err(|e| GcError::UnknownTypeTag {
                    tag: e.tag.0,
                    object: e.object,
                    root_type: root_type.to_string(),
                })?;
                object_model::set_gc_state(object, GcState::Unvisited);
                if !object_model::is_forwarded(object) {
                    count += 1;
                }
            }
            debug!("Prepared {} space", kind);
        }
        Ok(count)
    }

    /// Check that `object` is aligned and inside the heap.  It may have moved.
    pub fn check_reference(&self, object: ObjectReference, root_type: &str) -> Result<(), GcError> {
        if !object.is_aligned() {
            return Err(GcError::corrupt(
                root_type,
                object.to_raw_address(),
                CorruptionKind::MisalignedReference,
            ));
        }
        if !self.contains_object(object) {
            return Err(GcError::corrupt(
                root_type,
                object.to_raw_address(),
                CorruptionKind::DanglingReference,
            ));
        }
        Ok(())
    }

    /// Check that `object` may be traced: aligned, inside the heap, not moved and with a
    /// non-zero header.
    pub fn check_object(&self, object: ObjectReference, root_type: &str) -> Result<(), GcError> {
        self.check_reference(object, root_type)?;
        if object_model::is_forwarded(object) {
            return Err(GcError::corrupt(
                root_type,
                object.to_raw_address(),
                CorruptionKind::StaleReference,
            ));
        }
        if object_model::load_header(object) == 0 {
            return Err(GcError::corrupt(
                root_type,
                object.to_raw_address(),
                CorruptionKind::ZeroHeader,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::class_table::TypeDescriptor;

    fn small_heap() -> Heap {
        let mut options = Options::default();
        options.nursery_size = 4096;
        options.mature_size = 8192;
        Heap::new(&options)
    }

    #[test]
    fn objects_are_found_in_their_space() {
        let heap = small_heap();
        let size = TypeDescriptor::with_fields("Pair", 2, 0).instance_size();
        let young = heap.alloc_object(SpaceKind::Nursery, 1, size, 0).unwrap();
        let old = heap.alloc_object(SpaceKind::Mature, 1, size, 0).unwrap();
        assert_eq!(heap.space_of(young), Some(SpaceKind::Nursery));
        assert_eq!(heap.space_of(old), Some(SpaceKind::Mature));
        assert!(heap.is_valid_object(young));
        assert!(heap.check_object(old, "test").is_ok());
    }

    #[test]
    fn exhausted_space_is_out_of_memory() {
        let heap = small_heap();
        assert_eq!(heap.alloc_object(SpaceKind::Nursery, 1, 8192, 0), None);
        assert!(heap.alloc_object(SpaceKind::Mature, 1, 8192, 0).is_some());
        assert_eq!(heap.alloc_object(SpaceKind::Mature, 1, 16, 0), None);
    }

    #[test]
    fn prepare_resets_states() {
        let heap = small_heap();
        let mut table = ClassTable::new();
        table
            .register(1, TypeDescriptor::with_fields("Pair", 2, 0))
            .unwrap();
        let size = table.describe(1).unwrap().instance_size();
        let a = heap.alloc_object(SpaceKind::Nursery, 1, size, 0).unwrap();
        let b = heap.alloc_object(SpaceKind::Mature, 1, size, 0).unwrap();
        object_model::set_gc_state(a, GcState::Processed);
        object_model::set_gc_state(b, GcState::Reachable);
        assert_eq!(heap.prepare_pass(&table, "test"), Ok(2));
        assert_eq!(object_model::gc_state(a), GcState::Unvisited);
        assert_eq!(object_model::gc_state(b), GcState::Unvisited);
    }

    #[test]
    fn prepare_steps_over_moved_objects() {
        let heap = small_heap();
        let mut table = ClassTable::new();
        table
            .register(1, TypeDescriptor::with_fields("Pair", 2, 0))
            .unwrap();
        let size = table.describe(1).unwrap().instance_size();
        let a = heap.alloc_object(SpaceKind::Mature, 1, size, 0).unwrap();
        let b = heap.alloc_object(SpaceKind::Mature, 1, size, 0).unwrap();
        let copy = heap.alloc_object(SpaceKind::Nursery, 1, size, 0).unwrap();
        object_model::set_gc_state(a, GcState::Processed);
        object_model::forward_to(a, copy, size);
        // The copy is gone, the old copy still knows its size.
        heap.nursery().release();
        assert_eq!(heap.prepare_pass(&table, "test"), Ok(1));
        assert_eq!(object_model::gc_state(a), GcState::Unvisited);
        assert!(object_model::is_forwarded(a));
        assert_eq!(object_model::gc_state(b), GcState::Unvisited);
    }

    #[test]
    fn prepare_reports_unknown_tags() {
        let heap = small_heap();
        let table = ClassTable::new();
        let a = heap.alloc_object(SpaceKind::Mature, 5, 32, 0).unwrap();
        assert_eq!(
            heap.prepare_pass(&table, "test"),
            Err(GcError::UnknownTypeTag {
                tag: 5,
                object: a,
                root_type: "test".to_string()
            })
        );
    }
}
