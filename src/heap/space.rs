use std::sync::atomic::{AtomicUsize, Ordering};

use crate::util::constants::BYTES_IN_WORD;
use crate::util::{Address, ObjectReference};
use crate::vm::class_table::{ClassTable, UnknownTypeTag};
use crate::vm::object_model;

/// A contiguous, bump-allocated region of memory.
///
/// Memory is owned by the space and zeroed on creation and on release, so every word between
/// objects is zero and a linear scan can skip it.
pub struct Space {
    name: &'static str,
    // Never read directly. All accesses go through addresses into this block.
    #[allow(dead_code)]
    memory: Box<[AtomicUsize]>,
    start: Address,
    limit: Address,
    cursor: AtomicUsize,
}

impl Space {
    pub fn new(name: &'static str, bytes: usize) -> Self {
        let words = bytes / BYTES_IN_WORD;
        let memory: Box<[AtomicUsize]> = (0..words).map(|_| AtomicUsize::new(0)).collect();
        let start = Address::from_ptr(memory.as_ptr());
        let limit = start + words * BYTES_IN_WORD;
        debug!("Created space {} [{}, {})", name, start, limit);
        Space {
            name,
            memory,
            start,
            limit,
            cursor: AtomicUsize::new(start.as_usize()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn start(&self) -> Address {
        self.start
    }

    /// End of the allocated part.
    pub fn cursor(&self) -> Address {
        unsafe { Address::from_usize(self.cursor.load(Ordering::SeqCst)) }
    }

    pub fn limit(&self) -> Address {
        self.limit
    }

    pub fn used_bytes(&self) -> usize {
        self.cursor() - self.start
    }

    pub fn capacity(&self) -> usize {
        self.limit - self.start
    }

    /// Bump-allocate `bytes` bytes.  `bytes` must be word aligned.  Returns `None` if the space
    /// is full.
    pub fn alloc(&self, bytes: usize) -> Option<Address> {
        debug_assert!(bytes % BYTES_IN_WORD == 0);
        let limit = self.limit.as_usize();
        self.cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cursor| {
                cursor.checked_add(bytes).filter(|end| *end <= limit)
            })
            .ok()
            .map(|old| unsafe { Address::from_usize(old) })
    }

    /// Is `addr` inside the allocated part of this space?
    pub fn contains(&self, addr: Address) -> bool {
        self.start <= addr && addr < self.cursor()
    }

    pub fn contains_object(&self, object: ObjectReference) -> bool {
        self.contains(object.to_raw_address())
    }

    /// Zero the allocated part and start allocating from the beginning again.  Every object in
    /// the space is gone after this.
    pub fn release(&self) {
        let end = self.cursor();
        object_model::zero_words(self.start, end - self.start);
        self.cursor.store(self.start.as_usize(), Ordering::SeqCst);
        debug!("Released space {} ({} bytes)", self.name, end - self.start);
    }

    /// Enumerate the objects in this space by linear scan, using the class table for sizes.
    pub fn objects<'a>(&'a self, class_table: &'a ClassTable) -> ObjectIterator<'a> {
        ObjectIterator {
            class_table,
            cursor: self.start,
            end: self.cursor(),
        }
    }
}

/// The size of the object at `object`, from its type and current length.  A forwarded object
/// reports the size it had when it moved.
pub fn object_size(
    object: ObjectReference,
    class_table: &ClassTable,
) -> Result<usize, UnknownTypeTag> {
    if let Some(size) = object_model::forwarded_size(object) {
        return Ok(size);
    }
    let descriptor = class_table.describe(object_model::type_tag(object))?;
    Ok(descriptor.size_for_length(if descriptor.is_variable_length() {
        object_model::length(object)
    } else {
        0
    }))
}

/// An object found by a linear scan whose tag is not in the class table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UnknownObject {
    pub object: ObjectReference,
    pub tag: UnknownTypeTag,
}

/// Iterate over the objects in a space, in address order.  Zero words between objects are
/// skipped.  An object with an unregistered tag ends the iteration with an error.
pub struct ObjectIterator<'a> {
    class_table: &'a ClassTable,
    cursor: Address,
    end: Address,
}

impl Iterator for ObjectIterator<'_> {
    type Item = Result<ObjectReference, UnknownObject>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor < self.end {
            if object_model::load_header_at(self.cursor) == 0 {
                self.cursor += BYTES_IN_WORD;
                continue;
            }
            let object = unsafe { ObjectReference::from_raw_address_unchecked(self.cursor) };
            return match object_size(object, self.class_table) {
                Ok(size) => {
                    self.cursor += size;
                    Some(Ok(object))
                }
                Err(tag) => {
                    self.cursor = self.end;
                    Some(Err(UnknownObject { object, tag }))
                }
            };
        }
        None
    }
}
