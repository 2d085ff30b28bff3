//! This module provides the trait [`Slot`], the default word-sized slot [`SimpleSlot`], and
//! [`SlotRange`], the contiguous run of slots that visitors operate on.

use std::fmt::Debug;
use std::hash::Hash;

use atomic::Atomic;

use crate::util::constants::BYTES_IN_ADDRESS;
use crate::util::{Address, ObjectReference};

/// `Slot` is an abstraction for loading and updating object references in memory.
///
/// A slot can be in an object (a.k.a. a field), on the stack (i.e. a local variable), in a
/// handle block or in any other place.  A `Slot` value *points to* a slot, and is not the slot
/// itself.  A `Slot` can be [copied](std::marker::Copy), and the copied `Slot` instance points
/// to the same slot.
///
/// Visitors only care about the object reference held inside the slot.  A slot holding null
/// loads as `None`.
///
/// # Performance notes
///
/// The methods of this trait are called on hot paths.  Please ensure they have high performance.
pub trait Slot: Copy + Send + Debug + PartialEq + Eq + Hash {
    /// Load object reference from the slot.
    ///
    /// If the slot is not holding an object reference, this method should return `None`.
    fn load(&self) -> Option<ObjectReference>;

    /// Store the object reference `object` into the slot.
    fn store(&self, object: ObjectReference);

    /// The address of the slot, used in diagnostics.
    fn as_address(&self) -> Address;
}

/// A simple slot implementation that represents a word-sized slot which holds the raw address of
/// an `ObjectReference`, or 0 if it is holding a null reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SimpleSlot {
    slot_addr: *mut Atomic<Address>,
}

impl SimpleSlot {
    /// Create a simple slot from an address.
    ///
    /// Arguments:
    /// *   `address`: The address in memory where an `ObjectReference` is stored.
    pub fn from_address(address: Address) -> Self {
        Self {
            slot_addr: address.to_mut_ptr(),
        }
    }

    /// Clear the slot, making it hold null.
    pub fn clear(&self) {
        unsafe { (*self.slot_addr).store(Address::ZERO, atomic::Ordering::Relaxed) }
    }
}

unsafe impl Send for SimpleSlot {}

impl Slot for SimpleSlot {
    fn load(&self) -> Option<ObjectReference> {
        let addr = unsafe { (*self.slot_addr).load(atomic::Ordering::Relaxed) };
        ObjectReference::from_raw_address(addr)
    }

    fn store(&self, object: ObjectReference) {
        unsafe { (*self.slot_addr).store(object.to_raw_address(), atomic::Ordering::Relaxed) }
    }

    fn as_address(&self) -> Address {
        Address::from_mut_ptr(self.slot_addr)
    }
}

/// A contiguous range `[start, end)` of word-sized slots belonging to one object or one root
/// segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotRange {
    start: Address,
    end: Address,
}

impl SlotRange {
    /// An empty range.
    pub const EMPTY: SlotRange = SlotRange {
        start: Address::ZERO,
        end: Address::ZERO,
    };

    /// Create a range.  No checks are done here.  Visitors check alignment before walking it.
    pub fn new(start: Address, end: Address) -> Self {
        Self { start, end }
    }

    /// A range of `count` slots starting at `start`.
    pub fn from_start_and_count(start: Address, count: usize) -> Self {
        Self {
            start,
            end: start + count * BYTES_IN_ADDRESS,
        }
    }

    /// A range with exactly one slot.
    pub fn single(slot: Address) -> Self {
        Self::from_start_and_count(slot, 1)
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.end
    }

    /// Is this range well formed: both ends word aligned and `start <= end`?
    pub fn is_well_formed(&self) -> bool {
        self.start.is_aligned_to(BYTES_IN_ADDRESS)
            && self.end.is_aligned_to(BYTES_IN_ADDRESS)
            && self.start <= self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Number of slots in the range.  Only meaningful for well-formed ranges.
    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.end - self.start) / BYTES_IN_ADDRESS
        }
    }

    /// Iterate slots within the range.
    pub fn iter_slots(&self) -> SlotRangeIterator {
        SlotRangeIterator {
            cursor: self.start,
            limit: self.end,
        }
    }
}

/// Iterate slots within a [`SlotRange`].
pub struct SlotRangeIterator {
    cursor: Address,
    limit: Address,
}

impl Iterator for SlotRangeIterator {
    type Item = SimpleSlot;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.limit {
            None
        } else {
            let slot = self.cursor;
            self.cursor += BYTES_IN_ADDRESS;
            Some(SimpleSlot::from_address(slot))
        }
    }
}

#[test]
fn a_simple_slot_should_have_the_same_size_as_a_pointer() {
    assert_eq!(
        std::mem::size_of::<SimpleSlot>(),
        std::mem::size_of::<*mut u8>()
    );
}
