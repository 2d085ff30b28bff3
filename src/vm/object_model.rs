//! The object header format.
//!
//! Every object starts with two words:
//!
//! ```text
//! word 0: | type tag (bits 8..) | unused | forwarded (bit 2) | GC state (bits 0..2) |
//! word 1: | length of the variable-length tail |
//! ```
//!
//! Forwarding an object rewrites both words of the old copy:
//!
//! ```text
//! word 0: | size of the old copy in bytes (bits 8..) | unused | 1 | GC state |
//! word 1: | forwarding address |
//! ```
//!
//! so a linear scan can step over an old copy without looking at the new one.
//!
//! Reference fields follow the header.  An `ObjectReference` is the address of word 0.  Tag 0 is
//! reserved, so a header word is never zero for a real object.

use std::sync::atomic::{AtomicUsize, Ordering};

use static_assertions::const_assert;

use crate::util::constants::BYTES_IN_WORD;
use crate::util::{Address, ObjectReference};
use crate::vm::class_table::TypeTag;
use crate::vm::slot::{SimpleSlot, Slot};

/// Size of the header in bytes.  Fields start at this offset.
pub const HEADER_BYTES: usize = 2 * BYTES_IN_WORD;
const LENGTH_OFFSET: usize = BYTES_IN_WORD;

const GC_STATE_MASK: usize = 0b11;
const FORWARDED_BIT: usize = 0b100;
const TAG_SHIFT: usize = 8;

/// The largest tag a header can hold on every supported word size.
pub const MAX_TYPE_TAG: TypeTag = (1 << 20) - 1;

const_assert!((MAX_TYPE_TAG as usize) <= (usize::MAX >> TAG_SHIFT));
const_assert!(GC_STATE_MASK & FORWARDED_BIT == 0);
const_assert!((GC_STATE_MASK | FORWARDED_BIT) < (1 << TAG_SHIFT));

/// Where an object is in the current pass.  States only move forward within a pass.
#[repr(usize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GcState {
    /// Not reached yet.
    Unvisited = 0,
    /// Reached (marked, or copied) and waiting in the work list.
    Reachable = 1,
    /// All outgoing slots have been presented to the visitor.
    Processed = 2,
}

impl GcState {
    fn from_bits(bits: usize) -> GcState {
        match bits & GC_STATE_MASK {
            0 => GcState::Unvisited,
            1 => GcState::Reachable,
            _ => GcState::Processed,
        }
    }
}

fn header_address(object: ObjectReference) -> Address {
    object.to_raw_address()
}

/// Load the raw header word.
pub fn load_header(object: ObjectReference) -> usize {
    unsafe { header_address(object).atomic_load::<AtomicUsize>(Ordering::SeqCst) }
}

fn store_header(object: ObjectReference, header: usize) {
    unsafe { header_address(object).atomic_store::<AtomicUsize>(header, Ordering::SeqCst) }
}

/// Write a fresh header for an object of type `tag` with `length` tail elements at `start`.
/// The object starts `Unvisited`.
pub fn initialize_header(start: Address, tag: TypeTag, length: usize) {
    debug_assert!(tag <= MAX_TYPE_TAG);
    unsafe {
        start.atomic_store::<AtomicUsize>((tag as usize) << TAG_SHIFT, Ordering::SeqCst);
        (start + LENGTH_OFFSET).atomic_store::<AtomicUsize>(length, Ordering::SeqCst);
    }
}

/// Read the word at the start of a possible object without treating it as a reference.
pub fn load_header_at(start: Address) -> usize {
    unsafe { start.atomic_load::<AtomicUsize>(Ordering::SeqCst) }
}

pub fn tag_of_header(header: usize) -> TypeTag {
    (header >> TAG_SHIFT) as TypeTag
}

/// The type tag of `object`.  Meaningless once the object is forwarded.
pub fn type_tag(object: ObjectReference) -> TypeTag {
    tag_of_header(load_header(object))
}

/// The tail length currently stored in the object.  Only meaningful if not forwarded.
pub fn length(object: ObjectReference) -> usize {
    debug_assert!(!is_forwarded(object), "{} is forwarded", object);
    unsafe { (object.to_raw_address() + LENGTH_OFFSET).atomic_load::<AtomicUsize>(Ordering::SeqCst) }
}

pub(crate) fn set_length(object: ObjectReference, length: usize) {
    unsafe {
        (object.to_raw_address() + LENGTH_OFFSET)
            .atomic_store::<AtomicUsize>(length, Ordering::SeqCst)
    }
}

pub fn gc_state(object: ObjectReference) -> GcState {
    GcState::from_bits(load_header(object))
}

/// Move `object` from `Unvisited` to `Reachable` in one atomic step.  Returns `true` if this call
/// made the transition, `false` if the object had already been reached in this pass.
pub fn attempt_mark(object: ObjectReference) -> bool {
    let header = header_address(object);
    let mut old = load_header(object);
    loop {
        if GcState::from_bits(old) != GcState::Unvisited {
            return false;
        }
        let new = (old & !GC_STATE_MASK) | GcState::Reachable as usize;
        match unsafe {
            header.compare_exchange::<AtomicUsize>(old, new, Ordering::SeqCst, Ordering::SeqCst)
        } {
            Ok(_) => return true,
            Err(current) => old = current,
        }
    }
}

/// Set the GC state, keeping the tag and the forwarded bit.
pub fn set_gc_state(object: ObjectReference, state: GcState) {
    let old = load_header(object);
    store_header(object, (old & !GC_STATE_MASK) | state as usize);
}

pub fn is_forwarded(object: ObjectReference) -> bool {
    load_header(object) & FORWARDED_BIT != 0
}

/// The new address of a forwarded object.
pub fn forwarding_pointer(object: ObjectReference) -> Option<ObjectReference> {
    if !is_forwarded(object) {
        return None;
    }
    let raw = unsafe {
        (object.to_raw_address() + LENGTH_OFFSET).atomic_load::<AtomicUsize>(Ordering::SeqCst)
    };
    ObjectReference::from_raw_address(unsafe { Address::from_usize(raw) })
}

/// Follow forwarding pointers until reaching a copy that has not moved.
pub fn resolve_forwarding(object: ObjectReference) -> ObjectReference {
    let mut current = object;
    while let Some(next) = forwarding_pointer(current) {
        current = next;
    }
    current
}

/// The size in bytes recorded in a forwarded object when it moved.
pub fn forwarded_size(object: ObjectReference) -> Option<usize> {
    let header = load_header(object);
    (header & FORWARDED_BIT != 0).then_some(header >> TAG_SHIFT)
}

/// Mark `object`, which is `size` bytes long, as moved to `new_object`.  The tag and length of
/// the old copy are replaced by its size and the forwarding address; the new copy carries both.
/// The GC state is kept.
pub fn forward_to(object: ObjectReference, new_object: ObjectReference, size: usize) {
    debug_assert!(size <= usize::MAX >> TAG_SHIFT);
    unsafe {
        (object.to_raw_address() + LENGTH_OFFSET)
            .atomic_store::<AtomicUsize>(new_object.value(), Ordering::SeqCst)
    };
    let old = load_header(object);
    store_header(
        object,
        (size << TAG_SHIFT) | FORWARDED_BIT | (old & GC_STATE_MASK),
    );
}

/// The slot at byte `offset` of `object`.
pub fn field_slot(object: ObjectReference, offset: usize) -> SimpleSlot {
    debug_assert!(offset >= HEADER_BYTES, "offset {} is in the header", offset);
    SimpleSlot::from_address(object.to_raw_address() + offset)
}

pub fn load_field(object: ObjectReference, offset: usize) -> Option<ObjectReference> {
    field_slot(object, offset).load()
}

pub fn store_field(object: ObjectReference, offset: usize, value: Option<ObjectReference>) {
    let slot = field_slot(object, offset);
    match value {
        Some(target) => slot.store(target),
        None => slot.clear(),
    }
}

/// Copy `bytes` bytes of an object from `from` to `to`, word by word.
pub(crate) fn copy_words(from: Address, to: Address, bytes: usize) {
    debug_assert!(bytes % BYTES_IN_WORD == 0);
    let mut offset = 0;
    while offset < bytes {
        unsafe {
            let word = (from + offset).atomic_load::<AtomicUsize>(Ordering::Relaxed);
            (to + offset).atomic_store::<AtomicUsize>(word, Ordering::Relaxed);
        }
        offset += BYTES_IN_WORD;
    }
}

/// Zero `bytes` bytes starting at `start`.
pub(crate) fn zero_words(start: Address, bytes: usize) {
    debug_assert!(bytes % BYTES_IN_WORD == 0);
    let mut offset = 0;
    while offset < bytes {
        unsafe { (start + offset).atomic_store::<AtomicUsize>(0, Ordering::Relaxed) };
        offset += BYTES_IN_WORD;
    }
}
