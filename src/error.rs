//! Errors raised while visiting pointers.
//!
//! Every error raised during a pass is fatal: the heap can no longer be trusted, and there is
//! no meaningful undo for a half-finished traversal.  Passes return these errors so that the
//! caller decides how to die; [`fatal`] is the production way of doing so.

use std::fmt;

use crate::util::{Address, ObjectReference};
use crate::vm::class_table::TypeTag;

/// How a heap was found to be corrupt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CorruptionKind {
    /// A slot range whose ends are not word aligned, or whose end precedes its start.
    MisalignedSlotRange,
    /// A slot holding a reference that is not word aligned.
    MisalignedReference,
    /// A slot holding a reference outside every allocated region.
    DanglingReference,
    /// A slot holding the old address of an object that has moved.
    StaleReference,
    /// An object whose header word is zero.
    ZeroHeader,
}

impl fmt::Display for CorruptionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            CorruptionKind::MisalignedSlotRange => "misaligned slot range",
            CorruptionKind::MisalignedReference => "misaligned reference",
            CorruptionKind::DanglingReference => "reference outside the heap",
            CorruptionKind::StaleReference => "reference to a moved object",
            CorruptionKind::ZeroHeader => "object with an empty header",
        };
        f.write_str(s)
    }
}

/// Details of a corrupt heap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorruptHeap {
    /// Diagnostic label of the visitor that found the corruption.
    pub root_type: String,
    /// The offending address: a slot, a range start or an object.
    pub address: Address,
    pub kind: CorruptionKind,
}

/// Which invariant a verifier found broken.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    /// A slot points outside every allocated region.
    DanglingReference,
    /// A slot still points to the old copy of a moved object.
    StaleReference,
    /// A slot points to an object the last pass never reached.
    UnvisitedTarget,
    /// A reachable object was reached but its slots were never scanned.
    NotProcessed,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ViolationKind::DanglingReference => "dangling reference",
            ViolationKind::StaleReference => "stale reference to a forwarded object",
            ViolationKind::UnvisitedTarget => "reference to an unvisited object",
            ViolationKind::NotProcessed => "reachable object was not processed",
        };
        f.write_str(s)
    }
}

/// One broken invariant found by the verifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvariantViolation {
    pub root_type: String,
    /// The slot holding the reference, if the reference came from a slot.
    pub slot: Option<Address>,
    pub object: ObjectReference,
    pub kind: ViolationKind,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({}): object {}", self.kind, self.root_type, self.object)?;
        if let Some(slot) = self.slot {
            write!(f, " in slot {}", slot)?;
        }
        Ok(())
    }
}

/// A fatal error raised by a traversal pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GcError {
    CorruptHeap(CorruptHeap),
    /// The header of `object` carries a tag absent from the class table.
    UnknownTypeTag {
        tag: TypeTag,
        object: ObjectReference,
        root_type: String,
    },
    InvariantViolation(InvariantViolation),
    /// A space could not provide storage for a relocated object.
    OutOfMemory {
        space: &'static str,
        requested: usize,
    },
}

impl GcError {
    pub fn corrupt(root_type: &str, address: Address, kind: CorruptionKind) -> Self {
        GcError::CorruptHeap(CorruptHeap {
            root_type: root_type.to_string(),
            address,
            kind,
        })
    }

    /// The diagnostic label of the visitor that raised this error, if any.
    pub fn root_type(&self) -> Option<&str> {
        match self {
            GcError::CorruptHeap(c) => Some(&c.root_type),
            GcError::UnknownTypeTag { root_type, .. } => Some(root_type),
            GcError::InvariantViolation(v) => Some(&v.root_type),
            GcError::OutOfMemory { .. } => None,
        }
    }

    /// The offending address, if any.
    pub fn address(&self) -> Option<Address> {
        match self {
            GcError::CorruptHeap(c) => Some(c.address),
            GcError::UnknownTypeTag { object, .. } => Some(object.to_raw_address()),
            GcError::InvariantViolation(v) => Some(v.slot.unwrap_or(v.object.to_raw_address())),
            GcError::OutOfMemory { .. } => None,
        }
    }
}

impl fmt::Display for GcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GcError::CorruptHeap(c) => {
                write!(f, "corrupt heap ({}): {} at {}", c.root_type, c.kind, c.address)
            }
            GcError::UnknownTypeTag {
                tag,
                object,
                root_type,
            } => write!(
                f,
                "corrupt heap ({}): unknown type tag {} in object {}",
                root_type, tag, object
            ),
            GcError::InvariantViolation(v) => write!(f, "invariant violation: {}", v),
            GcError::OutOfMemory { space, requested } => {
                write!(f, "{} space exhausted ({} bytes requested)", space, requested)
            }
        }
    }
}

impl std::error::Error for GcError {}

impl From<InvariantViolation> for GcError {
    fn from(v: InvariantViolation) -> Self {
        GcError::InvariantViolation(v)
    }
}

/// Why a mutator allocation failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    UnknownTypeTag(TypeTag),
    OutOfMemory {
        space: &'static str,
        requested: usize,
    },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AllocError::UnknownTypeTag(tag) => write!(f, "cannot allocate unknown type tag {}", tag),
            AllocError::OutOfMemory { space, requested } => {
                write!(f, "{} space exhausted ({} bytes requested)", space, requested)
            }
        }
    }
}

impl std::error::Error for AllocError {}

/// Errors from [`crate::memory_manager::shrink_length`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShrinkError {
    UnknownTypeTag(TypeTag),
    /// The type has no variable-length tail.
    FixedSize(TypeTag),
    /// The requested length is larger than the current one.
    WouldGrow { length: usize, requested: usize },
}

impl fmt::Display for ShrinkError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ShrinkError::UnknownTypeTag(tag) => write!(f, "cannot shrink unknown type tag {}", tag),
            ShrinkError::FixedSize(tag) => write!(f, "type tag {} has a fixed size", tag),
            ShrinkError::WouldGrow { length, requested } => {
                write!(f, "cannot grow an object from {} to {} elements", length, requested)
            }
        }
    }
}

impl std::error::Error for ShrinkError {}

/// Report a fatal traversal error and stop.  The heap cannot be trusted after this, so we never
/// return to the mutator.
pub fn fatal(error: &GcError, abort: bool) -> ! {
    error!("===== Fatal error in heap traversal =====");
    error!("{}", error);
    if let (Some(root_type), Some(address)) = (error.root_type(), error.address()) {
        error!("root kind: {}, address: {}", root_type, address);
    }
    if abort {
        std::process::abort()
    }
    panic!("{}", error)
}
