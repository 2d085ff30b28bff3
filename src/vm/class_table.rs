//! The class table maps a type tag found in an object header to a [`TypeDescriptor`]: where the
//! reference-bearing slots of an object of that type are, and, for variable-length types, how
//! the tail is laid out.
//!
//! The table belongs to an isolate group.  It is append-only, and it is frozen while a pass
//! runs: visitors hold a read guard of the group's class-table lock for their whole lifetime.

use std::fmt;

use itertools::Itertools;

use crate::util::constants::BYTES_IN_WORD;
use crate::util::conversions::raw_align_up;
use crate::util::ObjectReference;
use crate::vm::object_model::{HEADER_BYTES, MAX_TYPE_TAG};
use crate::vm::slot::SlotRange;

/// A runtime type tag, stored in every object header.  Tag 0 is reserved and never names a type.
pub type TypeTag = u32;

/// The reserved tag.  A zero header word never describes an object.
pub const ILLEGAL_TYPE_TAG: TypeTag = 0;

/// Layout of the variable-length tail of an object.  The tail starts right after the fixed
/// part, and its element count is the length stored in the object header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TailLayout {
    /// Each element is a reference slot.
    References,
    /// Each element is `element_size` bytes of raw data.
    Bytes { element_size: usize },
}

/// Why a descriptor could not be built.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DescriptorError {
    /// The instance size is smaller than the header or not a multiple of the word size.
    MisalignedInstanceSize(usize),
    MisalignedOffset(usize),
    /// The offset points into the object header.
    OffsetInHeader(usize),
    /// The slot at the offset does not fit in the instance.
    OffsetOutOfBounds { offset: usize, instance_size: usize },
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DescriptorError::MisalignedInstanceSize(size) => {
                write!(f, "invalid instance size {}", size)
            }
            DescriptorError::MisalignedOffset(offset) => {
                write!(f, "reference offset {} is not word aligned", offset)
            }
            DescriptorError::OffsetInHeader(offset) => {
                write!(f, "reference offset {} is inside the header", offset)
            }
            DescriptorError::OffsetOutOfBounds {
                offset,
                instance_size,
            } => write!(
                f,
                "reference offset {} exceeds instance size {}",
                offset, instance_size
            ),
        }
    }
}

impl std::error::Error for DescriptorError {}

/// Describes the reference slots of every object with one type tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDescriptor {
    name: String,
    /// Size of the fixed part in bytes, header included.
    instance_size: usize,
    /// Byte offsets of reference slots from the object start, sorted.
    reference_offsets: Vec<usize>,
    tail: Option<TailLayout>,
}

impl TypeDescriptor {
    /// Create a descriptor for a type whose fixed part is `instance_size` bytes (header included)
    /// with reference slots at the given byte offsets.
    pub fn new(
        name: &str,
        instance_size: usize,
        reference_offsets: impl IntoIterator<Item = usize>,
    ) -> Result<Self, DescriptorError> {
        if instance_size < HEADER_BYTES || instance_size % BYTES_IN_WORD != 0 {
            return Err(DescriptorError::MisalignedInstanceSize(instance_size));
        }
        let mut offsets = Vec::new();
        for offset in reference_offsets {
            if offset % BYTES_IN_WORD != 0 {
                return Err(DescriptorError::MisalignedOffset(offset));
            }
            if offset < HEADER_BYTES {
                return Err(DescriptorError::OffsetInHeader(offset));
            }
            if offset + BYTES_IN_WORD > instance_size {
                return Err(DescriptorError::OffsetOutOfBounds {
                    offset,
                    instance_size,
                });
            }
            offsets.push(offset);
        }
        offsets.sort_unstable();
        offsets.dedup();
        Ok(Self {
            name: name.to_string(),
            instance_size,
            reference_offsets: offsets,
            tail: None,
        })
    }

    /// A fixed-size type with `reference_fields` reference slots followed by `data_words` words
    /// of raw data.
    pub fn with_fields(name: &str, reference_fields: usize, data_words: usize) -> Self {
        let offsets = (0..reference_fields).map(|i| HEADER_BYTES + i * BYTES_IN_WORD);
        let instance_size = HEADER_BYTES + (reference_fields + data_words) * BYTES_IN_WORD;
        // The offsets are aligned and inside the instance by construction.
        Self {
            name: name.to_string(),
            instance_size,
            reference_offsets: offsets.collect(),
            tail: None,
        }
    }

    /// An array of references with no fixed fields.
    pub fn reference_array(name: &str) -> Self {
        Self::with_fields(name, 0, 0).with_tail(TailLayout::References)
    }

    /// An array of bytes with no fixed fields.
    pub fn byte_array(name: &str) -> Self {
        Self::with_fields(name, 0, 0).with_tail(TailLayout::Bytes { element_size: 1 })
    }

    /// Give this type a variable-length tail.
    pub fn with_tail(mut self, tail: TailLayout) -> Self {
        self.tail = Some(tail);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance_size(&self) -> usize {
        self.instance_size
    }

    pub fn reference_offsets(&self) -> &[usize] {
        &self.reference_offsets
    }

    pub fn tail(&self) -> Option<TailLayout> {
        self.tail
    }

    pub fn is_variable_length(&self) -> bool {
        self.tail.is_some()
    }

    /// Size in bytes of an object of this type with `length` tail elements.  Always word aligned.
    pub fn size_for_length(&self, length: usize) -> usize {
        let tail_bytes = match self.tail {
            None => 0,
            Some(TailLayout::References) => length * BYTES_IN_WORD,
            Some(TailLayout::Bytes { element_size }) => length * element_size,
        };
        self.instance_size + raw_align_up(tail_bytes, BYTES_IN_WORD)
    }

    /// Byte offset of tail element `index` of a reference array.
    pub fn element_offset(&self, index: usize) -> Option<usize> {
        match self.tail {
            Some(TailLayout::References) => Some(self.instance_size + index * BYTES_IN_WORD),
            _ => None,
        }
    }

    /// The fixed reference slots of `object`, with adjacent slots merged into one range.
    pub fn fixed_slot_ranges(&self, object: ObjectReference) -> impl Iterator<Item = SlotRange> + '_ {
        let start = object.to_raw_address();
        self.reference_offsets
            .iter()
            .map(|offset| (*offset, *offset + BYTES_IN_WORD))
            .coalesce(|(s1, e1), (s2, e2)| {
                if e1 == s2 {
                    Ok((s1, e2))
                } else {
                    Err(((s1, e1), (s2, e2)))
                }
            })
            .map(move |(s, e)| SlotRange::new(start + s, start + e))
    }

    /// The tail reference slots of `object`, given the length currently stored in it.
    pub fn tail_slot_range(&self, object: ObjectReference, length: usize) -> Option<SlotRange> {
        match self.tail {
            Some(TailLayout::References) if length > 0 => Some(SlotRange::from_start_and_count(
                object.to_raw_address() + self.instance_size,
                length,
            )),
            _ => None,
        }
    }
}

/// A tag was looked up that no type was registered under.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UnknownTypeTag(pub TypeTag);

impl fmt::Display for UnknownTypeTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown type tag {}", self.0)
    }
}

impl std::error::Error for UnknownTypeTag {}

/// Why a type could not be registered.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClassTableError {
    /// Tag 0 is reserved.
    ReservedTag,
    TagTooLarge(TypeTag),
    /// The table is append-only; a registered tag cannot be replaced.
    DuplicateTag(TypeTag),
}

impl fmt::Display for ClassTableError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClassTableError::ReservedTag => write!(f, "type tag {} is reserved", ILLEGAL_TYPE_TAG),
            ClassTableError::TagTooLarge(tag) => {
                write!(f, "type tag {} exceeds the maximum {}", tag, MAX_TYPE_TAG)
            }
            ClassTableError::DuplicateTag(tag) => write!(f, "type tag {} is already registered", tag),
        }
    }
}

impl std::error::Error for ClassTableError {}

/// Maps type tags to descriptors.
#[derive(Default)]
pub struct ClassTable {
    descriptors: Vec<Option<Box<TypeDescriptor>>>,
    count: usize,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `descriptor` under `tag`.  Tags are never re-registered or removed.
    pub fn register(
        &mut self,
        tag: TypeTag,
        descriptor: TypeDescriptor,
    ) -> Result<(), ClassTableError> {
        if tag == ILLEGAL_TYPE_TAG {
            return Err(ClassTableError::ReservedTag);
        }
        if tag > MAX_TYPE_TAG {
            return Err(ClassTableError::TagTooLarge(tag));
        }
        let index = tag as usize;
        if index >= self.descriptors.len() {
            self.descriptors.resize_with(index + 1, || None);
        }
        if self.descriptors[index].is_some() {
            return Err(ClassTableError::DuplicateTag(tag));
        }
        debug!("Register type {} ({})", tag, descriptor.name());
        self.descriptors[index] = Some(Box::new(descriptor));
        self.count += 1;
        Ok(())
    }

    /// Look up the descriptor of `tag`.  Fails for tags never registered; there is no default.
    pub fn describe(&self, tag: TypeTag) -> Result<&TypeDescriptor, UnknownTypeTag> {
        self.descriptors
            .get(tag as usize)
            .and_then(|d| d.as_deref())
            .ok_or(UnknownTypeTag(tag))
    }

    pub fn contains(&self, tag: TypeTag) -> bool {
        self.describe(tag).is_ok()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterate registered types in tag order.
    pub fn iter(&self) -> impl Iterator<Item = (TypeTag, &TypeDescriptor)> {
        self.descriptors
            .iter()
            .enumerate()
            .filter_map(|(tag, d)| d.as_deref().map(|d| (tag as TypeTag, d)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Address;

    const W: usize = BYTES_IN_WORD;

    #[test]
    fn unknown_tag_is_an_error() {
        let mut table = ClassTable::new();
        table
            .register(3, TypeDescriptor::with_fields("Leaf", 0, 1))
            .unwrap();
        assert_eq!(table.describe(4), Err(UnknownTypeTag(4)));
        assert_eq!(table.describe(1000), Err(UnknownTypeTag(1000)));
        assert_eq!(table.describe(3).map(|d| d.name()), Ok("Leaf"));
    }

    #[test]
    fn registration_is_append_only() {
        let mut table = ClassTable::new();
        assert_eq!(
            table.register(ILLEGAL_TYPE_TAG, TypeDescriptor::byte_array("Bytes")),
            Err(ClassTableError::ReservedTag)
        );
        table.register(7, TypeDescriptor::with_fields("Pair", 2, 0)).unwrap();
        assert_eq!(
            table.register(7, TypeDescriptor::with_fields("Other", 0, 0)),
            Err(ClassTableError::DuplicateTag(7))
        );
        assert_eq!(
            table.register(MAX_TYPE_TAG + 1, TypeDescriptor::with_fields("Big", 0, 0)),
            Err(ClassTableError::TagTooLarge(MAX_TYPE_TAG + 1))
        );
        assert_eq!(table.len(), 1);
        assert_eq!(table.describe(7).map(|d| d.name()), Ok("Pair"));
        assert_eq!(table.iter().map(|(tag, _)| tag).collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn offsets_are_validated() {
        let size = HEADER_BYTES + 2 * W;
        assert_eq!(
            TypeDescriptor::new("T", size, [HEADER_BYTES + 1]),
            Err(DescriptorError::MisalignedOffset(HEADER_BYTES + 1))
        );
        assert_eq!(
            TypeDescriptor::new("T", size, [0]),
            Err(DescriptorError::OffsetInHeader(0))
        );
        assert_eq!(
            TypeDescriptor::new("T", size, [size]),
            Err(DescriptorError::OffsetOutOfBounds {
                offset: size,
                instance_size: size
            })
        );
        assert_eq!(
            TypeDescriptor::new("T", HEADER_BYTES + 3, Vec::new()),
            Err(DescriptorError::MisalignedInstanceSize(HEADER_BYTES + 3))
        );
        let d = TypeDescriptor::new("T", size, [HEADER_BYTES + W, HEADER_BYTES, HEADER_BYTES])
            .unwrap();
        assert_eq!(d.reference_offsets(), &[HEADER_BYTES, HEADER_BYTES + W]);
    }

    #[test]
    fn sizes() {
        let fixed = TypeDescriptor::with_fields("Pair", 2, 1);
        assert_eq!(fixed.instance_size(), HEADER_BYTES + 3 * W);
        assert_eq!(fixed.size_for_length(100), fixed.instance_size());

        let refs = TypeDescriptor::reference_array("Array");
        assert_eq!(refs.size_for_length(3), HEADER_BYTES + 3 * W);
        assert_eq!(refs.element_offset(2), Some(HEADER_BYTES + 2 * W));

        let bytes = TypeDescriptor::byte_array("Bytes");
        assert_eq!(bytes.size_for_length(0), HEADER_BYTES);
        assert_eq!(bytes.size_for_length(1), HEADER_BYTES + W);
        assert_eq!(bytes.size_for_length(W + 1), HEADER_BYTES + 2 * W);
        assert_eq!(bytes.element_offset(0), None);
    }

    #[test]
    fn fixed_ranges_are_coalesced() {
        let d = TypeDescriptor::new(
            "Mixed",
            HEADER_BYTES + 4 * W,
            [HEADER_BYTES, HEADER_BYTES + W, HEADER_BYTES + 3 * W],
        )
        .unwrap();
        let object =
            ObjectReference::from_raw_address(unsafe { Address::from_usize(0x1000) }).unwrap();
        let ranges: Vec<SlotRange> = d.fixed_slot_ranges(object).collect();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].start(), unsafe {
            Address::from_usize(0x1000 + HEADER_BYTES)
        });
        assert_eq!(ranges[0].len(), 2);
        assert_eq!(ranges[1].start(), unsafe {
            Address::from_usize(0x1000 + HEADER_BYTES + 3 * W)
        });
        assert_eq!(ranges[1].len(), 1);
    }

    #[test]
    fn tail_range_follows_length() {
        let d = TypeDescriptor::with_fields("Vec", 1, 0).with_tail(TailLayout::References);
        let object =
            ObjectReference::from_raw_address(unsafe { Address::from_usize(0x1000) }).unwrap();
        assert_eq!(d.tail_slot_range(object, 0), None);
        let tail = d.tail_slot_range(object, 4).unwrap();
        assert_eq!(tail.start(), unsafe {
            Address::from_usize(0x1000 + HEADER_BYTES + W)
        });
        assert_eq!(tail.len(), 4);
        assert_eq!(
            TypeDescriptor::byte_array("Bytes").tail_slot_range(object, 10),
            None
        );
    }
}
