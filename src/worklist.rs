//! The work list of objects discovered but not yet scanned.
//!
//! Visitors push an object when they first discover it; the driver pops objects and presents
//! their slots to the visitor again.  This turns the recursive graph walk into an iterative
//! loop whose depth does not grow with the object graph.

use std::collections::VecDeque;

use strum_macros::{Display, EnumString};

use crate::util::ObjectReference;

/// The order in which entries leave the work list.
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumString, Display)]
pub enum WorkListOrder {
    /// Last in, first out.  The traversal is depth-first.
    Lifo,
    /// First in, first out.  The traversal is breadth-first.
    Fifo,
}

/// A queue of objects pending slot enumeration.
pub struct WorkList {
    entries: VecDeque<ObjectReference>,
    order: WorkListOrder,
    /// Number of pushes since creation.
    pushed: usize,
    /// Longest the list has been.
    high_water: usize,
    /// Every pushed object, in push order, if logging is enabled.
    log: Option<Vec<ObjectReference>>,
    #[cfg(feature = "extreme_assertions")]
    seen: std::collections::HashSet<ObjectReference>,
}

impl WorkList {
    /// Reserve a capacity of this on first push to avoid frequent resizing.
    const CAPACITY: usize = 4096;

    pub fn new(order: WorkListOrder) -> Self {
        Self {
            entries: VecDeque::new(),
            order,
            pushed: 0,
            high_water: 0,
            log: None,
            #[cfg(feature = "extreme_assertions")]
            seen: std::collections::HashSet::new(),
        }
    }

    /// Create a work list that remembers every object pushed to it.
    pub fn with_log(order: WorkListOrder) -> Self {
        Self {
            log: Some(Vec::new()),
            ..Self::new(order)
        }
    }

    pub fn order(&self) -> WorkListOrder {
        self.order
    }

    #[inline(always)]
    pub fn push(&mut self, object: ObjectReference) {
        #[cfg(feature = "extreme_assertions")]
        assert!(
            self.seen.insert(object),
            "Object {} is pushed to the work list twice",
            object
        );
        if self.entries.is_empty() && self.entries.capacity() == 0 {
            self.entries.reserve(Self::CAPACITY);
        }
        self.entries.push_back(object);
        self.pushed += 1;
        self.high_water = self.high_water.max(self.entries.len());
        if let Some(log) = self.log.as_mut() {
            log.push(object);
        }
    }

    #[inline(always)]
    pub fn pop(&mut self) -> Option<ObjectReference> {
        match self.order {
            WorkListOrder::Lifo => self.entries.pop_back(),
            WorkListOrder::Fifo => self.entries.pop_front(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of pushes since this list was created.
    pub fn pushed(&self) -> usize {
        self.pushed
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// The objects pushed so far, in push order.  `None` unless created with [`WorkList::with_log`].
    pub fn enqueue_log(&self) -> Option<&[ObjectReference]> {
        self.log.as_deref()
    }

    /// Take the enqueue log, leaving an empty one behind.
    pub fn take_enqueue_log(&mut self) -> Option<Vec<ObjectReference>> {
        self.log.as_mut().map(std::mem::take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Address;

    fn object(raw: usize) -> ObjectReference {
        ObjectReference::from_raw_address(unsafe { Address::from_usize(raw) }).unwrap()
    }

    #[test]
    fn lifo_pops_newest_first() {
        let mut list = WorkList::new(WorkListOrder::Lifo);
        list.push(object(0x10));
        list.push(object(0x20));
        assert_eq!(list.pop(), Some(object(0x20)));
        assert_eq!(list.pop(), Some(object(0x10)));
        assert_eq!(list.pop(), None);
    }

    #[test]
    fn fifo_pops_oldest_first() {
        let mut list = WorkList::new(WorkListOrder::Fifo);
        list.push(object(0x10));
        list.push(object(0x20));
        assert_eq!(list.pop(), Some(object(0x10)));
        assert_eq!(list.pop(), Some(object(0x20)));
        assert!(list.is_empty());
    }

    #[test]
    fn counters_and_log() {
        let mut list = WorkList::with_log(WorkListOrder::Lifo);
        list.push(object(0x10));
        list.push(object(0x20));
        list.pop();
        list.push(object(0x30));
        assert_eq!(list.pushed(), 3);
        assert_eq!(list.high_water(), 2);
        assert_eq!(list.len(), 2);
        assert_eq!(
            list.enqueue_log(),
            Some(&[object(0x10), object(0x20), object(0x30)][..])
        );
        assert_eq!(list.take_enqueue_log().map(|l| l.len()), Some(3));
        assert_eq!(list.enqueue_log(), Some(&[][..]));
    }

    #[test]
    fn no_log_by_default() {
        let mut list = WorkList::new(WorkListOrder::Fifo);
        list.push(object(0x10));
        assert!(list.enqueue_log().is_none());
    }

    #[test]
    fn parse_order() {
        assert_eq!("Fifo".parse::<WorkListOrder>(), Ok(WorkListOrder::Fifo));
        assert_eq!(WorkListOrder::Lifo.to_string(), "Lifo");
    }
}
