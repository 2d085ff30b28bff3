//! Isolates and isolate groups.
//!
//! An [`IsolateGroup`] owns everything a pass needs: the class table, the heap, the isolates
//! whose stacks and handles are roots, and the remembered set.  Groups share nothing, so passes
//! in different groups are independent.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use atomic::Atomic;
use strum_macros::Display;

use crate::heap::Heap;
use crate::util::options::Options;
use crate::util::{Address, ObjectReference};
use crate::vm::class_table::ClassTable;
use crate::vm::slot::{SimpleSlot, Slot, SlotRange};

pub type IsolateId = usize;

/// Number of slots in one block of a handle area.
pub const HANDLE_BLOCK_SLOTS: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum IsolateState {
    /// Executing mutator code.
    Running,
    /// Stopped for a pass.
    AtSafepoint,
    /// Shutting down.  Its roots are no longer reported.
    Terminating,
}

/// A fixed block of root slots.  The slots never move while the block is alive, so a
/// [`SlotRange`] over them stays valid.
pub struct RootBlock {
    slots: Box<[Atomic<Address>]>,
}

impl RootBlock {
    pub fn new(len: usize) -> Self {
        RootBlock {
            slots: (0..len).map(|_| Atomic::new(Address::ZERO)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> SimpleSlot {
        SimpleSlot::from_address(Address::from_ref(&self.slots[index]))
    }

    /// The first `count` slots of the block.
    pub fn range(&self, count: usize) -> SlotRange {
        debug_assert!(count <= self.len());
        SlotRange::from_start_and_count(Address::from_ptr(self.slots.as_ptr()), count)
    }
}

/// A reference to one handle slot.  Holds on to its isolate, so the slot stays valid for as
/// long as the handle exists, even after the isolate has left its group.
#[derive(Clone)]
pub struct Handle {
    isolate: Arc<Isolate>,
    slot: SimpleSlot,
}

// The slot lives in a `RootBlock` of `isolate` and is only accessed atomically.
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

impl Handle {
    pub fn load(&self) -> Option<ObjectReference> {
        self.slot.load()
    }

    pub fn store(&self, value: Option<ObjectReference>) {
        match value {
            Some(object) => self.slot.store(object),
            None => self.slot.clear(),
        }
    }

    pub fn slot(&self) -> SimpleSlot {
        self.slot
    }

    pub fn isolate(&self) -> &Arc<Isolate> {
        &self.isolate
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot
    }
}

impl Eq for Handle {}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({} @ isolate {})", self.slot.as_address(), self.isolate.id)
    }
}

/// A growable list of handle blocks.  New handles go to the end of the last block.
#[derive(Default)]
struct HandleArea {
    blocks: Vec<RootBlock>,
    used: usize,
}

impl HandleArea {
    fn allocate(&mut self) -> SimpleSlot {
        if self.blocks.is_empty() || self.used == HANDLE_BLOCK_SLOTS {
            self.blocks.push(RootBlock::new(HANDLE_BLOCK_SLOTS));
            self.used = 0;
        }
        let slot = self.blocks[self.blocks.len() - 1].slot(self.used);
        self.used += 1;
        slot
    }

    fn ranges(&self) -> Vec<SlotRange> {
        let last = self.blocks.len().saturating_sub(1);
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, block)| {
                block.range(if i == last {
                    self.used
                } else {
                    HANDLE_BLOCK_SLOTS
                })
            })
            .collect()
    }

    fn count(&self) -> usize {
        match self.blocks.len() {
            0 => 0,
            n => (n - 1) * HANDLE_BLOCK_SLOTS + self.used,
        }
    }
}

/// A mutator with its own stack and handles, sharing the heap of its group.
pub struct Isolate {
    id: IsolateId,
    name: String,
    state: Mutex<IsolateState>,
    /// Stack frames, bottom first.
    frames: Mutex<Vec<RootBlock>>,
    global_handles: Mutex<HandleArea>,
    persistent_handles: Mutex<HandleArea>,
}

impl Isolate {
    fn new(id: IsolateId, name: &str) -> Self {
        Isolate {
            id,
            name: name.to_string(),
            state: Mutex::new(IsolateState::Running),
            frames: Mutex::new(Vec::new()),
            global_handles: Mutex::new(HandleArea::default()),
            persistent_handles: Mutex::new(HandleArea::default()),
        }
    }

    pub fn id(&self) -> IsolateId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> IsolateState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: IsolateState) {
        *self.state.lock().unwrap() = state;
    }

    /// Start shutting down.  There is no way back to `Running`.
    pub fn begin_termination(&self) {
        info!("Isolate {} ({}) is terminating", self.id, self.name);
        self.set_state(IsolateState::Terminating);
    }

    pub fn is_terminating(&self) -> bool {
        self.state() == IsolateState::Terminating
    }

    /// Push a frame of `slots` null root slots.  Returns the frame index.
    pub fn push_frame(&self, slots: usize) -> usize {
        let mut frames = self.frames.lock().unwrap();
        frames.push(RootBlock::new(slots));
        frames.len() - 1
    }

    /// Pop the top frame.  Returns `false` if the stack was empty.
    pub fn pop_frame(&self) -> bool {
        self.frames.lock().unwrap().pop().is_some()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    fn frame_slot(&self, frame: usize, index: usize) -> SimpleSlot {
        self.frames.lock().unwrap()[frame].slot(index)
    }

    /// Set slot `index` of frame `frame`.  Panics if either is out of bounds.
    pub fn set_stack_slot(&self, frame: usize, index: usize, value: Option<ObjectReference>) {
        let slot = self.frame_slot(frame, index);
        match value {
            Some(object) => slot.store(object),
            None => slot.clear(),
        }
    }

    pub fn stack_slot(&self, frame: usize, index: usize) -> Option<ObjectReference> {
        self.frame_slot(frame, index).load()
    }

    /// Create a global handle holding `value`.
    pub fn new_global_handle(self: &Arc<Self>, value: Option<ObjectReference>) -> Handle {
        let handle = Handle {
            isolate: self.clone(),
            slot: self.global_handles.lock().unwrap().allocate(),
        };
        handle.store(value);
        handle
    }

    /// Create a persistent handle holding `value`.
    pub fn new_persistent_handle(self: &Arc<Self>, value: Option<ObjectReference>) -> Handle {
        let handle = Handle {
            isolate: self.clone(),
            slot: self.persistent_handles.lock().unwrap().allocate(),
        };
        handle.store(value);
        handle
    }

    pub fn global_handle_count(&self) -> usize {
        self.global_handles.lock().unwrap().count()
    }

    pub fn persistent_handle_count(&self) -> usize {
        self.persistent_handles.lock().unwrap().count()
    }

    /// One range per frame, bottom to top.
    pub fn stack_ranges(&self) -> Vec<SlotRange> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|frame| frame.range(frame.len()))
            .collect()
    }

    pub fn global_handle_ranges(&self) -> Vec<SlotRange> {
        self.global_handles.lock().unwrap().ranges()
    }

    pub fn persistent_handle_ranges(&self) -> Vec<SlotRange> {
        self.persistent_handles.lock().unwrap().ranges()
    }
}

/// Slots recorded by the write barrier, each once, in recording order.
#[derive(Default)]
struct RememberedSet {
    slots: Vec<Address>,
    recorded: HashSet<Address>,
}

impl RememberedSet {
    fn insert(&mut self, slot: Address) -> bool {
        if !self.recorded.insert(slot) {
            return false;
        }
        self.slots.push(slot);
        true
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.recorded.clear();
    }
}

/// A set of isolates sharing one heap and one class table.
pub struct IsolateGroup {
    name: String,
    options: Options,
    class_table: RwLock<ClassTable>,
    heap: Heap,
    /// Isolates in id order.
    isolates: Mutex<Vec<Arc<Isolate>>>,
    next_isolate_id: AtomicUsize,
    /// Addresses of mature slots that may point into the nursery, in recording order.
    remembered_set: Mutex<RememberedSet>,
    /// Held for the whole of a pass.
    gc_lock: Mutex<()>,
}

impl IsolateGroup {
    pub fn new(name: &str, options: Options) -> Self {
        match crate::util::logger::try_init() {
            Ok(_) => debug!("slotwalk initialized the logger."),
            Err(_) => debug!(
                "slotwalk failed to initialize the logger. Possibly a logger has been initialized by user."
            ),
        }
        let heap = Heap::new(&options);
        info!(
            "Created isolate group {} (nursery: {} bytes, mature: {} bytes)",
            name, options.nursery_size, options.mature_size
        );
        IsolateGroup {
            name: name.to_string(),
            options,
            class_table: RwLock::new(ClassTable::new()),
            heap,
            isolates: Mutex::new(Vec::new()),
            next_isolate_id: AtomicUsize::new(0),
            remembered_set: Mutex::new(RememberedSet::default()),
            gc_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Read access to the class table.  Registration waits until every guard is dropped.
    pub fn class_table(&self) -> RwLockReadGuard<'_, ClassTable> {
        self.class_table.read().unwrap()
    }

    pub(crate) fn class_table_mut(&self) -> RwLockWriteGuard<'_, ClassTable> {
        self.class_table.write().unwrap()
    }

    /// Create a running isolate.  Ids are assigned in creation order.
    pub fn new_isolate(&self, name: &str) -> Arc<Isolate> {
        let id = self.next_isolate_id.fetch_add(1, Ordering::SeqCst);
        let isolate = Arc::new(Isolate::new(id, name));
        self.isolates.lock().unwrap().push(isolate.clone());
        debug!("Group {}: new isolate {} ({})", self.name, id, name);
        isolate
    }

    /// Forget a terminated isolate.  Its roots are gone after this.
    pub fn remove_isolate(&self, id: IsolateId) -> Option<Arc<Isolate>> {
        let mut isolates = self.isolates.lock().unwrap();
        let index = isolates.iter().position(|i| i.id() == id)?;
        Some(isolates.remove(index))
    }

    /// A snapshot of the isolates, in id order.
    pub fn isolates(&self) -> Vec<Arc<Isolate>> {
        self.isolates.lock().unwrap().clone()
    }

    pub(crate) fn remember_slot(&self, slot: Address) {
        if self.remembered_set.lock().unwrap().insert(slot) {
            trace!("Remember slot {}", slot);
        }
    }

    /// A snapshot of the remembered set, in recording order.
    pub fn remembered_set(&self) -> Vec<Address> {
        self.remembered_set.lock().unwrap().slots.clone()
    }

    pub(crate) fn clear_remembered_set(&self) {
        self.remembered_set.lock().unwrap().clear();
    }

    /// Stop the group for a pass.  Only one pass runs in a group at a time; a second caller
    /// waits until the first scope is dropped.
    pub fn enter_safepoint(&self) -> SafepointScope<'_> {
        let guard = self.gc_lock.lock().unwrap();
        let stopped: Vec<Arc<Isolate>> = self
            .isolates()
            .into_iter()
            .filter(|isolate| {
                let mut state = isolate.state.lock().unwrap();
                if *state == IsolateState::Running {
                    *state = IsolateState::AtSafepoint;
                    true
                } else {
                    false
                }
            })
            .collect();
        debug!("Group {}: {} isolates at safepoint", self.name, stopped.len());
        SafepointScope {
            _guard: guard,
            stopped,
        }
    }
}

/// Keeps a group stopped.  Isolates stopped by the scope resume when it is dropped.
pub struct SafepointScope<'a> {
    _guard: MutexGuard<'a, ()>,
    stopped: Vec<Arc<Isolate>>,
}

impl Drop for SafepointScope<'_> {
    fn drop(&mut self) {
        for isolate in self.stopped.iter() {
            let mut state = isolate.state.lock().unwrap();
            if *state == IsolateState::AtSafepoint {
                *state = IsolateState::Running;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> IsolateGroup {
        let mut options = Options::default();
        options.nursery_size = 4096;
        options.mature_size = 4096;
        IsolateGroup::new("test", options)
    }

    #[test]
    fn ids_follow_creation_order() {
        let group = group();
        let a = group.new_isolate("a");
        let b = group.new_isolate("b");
        assert_eq!((a.id(), b.id()), (0, 1));
        assert_eq!(
            group.isolates().iter().map(|i| i.id()).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert!(group.remove_isolate(0).is_some());
        assert!(group.remove_isolate(0).is_none());
        assert_eq!(group.new_isolate("c").id(), 2);
    }

    #[test]
    fn safepoint_stops_and_resumes() {
        let group = group();
        let a = group.new_isolate("a");
        let b = group.new_isolate("b");
        b.begin_termination();
        {
            let _scope = group.enter_safepoint();
            assert_eq!(a.state(), IsolateState::AtSafepoint);
            assert_eq!(b.state(), IsolateState::Terminating);
        }
        assert_eq!(a.state(), IsolateState::Running);
        assert_eq!(b.state(), IsolateState::Terminating);
    }

    #[test]
    fn frames_are_root_ranges() {
        let group = group();
        let isolate = group.new_isolate("main");
        let bottom = isolate.push_frame(3);
        let top = isolate.push_frame(1);
        assert_eq!((bottom, top), (0, 1));
        let ranges = isolate.stack_ranges();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].len(), 3);
        assert_eq!(ranges[1].len(), 1);
        assert_eq!(isolate.stack_slot(0, 2), None);
        assert!(isolate.pop_frame());
        assert_eq!(isolate.frame_count(), 1);
    }

    #[test]
    fn handle_blocks_grow() {
        let group = group();
        let isolate = group.new_isolate("main");
        let handles: Vec<Handle> = (0..HANDLE_BLOCK_SLOTS + 2)
            .map(|_| isolate.new_global_handle(None))
            .collect();
        assert_eq!(isolate.global_handle_count(), HANDLE_BLOCK_SLOTS + 2);
        let ranges = isolate.global_handle_ranges();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].len(), HANDLE_BLOCK_SLOTS);
        assert_eq!(ranges[1].len(), 2);
        assert_eq!(handles[0].slot().as_address(), ranges[0].start());
        assert!(isolate.persistent_handle_ranges().is_empty());
    }

    #[test]
    fn handles_keep_their_isolate() {
        let group = group();
        let isolate = group.new_isolate("main");
        let id = isolate.id();
        let handle = isolate.new_persistent_handle(None);
        drop(isolate);
        assert!(group.remove_isolate(id).is_some());
        // The group no longer knows the isolate, but the handle still owns its slot.
        assert_eq!(handle.isolate().id(), id);
        handle.store(None);
        assert_eq!(handle.load(), None);
        assert_eq!(handle.clone(), handle);
    }

    #[test]
    fn slots_are_remembered_once() {
        let group = group();
        let a = unsafe { Address::from_usize(0x1000) };
        let b = unsafe { Address::from_usize(0x1008) };
        group.remember_slot(a);
        group.remember_slot(b);
        group.remember_slot(a);
        assert_eq!(group.remembered_set(), vec![a, b]);
        group.clear_remembered_set();
        assert!(group.remembered_set().is_empty());
        group.remember_slot(a);
        assert_eq!(group.remembered_set(), vec![a]);
    }
}
