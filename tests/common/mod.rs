//! Fixtures shared by the integration tests: a group with a small set of types, and random
//! object graphs with a model to check them against.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use slotwalk::heap::SpaceKind;
use slotwalk::isolate::Handle;
use slotwalk::memory_manager;
use slotwalk::util::constants::BYTES_IN_WORD;
use slotwalk::vm::class_table::{TailLayout, TypeDescriptor, TypeTag};
use slotwalk::vm::object_model::HEADER_BYTES;
use slotwalk::{Isolate, IsolateGroup, ObjectReference, Options};

/// Two reference fields, no data.
pub const PAIR: TypeTag = 7;
/// No references, one data word.
pub const LEAF: TypeTag = 3;
/// One data word, then two reference fields.
pub const NODE: TypeTag = 12;
/// One data word, then a tail of references.
pub const ARRAY: TypeTag = 20;
/// A tail of raw bytes.
pub const BYTES: TypeTag = 21;

/// Byte offset of word `i` after the header.
pub fn field(i: usize) -> usize {
    HEADER_BYTES + i * BYTES_IN_WORD
}

pub fn options() -> Options {
    let mut options = Options::default();
    options.nursery_size = 256 * 1024;
    options.mature_size = 1024 * 1024;
    options.abort_on_fatal = false;
    options.record_enqueues = true;
    options
}

pub fn new_group(options: Options) -> IsolateGroup {
    let group = IsolateGroup::new("test", options);
    let types = [
        (PAIR, TypeDescriptor::with_fields("A", 2, 0)),
        (LEAF, TypeDescriptor::with_fields("B", 0, 1)),
        (
            NODE,
            TypeDescriptor::new("Node", field(3), [field(1), field(2)]).unwrap(),
        ),
        (
            ARRAY,
            TypeDescriptor::with_fields("Array", 0, 1).with_tail(TailLayout::References),
        ),
        (BYTES, TypeDescriptor::byte_array("Bytes")),
    ];
    for (tag, descriptor) in types {
        memory_manager::register_type(&group, tag, descriptor).unwrap();
    }
    group
}

pub fn alloc(group: &IsolateGroup, space: SpaceKind, tag: TypeTag, length: usize) -> ObjectReference {
    memory_manager::alloc(group, space, tag, length).unwrap()
}

pub fn set_data(object: ObjectReference, offset: usize, value: usize) {
    unsafe { (object.to_raw_address() + offset).store::<usize>(value) }
}

pub fn get_data(object: ObjectReference, offset: usize) -> usize {
    unsafe { (object.to_raw_address() + offset).load::<usize>() }
}

/// A random object graph and the shape it is supposed to have.
///
/// Every object is a `NODE` or an `ARRAY`, carries its model index in its first word, and has
/// its outgoing edge `j` in word `j + 1`.
pub struct Model {
    pub isolate: Arc<Isolate>,
    pub objects: Vec<ObjectReference>,
    pub spaces: Vec<SpaceKind>,
    pub edges: Vec<Vec<Option<usize>>>,
    /// The model index held by each slot of stack frame 0.
    pub stack_roots: Vec<Option<usize>>,
    pub handles: Vec<(Handle, Option<usize>)>,
}

impl Model {
    pub fn random(group: &IsolateGroup, seed: u64, count: usize) -> Model {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let isolate = group.new_isolate("main");

        let mut objects = vec![];
        let mut spaces = vec![];
        let mut edges = vec![];
        for i in 0..count {
            let space = if rng.random_bool(0.5) {
                SpaceKind::Nursery
            } else {
                SpaceKind::Mature
            };
            let object = if rng.random_bool(0.7) {
                edges.push(vec![None; 2]);
                alloc(group, space, NODE, 0)
            } else {
                let length = rng.random_range(0..5);
                edges.push(vec![None; length]);
                alloc(group, space, ARRAY, length)
            };
            set_data(object, field(0), i);
            objects.push(object);
            spaces.push(space);
        }
        for (i, out) in edges.iter_mut().enumerate() {
            for (j, edge) in out.iter_mut().enumerate() {
                if rng.random_bool(0.6) {
                    let target = rng.random_range(0..count);
                    *edge = Some(target);
                    memory_manager::write_field(
                        group,
                        objects[i],
                        field(j + 1),
                        Some(objects[target]),
                    );
                }
            }
        }

        let frame = isolate.push_frame(8);
        let mut stack_roots = vec![];
        for slot in 0..8 {
            let root = rng.random_bool(0.4).then(|| rng.random_range(0..count));
            isolate.set_stack_slot(frame, slot, root.map(|i| objects[i]));
            stack_roots.push(root);
        }
        let handles = (0..3)
            .map(|_| {
                let root = rng.random_bool(0.5).then(|| rng.random_range(0..count));
                (isolate.new_global_handle(root.map(|i| objects[i])), root)
            })
            .collect();

        Model {
            isolate,
            objects,
            spaces,
            edges,
            stack_roots,
            handles,
        }
    }

    /// Model indices of every root, including the targets of remembered slots.
    fn root_indices(&self) -> Vec<usize> {
        let mut roots: Vec<usize> = self.stack_roots.iter().flatten().copied().collect();
        roots.extend(self.handles.iter().filter_map(|(_, root)| *root));
        for (i, out) in self.edges.iter().enumerate() {
            if self.spaces[i] == SpaceKind::Mature {
                roots.extend(
                    out.iter()
                        .flatten()
                        .filter(|target| self.spaces[**target] == SpaceKind::Nursery),
                );
            }
        }
        roots
    }

    /// The model indices reachable from the roots, remembered slots included.
    pub fn reachable(&self) -> HashSet<usize> {
        let mut seen = HashSet::new();
        let mut stack = self.root_indices();
        while let Some(i) = stack.pop() {
            if seen.insert(i) {
                stack.extend(self.edges[i].iter().flatten());
            }
        }
        seen
    }

    /// Walk the heap from the stack and handle roots and check that it has the shape of the
    /// model.  Returns where each reached object lives now.
    pub fn check_shape(&self) -> HashMap<usize, ObjectReference> {
        let mut walk = ShapeWalk::default();
        for (slot, root) in self.stack_roots.iter().enumerate() {
            walk.expect(*root, self.isolate.stack_slot(0, slot));
        }
        for (handle, root) in self.handles.iter() {
            walk.expect(*root, handle.load());
        }
        while let Some(i) = walk.pending.pop() {
            let object = walk.location[&i];
            for (j, edge) in self.edges[i].iter().enumerate() {
                walk.expect(*edge, memory_manager::read_field(object, field(j + 1)));
            }
        }
        walk.location
    }
}

#[derive(Default)]
struct ShapeWalk {
    location: HashMap<usize, ObjectReference>,
    pending: Vec<usize>,
}

impl ShapeWalk {
    fn expect(&mut self, index: Option<usize>, found: Option<ObjectReference>) {
        match (index, found) {
            (None, None) => {}
            (Some(i), Some(object)) => {
                assert_eq!(get_data(object, field(0)), i, "object {} has the wrong id", object);
                match self.location.insert(i, object) {
                    None => self.pending.push(i),
                    Some(previous) => assert_eq!(
                        previous, object,
                        "object {} is reached at two addresses",
                        i
                    ),
                }
            }
            (index, found) => panic!("expected {:?}, found {:?}", index, found),
        }
    }
}
