//! slotwalk is a library for walking the reference slots of a managed heap.
//!
//! A tracing collector needs to find every reference reachable from a set of roots, and often
//! to rewrite those references as objects move.  slotwalk provides the protocol for this,
//! scoped to an [isolate group](isolate::IsolateGroup):
//!
//! * [roots](roots) enumerates stack, handle and remembered-set slots in a fixed order,
//! * the [class table](vm::class_table) tells where the reference slots of each object type are,
//! * [visitors](visitor) decide what to do with each reference: mark, evacuate, update or verify,
//! * the [traversal driver](traversal) drains a [work list](worklist) until every reachable
//!   object was scanned once.
//!
//! The public API is in [memory_manager].

#[macro_use]
extern crate log;

pub mod error;
pub mod heap;
pub mod isolate;
pub mod memory_manager;
pub mod roots;
pub mod traversal;
pub mod util;
pub mod visitor;
pub mod vm;
pub mod worklist;

pub use crate::error::GcError;
pub use crate::isolate::{Isolate, IsolateGroup};
pub use crate::util::options::Options;
pub use crate::util::{Address, ObjectReference};
