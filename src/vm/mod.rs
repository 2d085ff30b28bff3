//! What slotwalk knows about the objects of a runtime: slots, type descriptors and the object
//! header.

pub mod class_table;
pub mod object_model;
pub mod slot;
