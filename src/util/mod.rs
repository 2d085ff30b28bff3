//! Memory primitives and the ambient bits: constants, conversions, logging and options.

pub mod address;
pub mod constants;
pub mod conversions;
pub mod logger;
pub mod options;

pub use self::address::Address;
pub use self::address::ObjectReference;
