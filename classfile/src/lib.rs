//! Reading, modifying and writing JVM class files.
//!
//! [`parse`] turns bytes into a [`ClassModel`], in which method code is a list of instructions
//! that can be edited freely. [`ClassModel::recompute_dirty`] and [`verify`] prepare a modified
//! model for [`serialize`]. Anything not touched is written back byte for byte.

mod bytes;
pub mod code;
pub mod constants;
pub mod descriptor;
mod error;
pub mod frames;
pub mod hierarchy;
pub mod jstring;
pub mod model;
pub mod pool;
mod reader;
mod verify;
mod writer;

pub use error::{ClassFileError, VerifyError};
pub use hierarchy::{ClassHierarchy, ClassPathHierarchy, DefaultHierarchy};
pub use model::ClassModel;
pub use reader::parse;
pub use verify::verify;
pub use writer::serialize;
