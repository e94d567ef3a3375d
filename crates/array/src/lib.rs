//! Sample buffers: element types, layouts, and the owned byte arrays that
//! box and block queries read into and write from.

mod array;
mod dtype;

pub use array::{Array, ArrayError, Layout};
pub use dtype::{DType, DTypeAtom, DTypeParseError};
