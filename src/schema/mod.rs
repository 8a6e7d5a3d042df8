//! Field schema module
//!
//! Maps source field descriptors returned by `describe` to the normalized
//! type tokens stored in the catalog.
//!
//! # Features
//!
//! - **Descriptor Model**: `FieldDescriptor` mirrors the describe payload
//! - **Normalized Types**: `NormalizedType` renders and parses tokens such as
//!   `string-255` or `decimal-18-2`
//! - **Lenient Mapping**: unknown source types fall back to `string-255`
//!   with a warning instead of failing the entity

mod mapper;
mod types;

pub use mapper::{normalize, try_normalize, DEFAULT_STRING_LENGTH, ID_LENGTH};
pub use types::{FieldDescriptor, NormalizedType};
