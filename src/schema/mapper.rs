//! Source type → normalized type mapping

use super::types::{FieldDescriptor, NormalizedType};
use crate::error::{Error, Result};
use tracing::warn;

/// Length used for record ids and references
pub const ID_LENGTH: u32 = 18;

/// Length used when a source type cannot be mapped
pub const DEFAULT_STRING_LENGTH: u32 = 255;

/// Map a descriptor, failing on source types outside the mapping table
pub fn try_normalize(descriptor: &FieldDescriptor) -> Result<NormalizedType> {
    let normalized = match descriptor.field_type.to_ascii_lowercase().as_str() {
        "id" | "reference" => NormalizedType::String(ID_LENGTH),
        "boolean" => NormalizedType::Boolean,
        "string" | "textarea" | "picklist" | "url" | "phone" => {
            NormalizedType::String(descriptor.length)
        }
        "currency" | "percent" | "double" => NormalizedType::Decimal {
            precision: descriptor.precision,
            scale: descriptor.scale,
        },
        "date" => NormalizedType::Date { with_time: false },
        "datetime" => NormalizedType::Date { with_time: true },
        "int" => NormalizedType::Integer,
        _ => {
            return Err(Error::UnsupportedFieldType {
                field: descriptor.name.clone(),
                field_type: descriptor.field_type.clone(),
            })
        }
    };

    Ok(normalized)
}

/// Map a descriptor, defaulting unknown source types to a wide string
///
/// The fallback is logged and never fails the caller.
pub fn normalize(descriptor: &FieldDescriptor) -> NormalizedType {
    match try_normalize(descriptor) {
        Ok(normalized) => normalized,
        Err(e) => {
            warn!(
                field = %descriptor.name,
                source_type = %descriptor.field_type,
                "{e}, defaulting to string-{DEFAULT_STRING_LENGTH}"
            );
            NormalizedType::String(DEFAULT_STRING_LENGTH)
        }
    }
}
