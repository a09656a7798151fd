//! IPFIX information model, frozen field schemas ("fixrecs"), and the
//! template-aware stream reader/writer built on top of them.

pub mod ipfix_stream;
pub mod schema;

use std::fmt;

pub use ipfix_stream::{IpfixReader, IpfixWriter, TemplateEvent, TemplateUseCache};
pub use schema::{FieldDataType, FieldSpec, Fixrec, FixSchema, InformationElement, InformationModel};

#[derive(Debug)]
pub enum FixrecError {
    UnknownField { enterprise: u32, element_id: u16 },
    UnknownTemplate { template_id: u16 },
    DuplicateField { enterprise: u32, element_id: u16 },
    SchemaFrozen,
    SchemaNotFrozen,
    FieldTooLarge { field_index: usize, max: usize, got: usize },
    TypeMismatch { field_index: usize },
    Truncated { needed: usize, available: usize },
}

impl fmt::Display for FixrecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixrecError::UnknownField { enterprise, element_id } => {
                write!(f, "unknown information element ({enterprise}, {element_id})")
            }
            FixrecError::UnknownTemplate { template_id } => {
                write!(f, "no template learned for id {template_id}")
            }
            FixrecError::DuplicateField { enterprise, element_id } => write!(
                f,
                "duplicate information element ({enterprise}, {element_id}) in schema"
            ),
            FixrecError::SchemaFrozen => write!(f, "schema is frozen and cannot be extended"),
            FixrecError::SchemaNotFrozen => write!(f, "schema must be frozen before use in a fixrec"),
            FixrecError::FieldTooLarge { field_index, max, got } => write!(
                f,
                "field {field_index} value of {got} bytes exceeds its {max}-byte slot"
            ),
            FixrecError::TypeMismatch { field_index } => {
                write!(f, "field {field_index} accessed with the wrong type")
            }
            FixrecError::Truncated { needed, available } => {
                write!(f, "truncated fixrec data: needed {needed} bytes, had {available}")
            }
        }
    }
}

impl std::error::Error for FixrecError {}
