//! Sidecar value model: a small tagged-union value type plus the
//! self-describing schema and wire codec built on top of it.

pub mod codec;
pub mod schema;

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::Serialize;

pub use schema::{SidecarElement, SidecarSchema};

/// One value stored in a record's sidecar table.
///
/// `List` elements must all share the same non-composite kind (checked by
/// [`SidecarValue::list_element_type`] at construction and by the decoder)
/// and may not themselves contain a `List` or `Table`. `Table` values may
/// nest to any depth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SidecarValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F64(f64),
    Str(String),
    Binary(Vec<u8>),
    Addr(IpAddr),
    DateTimeMillis(i64),
    Bool(bool),
    Empty,
    List(Vec<SidecarValue>),
    Table(BTreeMap<String, SidecarValue>),
}

/// The type tag used on the wire and in [`SidecarElement`] descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarType {
    U8,
    U16,
    U32,
    U64,
    F64,
    Str,
    Binary,
    Addr,
    DateTimeMillis,
    Bool,
    Empty,
    List,
    Table,
}

impl SidecarValue {
    pub fn type_tag(&self) -> SidecarType {
        match self {
            SidecarValue::U8(_) => SidecarType::U8,
            SidecarValue::U16(_) => SidecarType::U16,
            SidecarValue::U32(_) => SidecarType::U32,
            SidecarValue::U64(_) => SidecarType::U64,
            SidecarValue::F64(_) => SidecarType::F64,
            SidecarValue::Str(_) => SidecarType::Str,
            SidecarValue::Binary(_) => SidecarType::Binary,
            SidecarValue::Addr(_) => SidecarType::Addr,
            SidecarValue::DateTimeMillis(_) => SidecarType::DateTimeMillis,
            SidecarValue::Bool(_) => SidecarType::Bool,
            SidecarValue::Empty => SidecarType::Empty,
            SidecarValue::List(_) => SidecarType::List,
            SidecarValue::Table(_) => SidecarType::Table,
        }
    }

    /// `Some(kind)` if this is a non-empty, homogeneously-typed list of a
    /// non-composite kind; `None` otherwise (including the empty-list case,
    /// which carries no element type on the wire).
    pub fn list_element_type(&self) -> Option<SidecarType> {
        match self {
            SidecarValue::List(items) => {
                let first = items.first()?.type_tag();
                if matches!(first, SidecarType::List | SidecarType::Table) {
                    return None;
                }
                if items.iter().all(|v| v.type_tag() == first) {
                    Some(first)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum SidecarError {
    NullParam,
    BadParam(&'static str),
    Duplicate(String),
    NoSpace,
    ShortData { needed: usize, available: usize },
    DecodeError(String),
}

impl fmt::Display for SidecarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SidecarError::NullParam => write!(f, "required parameter was missing"),
            SidecarError::BadParam(msg) => write!(f, "bad parameter: {msg}"),
            SidecarError::Duplicate(name) => write!(f, "duplicate sidecar field: {name}"),
            SidecarError::NoSpace => write!(f, "sidecar table or list exceeds the 16-bit length cap"),
            SidecarError::ShortData { needed, available } => write!(
                f,
                "short sidecar data: needed {needed} bytes, had {available}"
            ),
            SidecarError::DecodeError(msg) => write!(f, "sidecar decode error: {msg}"),
        }
    }
}

impl std::error::Error for SidecarError {}
