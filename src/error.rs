//! Crate-wide error type composing each subsystem's own error enum.

use std::fmt;

use crate::fixrec::FixrecError;
use crate::hash_table::HashTableError;
use crate::netflow5::FlowSourceError;
use crate::sidecar::SidecarError;
use crate::sort::SortError;

/// Top-level error returned by public crate APIs.
///
/// Mirrors the way a flow record's processing pipeline can fail at any of
/// its layers: wire decode, sidecar decode, schema build, or sort.
#[derive(Debug)]
pub enum Error {
    HashTable(HashTableError),
    Sidecar(SidecarError),
    Fixrec(FixrecError),
    FlowSource(FlowSourceError),
    Sort(SortError),
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::HashTable(e) => write!(f, "hash table error: {e}"),
            Error::Sidecar(e) => write!(f, "sidecar error: {e}"),
            Error::Fixrec(e) => write!(f, "fixrec error: {e}"),
            Error::FlowSource(e) => write!(f, "flow source error: {e}"),
            Error::Sort(e) => write!(f, "sort error: {e}"),
            Error::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::HashTable(e) => Some(e),
            Error::Sidecar(e) => Some(e),
            Error::Fixrec(e) => Some(e),
            Error::FlowSource(e) => Some(e),
            Error::Sort(e) => Some(e),
            Error::Io(e) => Some(e),
        }
    }
}

impl From<HashTableError> for Error {
    fn from(e: HashTableError) -> Self {
        Error::HashTable(e)
    }
}

impl From<SidecarError> for Error {
    fn from(e: SidecarError) -> Self {
        Error::Sidecar(e)
    }
}

impl From<FixrecError> for Error {
    fn from(e: FixrecError) -> Self {
        Error::Fixrec(e)
    }
}

impl From<FlowSourceError> for Error {
    fn from(e: FlowSourceError) -> Self {
        Error::FlowSource(e)
    }
}

impl From<SortError> for Error {
    fn from(e: SortError) -> Self {
        Error::Sort(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
