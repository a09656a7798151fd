//! Flow-file output header: the annotation and invocation entries carried
//! over from the sort's inputs, plus the sidecar schema installed on the
//! output.
//!
//! On the wire the whole header is one length-prefixed blob (a 32-bit
//! big-endian byte count, matching the framing [`super::record_io`] uses
//! for each record's fixed-field block), so a reader can skip straight to
//! the first record without parsing entries it doesn't care about. Inside
//! that blob, entries are framed per spec: a 32-bit big-endian entry id, a
//! 32-bit big-endian payload length, then the payload. This module only
//! knows about the three entry kinds the sort needs to round-trip:
//! free-text annotations, invocation (command-line) strings, and the
//! sidecar schema, whose payload is exactly [`SidecarSchema::encode`]'s
//! wire image.

use std::io::{self, Read, Write};

use crate::sidecar::{SidecarError, SidecarSchema};

const ANNOTATION_ENTRY_ID: u32 = 1;
const INVOCATION_ENTRY_ID: u32 = 2;
const SIDECAR_SCHEMA_ENTRY_ID: u32 = 3;

/// Header entries carried by one flow file or flow stream: free-text
/// annotations, the command lines that produced it, and the sidecar
/// schema in force for its records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowFileHeader {
    pub annotations: Vec<String>,
    pub invocations: Vec<String>,
    pub sidecar_schema: SidecarSchema,
}

impl FlowFileHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `other`'s entries into `self`: annotations and invocations are
    /// appended in input order, and the sidecar schema is unioned. Used to
    /// build a sort's output header from its inputs' headers.
    pub fn merge(&mut self, other: &FlowFileHeader) -> Result<(), SidecarError> {
        self.annotations.extend(other.annotations.iter().cloned());
        self.invocations.extend(other.invocations.iter().cloned());
        self.sidecar_schema.union(&other.sidecar_schema)
    }

    /// Builds the union of `headers` in order, as a sort's output header is
    /// assembled from every input it consumes.
    pub fn union_all(headers: &[FlowFileHeader]) -> Result<FlowFileHeader, SidecarError> {
        let mut out = FlowFileHeader::new();
        for header in headers {
            out.merge(header)?;
        }
        Ok(out)
    }

    fn encode_entries(&self) -> io::Result<Vec<u8>> {
        let mut body = Vec::new();
        for annotation in &self.annotations {
            write_entry(&mut body, ANNOTATION_ENTRY_ID, annotation.as_bytes())?;
        }
        for invocation in &self.invocations {
            write_entry(&mut body, INVOCATION_ENTRY_ID, invocation.as_bytes())?;
        }
        if !self.sidecar_schema.is_empty() {
            let payload = self
                .sidecar_schema
                .encode()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            write_entry(&mut body, SIDECAR_SCHEMA_ENTRY_ID, &payload)?;
        }
        Ok(body)
    }

    /// Writes this header as a length-prefixed blob. Always writes the
    /// 4-byte length, even when it is zero, so [`FlowFileHeader::read`]
    /// has something to read back.
    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        let body = self.encode_entries()?;
        w.write_all(&(body.len() as u32).to_be_bytes())?;
        w.write_all(&body)?;
        Ok(())
    }

    /// Reads a header previously written by [`FlowFileHeader::write`].
    pub fn read(r: &mut impl Read) -> io::Result<FlowFileHeader> {
        let mut len_buf = [0u8; 4];
        r.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        r.read_exact(&mut body)?;

        let mut header = FlowFileHeader::new();
        let mut rest = &body[..];
        while !rest.is_empty() {
            if rest.len() < 8 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated header entry"));
            }
            let id = u32::from_be_bytes(rest[0..4].try_into().unwrap());
            let entry_len = u32::from_be_bytes(rest[4..8].try_into().unwrap()) as usize;
            rest = &rest[8..];
            if rest.len() < entry_len {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated header entry payload"));
            }
            let payload = &rest[..entry_len];
            rest = &rest[entry_len..];
            match id {
                ANNOTATION_ENTRY_ID => header.annotations.push(
                    String::from_utf8(payload.to_vec()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
                ),
                INVOCATION_ENTRY_ID => header.invocations.push(
                    String::from_utf8(payload.to_vec()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
                ),
                SIDECAR_SCHEMA_ENTRY_ID => {
                    header.sidecar_schema = SidecarSchema::decode(payload)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
                }
                other => return Err(io::Error::new(io::ErrorKind::InvalidData, format!("unknown header entry id {other}"))),
            }
        }
        Ok(header)
    }
}

fn write_entry(w: &mut impl Write, id: u32, payload: &[u8]) -> io::Result<()> {
    w.write_all(&id.to_be_bytes())?;
    w.write_all(&(payload.len() as u32).to_be_bytes())?;
    w.write_all(payload)?;
    Ok(())
}
