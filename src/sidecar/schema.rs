//! Self-describing sidecar schema: an ordered, name-unique, densely-id'd
//! registry of the fields a stream's sidecar tables may carry.
//!
//! Wire format: 16-bit version (currently 1), 16-bit element count, then
//! per element a 16-bit entry length followed by a LEB128 name length, the
//! name bytes, a 1-byte type code, a second 1-byte element-type code if the
//! type is `LIST`, and then optionally a 16-bit IPFIX element id and a
//! 32-bit private enterprise number. Whether the IPFIX fields are present
//! is inferred purely from how much of the entry's declared length is left
//! after the name and type code(s) — 0 bytes means absent, 2 means an id
//! with no enterprise number, 6 means both.

use super::codec::{read_leb128, type_tag_byte, type_tag_from_byte, write_leb128};
use super::{SidecarError, SidecarType};

const SCHEMA_VERSION: u16 = 1;

/// One field descriptor in a [`SidecarSchema`].
#[derive(Debug, Clone, PartialEq)]
pub struct SidecarElement {
    pub name: Vec<u8>,
    pub id: u32,
    pub data_type: SidecarType,
    pub list_element_type: Option<SidecarType>,
    /// When this element was learned from an IPFIX information element,
    /// its `(enterprise, element id)` identity, for round-tripping through
    /// a fixrec schema without losing the mapping.
    pub ipfix_ident: Option<(u32, u16)>,
}

impl SidecarElement {
    pub fn new(name: impl Into<Vec<u8>>, id: u32, data_type: SidecarType) -> Self {
        Self {
            name: name.into(),
            id,
            data_type,
            list_element_type: None,
            ipfix_ident: None,
        }
    }
}

/// Ordered collection of [`SidecarElement`]s. Names are unique; ids are
/// dense starting at zero and assigned in insertion order, matching the
/// wire format's implicit-id convention (ids are never carried on the
/// wire, only names and types are).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SidecarSchema {
    elements: Vec<SidecarElement>,
}

impl SidecarSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn elements(&self) -> &[SidecarElement] {
        &self.elements
    }

    pub fn by_name(&self, name: &[u8]) -> Option<&SidecarElement> {
        self.elements.iter().find(|e| e.name == name)
    }

    pub fn by_id(&self, id: u32) -> Option<&SidecarElement> {
        self.elements.get(id as usize)
    }

    /// Appends a new element, assigning it the next dense id. Returns
    /// [`SidecarError::Duplicate`] if the name already exists with a
    /// different type; silently succeeds (returning the existing id) if an
    /// identical descriptor is re-added, so [`SidecarSchema::union`] can
    /// call this unconditionally while merging several schemas.
    pub fn add(&mut self, mut element: SidecarElement) -> Result<u32, SidecarError> {
        if element.name.is_empty() {
            return Err(SidecarError::BadParam("sidecar field name must not be empty"));
        }
        if let Some(existing) = self.by_name(&element.name) {
            if existing.data_type == element.data_type
                && existing.list_element_type == element.list_element_type
            {
                return Ok(existing.id);
            }
            return Err(SidecarError::Duplicate(
                String::from_utf8_lossy(&element.name).into_owned(),
            ));
        }
        let id = self.elements.len() as u32;
        element.id = id;
        self.elements.push(element);
        Ok(id)
    }

    /// Merges `other` into `self` in place, field by field, tolerating
    /// identical duplicate descriptors (the common case when two input
    /// streams were produced by the same exporter) and propagating any
    /// genuine conflict.
    pub fn union(&mut self, other: &SidecarSchema) -> Result<(), SidecarError> {
        for element in other.elements() {
            self.add(element.clone())?;
        }
        Ok(())
    }

    /// Serializes this schema as a file-header entry payload.
    pub fn encode(&self) -> Result<Vec<u8>, SidecarError> {
        let mut out = Vec::new();
        out.extend_from_slice(&SCHEMA_VERSION.to_be_bytes());
        out.extend_from_slice(&(self.elements.len() as u16).to_be_bytes());
        for element in &self.elements {
            let mut content = Vec::new();
            write_leb128(&mut content, element.name.len() as u64);
            content.extend_from_slice(&element.name);
            content.push(type_tag_byte(element.data_type));
            if element.data_type == SidecarType::List {
                let elem_type = element
                    .list_element_type
                    .ok_or(SidecarError::BadParam("LIST element must declare its element type"))?;
                content.push(type_tag_byte(elem_type));
            }
            if let Some((pen, id)) = element.ipfix_ident {
                content.extend_from_slice(&id.to_be_bytes());
                content.extend_from_slice(&pen.to_be_bytes());
            }
            if content.len() > u16::MAX as usize {
                return Err(SidecarError::NoSpace);
            }
            out.extend_from_slice(&(content.len() as u16).to_be_bytes());
            out.extend_from_slice(&content);
        }
        Ok(out)
    }

    /// Deserializes a schema previously produced by [`SidecarSchema::encode`].
    pub fn decode(data: &[u8]) -> Result<SidecarSchema, SidecarError> {
        need(data, 4)?;
        let version = u16::from_be_bytes([data[0], data[1]]);
        if version != SCHEMA_VERSION {
            return Err(SidecarError::DecodeError(format!("unsupported sidecar schema version {version}")));
        }
        let count = u16::from_be_bytes([data[2], data[3]]) as usize;
        let mut rest = &data[4..];
        let mut schema = SidecarSchema::new();
        for _ in 0..count {
            need(rest, 2)?;
            let entry_len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
            rest = &rest[2..];
            need(rest, entry_len)?;
            let content = &rest[..entry_len];
            rest = &rest[entry_len..];

            let (name_len, after_name_len) = read_leb128(content)?;
            need(after_name_len, name_len as usize)?;
            let name = after_name_len[..name_len as usize].to_vec();
            let after_name = &after_name_len[name_len as usize..];
            need(after_name, 1)?;
            let data_type = type_tag_from_byte(after_name[0])?;
            let mut cursor = &after_name[1..];

            let list_element_type = if data_type == SidecarType::List {
                need(cursor, 1)?;
                let t = type_tag_from_byte(cursor[0])?;
                cursor = &cursor[1..];
                Some(t)
            } else {
                None
            };

            let ipfix_ident = match cursor.len() {
                0 => None,
                2 => Some((0u32, u16::from_be_bytes([cursor[0], cursor[1]]))),
                6 => {
                    let id = u16::from_be_bytes([cursor[0], cursor[1]]);
                    let pen = u32::from_be_bytes(cursor[2..6].try_into().unwrap());
                    Some((pen, id))
                }
                other => return Err(SidecarError::DecodeError(format!("bad ipfix-ident trailer length {other}"))),
            };

            let mut element = SidecarElement::new(name, 0, data_type);
            element.list_element_type = list_element_type;
            element.ipfix_ident = ipfix_ident;
            schema.add(element)?;
        }
        Ok(schema)
    }
}

fn need(data: &[u8], n: usize) -> Result<(), SidecarError> {
    if data.len() < n {
        Err(SidecarError::ShortData { needed: n, available: data.len() })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_assigns_dense_ids_in_order() {
        let mut schema = SidecarSchema::new();
        let a = schema.add(SidecarElement::new("a", 0, SidecarType::U32)).unwrap();
        let b = schema.add(SidecarElement::new("b", 0, SidecarType::Str)).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
    }

    #[test]
    fn add_rejects_conflicting_redefinition() {
        let mut schema = SidecarSchema::new();
        schema.add(SidecarElement::new("a", 0, SidecarType::U32)).unwrap();
        let err = schema
            .add(SidecarElement::new("a", 0, SidecarType::Str))
            .unwrap_err();
        assert!(matches!(err, SidecarError::Duplicate(_)));
    }

    #[test]
    fn add_tolerates_identical_redefinition() {
        let mut schema = SidecarSchema::new();
        let id1 = schema.add(SidecarElement::new("a", 0, SidecarType::U32)).unwrap();
        let id2 = schema.add(SidecarElement::new("a", 0, SidecarType::U32)).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(schema.len(), 1);
    }

    #[test]
    fn union_merges_two_schemas() {
        let mut a = SidecarSchema::new();
        a.add(SidecarElement::new("x", 0, SidecarType::U32)).unwrap();
        let mut b = SidecarSchema::new();
        b.add(SidecarElement::new("y", 0, SidecarType::Str)).unwrap();
        a.union(&b).unwrap();
        assert_eq!(a.len(), 2);
        assert!(a.by_name(b"y").is_some());
    }

    #[test]
    fn by_id_looks_up_the_dense_insertion_order_id() {
        let mut schema = SidecarSchema::new();
        schema.add(SidecarElement::new("x", 0, SidecarType::U32)).unwrap();
        schema.add(SidecarElement::new("y", 0, SidecarType::Str)).unwrap();
        assert_eq!(schema.by_id(0).unwrap().name, b"x");
        assert_eq!(schema.by_id(1).unwrap().name, b"y");
        assert!(schema.by_id(2).is_none());
    }

    #[test]
    fn encode_decode_roundtrips_a_mixed_schema() {
        let mut schema = SidecarSchema::new();
        schema.add(SidecarElement::new("count", 0, SidecarType::U32)).unwrap();
        let mut list_elem = SidecarElement::new("tags", 0, SidecarType::List);
        list_elem.list_element_type = Some(SidecarType::U16);
        schema.add(list_elem).unwrap();
        let mut ipfix_elem = SidecarElement::new("octets", 0, SidecarType::U64);
        ipfix_elem.ipfix_ident = Some((0, 1));
        schema.add(ipfix_elem).unwrap();
        let mut enterprise_elem = SidecarElement::new("custom", 0, SidecarType::Str);
        enterprise_elem.ipfix_ident = Some((12345, 200));
        schema.add(enterprise_elem).unwrap();

        let bytes = schema.encode().unwrap();
        let decoded = SidecarSchema::decode(&bytes).unwrap();
        assert_eq!(decoded, schema);
    }

    #[test]
    fn encode_starts_with_version_one_and_element_count() {
        let mut schema = SidecarSchema::new();
        schema.add(SidecarElement::new("a", 0, SidecarType::Bool)).unwrap();
        let bytes = schema.encode().unwrap();
        assert_eq!(&bytes[0..2], &1u16.to_be_bytes());
        assert_eq!(&bytes[2..4], &1u16.to_be_bytes());
    }

    #[test]
    fn decode_rejects_an_unknown_version() {
        let bytes = [0, 2, 0, 0];
        let err = SidecarSchema::decode(&bytes).unwrap_err();
        assert!(matches!(err, SidecarError::DecodeError(_)));
    }

    #[test]
    fn decode_of_empty_schema_roundtrips() {
        let schema = SidecarSchema::new();
        let bytes = schema.encode().unwrap();
        assert_eq!(bytes, vec![0, 1, 0, 0]);
        assert_eq!(SidecarSchema::decode(&bytes).unwrap(), schema);
    }
}
