//! Wire codec for a single record's sidecar table.
//!
//! Layout: a 4-byte header (`total_length: u16` big-endian, including the
//! header itself, followed by `element_count: u16` big-endian), then that
//! many members. A member carries no name or type on the wire at all: it is
//! `LEB128(element_id)` followed directly by the value payload, with the id
//! resolved against a [`SidecarSchema`] supplied by the caller (normally the
//! schema unioned from a stream's file header before its first record is
//! decoded). `List` elements may not themselves be lists or tables; `Table`
//! values may nest, with a nested table's members looked up in the same
//! schema under `<enclosing element's name>` + NUL + `<local key>`.
//!
//! `total_length` is a `u16`, so an encoded record is capped at 65535
//! bytes; exceeding it is reported as [`SidecarError::NoSpace`] rather than
//! silently truncated.
//!
//! Multi-byte integers are big-endian except `F64`, which is encoded as
//! little-endian IEEE-754 — the original C implementation this format
//! descends from wrote `double` with a host-endian `memcpy`, which broke
//! moving sidecar files between big- and little-endian hosts. This codec
//! fixes that by always writing `F64` little-endian.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::{SidecarError, SidecarValue};
use super::schema::{SidecarElement, SidecarSchema};

const HEADER_LEN: usize = 4;
const MAX_RECORD_LEN: usize = u16::MAX as usize;

pub const EMPTY_SIDECAR: [u8; 4] = [0x00, 0x04, 0x00, 0x00];

pub(crate) fn write_leb128(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

pub(crate) fn read_leb128(data: &[u8]) -> Result<(u64, &[u8]), SidecarError> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, &data[i + 1..]));
        }
        shift += 7;
        if shift > 63 {
            return Err(SidecarError::DecodeError("leb128 value too long".into()));
        }
    }
    Err(SidecarError::ShortData {
        needed: 1,
        available: 0,
    })
}

pub(crate) fn type_tag_byte(t: super::SidecarType) -> u8 {
    use super::SidecarType::*;
    match t {
        U8 => 0,
        U16 => 1,
        U32 => 2,
        U64 => 3,
        F64 => 4,
        Str => 5,
        Binary => 6,
        Addr => 7,
        DateTimeMillis => 8,
        Bool => 9,
        Empty => 10,
        List => 11,
        Table => 12,
    }
}

pub(crate) fn type_tag_from_byte(b: u8) -> Result<super::SidecarType, SidecarError> {
    use super::SidecarType::*;
    Ok(match b {
        0 => U8,
        1 => U16,
        2 => U32,
        3 => U64,
        4 => F64,
        5 => Str,
        6 => Binary,
        7 => Addr,
        8 => DateTimeMillis,
        9 => Bool,
        10 => Empty,
        11 => List,
        12 => Table,
        other => return Err(SidecarError::DecodeError(format!("unknown type tag {other}"))),
    })
}

fn encode_scalar(out: &mut Vec<u8>, value: &SidecarValue) -> Result<(), SidecarError> {
    match value {
        SidecarValue::U8(v) => out.push(*v),
        SidecarValue::U16(v) => out.extend_from_slice(&v.to_be_bytes()),
        SidecarValue::U32(v) => out.extend_from_slice(&v.to_be_bytes()),
        SidecarValue::U64(v) => out.extend_from_slice(&v.to_be_bytes()),
        SidecarValue::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
        SidecarValue::Bool(v) => out.push(if *v { 1 } else { 0 }),
        SidecarValue::DateTimeMillis(v) => out.extend_from_slice(&v.to_be_bytes()),
        SidecarValue::Str(s) => {
            write_leb128(out, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
        SidecarValue::Binary(b) => {
            write_leb128(out, b.len() as u64);
            out.extend_from_slice(b);
        }
        SidecarValue::Addr(IpAddr::V4(addr)) => {
            out.push(4);
            out.extend_from_slice(&addr.octets());
        }
        SidecarValue::Addr(IpAddr::V6(addr)) => {
            out.push(6);
            out.extend_from_slice(&addr.octets());
        }
        SidecarValue::Empty => {}
        SidecarValue::List(_) | SidecarValue::Table(_) => {
            return Err(SidecarError::BadParam("list elements must not be list or table"));
        }
    }
    Ok(())
}

fn decode_scalar(tag: super::SidecarType, data: &[u8]) -> Result<(SidecarValue, &[u8]), SidecarError> {
    use super::SidecarType::*;
    let need = |n: usize| -> Result<(), SidecarError> {
        if data.len() < n {
            Err(SidecarError::ShortData {
                needed: n,
                available: data.len(),
            })
        } else {
            Ok(())
        }
    };
    Ok(match tag {
        U8 => {
            need(1)?;
            (SidecarValue::U8(data[0]), &data[1..])
        }
        U16 => {
            need(2)?;
            (SidecarValue::U16(u16::from_be_bytes([data[0], data[1]])), &data[2..])
        }
        U32 => {
            need(4)?;
            (
                SidecarValue::U32(u32::from_be_bytes(data[0..4].try_into().unwrap())),
                &data[4..],
            )
        }
        U64 => {
            need(8)?;
            (
                SidecarValue::U64(u64::from_be_bytes(data[0..8].try_into().unwrap())),
                &data[8..],
            )
        }
        F64 => {
            need(8)?;
            (
                SidecarValue::F64(f64::from_le_bytes(data[0..8].try_into().unwrap())),
                &data[8..],
            )
        }
        Bool => {
            need(1)?;
            (SidecarValue::Bool(data[0] != 0), &data[1..])
        }
        DateTimeMillis => {
            need(8)?;
            (
                SidecarValue::DateTimeMillis(i64::from_be_bytes(data[0..8].try_into().unwrap())),
                &data[8..],
            )
        }
        Str => {
            let (len, rest) = read_leb128(data)?;
            need_slice(rest, len as usize)?;
            let s = String::from_utf8(rest[..len as usize].to_vec())
                .map_err(|e| SidecarError::DecodeError(e.to_string()))?;
            (SidecarValue::Str(s), &rest[len as usize..])
        }
        Binary => {
            let (len, rest) = read_leb128(data)?;
            need_slice(rest, len as usize)?;
            (SidecarValue::Binary(rest[..len as usize].to_vec()), &rest[len as usize..])
        }
        Addr => {
            need(1)?;
            match data[0] {
                4 => {
                    need(5)?;
                    let octets: [u8; 4] = data[1..5].try_into().unwrap();
                    (SidecarValue::Addr(IpAddr::V4(Ipv4Addr::from(octets))), &data[5..])
                }
                6 => {
                    need(17)?;
                    let octets: [u8; 16] = data[1..17].try_into().unwrap();
                    (SidecarValue::Addr(IpAddr::V6(Ipv6Addr::from(octets))), &data[17..])
                }
                other => return Err(SidecarError::DecodeError(format!("bad address family {other}"))),
            }
        }
        Empty => (SidecarValue::Empty, data),
        List | Table => return Err(SidecarError::DecodeError("list/table not valid as scalar".into())),
    })
}

pub(crate) fn need_slice(data: &[u8], n: usize) -> Result<(), SidecarError> {
    if data.len() < n {
        Err(SidecarError::ShortData {
            needed: n,
            available: data.len(),
        })
    } else {
        Ok(())
    }
}

/// Looks up `full_name`'s dense id, the only thing a record member carries
/// on the wire to identify itself. A name absent from `schema` is a
/// programmer error: every field written into a record's sidecar table
/// must already have been declared (typically by unioning the schema read
/// from a file header before any record is decoded).
fn resolve_id(schema: &SidecarSchema, full_name: &[u8]) -> Result<u32, SidecarError> {
    debug_assert!(
        schema.by_name(full_name).is_some(),
        "sidecar field not declared in schema: {}",
        String::from_utf8_lossy(full_name)
    );
    schema
        .by_name(full_name)
        .map(|e| e.id)
        .ok_or(SidecarError::BadParam("sidecar field not declared in schema"))
}

fn encode_member(
    out: &mut Vec<u8>,
    schema: &SidecarSchema,
    full_name: &[u8],
    value: &SidecarValue,
) -> Result<(), SidecarError> {
    let id = resolve_id(schema, full_name)?;
    write_leb128(out, id as u64);
    encode_value(out, schema, full_name, value)
}

fn encode_length_prefixed(out: &mut Vec<u8>, count: usize, body: &[u8]) -> Result<(), SidecarError> {
    let total_len = HEADER_LEN + body.len();
    if total_len > MAX_RECORD_LEN {
        return Err(SidecarError::NoSpace);
    }
    out.extend_from_slice(&(total_len as u16).to_be_bytes());
    out.extend_from_slice(&(count as u16).to_be_bytes());
    out.extend_from_slice(body);
    Ok(())
}

fn encode_value(
    out: &mut Vec<u8>,
    schema: &SidecarSchema,
    full_name: &[u8],
    value: &SidecarValue,
) -> Result<(), SidecarError> {
    match value {
        SidecarValue::List(items) => {
            value
                .list_element_type()
                .ok_or(SidecarError::BadParam("list must be homogeneous, non-composite"))?;
            let mut body = Vec::new();
            for item in items {
                encode_scalar(&mut body, item)?;
            }
            encode_length_prefixed(out, items.len(), &body)
        }
        SidecarValue::Table(fields) => {
            let mut body = Vec::new();
            for (k, v) in fields {
                let mut child_name = full_name.to_vec();
                child_name.push(0);
                child_name.extend_from_slice(k.as_bytes());
                encode_member(&mut body, schema, &child_name, v)?;
            }
            encode_length_prefixed(out, fields.len(), &body)
        }
        scalar => encode_scalar(out, scalar),
    }
}

fn decode_member<'a>(
    data: &'a [u8],
    schema: &SidecarSchema,
) -> Result<((Vec<u8>, SidecarValue), &'a [u8]), SidecarError> {
    let (id, rest) = read_leb128(data)?;
    let element = schema
        .by_id(id as u32)
        .ok_or_else(|| SidecarError::DecodeError(format!("unknown sidecar element id {id}")))?;
    let (value, rest) = decode_value(rest, schema, element)?;
    Ok(((element.name.clone(), value), rest))
}

fn decode_value<'a>(
    data: &'a [u8],
    schema: &SidecarSchema,
    element: &SidecarElement,
) -> Result<(SidecarValue, &'a [u8]), SidecarError> {
    match element.data_type {
        super::SidecarType::List => {
            need_slice(data, HEADER_LEN)?;
            let total_len = u16::from_be_bytes([data[0], data[1]]) as usize;
            let count = u16::from_be_bytes([data[2], data[3]]) as usize;
            need_slice(data, total_len)?;
            let elem_tag = element
                .list_element_type
                .ok_or(SidecarError::DecodeError("list element declared no element type".into()))?;
            let mut cursor = &data[HEADER_LEN..total_len];
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                let (item, next) = decode_scalar(elem_tag, cursor)?;
                items.push(item);
                cursor = next;
            }
            Ok((SidecarValue::List(items), &data[total_len..]))
        }
        super::SidecarType::Table => {
            need_slice(data, HEADER_LEN)?;
            let total_len = u16::from_be_bytes([data[0], data[1]]) as usize;
            let count = u16::from_be_bytes([data[2], data[3]]) as usize;
            need_slice(data, total_len)?;
            let mut cursor = &data[HEADER_LEN..total_len];
            let mut table = std::collections::BTreeMap::new();
            let prefix_len = element.name.len() + 1;
            for _ in 0..count {
                let ((full_name, v), next) = decode_member(cursor, schema)?;
                if full_name.len() < prefix_len {
                    return Err(SidecarError::DecodeError("table member name shorter than its table's prefix".into()));
                }
                let local = String::from_utf8_lossy(&full_name[prefix_len..]).into_owned();
                table.insert(local, v);
                cursor = next;
            }
            Ok((SidecarValue::Table(table), &data[total_len..]))
        }
        scalar_tag => decode_scalar(scalar_tag, data),
    }
}

/// Encodes a table of sidecar values into the wire format described above.
/// Every field name in `table` (and, recursively, every nested table
/// member's full dotted path) must already be declared in `schema`.
pub fn encode(schema: &SidecarSchema, table: &std::collections::BTreeMap<String, SidecarValue>) -> Result<Vec<u8>, SidecarError> {
    if table.is_empty() {
        return Ok(EMPTY_SIDECAR.to_vec());
    }
    let mut body = Vec::new();
    for (name, value) in table {
        encode_member(&mut body, schema, name.as_bytes(), value)?;
    }
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    encode_length_prefixed(&mut out, table.len(), &body)?;
    Ok(out)
}

/// Decodes a sidecar table previously produced by [`encode`], resolving
/// each member's element id against `schema`.
pub fn decode(schema: &SidecarSchema, data: &[u8]) -> Result<std::collections::BTreeMap<String, SidecarValue>, SidecarError> {
    need_slice(data, HEADER_LEN)?;
    let total_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    let count = u16::from_be_bytes([data[2], data[3]]) as usize;
    need_slice(data, total_len)?;
    let mut rest = &data[HEADER_LEN..total_len];
    let mut table = std::collections::BTreeMap::new();
    for _ in 0..count {
        let ((name, value), next) = decode_member(rest, schema)?;
        table.insert(String::from_utf8_lossy(&name).into_owned(), value);
        rest = next;
    }
    Ok(table)
}

/// Builds a [`SidecarSchema`] describing the shape of `table`, for use
/// when publishing a stream's schema the first time a sidecar is seen.
/// Recurses into nested tables, declaring each member under its parent's
/// name + NUL + local key, matching how [`encode`]/[`decode`] resolve them.
pub fn schema_of(table: &std::collections::BTreeMap<String, SidecarValue>) -> Result<SidecarSchema, SidecarError> {
    let mut schema = SidecarSchema::new();
    for (name, value) in table {
        add_element_recursive(&mut schema, name.as_bytes(), value)?;
    }
    Ok(schema)
}

fn add_element_recursive(schema: &mut SidecarSchema, full_name: &[u8], value: &SidecarValue) -> Result<(), SidecarError> {
    let mut element = SidecarElement::new(full_name.to_vec(), 0, value.type_tag());
    element.list_element_type = value.list_element_type();
    schema.add(element)?;
    if let SidecarValue::Table(fields) = value {
        for (k, v) in fields {
            let mut child_name = full_name.to_vec();
            child_name.push(0);
            child_name.extend_from_slice(k.as_bytes());
            add_element_recursive(schema, &child_name, v)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn empty_table_encodes_to_canonical_bytes() {
        let table = BTreeMap::new();
        let schema = SidecarSchema::new();
        assert_eq!(encode(&schema, &table).unwrap(), EMPTY_SIDECAR.to_vec());
    }

    #[test]
    fn roundtrip_scalars() {
        let mut table = BTreeMap::new();
        table.insert("count".to_string(), SidecarValue::U32(42));
        table.insert("name".to_string(), SidecarValue::Str("hello".to_string()));
        table.insert("ratio".to_string(), SidecarValue::F64(1.5));
        table.insert(
            "src".to_string(),
            SidecarValue::Addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
        );
        let schema = schema_of(&table).unwrap();
        let encoded = encode(&schema, &table).unwrap();
        let decoded = decode(&schema, &encoded).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn roundtrip_list_and_table() {
        let mut table = BTreeMap::new();
        table.insert(
            "tags".to_string(),
            SidecarValue::List(vec![SidecarValue::U16(1), SidecarValue::U16(2)]),
        );
        let mut nested = BTreeMap::new();
        nested.insert("k".to_string(), SidecarValue::Bool(true));
        table.insert("meta".to_string(), SidecarValue::Table(nested));
        let schema = schema_of(&table).unwrap();
        let encoded = encode(&schema, &table).unwrap();
        let decoded = decode(&schema, &encoded).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn double_is_little_endian_on_wire() {
        let mut table = BTreeMap::new();
        table.insert("x".to_string(), SidecarValue::F64(1.0));
        let schema = schema_of(&table).unwrap();
        let encoded = encode(&schema, &table).unwrap();
        // value payload is the last 8 bytes; 1.0f64 little-endian starts
        // with zero bytes and ends in 0x3f 0xf0.
        let payload = &encoded[encoded.len() - 8..];
        assert_eq!(payload[7], 0x3f);
        assert_eq!(payload[6], 0xf0);
    }

    #[test]
    fn nested_list_in_list_is_rejected_at_encode() {
        let mut table = BTreeMap::new();
        table.insert(
            "bad".to_string(),
            SidecarValue::List(vec![SidecarValue::List(vec![SidecarValue::U8(1)])]),
        );
        let mut schema = SidecarSchema::new();
        schema.add(SidecarElement::new("bad", 0, super::super::SidecarType::List)).unwrap();
        assert!(encode(&schema, &table).is_err());
    }

    #[test]
    fn member_id_unknown_to_the_schema_is_a_decode_error() {
        // LEB128 id 9 followed by a zero-length BINARY payload, inside an
        // otherwise well-formed one-member record.
        let body = [9u8, 6, 0];
        let mut data = Vec::new();
        data.extend_from_slice(&((HEADER_LEN + body.len()) as u16).to_be_bytes());
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&body);
        let schema = SidecarSchema::new();
        let err = decode(&schema, &data).unwrap_err();
        assert!(matches!(err, SidecarError::DecodeError(_)));
    }

    #[test]
    fn nested_table_members_resolve_through_the_parent_elements_name() {
        let mut nested = BTreeMap::new();
        nested.insert("a".to_string(), SidecarValue::U8(1));
        nested.insert("b".to_string(), SidecarValue::U8(2));
        let mut table = BTreeMap::new();
        table.insert("outer".to_string(), SidecarValue::Table(nested));
        let schema = schema_of(&table).unwrap();
        assert!(schema.by_name(b"outer\0a").is_some());
        assert!(schema.by_name(b"outer\0b").is_some());
        let encoded = encode(&schema, &table).unwrap();
        let decoded = decode(&schema, &encoded).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn short_data_is_reported() {
        let schema = SidecarSchema::new();
        let err = decode(&schema, &[0, 4]).unwrap_err();
        assert!(matches!(err, SidecarError::ShortData { .. }));
    }
}
