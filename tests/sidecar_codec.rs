use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

use silk_flow::sidecar::codec;
use silk_flow::sidecar::SidecarValue;

#[test]
fn mixed_table_roundtrips_through_encode_decode() {
    let mut table = BTreeMap::new();
    table.insert("octets".to_string(), SidecarValue::U64(123_456));
    table.insert(
        "gateway".to_string(),
        SidecarValue::Addr(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))),
    );
    table.insert(
        "sampled".to_string(),
        SidecarValue::List(vec![SidecarValue::U8(1), SidecarValue::U8(0), SidecarValue::U8(1)]),
    );

    let schema = codec::schema_of(&table).unwrap();
    let encoded = codec::encode(&schema, &table).unwrap();
    let decoded = codec::decode(&schema, &encoded).unwrap();
    assert_eq!(decoded, table);
}

#[test]
fn schema_of_describes_field_types() {
    let mut table = BTreeMap::new();
    table.insert("tag".to_string(), SidecarValue::Str("blue".to_string()));
    table.insert("score".to_string(), SidecarValue::F64(0.5));

    let schema = codec::schema_of(&table).unwrap();
    assert_eq!(schema.len(), 2);
    assert!(schema.by_name(b"tag").is_some());
    assert!(schema.by_name(b"score").is_some());
}

#[test]
fn empty_table_is_canonical_four_bytes() {
    let table = BTreeMap::new();
    let schema = silk_flow::sidecar::SidecarSchema::new();
    let encoded = codec::encode(&schema, &table).unwrap();
    assert_eq!(encoded, codec::EMPTY_SIDECAR.to_vec());
    assert!(codec::decode(&schema, &encoded).unwrap().is_empty());
}
