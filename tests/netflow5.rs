use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};

use silk_flow::config::NetflowSourceConfig;
use silk_flow::netflow5::engine::EngineState;
use silk_flow::netflow5::source::Base;
use silk_flow::netflow5::records_from_datagram;
use silk_flow::ValueStore;

fn sample_pdu(seq: u32, sys_uptime_ms: u32) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&5u16.to_be_bytes());
    b.extend_from_slice(&1u16.to_be_bytes());
    b.extend_from_slice(&sys_uptime_ms.to_be_bytes());
    b.extend_from_slice(&1_700_000_000u32.to_be_bytes());
    b.extend_from_slice(&0u32.to_be_bytes());
    b.extend_from_slice(&seq.to_be_bytes());
    b.push(0);
    b.push(0);
    b.extend_from_slice(&0u16.to_be_bytes());
    b.extend_from_slice(&[10, 0, 0, 1]);
    b.extend_from_slice(&[10, 0, 0, 2]);
    b.extend_from_slice(&[0, 0, 0, 0]);
    b.extend_from_slice(&0u16.to_be_bytes());
    b.extend_from_slice(&0u16.to_be_bytes());
    b.extend_from_slice(&1u32.to_be_bytes());
    b.extend_from_slice(&100u32.to_be_bytes());
    b.extend_from_slice(&1_000u32.to_be_bytes());
    b.extend_from_slice(&2_000u32.to_be_bytes());
    b.extend_from_slice(&1234u16.to_be_bytes());
    b.extend_from_slice(&80u16.to_be_bytes());
    b.push(0);
    b.push(0);
    b.push(6);
    b.push(0);
    b.extend_from_slice(&0u16.to_be_bytes());
    b.extend_from_slice(&0u16.to_be_bytes());
    b.push(24);
    b.push(24);
    b.extend_from_slice(&0u16.to_be_bytes());
    b
}

#[test]
fn datagram_maps_to_flow_records_with_reconstructed_time() {
    let store = Arc::new(Mutex::new(ValueStore::new()));
    let mut engine = EngineState::new(0, 0);
    let records = records_from_datagram(&sample_pdu(1, 500_000), &mut engine, store).unwrap();
    assert_eq!(records.len(), 1);
    let rec = &records[0];
    assert_eq!(rec.protocol, 6);
    assert_eq!(rec.start_time_ms, 1_700_000_000_000 - 500_000 + 1_000);
    assert_eq!(rec.end_time_ms, 1_700_000_000_000 - 500_000 + 2_000);
}

fn free_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

#[test]
fn datagram_from_hex_fixture_decodes_one_record() {
    let hex = "000500010007a1206553f100000000000000002a000000000a0000010a00000200000000000000000000000100000064000003e8000007d004d20050000006000000000018180000";
    let datagram = hex::decode(hex).unwrap();
    let store = Arc::new(Mutex::new(ValueStore::new()));
    let mut engine = EngineState::new(0, 0);
    let records = records_from_datagram(&datagram, &mut engine, store).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].src_port, 1234);
    assert_eq!(records[0].dst_port, 80);
}

#[test]
fn base_collects_pdu_sent_over_real_udp_socket() {
    let port = free_port();
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let config = NetflowSourceConfig { accept_any_peer: true, ..NetflowSourceConfig::default() };
    let base = Base::get_or_bind(&[addr], config).unwrap();
    assert_eq!(base.listening_addrs(), &[addr]);

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(&sample_pdu(7, 500_000), addr).unwrap();

    let (source, result) = base.next_record().expect("a record should arrive");
    let pdu = result.expect("pdu should parse");
    assert_eq!(pdu.header.flow_sequence, 7);
    assert_eq!(pdu.records.len(), 1);
    assert_eq!(source.stats.snapshot().packets_good, 1);

    base.stop();
}

#[test]
fn base_drops_datagrams_from_unregistered_peers_by_default() {
    let port = free_port();
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let base = Base::get_or_bind(&[addr], NetflowSourceConfig::default()).unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(&sample_pdu(1, 500_000), addr).unwrap();
    // Give the reader thread a moment to queue the datagram before stopping.
    std::thread::sleep(std::time::Duration::from_millis(50));
    base.stop();

    assert!(base.next_record().is_none());
    assert!(base.sources().is_empty());
}

#[test]
fn base_dispatches_to_a_pre_registered_peer_even_without_accept_any_peer() {
    let port = free_port();
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let base = Base::get_or_bind(&[addr], NetflowSourceConfig::default()).unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    let peer_addr = sender.local_addr().unwrap().ip();
    base.register_source(peer_addr);
    sender.send_to(&sample_pdu(3, 500_000), addr).unwrap();

    let (source, result) = base.next_record().expect("a record should arrive");
    assert!(result.is_ok());
    assert_eq!(source.peer, peer_addr);

    base.stop();
}
