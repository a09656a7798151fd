//! NetFlow v5 collection: wire parsing, per-engine sequence/timestamp
//! reconstruction, and the UDP listener that ties them to a [`crate::record::FlowRec`]
//! stream.

pub mod circbuf;
pub mod engine;
pub mod pdu;
pub mod source;

pub use source::{FlowSourceError, Source, SourceStats, SourceStatsSnapshot};

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use crate::record::{Addr, FlowRec};
use crate::value_store::ValueStore;
use engine::EngineState;
use pdu::{Pdu, PduRecord, PduValidationError};

const FORTY_FIVE_DAYS_MS: i64 = 45 * 24 * 60 * 60 * 1000;
const ROLLOVER_MS: i64 = 1i64 << 32;

/// Why a 48-byte wire record was not turned into a [`FlowRec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRejectReason {
    ZeroPackets,
    ZeroBytes,
    PacketsExceedBytes,
    DurationOutOfRange,
}

impl fmt::Display for RecordRejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordRejectReason::ZeroPackets => write!(f, "zero packets"),
            RecordRejectReason::ZeroBytes => write!(f, "zero bytes"),
            RecordRejectReason::PacketsExceedBytes => write!(f, "packets exceed bytes"),
            RecordRejectReason::DurationOutOfRange => write!(f, "|Last - First| exceeds 45 days"),
        }
    }
}

impl std::error::Error for RecordRejectReason {}

/// Maps one wire-format PDU record into a fixed [`FlowRec`], given the
/// router boot time and sysUptime already established for this PDU by
/// [`EngineState::observe_pdu`], applying the end-time rollover
/// correction, the ICMP source/destination port swap, and per-record
/// validation.
pub fn record_from_pdu(
    record: &PduRecord,
    sys_uptime_ms: u32,
    boot_time_ms: i64,
    store: Arc<Mutex<ValueStore>>,
) -> Result<FlowRec, RecordRejectReason> {
    if record.packets == 0 {
        return Err(RecordRejectReason::ZeroPackets);
    }
    if record.bytes == 0 {
        return Err(RecordRejectReason::ZeroBytes);
    }
    if record.packets > record.bytes {
        return Err(RecordRejectReason::PacketsExceedBytes);
    }

    let first_ms = record.first_ms as i64;
    let mut last_ms = record.last_ms as i64;
    if record.last_ms < record.first_ms {
        last_ms += ROLLOVER_MS;
    }
    let duration_ms = last_ms - first_ms;
    if duration_ms.abs() > FORTY_FIVE_DAYS_MS {
        return Err(RecordRejectReason::DurationOutOfRange);
    }

    let mut start_first_ms = first_ms;
    let uptime_diff = sys_uptime_ms as i64 - first_ms;
    if uptime_diff > FORTY_FIVE_DAYS_MS {
        start_first_ms += ROLLOVER_MS;
    } else if uptime_diff < -FORTY_FIVE_DAYS_MS {
        start_first_ms -= ROLLOVER_MS;
    }

    let (src_port, dst_port) = if record.protocol == 1 && record.dst_port == 0 {
        (record.dst_port.swap_bytes(), record.src_port.swap_bytes())
    } else {
        (record.src_port, record.dst_port)
    };

    let mut rec = FlowRec::new(store);
    rec.src_addr = Addr::V4(Ipv4Addr::from(record.src_addr));
    rec.dst_addr = Addr::V4(Ipv4Addr::from(record.dst_addr));
    rec.next_hop = Addr::V4(Ipv4Addr::from(record.next_hop));
    rec.src_port = src_port;
    rec.dst_port = dst_port;
    rec.protocol = record.protocol;
    rec.tcp_flags = record.tcp_flags;
    rec.tos = record.tos;
    rec.packets = record.packets as u64;
    rec.bytes = record.bytes as u64;
    rec.start_time_ms = boot_time_ms + start_first_ms;
    rec.end_time_ms = rec.start_time_ms + duration_ms;
    rec.input_interface = record.input_snmp as u32;
    rec.output_interface = record.output_snmp as u32;
    rec.src_as = record.src_as as u32;
    rec.dst_as = record.dst_as as u32;
    rec.src_mask = record.src_mask;
    rec.dst_mask = record.dst_mask;
    Ok(rec)
}

/// A datagram that failed PDU-level parsing or validation before any
/// records could be considered.
#[derive(Debug)]
pub enum DatagramError<'a> {
    Parse(nom::Err<nom::error::Error<&'a [u8]>>),
    InvalidPdu(PduValidationError),
}

impl fmt::Display for DatagramError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatagramError::Parse(e) => write!(f, "malformed PDU: {e}"),
            DatagramError::InvalidPdu(e) => write!(f, "invalid PDU: {e}"),
        }
    }
}

impl std::error::Error for DatagramError<'_> {}

/// Parses one datagram into flow records, folding the PDU's sequence and
/// timestamp bookkeeping into `engine`. A PDU that fails post-parse
/// validation (bad version, out-of-range count, or a datagram too short
/// for its claimed count) yields zero records. Per-record rejects are
/// silently dropped from the result, mirroring the candidate-record
/// semantics in the PDU validation invariant (a valid PDU emits exactly
/// `header.count` candidates, some of which may be rejected per-record).
pub fn records_from_datagram<'a>(
    datagram: &'a [u8],
    engine: &mut EngineState,
    store: Arc<Mutex<ValueStore>>,
) -> Result<Vec<FlowRec>, DatagramError<'a>> {
    use nom_derive::Parse;
    let (_, pdu): (_, Pdu) = Pdu::parse_be(datagram).map_err(DatagramError::Parse)?;
    pdu.validate(datagram.len()).map_err(DatagramError::InvalidPdu)?;
    let boot_time_ms = engine.observe_pdu(pdu.header.unix_secs, pdu.header.unix_nsecs, pdu.header.sys_uptime_ms);
    engine.observe_sequence(pdu.header.flow_sequence, pdu.records.len() as u32);
    Ok(pdu
        .records
        .iter()
        .filter_map(|r| record_from_pdu(r, pdu.header.sys_uptime_ms, boot_time_ms, Arc::clone(&store)).ok())
        .collect())
}
