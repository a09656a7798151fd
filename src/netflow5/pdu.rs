//! Wire layout of a NetFlow v5 PDU: a 24-byte header followed by up to 30
//! fixed 48-byte flow records, parsed with `nom_derive` the way the
//! original v5 template struct does.

use std::fmt;

use nom::number::complete::be_u32;
use nom_derive::Nom;

pub const HEADER_LEN: usize = 24;
pub const RECORD_LEN: usize = 48;
pub const MAX_RECORDS_PER_PDU: usize = 30;
pub const NETFLOW_V5_VERSION: u16 = 5;

/// A parsed PDU whose header claims a version or record count the wire
/// layout does not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduValidationError {
    /// `header.version` was not 5.
    WrongVersion(u16),
    /// `header.count` was 0 or exceeded [`MAX_RECORDS_PER_PDU`].
    CountOutOfRange(u16),
    /// The datagram was shorter than `24 + 48 * header.count` bytes.
    Truncated { declared_count: u16, datagram_len: usize },
}

impl fmt::Display for PduValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PduValidationError::WrongVersion(v) => write!(f, "not a NetFlow v5 PDU (version {v})"),
            PduValidationError::CountOutOfRange(n) => write!(f, "record count {n} out of range [1,{MAX_RECORDS_PER_PDU}]"),
            PduValidationError::Truncated { declared_count, datagram_len } => write!(
                f,
                "datagram of {datagram_len} bytes too short for {declared_count} records"
            ),
        }
    }
}

impl std::error::Error for PduValidationError {}

#[derive(Debug, Clone, Nom)]
pub struct PduHeader {
    pub version: u16,
    pub count: u16,
    pub sys_uptime_ms: u32,
    pub unix_secs: u32,
    pub unix_nsecs: u32,
    pub flow_sequence: u32,
    pub engine_type: u8,
    pub engine_id: u8,
    /// High 2 bits: sampling mode; low 14 bits: sampling interval.
    pub sampling: u16,
}

#[derive(Debug, Clone, Nom)]
pub struct PduRecord {
    #[nom(Parse = "be_u32")]
    pub src_addr: u32,
    #[nom(Parse = "be_u32")]
    pub dst_addr: u32,
    #[nom(Parse = "be_u32")]
    pub next_hop: u32,
    pub input_snmp: u16,
    pub output_snmp: u16,
    pub packets: u32,
    pub bytes: u32,
    pub first_ms: u32,
    pub last_ms: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub pad1: u8,
    pub tcp_flags: u8,
    pub protocol: u8,
    pub tos: u8,
    pub src_as: u16,
    pub dst_as: u16,
    pub src_mask: u8,
    pub dst_mask: u8,
    pub pad2: u16,
}

#[derive(Debug, Clone, Nom)]
pub struct Pdu {
    pub header: PduHeader,
    #[nom(Count = "header.count")]
    pub records: Vec<PduRecord>,
}

impl PduHeader {
    pub fn sampling_interval(&self) -> u16 {
        self.sampling & 0x3fff
    }

    pub fn sampling_mode(&self) -> u8 {
        ((self.sampling >> 14) & 0x3) as u8
    }
}

impl Pdu {
    /// Validates a parsed PDU against the wire checks that parsing alone
    /// does not enforce: version, record-count bounds, and that the
    /// originating datagram was long enough for the claimed record count.
    /// `nom`'s `Count` parse already fails if fewer records are present
    /// than `header.count` claims, but it never rejects an in-range
    /// `version` or caps `count` at [`MAX_RECORDS_PER_PDU`].
    pub fn validate(&self, datagram_len: usize) -> Result<(), PduValidationError> {
        if self.header.version != NETFLOW_V5_VERSION {
            return Err(PduValidationError::WrongVersion(self.header.version));
        }
        if self.header.count == 0 || self.header.count as usize > MAX_RECORDS_PER_PDU {
            return Err(PduValidationError::CountOutOfRange(self.header.count));
        }
        let required = HEADER_LEN + RECORD_LEN * self.header.count as usize;
        if datagram_len < required {
            return Err(PduValidationError::Truncated { declared_count: self.header.count, datagram_len });
        }
        Ok(())
    }
}
