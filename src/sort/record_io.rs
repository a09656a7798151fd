//! On-disk encoding for one [`FlowRec`], used by the external sort's temp
//! files. Fixed fields are written as a flat big-endian struct; the
//! sidecar table (if any) follows, encoded with [`crate::sidecar::codec`]
//! against the run's shared [`SidecarSchema`] so temp files never carry
//! field names or types inline.

use std::io::{self, Read, Write};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use crate::record::{Addr, FlowRec};
use crate::sidecar::codec;
use crate::sidecar::SidecarSchema;
use crate::value_store::ValueStore;

const FIXED_LEN: usize = 4 + 4 + 4 + 2 + 2 + 1 + 1 + 1 + 8 + 8 + 8 + 8 + 4 + 4 + 4 + 4 + 1 + 1;

fn addr_to_u32(addr: Addr) -> u32 {
    match addr {
        Addr::V4(a) => u32::from(a),
        Addr::V6(_) => 0,
    }
}

pub fn write_record(w: &mut impl Write, rec: &FlowRec, schema: &SidecarSchema) -> io::Result<()> {
    let mut fixed = Vec::with_capacity(FIXED_LEN);
    fixed.extend_from_slice(&addr_to_u32(rec.src_addr).to_be_bytes());
    fixed.extend_from_slice(&addr_to_u32(rec.dst_addr).to_be_bytes());
    fixed.extend_from_slice(&addr_to_u32(rec.next_hop).to_be_bytes());
    fixed.extend_from_slice(&rec.src_port.to_be_bytes());
    fixed.extend_from_slice(&rec.dst_port.to_be_bytes());
    fixed.push(rec.protocol);
    fixed.push(rec.tcp_flags);
    fixed.push(rec.tos);
    fixed.extend_from_slice(&rec.packets.to_be_bytes());
    fixed.extend_from_slice(&rec.bytes.to_be_bytes());
    fixed.extend_from_slice(&rec.start_time_ms.to_be_bytes());
    fixed.extend_from_slice(&rec.end_time_ms.to_be_bytes());
    fixed.extend_from_slice(&rec.input_interface.to_be_bytes());
    fixed.extend_from_slice(&rec.output_interface.to_be_bytes());
    fixed.extend_from_slice(&rec.src_as.to_be_bytes());
    fixed.extend_from_slice(&rec.dst_as.to_be_bytes());
    fixed.push(rec.src_mask);
    fixed.push(rec.dst_mask);
    debug_assert_eq!(fixed.len(), FIXED_LEN);

    let sidecar_bytes = match rec.sidecar_handle() {
        crate::value_store::SidecarHandle::None => codec::EMPTY_SIDECAR.to_vec(),
        _ => {
            // Record holds its own store reference; reconstruct the table
            // through the public accessor rather than reaching past it.
            let mut table = std::collections::BTreeMap::new();
            for name in rec.sidecar_field_names() {
                if let Some(value) = rec.sidecar_value(&name) {
                    table.insert(name, value);
                }
            }
            codec::encode(schema, &table).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?
        }
    };

    w.write_all(&(FIXED_LEN as u32).to_be_bytes())?;
    w.write_all(&fixed)?;
    w.write_all(&sidecar_bytes)?;
    Ok(())
}

pub fn read_record(
    r: &mut impl Read,
    store: Arc<Mutex<ValueStore>>,
    schema: &SidecarSchema,
) -> io::Result<Option<FlowRec>> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let fixed_len = u32::from_be_bytes(len_buf) as usize;
    let mut fixed = vec![0u8; fixed_len];
    r.read_exact(&mut fixed)?;

    let mut header = [0u8; 4];
    r.read_exact(&mut header[..2])?;
    let total_len = u16::from_be_bytes([header[0], header[1]]) as usize;
    r.read_exact(&mut header[2..4])?;
    let mut sidecar_bytes = vec![0u8; total_len];
    sidecar_bytes[0] = header[0];
    sidecar_bytes[1] = header[1];
    sidecar_bytes[2] = header[2];
    sidecar_bytes[3] = header[3];
    if total_len > 4 {
        r.read_exact(&mut sidecar_bytes[4..])?;
    }

    let mut rec = FlowRec::new(store);
    let mut cursor = &fixed[..];
    let take4 = |c: &mut &[u8]| -> u32 {
        let v = u32::from_be_bytes(c[..4].try_into().unwrap());
        *c = &c[4..];
        v
    };
    let take2 = |c: &mut &[u8]| -> u16 {
        let v = u16::from_be_bytes(c[..2].try_into().unwrap());
        *c = &c[2..];
        v
    };
    let take1 = |c: &mut &[u8]| -> u8 {
        let v = c[0];
        *c = &c[1..];
        v
    };
    let take8i = |c: &mut &[u8]| -> i64 {
        let v = i64::from_be_bytes(c[..8].try_into().unwrap());
        *c = &c[8..];
        v
    };
    let take8u = |c: &mut &[u8]| -> u64 {
        let v = u64::from_be_bytes(c[..8].try_into().unwrap());
        *c = &c[8..];
        v
    };

    rec.src_addr = Addr::V4(Ipv4Addr::from(take4(&mut cursor)));
    rec.dst_addr = Addr::V4(Ipv4Addr::from(take4(&mut cursor)));
    rec.next_hop = Addr::V4(Ipv4Addr::from(take4(&mut cursor)));
    rec.src_port = take2(&mut cursor);
    rec.dst_port = take2(&mut cursor);
    rec.protocol = take1(&mut cursor);
    rec.tcp_flags = take1(&mut cursor);
    rec.tos = take1(&mut cursor);
    rec.packets = take8u(&mut cursor);
    rec.bytes = take8u(&mut cursor);
    rec.start_time_ms = take8i(&mut cursor);
    rec.end_time_ms = take8i(&mut cursor);
    rec.input_interface = take4(&mut cursor);
    rec.output_interface = take4(&mut cursor);
    rec.src_as = take4(&mut cursor);
    rec.dst_as = take4(&mut cursor);
    rec.src_mask = take1(&mut cursor);
    rec.dst_mask = take1(&mut cursor);

    let table = codec::decode(schema, &sidecar_bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    for (name, value) in table {
        rec.set_sidecar_value(&name, value);
    }
    Ok(Some(rec))
}
