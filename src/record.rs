//! The fixed flow record shape shared by every component downstream of a
//! flow source: NetFlow v5 collection, the sort, the flow iterator, and
//! IPFIX export all produce or consume [`FlowRec`].

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex};

use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::value_store::{SidecarHandle, ValueStore};

/// Source or destination address, keeping the v4/v6 discriminant explicit
/// rather than normalizing everything into a v6-mapped address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Addr {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl Addr {
    pub fn to_ip_addr(self) -> IpAddr {
        match self {
            Addr::V4(a) => IpAddr::V4(a),
            Addr::V6(a) => IpAddr::V6(a),
        }
    }
}

/// What part of a record a copy should carry over; see [`FlowRec::copy_from`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyScope {
    Fixed,
    Sidecar,
    Both,
}

/// Bit of [`FlowRec::tcp_state`] marking `init_flags`/`rest_flags` as
/// meaningful; unset for records (such as plain NetFlow v5) whose wire
/// format carries only the flag union in `tcp_flags`.
pub const TCP_STATE_EXPANDED: u8 = 0x01;

/// The fixed-width fields every flow record carries, independent of the
/// wire format it was read from.
#[derive(Debug)]
pub struct FlowRec {
    pub src_addr: Addr,
    pub dst_addr: Addr,
    pub next_hop: Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    /// Bitwise union of TCP flags seen across every packet of the flow.
    pub tcp_flags: u8,
    /// First packet's TCP flags; meaningful only when `tcp_state &
    /// TCP_STATE_EXPANDED != 0`.
    pub init_flags: u8,
    /// Union of TCP flags over all packets but the first; meaningful only
    /// when `tcp_state & TCP_STATE_EXPANDED != 0`.
    pub rest_flags: u8,
    /// Bitset recording which of this record's optional fields are
    /// meaningful (see [`TCP_STATE_EXPANDED`]).
    pub tcp_state: u8,
    pub tos: u8,
    pub packets: u64,
    pub bytes: u64,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub input_interface: u32,
    pub output_interface: u32,
    pub src_as: u32,
    pub dst_as: u32,
    pub src_mask: u8,
    pub dst_mask: u8,
    /// Site-assigned id of the probe that exported this record.
    pub sensor_id: u16,
    /// Site-assigned class/type tag (the GLOSSARY's "flowtype").
    pub flow_type_id: u8,
    /// Guessed or IPFIX-reported application/service id.
    pub application_id: u16,
    sidecar: SidecarHandle,
    store: Arc<Mutex<ValueStore>>,
}

impl FlowRec {
    pub fn new(store: Arc<Mutex<ValueStore>>) -> Self {
        Self {
            src_addr: Addr::V4(Ipv4Addr::UNSPECIFIED),
            dst_addr: Addr::V4(Ipv4Addr::UNSPECIFIED),
            next_hop: Addr::V4(Ipv4Addr::UNSPECIFIED),
            src_port: 0,
            dst_port: 0,
            protocol: 0,
            tcp_flags: 0,
            init_flags: 0,
            rest_flags: 0,
            tcp_state: 0,
            tos: 0,
            packets: 0,
            bytes: 0,
            start_time_ms: 0,
            end_time_ms: 0,
            input_interface: 0,
            output_interface: 0,
            src_as: 0,
            dst_as: 0,
            src_mask: 0,
            dst_mask: 0,
            sensor_id: 0,
            flow_type_id: 0,
            application_id: 0,
            sidecar: SidecarHandle::None,
            store,
        }
    }

    pub fn has_sidecar(&self) -> bool {
        !matches!(self.sidecar, SidecarHandle::None)
    }

    pub fn sidecar_handle(&self) -> SidecarHandle {
        self.sidecar
    }

    pub fn sidecar_value(&self, name: &str) -> Option<crate::sidecar::SidecarValue> {
        let store = self.store.lock().expect("value store mutex poisoned");
        store.get(self.sidecar).and_then(|t| t.get(name).cloned())
    }

    pub fn sidecar_field_names(&self) -> Vec<String> {
        let store = self.store.lock().expect("value store mutex poisoned");
        store
            .get(self.sidecar)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_sidecar_value(&mut self, name: &str, value: crate::sidecar::SidecarValue) {
        let mut store = self.store.lock().expect("value store mutex poisoned");
        store
            .get_mut_cow(&mut self.sidecar)
            .insert(name.to_string(), value);
    }

    /// Zeroes fixed fields and releases the sidecar arena slot, leaving the
    /// record ready to be reused for the next parse.
    pub fn clear(&mut self) {
        let fresh = FlowRec::new(Arc::clone(&self.store));
        let mut store = self.store.lock().expect("value store mutex poisoned");
        store.release(self.sidecar);
        *self = fresh;
    }

    /// Copies `what` from `other` into `self`. Copying the sidecar
    /// allocates a fresh handle in `self`'s store rather than aliasing
    /// `other`'s handle, so mutating one record's sidecar afterward never
    /// affects the other.
    pub fn copy_from(&mut self, other: &FlowRec, what: CopyScope) {
        if matches!(what, CopyScope::Fixed | CopyScope::Both) {
            let sidecar = self.sidecar;
            let store_ref = Arc::clone(&self.store);
            *self = other.clone_fixed_only();
            self.sidecar = sidecar;
            self.store = store_ref;
        }
        if matches!(what, CopyScope::Sidecar | CopyScope::Both) {
            let mut dst_store = self.store.lock().expect("value store mutex poisoned");
            dst_store.release(self.sidecar);
            if Arc::ptr_eq(&self.store, &other.store) {
                self.sidecar = dst_store.retain(other.sidecar);
            } else {
                drop(dst_store);
                let src_table = {
                    let src_store = other.store.lock().expect("value store mutex poisoned");
                    src_store.get(other.sidecar).cloned()
                };
                let mut dst_store = self.store.lock().expect("value store mutex poisoned");
                match src_table {
                    Some(table) if !table.is_empty() => {
                        self.sidecar = dst_store.allocate();
                        *dst_store.get_mut_cow(&mut self.sidecar) = table;
                    }
                    _ => self.sidecar = SidecarHandle::None,
                }
            }
        }
    }

    fn clone_fixed_only(&self) -> FlowRec {
        FlowRec {
            src_addr: self.src_addr,
            dst_addr: self.dst_addr,
            next_hop: self.next_hop,
            src_port: self.src_port,
            dst_port: self.dst_port,
            protocol: self.protocol,
            tcp_flags: self.tcp_flags,
            init_flags: self.init_flags,
            rest_flags: self.rest_flags,
            tcp_state: self.tcp_state,
            tos: self.tos,
            packets: self.packets,
            bytes: self.bytes,
            start_time_ms: self.start_time_ms,
            end_time_ms: self.end_time_ms,
            input_interface: self.input_interface,
            output_interface: self.output_interface,
            src_as: self.src_as,
            dst_as: self.dst_as,
            src_mask: self.src_mask,
            dst_mask: self.dst_mask,
            sensor_id: self.sensor_id,
            flow_type_id: self.flow_type_id,
            application_id: self.application_id,
            sidecar: SidecarHandle::None,
            store: Arc::clone(&self.store),
        }
    }
}

impl Drop for FlowRec {
    fn drop(&mut self) {
        if let Ok(mut store) = self.store.lock() {
            store.release(self.sidecar);
        }
    }
}

/// A derived `Clone` would copy the sidecar handle without retaining it,
/// so the clone and the original would each release the same arena slot
/// on drop. This retains instead, matching [`FlowRec::copy_from`].
impl Clone for FlowRec {
    fn clone(&self) -> Self {
        let mut clone = self.clone_fixed_only();
        let mut store = self.store.lock().expect("value store mutex poisoned");
        clone.sidecar = store.retain(self.sidecar);
        clone
    }
}

/// Flattens the fixed fields plus the sidecar table (reconstructed through
/// the same public accessors [`crate::sort::record_io`] uses) into one
/// JSON-shaped object, rather than exposing the arena handle on the wire.
impl Serialize for FlowRec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("FlowRec", 25)?;
        state.serialize_field("src_addr", &self.src_addr)?;
        state.serialize_field("dst_addr", &self.dst_addr)?;
        state.serialize_field("next_hop", &self.next_hop)?;
        state.serialize_field("src_port", &self.src_port)?;
        state.serialize_field("dst_port", &self.dst_port)?;
        state.serialize_field("protocol", &self.protocol)?;
        state.serialize_field("tcp_flags", &self.tcp_flags)?;
        state.serialize_field("init_flags", &self.init_flags)?;
        state.serialize_field("rest_flags", &self.rest_flags)?;
        state.serialize_field("tcp_state", &self.tcp_state)?;
        state.serialize_field("tos", &self.tos)?;
        state.serialize_field("packets", &self.packets)?;
        state.serialize_field("bytes", &self.bytes)?;
        state.serialize_field("start_time_ms", &self.start_time_ms)?;
        state.serialize_field("end_time_ms", &self.end_time_ms)?;
        state.serialize_field("input_interface", &self.input_interface)?;
        state.serialize_field("output_interface", &self.output_interface)?;
        state.serialize_field("src_as", &self.src_as)?;
        state.serialize_field("dst_as", &self.dst_as)?;
        state.serialize_field("src_mask", &self.src_mask)?;
        state.serialize_field("dst_mask", &self.dst_mask)?;
        state.serialize_field("sensor_id", &self.sensor_id)?;
        state.serialize_field("flow_type_id", &self.flow_type_id)?;
        state.serialize_field("application_id", &self.application_id)?;
        let sidecar: BTreeMap<String, crate::sidecar::SidecarValue> = self
            .sidecar_field_names()
            .into_iter()
            .filter_map(|name| self.sidecar_value(&name).map(|v| (name, v)))
            .collect();
        state.serialize_field("sidecar", &sidecar)?;
        state.end()
    }
}
