//! Compiled sort keys: an ordered list of field descriptors plus the
//! comparator built from them.

use std::cmp::Ordering;
use std::fmt;

use crate::record::FlowRec;
use crate::sidecar::{SidecarType, SidecarValue};

use super::SortError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltInField {
    SrcAddr,
    DstAddr,
    SrcPort,
    DstPort,
    Protocol,
    StartTime,
    EndTime,
    Bytes,
    Packets,
}

/// A trait object a caller registers to compare a plug-in-computed field
/// between two records; the sort itself has no idea what the field means,
/// only how wide its plug-in-computed comparison key is.
pub trait PluginFieldCompare: Send + Sync {
    fn compare(&self, a: &FlowRec, b: &FlowRec) -> Ordering;
}

pub enum SortKeyField {
    BuiltIn(BuiltInField),
    Plugin { name: String, compare: std::sync::Arc<dyn PluginFieldCompare> },
    Sidecar { name: String, data_type: SidecarType },
}

impl fmt::Debug for SortKeyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortKeyField::BuiltIn(b) => write!(f, "BuiltIn({b:?})"),
            SortKeyField::Plugin { name, .. } => write!(f, "Plugin({name})"),
            SortKeyField::Sidecar { name, data_type } => write!(f, "Sidecar({name}, {data_type:?})"),
        }
    }
}

fn builtin_from_name(name: &str) -> Option<BuiltInField> {
    Some(match name {
        "sip" | "src-addr" => BuiltInField::SrcAddr,
        "dip" | "dst-addr" => BuiltInField::DstAddr,
        "sport" | "src-port" => BuiltInField::SrcPort,
        "dport" | "dst-port" => BuiltInField::DstPort,
        "proto" | "protocol" => BuiltInField::Protocol,
        "stime" | "start-time" => BuiltInField::StartTime,
        "etime" | "end-time" => BuiltInField::EndTime,
        "bytes" => BuiltInField::Bytes,
        "packets" | "pkts" => BuiltInField::Packets,
        _ => return None,
    })
}

fn compare_builtin(field: BuiltInField, a: &FlowRec, b: &FlowRec) -> Ordering {
    match field {
        BuiltInField::SrcAddr => a.src_addr.to_ip_addr().cmp(&b.src_addr.to_ip_addr()),
        BuiltInField::DstAddr => a.dst_addr.to_ip_addr().cmp(&b.dst_addr.to_ip_addr()),
        BuiltInField::SrcPort => a.src_port.cmp(&b.src_port),
        BuiltInField::DstPort => a.dst_port.cmp(&b.dst_port),
        BuiltInField::Protocol => a.protocol.cmp(&b.protocol),
        BuiltInField::StartTime => a.start_time_ms.cmp(&b.start_time_ms),
        BuiltInField::EndTime => a.end_time_ms.cmp(&b.end_time_ms),
        BuiltInField::Bytes => a.bytes.cmp(&b.bytes),
        BuiltInField::Packets => a.packets.cmp(&b.packets),
    }
}

fn compare_sidecar_value(a: Option<SidecarValue>, b: Option<SidecarValue>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_values(&a, &b),
    }
}

fn compare_values(a: &SidecarValue, b: &SidecarValue) -> Ordering {
    match (a, b) {
        (SidecarValue::U8(a), SidecarValue::U8(b)) => a.cmp(b),
        (SidecarValue::U16(a), SidecarValue::U16(b)) => a.cmp(b),
        (SidecarValue::U32(a), SidecarValue::U32(b)) => a.cmp(b),
        (SidecarValue::U64(a), SidecarValue::U64(b)) => a.cmp(b),
        (SidecarValue::F64(a), SidecarValue::F64(b)) => a.total_cmp(b),
        (SidecarValue::Str(a), SidecarValue::Str(b)) => a.cmp(b),
        (SidecarValue::Bool(a), SidecarValue::Bool(b)) => a.cmp(b),
        (SidecarValue::Addr(a), SidecarValue::Addr(b)) => a.cmp(b),
        (SidecarValue::DateTimeMillis(a), SidecarValue::DateTimeMillis(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

/// A compiled, ordered sort key: each descriptor breaks ties left by the
/// one before it; `reverse` negates the combined ordering once all
/// descriptors have been applied.
pub struct SortKey {
    fields: Vec<SortKeyField>,
    reverse: bool,
}

impl SortKey {
    /// Parses a comma-separated field list. Each token is resolved first
    /// as a built-in field name, then against `plugin_fields` (name to
    /// comparator), then against `sidecar_fields` (name to declared type);
    /// an unresolved token is a [`SortError::UnknownField`].
    pub fn compile(
        spec: &str,
        plugin_fields: &[(&str, std::sync::Arc<dyn PluginFieldCompare>)],
        sidecar_fields: &[(&str, SidecarType)],
        reverse: bool,
    ) -> Result<Self, SortError> {
        let mut fields = Vec::new();
        for token in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if let Some(builtin) = builtin_from_name(token) {
                fields.push(SortKeyField::BuiltIn(builtin));
                continue;
            }
            if let Some((name, compare)) = plugin_fields.iter().find(|(n, _)| *n == token) {
                fields.push(SortKeyField::Plugin { name: name.to_string(), compare: std::sync::Arc::clone(compare) });
                continue;
            }
            if let Some((name, data_type)) = sidecar_fields.iter().find(|(n, _)| *n == token) {
                fields.push(SortKeyField::Sidecar { name: name.to_string(), data_type: *data_type });
                continue;
            }
            return Err(SortError::UnknownField(token.to_string()));
        }
        if fields.is_empty() {
            return Err(SortError::EmptyKey);
        }
        Ok(Self { fields, reverse })
    }

    pub fn compare(&self, a: &FlowRec, b: &FlowRec) -> Ordering {
        let mut ordering = Ordering::Equal;
        for field in &self.fields {
            ordering = match field {
                SortKeyField::BuiltIn(builtin) => compare_builtin(*builtin, a, b),
                SortKeyField::Plugin { compare, .. } => compare.compare(a, b),
                SortKeyField::Sidecar { name, .. } => {
                    compare_sidecar_value(a.sidecar_value(name), b.sidecar_value(name))
                }
            };
            if ordering != Ordering::Equal {
                break;
            }
        }
        if self.reverse {
            ordering.reverse()
        } else {
            ordering
        }
    }
}
