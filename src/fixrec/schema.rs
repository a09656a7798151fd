//! Frozen field schemas ("fixrecs") over a shared information model.

use std::collections::HashMap;
use std::rc::Rc;

use super::FixrecError;

/// The handful of primitive encodings an IPFIX information element can
/// carry. `BasicList`/`SubTemplateList` are not primitive payloads; they
/// are represented by [`FixSchema`]'s own list-field bookkeeping rather
/// than as a `FieldDataType` variant, since their length is never fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDataType {
    Unsigned,
    Signed,
    Float,
    Boolean,
    MacAddress,
    Ipv4Address,
    Ipv6Address,
    DateTimeMillis,
    OctetArray,
    String,
}

/// One entry of the information model: the canonical definition of an
/// information element, independent of any particular template.
#[derive(Debug, Clone)]
pub struct InformationElement {
    pub enterprise: u32,
    pub element_id: u16,
    pub name: &'static str,
    pub data_type: FieldDataType,
    /// Fixed length in bytes, or `None` for variable-length ("65535"
    /// on the wire).
    pub length: Option<u16>,
}

/// A shared registry of information elements, analogous to the teacher's
/// enterprise field registry but covering both the IANA (enterprise 0) and
/// any registered vendor space.
#[derive(Debug, Clone, Default)]
pub struct InformationModel {
    elements: HashMap<(u32, u16), InformationElement>,
}

impl InformationModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// An information model preloaded with the small set of IANA elements
    /// the flow-record mapping in [`crate::netflow5`] and
    /// [`crate::fixrec::ipfix_stream`] actually uses.
    pub fn with_standard_elements() -> Self {
        let mut model = Self::new();
        let standard = [
            (1, "octetDeltaCount", FieldDataType::Unsigned, Some(8)),
            (2, "packetDeltaCount", FieldDataType::Unsigned, Some(8)),
            (4, "protocolIdentifier", FieldDataType::Unsigned, Some(1)),
            (6, "tcpControlBits", FieldDataType::Unsigned, Some(1)),
            (7, "sourceTransportPort", FieldDataType::Unsigned, Some(2)),
            (8, "sourceIPv4Address", FieldDataType::Ipv4Address, Some(4)),
            (10, "ingressInterface", FieldDataType::Unsigned, Some(4)),
            (11, "destinationTransportPort", FieldDataType::Unsigned, Some(2)),
            (12, "destinationIPv4Address", FieldDataType::Ipv4Address, Some(4)),
            (14, "egressInterface", FieldDataType::Unsigned, Some(4)),
            (15, "ipNextHopIPv4Address", FieldDataType::Ipv4Address, Some(4)),
            (16, "bgpSourceAsNumber", FieldDataType::Unsigned, Some(4)),
            (17, "bgpDestinationAsNumber", FieldDataType::Unsigned, Some(4)),
            (21, "flowEndSysUpTime", FieldDataType::Unsigned, Some(4)),
            (22, "flowStartSysUpTime", FieldDataType::Unsigned, Some(4)),
            (27, "sourceIPv6Address", FieldDataType::Ipv6Address, Some(16)),
            (28, "destinationIPv6Address", FieldDataType::Ipv6Address, Some(16)),
            (9, "sourceIPv4PrefixLength", FieldDataType::Unsigned, Some(1)),
            (13, "destinationIPv4PrefixLength", FieldDataType::Unsigned, Some(1)),
            (5, "ipClassOfService", FieldDataType::Unsigned, Some(1)),
        ];
        for (id, name, ty, len) in standard {
            model.register(InformationElement {
                enterprise: 0,
                element_id: id,
                name,
                data_type: ty,
                length: len,
            });
        }
        model
    }

    pub fn register(&mut self, element: InformationElement) {
        self.elements.insert((element.enterprise, element.element_id), element);
    }

    pub fn get(&self, enterprise: u32, element_id: u16) -> Option<&InformationElement> {
        self.elements.get(&(enterprise, element_id))
    }
}

/// One field in a [`FixSchema`]: which information element it is, and the
/// length it was negotiated at in the owning template (which may be
/// shorter than the element's natural length, e.g. a reduced-size
/// encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub enterprise: u32,
    pub element_id: u16,
    pub length: u16,
}

#[derive(Debug, Clone, Copy)]
struct ResolvedField {
    spec: FieldSpec,
    data_type: FieldDataType,
    offset: usize,
}

/// An immutable, offset-resolved field layout, shared by every [`Fixrec`]
/// built from the same IPFIX template.
#[derive(Debug, Clone)]
pub struct FixSchema {
    template_id: u16,
    fields: Vec<ResolvedField>,
    total_len: usize,
    frozen: bool,
}

impl FixSchema {
    /// Starts building a schema for `template_id` by resolving each
    /// `FieldSpec` against `model`. `mask`, if non-zero, restricts the
    /// schema to that bitset of field indices (used when exporting a
    /// record subset), mirroring spec.md's field-mask option.
    pub fn build(
        template_id: u16,
        specs: &[FieldSpec],
        model: &InformationModel,
        mask: u64,
    ) -> Result<Self, FixrecError> {
        let mut fields = Vec::with_capacity(specs.len());
        let mut offset = 0usize;
        for (i, spec) in specs.iter().enumerate() {
            if mask != 0 && (mask & (1 << i)) == 0 {
                continue;
            }
            let element = model
                .get(spec.enterprise, spec.element_id)
                .ok_or(FixrecError::UnknownField {
                    enterprise: spec.enterprise,
                    element_id: spec.element_id,
                })?;
            fields.push(ResolvedField {
                spec: *spec,
                data_type: element.data_type,
                offset,
            });
            offset += spec.length as usize;
        }
        Ok(Self {
            template_id,
            fields,
            total_len: offset,
            frozen: false,
        })
    }

    /// Freezes the schema; offsets and total length are fixed from this
    /// point on. Returns an `Rc` so every [`Fixrec`] built from the same
    /// template shares one allocation, which is what lets
    /// [`crate::fixrec::ipfix_stream`]'s template-use cache key off the
    /// schema's pointer identity.
    pub fn freeze(mut self) -> Rc<Self> {
        self.frozen = true;
        Rc::new(self)
    }

    pub fn template_id(&self) -> u16 {
        self.template_id
    }

    pub fn total_len(&self) -> usize {
        self.total_len
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field_spec(&self, index: usize) -> Option<FieldSpec> {
        self.fields.get(index).map(|f| f.spec)
    }

    /// True when `other` is layout-compatible: same template id, same
    /// field count, and every field's element identity and length match
    /// pairwise. Used by the IPFIX writer to decide whether a schema
    /// change requires republishing the template.
    pub fn is_compatible_with(&self, other: &FixSchema) -> bool {
        self.template_id == other.template_id
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(a, b)| a.spec == b.spec)
    }
}

/// A template-shaped byte buffer paired with the [`FixSchema`] that
/// describes it.
#[derive(Debug, Clone)]
pub struct Fixrec {
    schema: Rc<FixSchema>,
    buffer: Vec<u8>,
}

impl Fixrec {
    pub fn new(schema: Rc<FixSchema>) -> Result<Self, FixrecError> {
        if !schema.frozen {
            return Err(FixrecError::SchemaNotFrozen);
        }
        Ok(Self {
            buffer: vec![0u8; schema.total_len],
            schema,
        })
    }

    pub fn schema(&self) -> &Rc<FixSchema> {
        &self.schema
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    fn field(&self, index: usize) -> Result<&ResolvedField, FixrecError> {
        self.schema
            .fields
            .get(index)
            .ok_or(FixrecError::TypeMismatch { field_index: index })
    }

    pub fn set_uint(&mut self, index: usize, value: u64) -> Result<(), FixrecError> {
        let field = *self.field(index)?;
        let len = field.spec.length as usize;
        if len > 8 {
            return Err(FixrecError::FieldTooLarge { field_index: index, max: 8, got: len });
        }
        let bytes = value.to_be_bytes();
        self.buffer[field.offset..field.offset + len].copy_from_slice(&bytes[8 - len..]);
        Ok(())
    }

    pub fn get_uint(&self, index: usize) -> Result<u64, FixrecError> {
        let field = *self.field(index)?;
        if !matches!(field.data_type, FieldDataType::Unsigned) {
            return Err(FixrecError::TypeMismatch { field_index: index });
        }
        let len = field.spec.length as usize;
        let mut bytes = [0u8; 8];
        bytes[8 - len..].copy_from_slice(&self.buffer[field.offset..field.offset + len]);
        Ok(u64::from_be_bytes(bytes))
    }

    pub fn set_bytes(&mut self, index: usize, value: &[u8]) -> Result<(), FixrecError> {
        let field = *self.field(index)?;
        let len = field.spec.length as usize;
        if value.len() != len {
            return Err(FixrecError::FieldTooLarge { field_index: index, max: len, got: value.len() });
        }
        self.buffer[field.offset..field.offset + len].copy_from_slice(value);
        Ok(())
    }

    pub fn get_bytes(&self, index: usize) -> Result<&[u8], FixrecError> {
        let field = *self.field(index)?;
        let len = field.spec.length as usize;
        Ok(&self.buffer[field.offset..field.offset + len])
    }

    /// Decodes `data` in place according to `schema`; `data` must be at
    /// least `schema.total_len()` bytes.
    pub fn from_wire(schema: Rc<FixSchema>, data: &[u8]) -> Result<Self, FixrecError> {
        if data.len() < schema.total_len {
            return Err(FixrecError::Truncated {
                needed: schema.total_len,
                available: data.len(),
            });
        }
        Ok(Self {
            buffer: data[..schema.total_len].to_vec(),
            schema,
        })
    }
}
