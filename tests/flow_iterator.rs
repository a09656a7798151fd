use std::io;
use std::sync::{Arc, Mutex};

use silk_flow::sidecar::{SidecarElement, SidecarSchema, SidecarType, SidecarValue};
use silk_flow::value_store::ValueStore;
use silk_flow::{FlowInput, FlowIterator, FlowRec};

struct VecInput {
    schema: SidecarSchema,
    records: Vec<FlowRec>,
    pos: usize,
}

impl FlowInput for VecInput {
    fn schema(&self) -> &SidecarSchema {
        &self.schema
    }

    fn next_record(&mut self) -> io::Result<Option<FlowRec>> {
        if self.pos < self.records.len() {
            let rec = self.records[self.pos].clone();
            self.pos += 1;
            Ok(Some(rec))
        } else {
            Ok(None)
        }
    }
}

fn input(store: &Arc<Mutex<ValueStore>>, bytes: &[u64], schema: SidecarSchema) -> Box<dyn FlowInput> {
    let records = bytes
        .iter()
        .map(|b| {
            let mut r = FlowRec::new(Arc::clone(store));
            r.bytes = *b;
            r.set_sidecar_value("tag", SidecarValue::U32(*b as u32));
            r
        })
        .collect();
    Box::new(VecInput { schema, records, pos: 0 })
}

#[test]
fn chains_inputs_in_order_and_unions_schema_once() {
    let store = Arc::new(Mutex::new(ValueStore::new()));
    let mut schema_a = SidecarSchema::new();
    schema_a.add(SidecarElement::new("tag", 0, SidecarType::U32)).unwrap();
    let mut schema_b = SidecarSchema::new();
    schema_b.add(SidecarElement::new("tag", 0, SidecarType::U32)).unwrap();
    schema_b.add(SidecarElement::new("extra", 0, SidecarType::Str)).unwrap();

    let mut iter = FlowIterator::new(vec![
        input(&store, &[1, 2], schema_a),
        input(&store, &[3], schema_b),
    ]);

    let mut seen = Vec::new();
    while let Some(rec) = iter.next_flow().unwrap() {
        seen.push(rec.bytes);
    }
    assert_eq!(seen, vec![1, 2, 3]);
    assert_eq!(iter.schema().len(), 2);
}

#[test]
fn cloned_record_does_not_alias_sidecar_with_source() {
    let store = Arc::new(Mutex::new(ValueStore::new()));
    let mut original = FlowRec::new(Arc::clone(&store));
    original.set_sidecar_value("tag", SidecarValue::U8(1));
    let clone = original.clone();
    original.set_sidecar_value("tag", SidecarValue::U8(2));
    assert_eq!(clone.sidecar_value("tag"), Some(SidecarValue::U8(1)));
    assert_eq!(original.sidecar_value("tag"), Some(SidecarValue::U8(2)));
}
