use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use silk_flow::fixrec::ipfix_stream::{IpfixReader, IpfixWriter, TemplateEvent, TtlConfig};
use silk_flow::fixrec::{FieldSpec, FixSchema, Fixrec, InformationModel};

fn specs() -> Vec<FieldSpec> {
    vec![
        FieldSpec { enterprise: 0, element_id: 8, length: 4 },
        FieldSpec { enterprise: 0, element_id: 12, length: 4 },
        FieldSpec { enterprise: 0, element_id: 2, length: 8 },
    ]
}

#[test]
fn reader_learns_template_and_serves_it_until_expiry() {
    let mut reader = IpfixReader::new(InformationModel::with_standard_elements(), 16, TtlConfig::default());
    reader.learn_template(256, &specs()).unwrap();
    let schema = reader.get_template(256).expect("template should be cached");
    assert_eq!(schema.field_count(), 3);
    assert_eq!(reader.metrics().snapshot().hits, 1);
}

#[test]
fn reader_fires_collision_hook_on_incompatible_redefinition() {
    let events = Arc::new(AtomicUsize::new(0));
    let events2 = Arc::clone(&events);
    let mut reader = IpfixReader::new(InformationModel::with_standard_elements(), 16, TtlConfig::default());
    reader.on_template_event(move |event| {
        if matches!(event, TemplateEvent::Collision { template_id: 256 }) {
            events2.fetch_add(1, Ordering::SeqCst);
        }
    });
    reader.learn_template(256, &specs()).unwrap();
    reader.learn_template(256, &specs()[..1]).unwrap();
    assert_eq!(events.load(Ordering::SeqCst), 1);
}

#[test]
fn reader_expires_template_past_ttl() {
    let mut reader = IpfixReader::new(
        InformationModel::with_standard_elements(),
        16,
        TtlConfig { duration: Duration::from_millis(1) },
    );
    reader.learn_template(256, &specs()).unwrap();
    std::thread::sleep(Duration::from_millis(5));
    assert!(reader.get_template(256).is_none());
    assert_eq!(reader.metrics().snapshot().expired, 1);
}

#[test]
fn writer_emits_one_template_set_per_distinct_schema() {
    let model = InformationModel::with_standard_elements();
    let schema = FixSchema::build(256, &specs(), &model, 0).unwrap().freeze();
    let mut writer = IpfixWriter::new(Vec::new()).unwrap();

    for _ in 0..5 {
        let rec = Fixrec::new(std::rc::Rc::clone(&schema)).unwrap();
        writer.append(&schema, &rec).unwrap();
    }
    assert_eq!(writer.use_cache().len(), 1);

    let out = writer.close().unwrap();
    let template_header_len = 4 + specs().len() * 8;
    assert_eq!(out.len(), template_header_len + 5 * schema.total_len());
}
