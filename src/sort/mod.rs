//! External k-way merge-sort over a stream of [`crate::record::FlowRec`].

pub mod buffer;
pub mod header;
pub mod key;
pub mod merge;
pub mod record_io;

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

pub use header::FlowFileHeader;
pub use key::{BuiltInField, PluginFieldCompare, SortKey, SortKeyField};

use crate::config::SortConfig;
use crate::record::FlowRec;
use crate::value_store::ValueStore;
use buffer::RecordBuffer;

#[derive(Debug)]
pub enum SortError {
    UnknownField(String),
    EmptyKey,
    OutOfMemory,
    Io(std::io::Error),
    Sidecar(crate::sidecar::SidecarError),
}

impl fmt::Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortError::UnknownField(name) => write!(f, "unknown sort field: {name}"),
            SortError::EmptyKey => write!(f, "sort key must name at least one field"),
            SortError::OutOfMemory => write!(f, "in-memory sort buffer could not grow further"),
            SortError::Io(e) => write!(f, "sort i/o error: {e}"),
            SortError::Sidecar(e) => write!(f, "sort sidecar error: {e}"),
        }
    }
}

impl std::error::Error for SortError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SortError::Io(e) => Some(e),
            SortError::Sidecar(e) => Some(e),
            _ => None,
        }
    }
}

/// Drives the external sort end to end: writes the unioned output header
/// (see [`FlowFileHeader::union_all`]), then accumulates `records` into an
/// in-memory buffer, spilling a sorted run to `scratch_dir` each time the
/// buffer fills, then k-way merges every run into `output` in key order.
///
/// If `records` fits in a single buffer fill, this degenerates into an
/// in-memory sort with no temp files at all. Sidecar fields on `records`
/// must already be declared in the unioned header's sidecar schema (the
/// usual way to arrange this is to build `input_headers` from the same
/// [`crate::flow_iterator::FlowIterator`] that produced `records`).
pub fn external_sort(
    records: impl IntoIterator<Item = FlowRec>,
    key: SortKey,
    config: &SortConfig,
    scratch_dir: &Path,
    output: &mut impl Write,
    store: Arc<Mutex<ValueStore>>,
    input_headers: &[FlowFileHeader],
) -> Result<(), SortError> {
    let key = Rc::new(key);
    let output_header = FlowFileHeader::union_all(input_headers).map_err(SortError::Sidecar)?;
    output_header.write(output).map_err(SortError::Io)?;
    let schema = &output_header.sidecar_schema;

    let mut buffer = RecordBuffer::new(config.max_chunks, config.max_memory_bytes, config.min_record_floor);
    let mut run_paths = Vec::new();
    let mut run_index = 0usize;

    for record in records {
        if buffer.is_full() {
            run_paths.push(buffer.spill(&key, scratch_dir, run_index, schema)?);
            run_index += 1;
        }
        buffer.push(record)?;
    }

    if run_paths.is_empty() {
        buffer.sort(&key);
        for record in buffer.drain() {
            record_io::write_record(output, &record, schema).map_err(SortError::Io)?;
        }
        return Ok(());
    }

    if !buffer.is_empty() {
        run_paths.push(buffer.spill(&key, scratch_dir, run_index, schema)?);
    }

    merge::merge_runs(run_paths, &key, output, store, config.max_merge_fanin, scratch_dir, schema)
}

/// Pre-sorted mode: every input is already individually sorted by `key`
/// (e.g. several already-sorted files being combined), so the in-memory
/// stage is skipped entirely and the inputs are merged directly, after
/// writing the same unioned output header [`external_sort`] writes.
pub fn merge_presorted(
    run_paths: Vec<std::path::PathBuf>,
    key: SortKey,
    config: &SortConfig,
    scratch_dir: &Path,
    output: &mut impl Write,
    store: Arc<Mutex<ValueStore>>,
    input_headers: &[FlowFileHeader],
) -> Result<(), SortError> {
    let key = Rc::new(key);
    let output_header = FlowFileHeader::union_all(input_headers).map_err(SortError::Sidecar)?;
    output_header.write(output).map_err(SortError::Io)?;
    merge::merge_runs(
        run_paths,
        &key,
        output,
        store,
        config.max_merge_fanin,
        scratch_dir,
        &output_header.sidecar_schema,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_store::ValueStore;

    fn rec(store: Arc<Mutex<ValueStore>>, bytes: u64) -> FlowRec {
        let mut r = FlowRec::new(store);
        r.bytes = bytes;
        r
    }

    fn read_all(store: Arc<Mutex<ValueStore>>, output: Vec<u8>) -> Vec<u64> {
        let mut cursor = std::io::Cursor::new(output);
        let header = FlowFileHeader::read(&mut cursor).unwrap();
        let mut seen = Vec::new();
        while let Some(r) = record_io::read_record(&mut cursor, Arc::clone(&store), &header.sidecar_schema).unwrap() {
            seen.push(r.bytes);
        }
        seen
    }

    #[test]
    fn small_input_sorts_in_memory_without_spilling() {
        let store = Arc::new(Mutex::new(ValueStore::new()));
        let records = vec![rec(Arc::clone(&store), 3), rec(Arc::clone(&store), 1), rec(Arc::clone(&store), 2)];
        let key = SortKey::compile("bytes", &[], &[], false).unwrap();
        let config = SortConfig::default();
        let mut output = Vec::new();
        external_sort(records, key, &config, &std::env::temp_dir(), &mut output, Arc::clone(&store), &[]).unwrap();

        assert_eq!(read_all(store, output), vec![1, 2, 3]);
    }

    #[test]
    fn spills_and_merges_when_buffer_is_small() {
        let store = Arc::new(Mutex::new(ValueStore::new()));
        let records: Vec<_> = (0..20).rev().map(|b| rec(Arc::clone(&store), b)).collect();
        let key = SortKey::compile("bytes", &[], &[], false).unwrap();
        let mut config = SortConfig::default();
        config.max_memory_bytes = 256 * 5; // force several small spills
        config.min_record_floor = 1;
        let mut output = Vec::new();
        external_sort(records, key, &config, &std::env::temp_dir(), &mut output, Arc::clone(&store), &[]).unwrap();

        assert_eq!(read_all(store, output), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn merge_presorted_combines_already_sorted_runs_without_buffering() {
        let store = Arc::new(Mutex::new(ValueStore::new()));
        let key = SortKey::compile("bytes", &[], &[], false).unwrap();
        let dir = std::env::temp_dir();
        let schema = crate::sidecar::SidecarSchema::new();

        let mut a = RecordBuffer::new(10, usize::MAX, 1);
        a.push(rec(Arc::clone(&store), 1)).unwrap();
        a.push(rec(Arc::clone(&store), 4)).unwrap();
        a.sort(&key);
        let run_a = a.spill(&key, &dir, 9001, &schema).unwrap();

        let mut b = RecordBuffer::new(10, usize::MAX, 1);
        b.push(rec(Arc::clone(&store), 2)).unwrap();
        b.push(rec(Arc::clone(&store), 3)).unwrap();
        b.sort(&key);
        let run_b = b.spill(&key, &dir, 9002, &schema).unwrap();

        let mut output = Vec::new();
        merge_presorted(vec![run_a, run_b], key, &SortConfig::default(), &dir, &mut output, Arc::clone(&store), &[])
            .unwrap();

        assert_eq!(read_all(store, output), vec![1, 2, 3, 4]);
    }

    #[test]
    fn output_header_unions_input_annotations_invocations_and_schema() {
        let store = Arc::new(Mutex::new(ValueStore::new()));
        let key = SortKey::compile("bytes", &[], &[], false).unwrap();
        let config = SortConfig::default();

        let mut header_a = FlowFileHeader::new();
        header_a.annotations.push("site A".to_string());
        let mut header_b = FlowFileHeader::new();
        header_b.invocations.push("rwsort --fields=bytes".to_string());

        let records = vec![rec(Arc::clone(&store), 1)];
        let mut output = Vec::new();
        external_sort(
            records,
            key,
            &config,
            &std::env::temp_dir(),
            &mut output,
            Arc::clone(&store),
            &[header_a, header_b],
        )
        .unwrap();

        let mut cursor = std::io::Cursor::new(output);
        let header = FlowFileHeader::read(&mut cursor).unwrap();
        assert_eq!(header.annotations, vec!["site A"]);
        assert_eq!(header.invocations, vec!["rwsort --fields=bytes"]);

        let rec = record_io::read_record(&mut cursor, Arc::clone(&store), &header.sidecar_schema)
            .unwrap()
            .unwrap();
        assert_eq!(rec.bytes, 1);
    }
}
