//! K-way merge of sorted runs spilled by [`super::buffer::RecordBuffer`].

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use crate::record::FlowRec;
use crate::sidecar::SidecarSchema;
use crate::value_store::ValueStore;

use super::key::SortKey;
use super::record_io::{read_record, write_record};
use super::SortError;

struct HeapEntry {
    record: FlowRec,
    run: usize,
    key: Rc<SortKey>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key.compare(&self.record, &other.record) == Ordering::Equal
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest key surfaces first.
        self.key.compare(&self.record, &other.record).reverse()
    }
}

struct Run {
    reader: BufReader<File>,
}

/// Merges `paths` (each a sorted run produced by [`super::buffer::RecordBuffer::spill`])
/// into `output` in key order. If there are more runs than `max_fanin`
/// allows to be open at once, the oldest runs are merged into an
/// intermediate temp file first and the result folded back in, repeating
/// until one pass covers everything remaining.
pub fn merge_runs(
    mut paths: Vec<PathBuf>,
    key: &Rc<SortKey>,
    output: &mut impl Write,
    store: Arc<Mutex<ValueStore>>,
    max_fanin: usize,
    scratch_dir: &Path,
    schema: &SidecarSchema,
) -> Result<(), SortError> {
    let mut intermediate_index = 0usize;
    while paths.len() > max_fanin {
        let batch: Vec<PathBuf> = paths.drain(..max_fanin).collect();
        let intermediate_path = scratch_dir.join(format!(
            "silk-sort-merge-{}-{}.tmp",
            std::process::id(),
            intermediate_index
        ));
        intermediate_index += 1;
        let file = File::create(&intermediate_path).map_err(SortError::Io)?;
        let mut writer = BufWriter::new(file);
        merge_batch(&batch, key, &mut writer, Arc::clone(&store), schema)?;
        writer.flush().map_err(SortError::Io)?;
        for path in &batch {
            std::fs::remove_file(path).ok();
        }
        paths.push(intermediate_path);
    }
    merge_batch(&paths, key, output, store, schema)?;
    for path in &paths {
        std::fs::remove_file(path).ok();
    }
    Ok(())
}

fn merge_batch(
    paths: &[PathBuf],
    key: &Rc<SortKey>,
    output: &mut impl Write,
    store: Arc<Mutex<ValueStore>>,
    schema: &SidecarSchema,
) -> Result<(), SortError> {
    let mut runs: Vec<Run> = Vec::with_capacity(paths.len());
    for path in paths {
        let file = File::open(path).map_err(SortError::Io)?;
        runs.push(Run { reader: BufReader::new(file) });
    }

    let mut heap = BinaryHeap::new();
    for (i, run) in runs.iter_mut().enumerate() {
        if let Some(record) = read_record(&mut run.reader, Arc::clone(&store), schema).map_err(SortError::Io)? {
            heap.push(HeapEntry { record, run: i, key: Rc::clone(key) });
        }
    }

    while let Some(HeapEntry { record, run, .. }) = heap.pop() {
        write_record(output, &record, schema).map_err(SortError::Io)?;
        if let Some(next) = read_record(&mut runs[run].reader, Arc::clone(&store), schema).map_err(SortError::Io)? {
            heap.push(HeapEntry { record: next, run, key: Rc::clone(key) });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::buffer::RecordBuffer;
    use crate::value_store::ValueStore;

    fn rec(store: Arc<Mutex<ValueStore>>, bytes: u64) -> FlowRec {
        let mut r = FlowRec::new(store);
        r.bytes = bytes;
        r
    }

    #[test]
    fn merges_two_sorted_runs_in_key_order() {
        let store = Arc::new(Mutex::new(ValueStore::new()));
        let key = Rc::new(SortKey::compile("bytes", &[], &[], false).unwrap());
        let dir = std::env::temp_dir();
        let schema = SidecarSchema::new();

        let mut buf_a = RecordBuffer::new(2, 1_000_000, 10);
        buf_a.push(rec(Arc::clone(&store), 1)).unwrap();
        buf_a.push(rec(Arc::clone(&store), 5)).unwrap();
        let path_a = buf_a.spill(&key, &dir, 9001, &schema).unwrap();

        let mut buf_b = RecordBuffer::new(2, 1_000_000, 10);
        buf_b.push(rec(Arc::clone(&store), 2)).unwrap();
        buf_b.push(rec(Arc::clone(&store), 4)).unwrap();
        let path_b = buf_b.spill(&key, &dir, 9002, &schema).unwrap();

        let mut output = Vec::new();
        merge_runs(vec![path_a, path_b], &key, &mut output, Arc::clone(&store), 1024, &dir, &schema).unwrap();

        let mut cursor = std::io::Cursor::new(output);
        let mut bytes_seen = Vec::new();
        while let Some(r) = read_record(&mut cursor, Arc::clone(&store), &schema).unwrap() {
            bytes_seen.push(r.bytes);
        }
        assert_eq!(bytes_seen, vec![1, 2, 4, 5]);
    }
}
