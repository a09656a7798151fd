//! In-memory record buffer for the external sort's first stage: accumulate
//! records up to a memory budget, sort them in place, then spill to a temp
//! file as one sorted run.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::record::FlowRec;
use crate::sidecar::SidecarSchema;

use super::key::SortKey;
use super::record_io::write_record;
use super::SortError;

/// An estimate of one record's resident size, used only to decide when the
/// buffer is "full" relative to [`crate::config::SortConfig::max_memory_bytes`].
/// Deliberately coarse: the sort does not need byte-exact accounting, only
/// a reasonable bound on how much gets held in memory at once.
const APPROX_RECORD_BYTES: usize = 256;

pub struct RecordBuffer {
    records: Vec<FlowRec>,
    max_chunks: usize,
    chunk_capacity: usize,
    max_records: usize,
    min_record_floor: usize,
}

impl RecordBuffer {
    pub fn new(max_chunks: usize, max_memory_bytes: usize, min_record_floor: usize) -> Self {
        let max_records = (max_memory_bytes / APPROX_RECORD_BYTES).max(min_record_floor);
        let chunk_capacity = (max_records / max_chunks.max(1)).max(1);
        Self {
            records: Vec::with_capacity(chunk_capacity),
            max_chunks: max_chunks.max(1),
            chunk_capacity,
            max_records,
            min_record_floor,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.max_records
    }

    /// Pushes a record, growing the backing allocation by one more chunk
    /// if needed. If the allocator cannot satisfy the growth, the buffer
    /// shrinks its notion of `max_records` (simulating the chunk-count
    /// reduction the on-disk sort falls back to under memory pressure)
    /// down to `min_record_floor`, after which growth failure is
    /// propagated as [`SortError::OutOfMemory`].
    pub fn push(&mut self, record: FlowRec) -> Result<(), SortError> {
        if self.records.len() == self.records.capacity() && self.records.len() < self.max_records {
            let grown = self.records.capacity() + self.chunk_capacity;
            if self.records.try_reserve(grown - self.records.len()).is_err() {
                self.max_records = (self.max_records / 2).max(self.min_record_floor);
                if self.records.len() >= self.max_records {
                    return Err(SortError::OutOfMemory);
                }
            }
        }
        self.records.push(record);
        Ok(())
    }

    pub fn sort(&mut self, key: &SortKey) {
        self.records.sort_unstable_by(|a, b| key.compare(a, b));
    }

    pub fn drain(&mut self) -> Vec<FlowRec> {
        std::mem::take(&mut self.records)
    }

    /// Sorts the buffer by `key`, writes every record to a fresh temp file
    /// under `dir` using `schema` to resolve sidecar field ids, and returns
    /// that file's path. The buffer is left empty afterward.
    pub fn spill(
        &mut self,
        key: &SortKey,
        dir: &Path,
        run_index: usize,
        schema: &SidecarSchema,
    ) -> Result<PathBuf, SortError> {
        self.sort(key);
        let path = dir.join(format!("silk-sort-{}-{}.tmp", std::process::id(), run_index));
        let file = File::create(&path).map_err(SortError::Io)?;
        let mut writer = BufWriter::new(file);
        for record in &self.records {
            write_record(&mut writer, record, schema).map_err(SortError::Io)?;
        }
        writer.flush().map_err(SortError::Io)?;
        self.records.clear();
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use crate::value_store::ValueStore;

    fn rec(bytes: u64) -> FlowRec {
        let mut r = FlowRec::new(Arc::new(Mutex::new(ValueStore::new())));
        r.bytes = bytes;
        r
    }

    #[test]
    fn push_then_sort_orders_by_key() {
        let mut buf = RecordBuffer::new(2, 1_000_000, 10);
        buf.push(rec(3)).unwrap();
        buf.push(rec(1)).unwrap();
        buf.push(rec(2)).unwrap();
        let key = SortKey::compile("bytes", &[], &[], false).unwrap();
        buf.sort(&key);
        let drained = buf.drain();
        let bytes: Vec<_> = drained.iter().map(|r| r.bytes).collect();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[test]
    fn spill_writes_sorted_run_to_a_file() {
        let mut buf = RecordBuffer::new(2, 1_000_000, 10);
        buf.push(rec(5)).unwrap();
        buf.push(rec(1)).unwrap();
        let key = SortKey::compile("bytes", &[], &[], false).unwrap();
        let dir = std::env::temp_dir();
        let schema = SidecarSchema::new();
        let path = buf.spill(&key, &dir, 0, &schema).unwrap();
        assert!(path.exists());
        assert!(buf.is_empty());
        std::fs::remove_file(path).ok();
    }
}
