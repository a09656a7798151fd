//! Template-aware IPFIX stream reading and writing: an LRU+TTL cache of
//! learned templates on the read side, and a template-use cache that
//! avoids re-emitting an unchanged template on the write side.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::num::NonZeroUsize;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;

use super::schema::{FieldSpec, Fixrec, FixSchema};
use super::{FixrecError, InformationModel};

/// Lifecycle events a caller can subscribe to via
/// [`IpfixReader::on_template_event`]; mirrors the way a template's
/// identity changes over the life of a stream.
#[derive(Debug, Clone)]
pub enum TemplateEvent {
    Learned { template_id: u16 },
    Collision { template_id: u16 },
    Evicted { template_id: u16 },
    Expired { template_id: u16 },
}

pub type TemplateHook = Arc<dyn Fn(&TemplateEvent) + Send + Sync>;

#[derive(Default, Clone)]
pub struct TemplateHooks {
    hooks: Vec<TemplateHook>,
}

impl fmt::Debug for TemplateHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateHooks").field("hook_count", &self.hooks.len()).finish()
    }
}

impl TemplateHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, hook: F)
    where
        F: Fn(&TemplateEvent) + Send + Sync + 'static,
    {
        self.hooks.push(Arc::new(hook));
    }

    pub fn trigger(&self, event: &TemplateEvent) {
        for hook in &self.hooks {
            hook(event);
        }
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TtlConfig {
    pub duration: Duration,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self { duration: Duration::from_secs(2 * 60 * 60) }
    }
}

struct TemplateEntry {
    schema: Rc<FixSchema>,
    inserted_at: Instant,
}

impl TemplateEntry {
    fn is_expired(&self, ttl: &TtlConfig) -> bool {
        self.inserted_at.elapsed() > ttl.duration
    }
}

/// Counters mirroring a template cache's hit/miss/eviction/expiry history.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub expired: AtomicU64,
    pub insertions: AtomicU64,
    pub collisions: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_expiration(&self) {
        self.expired.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_insertion(&self) {
        self.insertions.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_collision(&self) {
        self.collisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired: u64,
    pub insertions: u64,
    pub collisions: u64,
}

impl CacheMetricsSnapshot {
    pub fn hit_rate(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        (total != 0).then(|| self.hits as f64 / total as f64)
    }
}

/// Read side: an LRU+TTL cache mapping template id to the frozen schema it
/// currently means, plus an information model used to resolve field specs
/// as new templates arrive.
pub struct IpfixReader {
    model: InformationModel,
    templates: LruCache<u16, TemplateEntry>,
    ttl: TtlConfig,
    metrics: CacheMetrics,
    hooks: TemplateHooks,
}

impl IpfixReader {
    pub fn new(model: InformationModel, cache_size: usize, ttl: TtlConfig) -> Self {
        Self {
            model,
            templates: LruCache::new(NonZeroUsize::new(cache_size.max(1)).unwrap()),
            ttl,
            metrics: CacheMetrics::new(),
            hooks: TemplateHooks::new(),
        }
    }

    pub fn on_template_event<F>(&mut self, hook: F)
    where
        F: Fn(&TemplateEvent) + Send + Sync + 'static,
    {
        self.hooks.register(hook);
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Learns (or relearns) a template. A different definition arriving
    /// for an id already in the cache is a [`TemplateEvent::Collision`];
    /// either way the new definition replaces the old one, matching a
    /// live exporter that redefines a template id after a restart.
    pub fn learn_template(&mut self, template_id: u16, specs: &[FieldSpec]) -> Result<(), FixrecError> {
        let schema = FixSchema::build(template_id, specs, &self.model, 0)?.freeze();
        if let Some(existing) = self.templates.peek(&template_id) {
            if !existing.schema.is_compatible_with(&schema) {
                self.metrics.record_collision();
                self.hooks.trigger(&TemplateEvent::Collision { template_id });
            }
        }
        let evicted = self.templates.put(
            template_id,
            TemplateEntry { schema, inserted_at: Instant::now() },
        );
        self.metrics.record_insertion();
        if evicted.is_some() {
            self.metrics.record_eviction();
            self.hooks.trigger(&TemplateEvent::Evicted { template_id });
        }
        self.hooks.trigger(&TemplateEvent::Learned { template_id });
        Ok(())
    }

    /// Looks up the current schema for `template_id`, expiring it first if
    /// its TTL has passed.
    pub fn get_template(&mut self, template_id: u16) -> Option<Rc<FixSchema>> {
        let expired = self
            .templates
            .peek(&template_id)
            .map(|e| e.is_expired(&self.ttl))
            .unwrap_or(false);
        if expired {
            self.templates.pop(&template_id);
            self.metrics.record_expiration();
            self.hooks.trigger(&TemplateEvent::Expired { template_id });
        }
        match self.templates.get(&template_id) {
            Some(entry) => {
                self.metrics.record_hit();
                Some(Rc::clone(&entry.schema))
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    pub fn template_ids(&self) -> Vec<u16> {
        self.templates.iter().map(|(id, _)| *id).collect()
    }

    pub fn clear_templates(&mut self) {
        self.templates.clear();
    }

    /// Splits a data set's raw bytes into fixrecs using the template
    /// already learned for `template_id`. `data` must hold a whole number
    /// of `schema.total_len()`-sized records; a trailing partial record
    /// (the padding a real exporter pads a set out to a 4-byte boundary
    /// with) is silently dropped rather than reported as truncated.
    pub fn read_data_set(&mut self, template_id: u16, data: &[u8]) -> Result<Vec<Fixrec>, FixrecError> {
        let schema = self
            .get_template(template_id)
            .ok_or(FixrecError::UnknownTemplate { template_id })?;
        let record_len = schema.total_len();
        if record_len == 0 {
            return Ok(Vec::new());
        }
        let mut records = Vec::with_capacity(data.len() / record_len);
        let mut offset = 0;
        while offset + record_len <= data.len() {
            records.push(Fixrec::from_wire(Rc::clone(&schema), &data[offset..offset + record_len])?);
            offset += record_len;
        }
        Ok(records)
    }
}

/// Write side: tracks, per `(template id, schema pointer)` pair, whether a
/// template set has already been emitted on this stream, so an unchanged
/// schema is not republished on every data set.
pub struct TemplateUseCache {
    used: HashMap<(u16, usize), Rc<FixSchema>>,
}

impl Default for TemplateUseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateUseCache {
    pub fn new() -> Self {
        Self { used: HashMap::new() }
    }

    /// Returns `true` if a template set for `schema` must be (re)emitted
    /// before the next data set: either this is the first time this
    /// template id has been used on the stream, or the new schema is not
    /// layout-compatible with whatever was last published under that id.
    pub fn use_template(&mut self, schema: &Rc<FixSchema>) -> bool {
        let id = schema.template_id();
        let key = (id, Rc::as_ptr(schema) as usize);
        if self.used.contains_key(&key) {
            return false;
        }
        let needs_publish = !self
            .used
            .iter()
            .filter(|((tid, _), _)| *tid == id)
            .any(|(_, cached)| cached.is_compatible_with(schema));
        self.used.retain(|(tid, _), _| *tid != id);
        self.used.insert(key, Rc::clone(schema));
        needs_publish
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

/// Write side: emits template sets and data sets to a sink, republishing a
/// template only when [`TemplateUseCache`] says the schema backing it has
/// changed. Writes go through an internal pipe first so a template set and
/// the data set that follows it are always handed to the sink as one
/// contiguous write, the way the collection's output path decouples
/// encoding from the write syscall.
pub struct IpfixWriter<W> {
    sink: W,
    use_cache: TemplateUseCache,
    pipe_reader: io::PipeReader,
    pipe_writer: io::PipeWriter,
    pending: usize,
}

impl<W: Write> IpfixWriter<W> {
    pub fn new(sink: W) -> io::Result<Self> {
        let (pipe_reader, pipe_writer) = io::pipe()?;
        Ok(Self {
            sink,
            use_cache: TemplateUseCache::new(),
            pipe_reader,
            pipe_writer,
            pending: 0,
        })
    }

    /// Appends one fixrec, first republishing `schema`'s template set if
    /// the write-side cache hasn't used this exact schema yet.
    pub fn append(&mut self, schema: &Rc<FixSchema>, record: &Fixrec) -> io::Result<()> {
        if self.use_cache.use_template(schema) {
            self.write_template_set(schema)?;
        }
        self.write_through(record.as_bytes())?;
        self.drain()
    }

    fn write_template_set(&mut self, schema: &FixSchema) -> io::Result<()> {
        let mut header = Vec::with_capacity(4 + schema.field_count() * 8);
        header.extend_from_slice(&schema.template_id().to_be_bytes());
        header.extend_from_slice(&(schema.field_count() as u16).to_be_bytes());
        for i in 0..schema.field_count() {
            if let Some(spec) = schema.field_spec(i) {
                header.extend_from_slice(&spec.enterprise.to_be_bytes());
                header.extend_from_slice(&spec.element_id.to_be_bytes());
                header.extend_from_slice(&spec.length.to_be_bytes());
            }
        }
        self.write_through(&header)
    }

    fn write_through(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.pipe_writer.write_all(bytes)?;
        self.pending += bytes.len();
        Ok(())
    }

    /// Drains every byte written since the last drain into the sink. Kept
    /// small and called after every append so the pipe never backs up
    /// beyond one record's worth of bytes.
    pub fn drain(&mut self) -> io::Result<()> {
        let mut buf = [0u8; 4096];
        while self.pending > 0 {
            let want = self.pending.min(buf.len());
            let n = self.pipe_reader.read(&mut buf[..want])?;
            self.sink.write_all(&buf[..n])?;
            self.pending -= n;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.drain()?;
        self.sink.flush()
    }

    pub fn close(mut self) -> io::Result<W> {
        self.drain()?;
        self.sink.flush()?;
        Ok(self.sink)
    }

    pub fn use_cache(&self) -> &TemplateUseCache {
        &self.use_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn model() -> InformationModel {
        InformationModel::with_standard_elements()
    }

    fn specs() -> Vec<FieldSpec> {
        vec![
            FieldSpec { enterprise: 0, element_id: 8, length: 4 },
            FieldSpec { enterprise: 0, element_id: 2, length: 8 },
        ]
    }

    #[test]
    fn learn_then_get_template_hits_cache() {
        let mut reader = IpfixReader::new(model(), 10, TtlConfig::default());
        reader.learn_template(256, &specs()).unwrap();
        assert!(reader.get_template(256).is_some());
        assert_eq!(reader.metrics().snapshot().hits, 1);
    }

    #[test]
    fn redefining_template_id_fires_collision_hook() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let mut reader = IpfixReader::new(model(), 10, TtlConfig::default());
        reader.on_template_event(move |e| {
            if matches!(e, TemplateEvent::Collision { .. }) {
                count2.fetch_add(1, Ordering::Relaxed);
            }
        });
        reader.learn_template(256, &specs()).unwrap();
        reader.learn_template(256, &specs()[..1]).unwrap();
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn expired_template_is_evicted_on_lookup() {
        let mut reader = IpfixReader::new(
            model(),
            10,
            TtlConfig { duration: Duration::from_millis(1) },
        );
        reader.learn_template(256, &specs()).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(reader.get_template(256).is_none());
        assert_eq!(reader.metrics().snapshot().expired, 1);
    }

    #[test]
    fn template_ids_lists_everything_currently_cached() {
        let mut reader = IpfixReader::new(model(), 10, TtlConfig::default());
        reader.learn_template(256, &specs()).unwrap();
        reader.learn_template(257, &specs()).unwrap();
        let mut ids = reader.template_ids();
        ids.sort();
        assert_eq!(ids, vec![256, 257]);
    }

    #[test]
    fn clear_templates_empties_the_cache() {
        let mut reader = IpfixReader::new(model(), 10, TtlConfig::default());
        reader.learn_template(256, &specs()).unwrap();
        reader.clear_templates();
        assert!(reader.template_ids().is_empty());
        assert!(reader.get_template(256).is_none());
    }

    #[test]
    fn hit_rate_is_none_until_a_lookup_happens_then_reflects_hits_over_total() {
        let mut reader = IpfixReader::new(model(), 10, TtlConfig::default());
        assert_eq!(reader.metrics().snapshot().hit_rate(), None);
        reader.learn_template(256, &specs()).unwrap();
        reader.get_template(256);
        reader.get_template(999);
        assert_eq!(reader.metrics().snapshot().hit_rate(), Some(0.5));
    }

    #[test]
    fn template_use_cache_skips_republish_for_same_schema() {
        let schema = FixSchema::build(256, &specs(), &model(), 0).unwrap().freeze();
        let mut cache = TemplateUseCache::new();
        assert!(cache.use_template(&schema));
        assert!(!cache.use_template(&schema));
    }

    #[test]
    fn template_use_cache_republishes_on_incompatible_change() {
        let schema_a = FixSchema::build(256, &specs(), &model(), 0).unwrap().freeze();
        let schema_b = FixSchema::build(256, &specs()[..1], &model(), 0).unwrap().freeze();
        let mut cache = TemplateUseCache::new();
        assert!(cache.use_template(&schema_a));
        assert!(cache.use_template(&schema_b));
    }

    #[test]
    fn writer_republishes_template_only_once_for_same_schema() {
        let schema = FixSchema::build(256, &specs(), &model(), 0).unwrap().freeze();
        let rec_a = Fixrec::new(Rc::clone(&schema)).unwrap();
        let rec_b = Fixrec::new(Rc::clone(&schema)).unwrap();
        let mut writer = IpfixWriter::new(Vec::new()).unwrap();
        writer.append(&schema, &rec_a).unwrap();
        let after_first = writer.use_cache().len();
        writer.append(&schema, &rec_b).unwrap();
        let out = writer.close().unwrap();
        assert_eq!(after_first, 1);
        // template header (4 + 2*8 bytes) + two data records.
        assert_eq!(out.len(), 20 + 2 * schema.total_len());
    }

    #[test]
    fn reader_splits_a_data_set_into_fixrecs_after_learning_its_template() {
        let mut reader = IpfixReader::new(model(), 10, TtlConfig::default());
        reader.learn_template(256, &specs()).unwrap();
        let schema = reader.get_template(256).unwrap();

        let mut rec_a = Fixrec::new(Rc::clone(&schema)).unwrap();
        rec_a.set_uint(1, 100).unwrap();
        let mut rec_b = Fixrec::new(Rc::clone(&schema)).unwrap();
        rec_b.set_uint(1, 200).unwrap();
        let mut data = Vec::new();
        data.extend_from_slice(rec_a.as_bytes());
        data.extend_from_slice(rec_b.as_bytes());

        let decoded = reader.read_data_set(256, &data).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].get_uint(1).unwrap(), 100);
        assert_eq!(decoded[1].get_uint(1).unwrap(), 200);
    }

    #[test]
    fn reader_rejects_data_set_for_unlearned_template() {
        let mut reader = IpfixReader::new(model(), 10, TtlConfig::default());
        let err = reader.read_data_set(999, &[0u8; 4]).unwrap_err();
        assert!(matches!(err, FixrecError::UnknownTemplate { template_id: 999 }));
    }

    #[test]
    fn writer_republishes_on_incompatible_schema_change() {
        let schema_a = FixSchema::build(256, &specs(), &model(), 0).unwrap().freeze();
        let schema_b = FixSchema::build(256, &specs()[..1], &model(), 0).unwrap().freeze();
        let rec_a = Fixrec::new(Rc::clone(&schema_a)).unwrap();
        let rec_b = Fixrec::new(Rc::clone(&schema_b)).unwrap();
        let mut writer = IpfixWriter::new(Vec::new()).unwrap();
        writer.append(&schema_a, &rec_a).unwrap();
        writer.append(&schema_b, &rec_b).unwrap();
        assert_eq!(writer.use_cache().len(), 1);
    }
}
