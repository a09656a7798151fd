//! Open-addressed hash table over fixed-width byte keys and values.
//!
//! Storage is split across up to eight `Block`s rather than one growing
//! `Vec`, so a resize only has to allocate a new block instead of copying
//! the whole table. Collisions within a block are resolved by double
//! hashing; a lookup that exhausts one block's probe sequence continues
//! into the next block, so insertion order across blocks does not matter
//! for correctness, only for the `sort` fast path described below.

use std::fmt;

use crate::config::{HashTableConfig, SecondaryBlockPolicy};

const MAX_BLOCKS: usize = 8;
const MAX_BLOCK_BYTES: usize = 1 << 29;

#[derive(Debug)]
pub enum HashTableError {
    InvalidConfig(crate::config::ConfigError),
    KeyLenMismatch { expected: usize, got: usize },
    ValueLenMismatch { expected: usize, got: usize },
    Full,
    SortedTableImmutable,
    TooManyBlocks,
}

impl fmt::Display for HashTableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashTableError::InvalidConfig(e) => write!(f, "invalid hash table config: {e}"),
            HashTableError::KeyLenMismatch { expected, got } => {
                write!(f, "key length mismatch: expected {expected}, got {got}")
            }
            HashTableError::ValueLenMismatch { expected, got } => {
                write!(f, "value length mismatch: expected {expected}, got {got}")
            }
            HashTableError::Full => write!(f, "table is full and cannot grow further"),
            HashTableError::SortedTableImmutable => {
                write!(f, "cannot insert into a table after it has been sorted")
            }
            HashTableError::TooManyBlocks => write!(f, "maximum number of blocks reached"),
        }
    }
}

impl std::error::Error for HashTableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HashTableError::InvalidConfig(e) => Some(e),
            _ => None,
        }
    }
}

/// A single contiguous region of fixed-size slots.
///
/// Each slot is `key_len + value_len` bytes; a slot whose key bytes are all
/// zero is considered empty (the table never stores an all-zero key).
struct Block {
    slots: Vec<u8>,
    occupied: Vec<bool>,
    capacity: usize,
    entry_len: usize,
    len: usize,
}

impl Block {
    fn new(capacity: usize, key_len: usize, value_len: usize) -> Self {
        let entry_len = key_len + value_len;
        Self {
            slots: vec![0u8; capacity * entry_len],
            occupied: vec![false; capacity],
            capacity,
            entry_len,
            len: 0,
        }
    }

    fn slot(&self, idx: usize) -> &[u8] {
        &self.slots[idx * self.entry_len..(idx + 1) * self.entry_len]
    }

    fn slot_mut(&mut self, idx: usize) -> &mut [u8] {
        &mut self.slots[idx * self.entry_len..(idx + 1) * self.entry_len]
    }

    fn load_factor(&self) -> f32 {
        self.len as f32 / self.capacity as f32
    }
}

/// Double-hashing probe sequence: `h1` picks the start, `h2 | 1` forces an
/// odd step so every probe eventually visits every slot in a power-of-two
/// sized block.
fn probe(h1: u64, h2: u64, capacity: usize, step: usize) -> usize {
    let step_size = (h2 | 1) as usize;
    (h1 as usize).wrapping_add(step.wrapping_mul(step_size)) % capacity
}

fn fnv1a(bytes: &[u8], seed: u64) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Fixed-key-width, fixed-value-width hash table used by the sidecar value
/// store and by the sort's in-memory grouping helpers.
pub struct HashTable {
    config: HashTableConfig,
    blocks: Vec<Block>,
    sorted: bool,
}

impl fmt::Debug for HashTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTable")
            .field("blocks", &self.blocks.len())
            .field("len", &self.len())
            .field("sorted", &self.sorted)
            .finish()
    }
}

impl HashTable {
    pub fn create(config: HashTableConfig) -> Result<Self, HashTableError> {
        config.validate().map_err(HashTableError::InvalidConfig)?;
        let first = Block::new(config.initial_capacity, config.key_len, config.value_len);
        Ok(Self {
            config,
            blocks: vec![first],
            sorted: false,
        })
    }

    pub fn len(&self) -> usize {
        self.blocks.iter().map(|b| b.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_empty_slot(&self, slot: &[u8]) -> bool {
        slot[..self.config.key_len].iter().all(|&b| b == 0)
    }

    fn next_block_capacity(&self) -> usize {
        let first_cap = self.blocks[0].capacity;
        let proposed = match self.config.secondary_block_policy {
            SecondaryBlockPolicy::HalveEach => self
                .blocks
                .last()
                .map(|b| (b.capacity / 2).max(64))
                .unwrap_or(first_cap),
            SecondaryBlockPolicy::QuarterOfFirst => (first_cap / 4).max(64),
            SecondaryBlockPolicy::Fixed(n) => n,
        };
        let entry_len = self.config.key_len + self.config.value_len;
        let max_entries = MAX_BLOCK_BYTES / entry_len;
        proposed.min(max_entries)
    }

    fn add_block(&mut self) -> Result<(), HashTableError> {
        if self.blocks.len() >= MAX_BLOCKS {
            return Err(HashTableError::TooManyBlocks);
        }
        let cap = self.next_block_capacity();
        self.blocks
            .push(Block::new(cap, self.config.key_len, self.config.value_len));
        Ok(())
    }

    fn check_key_value_len(&self, key: &[u8], value: &[u8]) -> Result<(), HashTableError> {
        if key.len() != self.config.key_len {
            return Err(HashTableError::KeyLenMismatch {
                expected: self.config.key_len,
                got: key.len(),
            });
        }
        if value.len() != self.config.value_len {
            return Err(HashTableError::ValueLenMismatch {
                expected: self.config.value_len,
                got: value.len(),
            });
        }
        Ok(())
    }

    /// Inserts `key`/`value`, growing a block (or adding a new block) first
    /// if the target block's load factor would exceed the configured
    /// maximum. Returns `Ok(true)` if this inserted a new key, `Ok(false)`
    /// if it overwrote an existing key's value.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<bool, HashTableError> {
        if self.sorted {
            return Err(HashTableError::SortedTableImmutable);
        }
        self.check_key_value_len(key, value)?;

        if let Some((block_idx, slot_idx)) = self.find_slot(key) {
            let block = &mut self.blocks[block_idx];
            let is_new = block.is_empty_slot(block.slot(slot_idx));
            let klen = self.config.key_len;
            let slot = block.slot_mut(slot_idx);
            slot[..klen].copy_from_slice(key);
            slot[klen..].copy_from_slice(value);
            if is_new {
                block.len += 1;
                block.occupied[slot_idx] = true;
            }
            return Ok(is_new);
        }

        if self.blocks.last().unwrap().load_factor() >= self.config.load_factor_max {
            self.rehash_last_block_or_add()?;
        }
        self.insert_into_last_block(key, value)
    }

    fn insert_into_last_block(&mut self, key: &[u8], value: &[u8]) -> Result<bool, HashTableError> {
        let last = self.blocks.len() - 1;
        let h1 = fnv1a(key, 0);
        let h2 = fnv1a(key, 0x9e3779b97f4a7c15);
        let cap = self.blocks[last].capacity;
        for step in 0..cap {
            let idx = probe(h1, h2, cap, step);
            let block = &mut self.blocks[last];
            if block.is_empty_slot(block.slot(idx)) {
                let klen = self.config.key_len;
                let slot = block.slot_mut(idx);
                slot[..klen].copy_from_slice(key);
                slot[klen..].copy_from_slice(value);
                block.len += 1;
                block.occupied[idx] = true;
                return Ok(true);
            }
        }
        self.add_block()?;
        self.insert_into_last_block(key, value)
    }

    fn rehash_last_block_or_add(&mut self) -> Result<(), HashTableError> {
        self.add_block()
    }

    fn find_slot(&self, key: &[u8]) -> Option<(usize, usize)> {
        let h1 = fnv1a(key, 0);
        let h2 = fnv1a(key, 0x9e3779b97f4a7c15);
        for (block_idx, block) in self.blocks.iter().enumerate() {
            let cap = block.capacity;
            for step in 0..cap {
                let idx = probe(h1, h2, cap, step);
                let slot = block.slot(idx);
                if block.is_empty_slot(slot) {
                    break;
                }
                if &slot[..self.config.key_len] == key {
                    return Some((block_idx, idx));
                }
            }
        }
        None
    }

    pub fn lookup(&self, key: &[u8]) -> Option<&[u8]> {
        let (block_idx, slot_idx) = self.find_slot(key)?;
        Some(&self.blocks[block_idx].slot(slot_idx)[self.config.key_len..])
    }

    /// Rebuilds every block into a single block sized to the current
    /// element count at the configured load factor. Used when the table's
    /// growth-by-chaining history has left it with several small blocks
    /// that would otherwise each need a probe on lookup.
    pub fn rehash(&mut self) -> Result<(), HashTableError> {
        if self.sorted {
            return Err(HashTableError::SortedTableImmutable);
        }
        let total = self.len();
        let target_cap =
            ((total as f32 / self.config.load_factor_max) as usize).max(self.config.initial_capacity);
        let mut fresh = Block::new(target_cap, self.config.key_len, self.config.value_len);
        let entry_len = self.config.key_len + self.config.value_len;
        let mut entries = Vec::with_capacity(total);
        for block in &self.blocks {
            for i in 0..block.capacity {
                let slot = block.slot(i);
                if !block.is_empty_slot(slot) {
                    entries.push(slot.to_vec());
                }
            }
        }
        for entry in &entries {
            let key = &entry[..self.config.key_len];
            let h1 = fnv1a(key, 0);
            let h2 = fnv1a(key, 0x9e3779b97f4a7c15);
            for step in 0..fresh.capacity {
                let idx = probe(h1, h2, fresh.capacity, step);
                if fresh.is_empty_slot(fresh.slot(idx)) {
                    fresh.slot_mut(idx).copy_from_slice(entry);
                    fresh.occupied[idx] = true;
                    fresh.len += 1;
                    break;
                }
            }
        }
        debug_assert_eq!(fresh.len, total);
        let _ = entry_len;
        self.blocks = vec![fresh];
        Ok(())
    }

    /// Freezes the table into the order `cmp` imposes over `(key, value)`
    /// pairs and forbids further inserts; `insert` after this returns
    /// [`HashTableError::SortedTableImmutable`]. Collapses every block into
    /// one so a later [`HashTable::iter`] walks a single contiguous run
    /// rather than merging across blocks.
    pub fn sort<F>(&mut self, mut cmp: F)
    where
        F: FnMut(&[u8], &[u8], &[u8], &[u8]) -> std::cmp::Ordering,
    {
        let key_len = self.config.key_len;
        let entry_len = key_len + self.config.value_len;
        let mut entries: Vec<Vec<u8>> = self.iter().map(|(k, v)| {
            let mut e = Vec::with_capacity(entry_len);
            e.extend_from_slice(k);
            e.extend_from_slice(v);
            e
        }).collect();
        entries.sort_by(|a, b| cmp(&a[..key_len], &a[key_len..], &b[..key_len], &b[key_len..]));
        let cap = entries.len().max(1);
        let mut block = Block::new(cap, key_len, self.config.value_len);
        for (i, entry) in entries.iter().enumerate() {
            block.slot_mut(i)[..].copy_from_slice(entry);
            block.occupied[i] = true;
        }
        block.len = entries.len();
        self.blocks = vec![block];
        self.sorted = true;
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.blocks.iter().flat_map(move |block| {
            (0..block.capacity).filter_map(move |i| {
                let slot = block.slot(i);
                if block.is_empty_slot(slot) {
                    None
                } else {
                    Some((&slot[..self.config.key_len], &slot[self.config.key_len..]))
                }
            })
        })
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}
