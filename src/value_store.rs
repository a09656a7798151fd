//! Process-wide arena backing [`crate::record::FlowRec`]'s sidecar handle.
//!
//! Sidecar tables are expensive to carry inline in every flow record (most
//! records have none), so a record only carries a `u32` index into a shared
//! arena of tables. The arena is reference counted per slot so that copying
//! a record's sidecar handle (e.g. across the sort's buffer moves) does not
//! require deep-copying the table until it is actually mutated.

use std::collections::BTreeMap;

use crate::sidecar::SidecarValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SidecarHandle {
    #[default]
    None,
    Index(u32),
}

struct Slot {
    table: BTreeMap<String, SidecarValue>,
    refcount: u32,
}

/// Arena of sidecar tables, indexed by [`SidecarHandle::Index`].
///
/// Not `Sync`; a [`crate::record::FlowRec`] that must cross the boundary
/// between the netflow5 reader thread and a consumer carries its value
/// store behind an `Arc<Mutex<_>>` at that one hand-off point, per the
/// single-threaded-consumer assumption the rest of the crate makes.
#[derive(Default)]
pub struct ValueStore {
    slots: Vec<Option<Slot>>,
    free_list: Vec<u32>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new empty table and returns its handle.
    pub fn allocate(&mut self) -> SidecarHandle {
        let table = BTreeMap::new();
        if let Some(idx) = self.free_list.pop() {
            self.slots[idx as usize] = Some(Slot { table, refcount: 1 });
            SidecarHandle::Index(idx)
        } else {
            self.slots.push(Some(Slot { table, refcount: 1 }));
            SidecarHandle::Index((self.slots.len() - 1) as u32)
        }
    }

    /// Increments the refcount and returns the same handle, modeling a
    /// shallow copy (e.g. a record clone that has not yet written to its
    /// sidecar).
    pub fn retain(&mut self, handle: SidecarHandle) -> SidecarHandle {
        if let SidecarHandle::Index(idx) = handle {
            if let Some(slot) = self.slots[idx as usize].as_mut() {
                slot.refcount += 1;
            }
        }
        handle
    }

    /// Releases one reference; frees the slot once the refcount hits zero.
    pub fn release(&mut self, handle: SidecarHandle) {
        if let SidecarHandle::Index(idx) = handle {
            let free = if let Some(slot) = self.slots[idx as usize].as_mut() {
                slot.refcount = slot.refcount.saturating_sub(1);
                slot.refcount == 0
            } else {
                false
            };
            if free {
                self.slots[idx as usize] = None;
                self.free_list.push(idx);
            }
        }
    }

    pub fn get(&self, handle: SidecarHandle) -> Option<&BTreeMap<String, SidecarValue>> {
        match handle {
            SidecarHandle::None => None,
            SidecarHandle::Index(idx) => self.slots[idx as usize].as_ref().map(|s| &s.table),
        }
    }

    /// Gives write access to a table, copy-on-write when shared: if the
    /// slot's refcount is greater than one, the caller's handle is first
    /// rewritten to a fresh private slot so sibling handles are unaffected.
    pub fn get_mut_cow(&mut self, handle: &mut SidecarHandle) -> &mut BTreeMap<String, SidecarValue> {
        match *handle {
            SidecarHandle::None => {
                let new_handle = self.allocate();
                *handle = new_handle;
            }
            SidecarHandle::Index(idx) => {
                let needs_copy = self.slots[idx as usize]
                    .as_ref()
                    .map(|s| s.refcount > 1)
                    .unwrap_or(true);
                if needs_copy {
                    let table = self.slots[idx as usize]
                        .as_ref()
                        .map(|s| s.table.clone())
                        .unwrap_or_default();
                    self.release(handle.clone_handle());
                    let new_handle = self.allocate();
                    if let SidecarHandle::Index(new_idx) = new_handle {
                        self.slots[new_idx as usize].as_mut().unwrap().table = table;
                    }
                    *handle = new_handle;
                }
            }
        }
        match *handle {
            SidecarHandle::Index(idx) => &mut self.slots[idx as usize].as_mut().unwrap().table,
            SidecarHandle::None => unreachable!("handle was allocated above"),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SidecarHandle {
    fn clone_handle(&self) -> SidecarHandle {
        *self
    }
}
