//! 跨上下文共享表的登记处。
//!
//! 每个共享表占据一个槽位，以 `(index, generation)` 寻址。持有者（上下文、
//! 存储句柄、线程句柄）各自在条目上登记一次；持有者集合为空时条目被释放，
//! 槽位的 generation 递增，旧的 `EntryId` 从此失效。
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError, RwLock,
};

use indexmap::IndexMap;
use log::trace;
use rustc_hash::FxHashSet;

use crate::{
    lambda::runnable::RuntimeError,
    types::{object::Key, stored::StoredObject},
};

pub type SharedTable = IndexMap<Key, StoredObject>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde_support", derive(serde::Serialize, serde::Deserialize))]
pub struct EntryId {
    index: u32,
    generation: u32,
}

impl EntryId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Whoever keeps an entry alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde_support", derive(serde::Serialize, serde::Deserialize))]
pub enum Holder {
    Context(u64),
    Store(u64),
    Thread(u64),
}

struct Entry {
    table: Arc<RwLock<SharedTable>>,
    holders: FxHashSet<Holder>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Arena {
    fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    /// Removes `holder` from the entry; returns the table if that freed it.
    fn release(&mut self, id: EntryId, holder: Holder) -> Option<Arc<RwLock<SharedTable>>> {
        let entry = self.entry_mut(id)?;
        if !entry.holders.remove(&holder) || !entry.holders.is_empty() {
            return None;
        }
        let slot = &mut self.slots[id.index as usize];
        let freed = slot.entry.take().map(|entry| entry.table);
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        freed
    }
}

pub struct GcRegistry {
    arena: Mutex<Arena>,
    next_holder: AtomicU64,
}

impl GcRegistry {
    pub fn new() -> Self {
        GcRegistry {
            arena: Mutex::new(Arena::default()),
            next_holder: AtomicU64::new(1),
        }
    }

    /// Allocates an identity for a new holder (context, store or thread).
    pub fn next_holder_id(&self) -> u64 {
        self.next_holder.fetch_add(1, Ordering::Relaxed)
    }

    fn arena(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `table` as a new entry held by `holder`.
    pub fn create(&self, table: SharedTable, holder: Holder) -> EntryId {
        let mut holders = FxHashSet::default();
        holders.insert(holder);
        let entry = Entry {
            table: Arc::new(RwLock::new(table)),
            holders,
        };
        let mut arena = self.arena();
        arena.live += 1;
        let id = match arena.free.pop() {
            Some(index) => {
                let slot = &mut arena.slots[index as usize];
                slot.entry = Some(entry);
                EntryId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = arena.slots.len() as u32;
                arena.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                EntryId {
                    index,
                    generation: 0,
                }
            }
        };
        trace!("shared entry {:?} created for {:?}", id, holder);
        id
    }

    pub fn add_reference(&self, id: EntryId, holder: Holder) -> Result<(), RuntimeError> {
        let mut arena = self.arena();
        match arena.entry_mut(id) {
            Some(entry) => {
                entry.holders.insert(holder);
                Ok(())
            }
            None => Err(RuntimeError::BrokenReference),
        }
    }

    /// Returns whether this release freed the entry.
    pub fn release(&self, id: EntryId, holder: Holder) -> bool {
        let freed = self.arena().release(id, holder);
        // 表中可能还存着其它共享表的句柄，必须在释放锁之后再析构
        match freed {
            Some(table) => {
                trace!("shared entry {:?} freed by {:?}", id, holder);
                drop(table);
                true
            }
            None => false,
        }
    }

    pub fn release_all<I>(&self, holder: Holder, ids: I)
    where
        I: IntoIterator<Item = EntryId>,
    {
        let freed: Vec<_> = {
            let mut arena = self.arena();
            ids.into_iter()
                .filter_map(|id| arena.release(id, holder))
                .collect()
        };
        drop(freed);
    }

    /// Number of distinct holders; 0 once the entry has been freed.
    pub fn reference_count(&self, id: EntryId) -> usize {
        self.arena()
            .entry(id)
            .map_or(0, |entry| entry.holders.len())
    }

    pub fn is_alive(&self, id: EntryId) -> bool {
        self.arena().entry(id).is_some()
    }

    pub fn live_entries(&self) -> usize {
        self.arena().live
    }

    pub fn table(&self, id: EntryId) -> Result<Arc<RwLock<SharedTable>>, RuntimeError> {
        self.arena()
            .entry(id)
            .map(|entry| entry.table.clone())
            .ok_or(RuntimeError::BrokenReference)
    }

    pub fn with_table<T, F>(&self, id: EntryId, f: F) -> Result<T, RuntimeError>
    where
        F: FnOnce(&SharedTable) -> Result<T, RuntimeError>,
    {
        let table = self.table(id)?;
        let guard = table.read().map_err(|_| {
            RuntimeError::BorrowError("Failed to borrow shared table at `with_table`".into())
        })?;
        f(&guard)
    }

    pub fn with_table_mut<T, F>(&self, id: EntryId, f: F) -> Result<T, RuntimeError>
    where
        F: FnOnce(&mut SharedTable) -> Result<T, RuntimeError>,
    {
        let table = self.table(id)?;
        let mut guard = table.write().map_err(|_| {
            RuntimeError::BorrowError("Failed to borrow shared table at `with_table_mut`".into())
        })?;
        f(&mut guard)
    }
}

impl Default for GcRegistry {
    fn default() -> Self {
        GcRegistry::new()
    }
}

impl std::fmt::Debug for GcRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GcRegistry(live: {})", self.live_entries())
    }
}
