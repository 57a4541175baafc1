//! Object pool
//!
//! Fixed-capacity pool in the spirit of lib/core/ogs-pool.h. Free slots are
//! recycled through a circular free list (head/tail), so a released slot is
//! handed out again only after every other free slot has been used.
//!
//! Every slot carries a generation counter that is bumped when the slot is
//! released. Handles ([`OgsPoolId`]) remember the generation they were issued
//! with, so a handle that outlived its object (a timer payload, an index kept
//! by a peer structure) resolves to `None` instead of aliasing whatever now
//! lives in the recycled slot.

use std::fmt;

/// Handle to an object stored in an [`OgsPool`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OgsPoolId {
    index: u32,
    generation: u32,
}

impl OgsPoolId {
    /// 1-based slot index, as printed in logs.
    pub fn index(&self) -> u32 {
        self.index + 1
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for OgsPoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index + 1, self.generation)
    }
}

impl fmt::Display for OgsPoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index + 1)
    }
}

struct Slot<T> {
    generation: u32,
    item: Option<T>,
}

/// Generic fixed-capacity object pool.
pub struct OgsPool<T> {
    name: String,
    head: usize,
    tail: usize,
    avail: usize,
    free: Vec<usize>,
    slots: Vec<Slot<T>>,
}

impl<T> OgsPool<T> {
    /// Create a pool with room for `size` objects (ogs_pool_init).
    pub fn new(name: &str, size: usize) -> Self {
        let mut slots = Vec::with_capacity(size);
        for _ in 0..size {
            slots.push(Slot {
                generation: 1,
                item: None,
            });
        }

        OgsPool {
            name: name.to_string(),
            head: 0,
            tail: 0,
            avail: size,
            free: (0..size).collect(),
            slots,
        }
    }

    /// Store `item` in a free slot (ogs_pool_alloc).
    ///
    /// Returns `None` when the pool is exhausted.
    pub fn alloc(&mut self, item: T) -> Option<OgsPoolId> {
        if self.avail == 0 {
            log::error!("[{}] pool exhausted (size={})", self.name, self.capacity());
            return None;
        }
        self.avail -= 1;
        let idx = self.free[self.head];
        self.head = (self.head + 1) % self.capacity();

        let slot = &mut self.slots[idx];
        slot.item = Some(item);
        Some(OgsPoolId {
            index: idx as u32,
            generation: slot.generation,
        })
    }

    /// Release the object behind `id` (ogs_pool_free).
    ///
    /// Stale or already released handles are ignored and yield `None`.
    pub fn free(&mut self, id: OgsPoolId) -> Option<T> {
        let idx = id.index as usize;
        let slot = self.slots.get_mut(idx)?;
        if slot.generation != id.generation {
            return None;
        }
        let item = slot.item.take()?;

        slot.generation = slot.generation.wrapping_add(1);
        if slot.generation == 0 {
            slot.generation = 1;
        }

        self.free[self.tail] = idx;
        self.tail = (self.tail + 1) % self.capacity();
        self.avail += 1;
        Some(item)
    }

    /// Resolve a handle (ogs_pool_find).
    pub fn find(&self, id: OgsPoolId) -> Option<&T> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.item.as_ref())
    }

    pub fn find_mut(&mut self, id: OgsPoolId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.item.as_mut())
    }

    pub fn contains(&self, id: OgsPoolId) -> bool {
        self.find(id).is_some()
    }

    /// Number of free slots (ogs_pool_avail).
    pub fn available(&self) -> usize {
        self.avail
    }

    /// Total number of slots (ogs_pool_size).
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live objects.
    pub fn allocated(&self) -> usize {
        self.capacity() - self.avail
    }

    pub fn is_empty(&self) -> bool {
        self.avail == self.capacity()
    }

    pub fn is_full(&self) -> bool {
        self.avail == 0
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Iterate over live objects in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (OgsPoolId, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.item.as_ref().map(|item| {
                (
                    OgsPoolId {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    item,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (OgsPoolId, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, slot)| {
            let generation = slot.generation;
            slot.item.as_mut().map(|item| {
                (
                    OgsPoolId {
                        index: i as u32,
                        generation,
                    },
                    item,
                )
            })
        })
    }

    /// Snapshot of the live handles, for loops that free while walking.
    pub fn ids(&self) -> Vec<OgsPoolId> {
        self.iter().map(|(id, _)| id).collect()
    }
}

impl<T> fmt::Debug for OgsPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OgsPool")
            .field("name", &self.name)
            .field("size", &self.capacity())
            .field("avail", &self.avail)
            .finish()
    }
}
