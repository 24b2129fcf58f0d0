//! Allocation registry: address -> (size, freed) bookkeeping.
//!
//! Entries are never removed. Retiring an entry only flips its `freed` flag,
//! which is what lets a later use of the address be recognised as a
//! use-after-free rather than an unknown pointer. Storage therefore grows
//! with the total number of allocations ever made.
//!
//! When the C runtime reissues an address, a fresh entry is registered and
//! linked in front of the retired ones; every query resolves to the newest
//! entry for an address.

use std::collections::HashMap;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::error::{AllocError, RegistryError, TrackError};
use crate::sanitize::diagnostic;
use crate::sanitize::epoch::{Epoch, Generation};

/// Liveness of an address as seen by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NotTracked,
    Live(usize),
    Freed,
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub addr: usize,
    /// Requested size at the last (re)allocation, 0 once freed.
    pub size: usize,
    pub freed: bool,
    pub generation: Generation,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Entries ever created.
    pub tracked: usize,
    pub live: usize,
    pub freed: usize,
    pub live_bytes: usize,
}

struct Slot {
    entry: Entry,
    /// Older entry registered at the same address, if any.
    prev: Option<usize>,
}

#[derive(Default)]
struct RegistryInner {
    slots: Vec<Slot>,
    /// Newest slot for each address ever seen.
    newest: HashMap<usize, usize>,
    live: usize,
    live_bytes: usize,
}

impl RegistryInner {
    fn find(&self, addr: usize) -> Option<usize> {
        self.newest.get(&addr).copied()
    }

    fn find_live(&self, addr: usize) -> Result<usize, TrackError> {
        match self.find(addr) {
            Some(idx) if self.slots[idx].entry.freed => Err(TrackError::AlreadyFreed),
            Some(idx) => Ok(idx),
            None => Err(TrackError::NotTracked),
        }
    }

    fn status(&self, addr: usize) -> Status {
        match self.find(addr) {
            None => Status::NotTracked,
            Some(idx) if self.slots[idx].entry.freed => Status::Freed,
            Some(idx) => Status::Live(self.slots[idx].entry.size),
        }
    }

    fn reserve(&mut self) -> Result<(), RegistryError> {
        self.slots
            .try_reserve(1)
            .map_err(|_| RegistryError::Exhausted)?;
        self.newest
            .try_reserve(1)
            .map_err(|_| RegistryError::Exhausted)
    }

    fn register(
        &mut self,
        addr: usize,
        size: usize,
        generation: Generation,
    ) -> Result<(), RegistryError> {
        if self.find_live(addr).is_ok() {
            return Err(RegistryError::Collision { addr });
        }
        self.reserve()?;

        let idx = self.slots.len();
        self.slots.push(Slot {
            entry: Entry {
                addr,
                size,
                freed: false,
                generation,
            },
            prev: self.newest.get(&addr).copied(),
        });
        self.newest.insert(addr, idx);
        self.live += 1;
        self.live_bytes += size;
        Ok(())
    }

    /// Rewrite slot `idx` in place to describe `new_addr`/`size`.
    ///
    /// Capacity for one more address must already be reserved.
    fn relocate(&mut self, idx: usize, new_addr: usize, size: usize) {
        let old_addr = self.slots[idx].entry.addr;
        let old_size = self.slots[idx].entry.size;
        self.live_bytes = self.live_bytes - old_size + size;

        if old_addr != new_addr {
            // A live slot is always the newest one for its address.
            match self.slots[idx].prev.take() {
                Some(prev) => self.newest.insert(old_addr, prev),
                None => self.newest.remove(&old_addr),
            };

            self.retire_stale(new_addr);
            self.slots[idx].prev = self.newest.insert(new_addr, idx);
            self.slots[idx].entry.addr = new_addr;
        }
        self.slots[idx].entry.size = size;
    }

    /// The C runtime handed out `addr` while we still consider it live, so
    /// that block was released behind our back. Retire the stale entry.
    fn retire_stale(&mut self, addr: usize) {
        if let Ok(stale) = self.find_live(addr) {
            diagnostic::stale_entry(&self.slots[stale].entry);
            self.retire_slot(stale);
        }
    }

    fn retire_slot(&mut self, idx: usize) -> usize {
        let entry = &mut self.slots[idx].entry;
        let size = entry.size;
        entry.freed = true;
        entry.size = 0;
        self.live -= 1;
        self.live_bytes -= size;
        size
    }
}

/// Process-lifetime record of every allocation made through a
/// [`TrackedAllocator`](crate::sanitize::alloc::TrackedAllocator).
///
/// All operations serialise on one lock, so a lookup racing a retirement
/// observes either the live or the freed state, never a torn entry.
pub struct Registry {
    inner: Mutex<RegistryInner>,
    epoch: Epoch,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn addr_of<T: ?Sized>(ptr: *const T) -> usize {
    ptr.cast::<u8>().addr()
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            epoch: Epoch::new(),
        }
    }

    pub fn lookup<T: ?Sized>(&self, ptr: *const T) -> Status {
        self.inner.lock().status(addr_of(ptr))
    }

    /// Snapshot of the newest entry for `ptr`.
    pub fn entry<T: ?Sized>(&self, ptr: *const T) -> Option<Entry> {
        let inner = self.inner.lock();
        inner.find(addr_of(ptr)).map(|idx| inner.slots[idx].entry)
    }

    /// Record a new live allocation and return its generation.
    pub fn register<T: ?Sized>(
        &self,
        ptr: *const T,
        size: usize,
    ) -> Result<Generation, RegistryError> {
        let mut inner = self.inner.lock();
        let generation = self.epoch.bump();
        inner.register(addr_of(ptr), size, generation)?;
        Ok(generation)
    }

    /// Record a block the C runtime just returned. A live entry already at
    /// that address is stale and gets retired first.
    pub(crate) fn register_fresh(
        &self,
        addr: usize,
        size: usize,
    ) -> Result<Generation, RegistryError> {
        let mut inner = self.inner.lock();
        inner.reserve()?;
        inner.retire_stale(addr);
        let generation = self.epoch.bump();
        inner.register(addr, size, generation)?;
        Ok(generation)
    }

    /// Move the live entry for `old` to `new` with a new size. The entry keeps
    /// its generation.
    pub fn update<T: ?Sized, U: ?Sized>(
        &self,
        old: *const T,
        new: *const U,
        size: usize,
    ) -> Result<(), RegistryError> {
        let old = addr_of(old);
        let mut inner = self.inner.lock();
        let idx = inner
            .find_live(old)
            .map_err(|_| RegistryError::NotTracked { addr: old })?;
        inner.reserve()?;
        inner.relocate(idx, addr_of(new), size);
        Ok(())
    }

    /// Check `ptr` is live, run `resize` on it and record the result, all
    /// under the registry lock. `resize` receives the current size and
    /// returns the resized block.
    pub(crate) fn update_with<F>(
        &self,
        ptr: usize,
        new_size: usize,
        resize: F,
    ) -> Result<NonNull<u8>, AllocError>
    where
        F: FnOnce(usize) -> Result<NonNull<u8>, AllocError>,
    {
        let mut inner = self.inner.lock();
        let idx = inner.find_live(ptr).map_err(AllocError::Rejected)?;
        inner.reserve().map_err(|_| AllocError::Bookkeeping)?;

        let block = resize(inner.slots[idx].entry.size)?;
        inner.relocate(idx, block.as_ptr().addr(), new_size);
        Ok(block)
    }

    /// Mark the entry for `ptr` freed. Returns the size it had.
    pub fn retire<T: ?Sized>(&self, ptr: *const T) -> Result<usize, TrackError> {
        self.retire_with(addr_of(ptr), |_| {})
    }

    /// Like [`retire`](Self::retire) but runs `release` on the live block
    /// before flipping the flag, while still holding the lock. Two racing
    /// callers cannot both reach `release`.
    pub(crate) fn retire_with<F>(&self, ptr: usize, release: F) -> Result<usize, TrackError>
    where
        F: FnOnce(usize),
    {
        if ptr == 0 {
            return Err(TrackError::Null);
        }
        let mut inner = self.inner.lock();
        let idx = inner.find_live(ptr)?;
        release(inner.slots[idx].entry.size);
        Ok(inner.retire_slot(idx))
    }

    pub fn stats(&self) -> Stats {
        let inner = self.inner.lock();
        Stats {
            tracked: inner.slots.len(),
            live: inner.live,
            freed: inner.slots.len() - inner.live,
            live_bytes: inner.live_bytes,
        }
    }

    /// Walk all live allocations, oldest first.
    pub fn for_each_live(&self, mut f: impl FnMut(&Entry)) {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .filter(|slot| !slot.entry.freed)
            .for_each(|slot| f(&slot.entry));
    }

    /// Report all live (unfreed) allocations. Returns how many were found.
    pub fn report_leaks(&self) -> usize {
        let mut count = 0;
        let mut bytes = 0;
        self.for_each_live(|entry| {
            diagnostic::leak_detected(entry);
            count += 1;
            bytes += entry.size;
        });
        if count > 0 {
            diagnostic::leak_summary(count, bytes);
        }
        count
    }
}
