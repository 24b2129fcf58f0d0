//! Tracked allocation on top of the C runtime allocator.

use std::ptr::{self, NonNull};
use std::sync::Arc;

use crate::error::{AllocError, TrackError};
use crate::platform;
use crate::sanitize::diagnostic;
use crate::sanitize::registry::{Registry, Status};

/// Allocator front-end that records every block in a shared [`Registry`].
///
/// Blocks are zero-filled on allocation and scrubbed before release. Freed
/// blocks stay in the registry, so double frees and reallocation of freed
/// pointers are reported instead of reaching the C runtime.
#[derive(Clone)]
pub struct TrackedAllocator {
    registry: Arc<Registry>,
}

impl TrackedAllocator {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Allocate `size` zeroed bytes and start tracking them.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: the block is tracked below and only released through free().
        let raw = unsafe { platform::calloc(size) };
        let Some(block) = NonNull::new(raw) else {
            diagnostic::exhausted(size);
            return Err(AllocError::Exhausted { size });
        };

        let addr = block.as_ptr().addr();
        if self.registry.register_fresh(addr, size).is_err() {
            // SAFETY: block came from calloc above and was never handed out.
            unsafe { platform::free(block.as_ptr()) };
            diagnostic::bookkeeping_failed(addr, size);
            return Err(AllocError::Bookkeeping);
        }

        diagnostic::allocated(addr, size);
        Ok(block)
    }

    /// Allocate a tracked block holding a copy of `bytes`.
    pub fn allocate_copy(&self, bytes: &[u8]) -> Result<NonNull<u8>, AllocError> {
        let block = self.allocate(bytes.len())?;
        // SAFETY: block is a fresh allocation of bytes.len() bytes.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), block.as_ptr(), bytes.len()) };
        Ok(block)
    }

    /// Resize a tracked block.
    ///
    /// A null `ptr` behaves like [`allocate`](Self::allocate). A freed or
    /// untracked `ptr` is rejected before the C runtime sees it. Bytes past
    /// the old size are zeroed when the block grows.
    ///
    /// # Safety
    /// No references into the old block may be used after a successful call.
    pub unsafe fn reallocate(
        &self,
        ptr: *mut u8,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        if ptr.is_null() {
            return self.allocate(new_size);
        }

        let result = self.registry.update_with(ptr.addr(), new_size, |old_size| {
            // SAFETY: the registry vouched that ptr is a live tracked block.
            let raw = unsafe { platform::realloc(ptr, new_size) };
            let Some(block) = NonNull::new(raw) else {
                diagnostic::exhausted(new_size);
                return Err(AllocError::Exhausted { size: new_size });
            };
            if new_size > old_size {
                // SAFETY: the block now holds new_size bytes.
                unsafe { ptr::write_bytes(block.as_ptr().add(old_size), 0, new_size - old_size) };
            }
            Ok(block)
        });

        match result {
            Ok(block) => {
                diagnostic::reallocated(ptr.addr(), block.as_ptr().addr(), new_size);
                Ok(block)
            }
            Err(AllocError::Rejected(reason)) => {
                diagnostic::rejected_realloc(ptr.addr(), reason);
                Err(AllocError::Rejected(reason))
            }
            Err(err) => Err(err),
        }
    }

    /// Scrub, release and retire a tracked block.
    ///
    /// The entry is kept, so a second call reports
    /// [`TrackError::AlreadyFreed`] without touching the C runtime.
    ///
    /// # Safety
    /// No references into the block may be used after a successful call.
    pub unsafe fn free(&self, ptr: *mut u8) -> Result<(), TrackError> {
        let result = self.registry.retire_with(ptr.addr(), |size| {
            // SAFETY: the registry vouched that ptr is a live block of size bytes.
            unsafe {
                ptr::write_bytes(ptr, 0, size);
                platform::free(ptr);
            }
        });

        match result {
            Ok(size) => {
                diagnostic::released(ptr.addr(), size);
                Ok(())
            }
            Err(TrackError::AlreadyFreed) => {
                diagnostic::double_free(ptr.addr());
                Err(TrackError::AlreadyFreed)
            }
            Err(err) => {
                diagnostic::invalid_free(ptr.addr());
                Err(err)
            }
        }
    }

    /// Tracked size of `ptr`. An untracked pointer falls back to `hint`
    /// when one is given, so callers can treat static buffers uniformly.
    pub fn size_of<T: ?Sized>(&self, ptr: *const T, hint: Option<usize>) -> Result<usize, TrackError> {
        size_of(&self.registry, ptr, hint)
    }

    /// Whether `ptr` has been freed. `None` means it is not tracked.
    pub fn is_freed<T: ?Sized>(&self, ptr: *const T) -> Option<bool> {
        match self.registry.lookup(ptr) {
            Status::NotTracked => None,
            Status::Live(_) => Some(false),
            Status::Freed => Some(true),
        }
    }
}

pub(crate) fn size_of<T: ?Sized>(
    registry: &Registry,
    ptr: *const T,
    hint: Option<usize>,
) -> Result<usize, TrackError> {
    if ptr.is_null() {
        return Err(TrackError::Null);
    }
    match registry.lookup(ptr) {
        Status::Live(size) => Ok(size),
        Status::Freed => Err(TrackError::AlreadyFreed),
        Status::NotTracked => hint.ok_or(TrackError::NotTracked),
    }
}
