//! Bounds-checked element access and checked copies.
//!
//! Index checks use the registry's size for tracked blocks and a caller hint
//! for everything else. A bad size or an out-of-range index is fatal: by the
//! time it is detected the caller is already about to corrupt memory.

use std::ffi::{CStr, c_char};
use std::mem;
use std::ptr;
use std::sync::Arc;

use crate::config::FatalAction;
use crate::error::{CopyError, TrackError};
use crate::sanitize::alloc;
use crate::sanitize::diagnostic;
use crate::sanitize::registry::{Registry, Status};

pub struct Accessor {
    registry: Arc<Registry>,
    action: FatalAction,
}

impl Accessor {
    pub fn new(registry: Arc<Registry>, action: FatalAction) -> Self {
        Self { registry, action }
    }

    /// Byte length of the buffer at `ptr`: the tracked size, or `hint` for an
    /// untracked buffer.
    pub fn total_bytes<T: ?Sized>(
        &self,
        ptr: *const T,
        hint: Option<usize>,
    ) -> Result<usize, TrackError> {
        alloc::size_of(&self.registry, ptr, hint)
    }

    /// Byte offset of element `index`, or a fatal report.
    fn offset(
        &self,
        op: &str,
        index: usize,
        total_bytes: Result<usize, TrackError>,
        element_size: usize,
    ) -> usize {
        let total_bytes = match total_bytes {
            Ok(total) => total,
            Err(reason) => diagnostic::invalid_memory(self.action, op, reason),
        };
        if element_size == 0 {
            diagnostic::zero_element_size(self.action, op);
        }
        let count = total_bytes / element_size;
        if index >= count {
            diagnostic::out_of_bounds(self.action, op, index, count);
        }
        index * element_size
    }

    /// Location of element `index` in `buffer`.
    ///
    /// `total_bytes` normally comes from [`total_bytes`](Self::total_bytes).
    /// An error there, a zero `element_size`, or `index` past the last
    /// whole element terminates the process.
    pub fn read(
        &self,
        buffer: *const u8,
        index: usize,
        total_bytes: Result<usize, TrackError>,
        element_size: usize,
    ) -> *const u8 {
        let offset = self.offset("read", index, total_bytes, element_size);
        buffer.wrapping_add(offset)
    }

    /// Copy `element_size` bytes from `value` into slot `index` of `buffer`
    /// and return the slot. Checks as for [`read`](Self::read).
    ///
    /// # Safety
    /// `buffer` must be valid for writes of `total_bytes` bytes and `value`
    /// valid for reads of `element_size` bytes, not overlapping the slot.
    pub unsafe fn write(
        &self,
        buffer: *mut u8,
        index: usize,
        value: *const u8,
        total_bytes: Result<usize, TrackError>,
        element_size: usize,
    ) -> *mut u8 {
        let offset = self.offset("write", index, total_bytes, element_size);
        // SAFETY: offset + element_size <= total_bytes, which the caller
        // guarantees is writable.
        unsafe {
            let slot = buffer.add(offset);
            ptr::copy_nonoverlapping(value, slot, element_size);
            slot
        }
    }

    /// Typed [`read`](Self::read). `hint` is the byte length to assume when
    /// `buffer` is not tracked.
    ///
    /// # Safety
    /// `buffer` must be valid for reads of its tracked size (or `hint`).
    pub unsafe fn get<T: Copy>(&self, buffer: *const T, index: usize, hint: Option<usize>) -> T {
        let total = self.total_bytes(buffer, hint);
        let slot = self.read(buffer.cast(), index, total, mem::size_of::<T>());
        // SAFETY: slot is in bounds; readability is the caller's contract.
        unsafe { slot.cast::<T>().read_unaligned() }
    }

    /// Typed [`write`](Self::write).
    ///
    /// # Safety
    /// `buffer` must be valid for writes of its tracked size (or `hint`).
    pub unsafe fn set<T: Copy>(
        &self,
        buffer: *mut T,
        index: usize,
        value: T,
        hint: Option<usize>,
    ) -> *mut T {
        let total = self.total_bytes(buffer, hint);
        // SAFETY: forwarded caller contract; value is a local copy.
        unsafe {
            self.write(
                buffer.cast(),
                index,
                (&value as *const T).cast(),
                total,
                mem::size_of::<T>(),
            )
            .cast()
        }
    }

    /// Checked element read from a slice. A tracked allocation viewed through
    /// the slice is bounded by both its tracked size and the slice length.
    pub fn get_in<T: Copy>(&self, slice: &[T], index: usize) -> T {
        let total = self.slice_bytes(slice);
        let slot = self.read(slice.as_ptr().cast(), index, total, mem::size_of::<T>());
        // SAFETY: slot lies inside the slice.
        unsafe { slot.cast::<T>().read_unaligned() }
    }

    /// Checked element write into a slice.
    pub fn set_in<T: Copy>(&self, slice: &mut [T], index: usize, value: T) {
        let total = self.slice_bytes(slice);
        let offset = self.offset("write", index, total, mem::size_of::<T>());
        slice[offset / mem::size_of::<T>()] = value;
    }

    fn slice_bytes<T>(&self, slice: &[T]) -> Result<usize, TrackError> {
        let bytes = mem::size_of_val(slice);
        self.total_bytes(slice.as_ptr(), Some(bytes))
            .map(|total| total.min(bytes))
    }

    /// Copy `len` bytes from `src` to `dst` after null, liveness and tracked
    /// size checks. Returns `dst`.
    ///
    /// # Safety
    /// Both regions must be valid for `len` bytes and must not overlap.
    pub unsafe fn copy(&self, dst: *mut u8, src: *const u8, len: usize) -> Result<*mut u8, CopyError> {
        let checked = self.check_copy(dst, src, len);
        if let Err(reason) = checked {
            diagnostic::copy_rejected(reason);
            return Err(reason);
        }
        // SAFETY: caller guarantees both regions; nulls were rejected above.
        unsafe { ptr::copy_nonoverlapping(src, dst, len) };
        Ok(dst)
    }

    fn check_copy(&self, dst: *mut u8, src: *const u8, len: usize) -> Result<(), CopyError> {
        if len == 0 {
            return Err(CopyError::ZeroLength);
        }
        if src.is_null() {
            return Err(CopyError::NullSource);
        }
        if dst.is_null() {
            return Err(CopyError::NullDestination);
        }
        for (region, freed) in [
            (src, CopyError::FreedSource),
            (dst.cast_const(), CopyError::FreedDestination),
        ] {
            match self.registry.lookup(region) {
                Status::Freed => return Err(freed),
                Status::Live(size) if len > size => {
                    return Err(CopyError::OutOfBounds { len, size });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Length of a C string; NULL yields 0 with a warning.
    ///
    /// # Safety
    /// A non-null `s` must point to a NUL-terminated string.
    pub unsafe fn strlen(&self, s: *const c_char) -> usize {
        if s.is_null() {
            diagnostic::null_string();
            return 0;
        }
        // SAFETY: caller guarantees termination.
        unsafe { CStr::from_ptr(s) }.to_bytes().len()
    }
}
