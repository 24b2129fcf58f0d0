//! C runtime primitives the sanitizer delegates to.

use libc::c_void;

/// Zero-initialised allocation. A zero-byte request is served as one byte
/// so every success yields a distinct, non-null address.
///
/// # Safety
/// The returned block must only be released through [`free`] or resized
/// through [`realloc`].
pub unsafe fn calloc(size: usize) -> *mut u8 {
    // SAFETY: calloc is provided by the C runtime.
    unsafe { libc::calloc(1, size.max(1)) as *mut u8 }
}

/// # Safety
/// `ptr` must have come from [`calloc`] or [`realloc`] and not been freed.
pub unsafe fn realloc(ptr: *mut u8, size: usize) -> *mut u8 {
    // SAFETY: caller guarantees ptr is a live C runtime block.
    unsafe { libc::realloc(ptr as *mut c_void, size.max(1)) as *mut u8 }
}

/// # Safety
/// `ptr` must have come from [`calloc`] or [`realloc`] and not been freed.
pub unsafe fn free(ptr: *mut u8) {
    // SAFETY: caller guarantees ptr is a live C runtime block.
    unsafe { libc::free(ptr as *mut c_void) }
}

pub fn abort() -> ! {
    // SAFETY: abort is provided by the C runtime and never returns.
    unsafe { libc::abort() }
}

pub fn exit(code: i32) -> ! {
    std::process::exit(code)
}

/// Unbuffered write to stderr, usable right before the process dies.
pub fn write_stderr(msg: &[u8]) {
    let mut rest = msg;
    while !rest.is_empty() {
        // SAFETY: rest points to rest.len() readable bytes; fd 2 is stderr.
        let n = unsafe { libc::write(2, rest.as_ptr() as *const c_void, rest.len()) };
        if n <= 0 {
            return;
        }
        rest = &rest[n as usize..];
    }
}
