//! Sanitizer reports.
//!
//! Recoverable misuse is reported through `tracing`. Fatal reporters also
//! write straight to stderr, because the process is about to die and there
//! may be no subscriber installed.

use std::fmt;

use tracing::{debug, error, warn};

use crate::config::FatalAction;
use crate::error::{CopyError, TrackError};
use crate::platform;
use crate::sanitize::registry::Entry;

const HEADER: &[u8] = b"\n\x1b[1;31m=== safemem sanitizer ===\x1b[0m\n";

struct Hex(usize);

impl fmt::Display for Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

// --- Allocator lifecycle ---

pub fn allocated(addr: usize, size: usize) {
    debug!(addr = %Hex(addr), size, "tracked allocation");
}

pub fn reallocated(old: usize, new: usize, size: usize) {
    debug!(old = %Hex(old), new = %Hex(new), size, "tracked reallocation");
}

pub fn released(addr: usize, size: usize) {
    debug!(addr = %Hex(addr), size, "tracked free");
}

pub fn exhausted(size: usize) {
    error!(size, "underlying allocator is exhausted");
}

pub fn bookkeeping_failed(addr: usize, size: usize) {
    error!(addr = %Hex(addr), size, "could not record allocation, block released");
}

pub fn stale_entry(entry: &Entry) {
    error!(
        addr = %Hex(entry.addr),
        size = entry.size,
        generation = entry.generation,
        "address reissued while still live; it was released outside the tracker"
    );
}

pub fn rejected_realloc(addr: usize, reason: TrackError) {
    let state = match reason {
        TrackError::AlreadyFreed => "already freed",
        TrackError::NotTracked | TrackError::Null => "not tracked",
    };
    error!(addr = %Hex(addr), "[safe_realloc] Pointer is {state}.");
}

pub fn double_free(addr: usize) {
    error!(addr = %Hex(addr), "[safe_free] Double free detected!");
}

pub fn invalid_free(addr: usize) {
    error!(addr = %Hex(addr), "[safe_free] Invalid or untracked free!");
}

pub fn leak_detected(entry: &Entry) {
    warn!(
        addr = %Hex(entry.addr),
        size = entry.size,
        generation = entry.generation,
        "LEAK"
    );
}

pub fn leak_summary(count: usize, bytes: usize) {
    warn!(count, bytes, "total leaks");
}

// --- Access helpers ---

pub fn copy_rejected(reason: CopyError) {
    error!("[safe_memcpy] {reason}.");
}

pub fn null_string() {
    warn!("String is NULL in safe_strlen");
}

// --- Formatter ---

pub fn freed_argument(function: &str, conversion: char, addr: usize) {
    error!(
        function,
        addr = %Hex(addr),
        "[{function}] Argument for %{conversion} is freed."
    );
}

pub fn freed_format(function: &str) {
    error!(function, "[{function}] Format string is freed or invalid.");
}

pub fn null_stream(function: &str) {
    error!(function, "[{function}] NULL file stream.");
}

pub fn zero_capacity(function: &str) {
    warn!(function, "[{function}] Warning: size is 0, nothing will be written.");
}

pub fn truncated(function: &str, written: usize, capacity: usize) {
    warn!(
        function,
        written,
        capacity,
        "[{function}] Warning: output truncated (written: {written}, buffer: {capacity})"
    );
}

// --- Fatal reporters ---
// Each prints a diagnostic to stderr and then applies `action`.

fn fatal(action: FatalAction, reason: fmt::Arguments<'_>) -> ! {
    let line = format!("ERROR: {reason}\n");
    error!("{}", line.trim_end());
    platform::write_stderr(HEADER);
    platform::write_stderr(line.as_bytes());
    match action {
        FatalAction::Abort => {
            platform::write_stderr(b"aborting.\n\n");
            platform::abort()
        }
        FatalAction::Exit(code) => platform::exit(code),
        FatalAction::Panic => panic!("{}", line.trim_end()),
    }
}

pub fn invalid_memory(action: FatalAction, op: &str, reason: TrackError) -> ! {
    fatal(action, format_args!("{op}: invalid memory ({reason})"))
}

pub fn zero_element_size(action: FatalAction, op: &str) -> ! {
    fatal(action, format_args!("{op}: element size is zero"))
}

pub fn out_of_bounds(action: FatalAction, op: &str, index: usize, count: usize) -> ! {
    fatal(
        action,
        format_args!("{op}: index {index} out of bounds (size {count})"),
    )
}

pub fn freed_destination(action: FatalAction, function: &str) -> ! {
    fatal(
        action,
        format_args!("[{function}] Destination buffer is freed or invalid."),
    )
}

pub fn freed_format_fatal(action: FatalAction, function: &str) -> ! {
    fatal(
        action,
        format_args!("[{function}] Format string is freed or invalid."),
    )
}

pub fn freed_argument_fatal(action: FatalAction, function: &str, conversion: char) -> ! {
    fatal(
        action,
        format_args!("[{function}] %{conversion} argument is freed."),
    )
}
