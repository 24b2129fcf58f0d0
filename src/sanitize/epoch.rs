use std::sync::atomic::{AtomicU64, Ordering};

/// Generation stamp carried by every registry entry.
pub type Generation = u64;

/// Monotonic source of allocation generations.
///
/// Every registered allocation takes the next generation, so two entries
/// that share an address (the C runtime handed the same block out twice)
/// can still be told apart in reports.
#[derive(Debug)]
pub struct Epoch(AtomicU64);

impl Default for Epoch {
    fn default() -> Self {
        Self::new()
    }
}

impl Epoch {
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// The generation the next allocation will receive.
    pub fn current(&self) -> Generation {
        self.0.load(Ordering::Acquire)
    }

    /// Claim a generation. Returns the claimed value.
    pub fn bump(&self) -> Generation {
        self.0.fetch_add(1, Ordering::AcqRel)
    }
}
