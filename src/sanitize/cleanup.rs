//! Bulk release of heterogeneous resources.

use std::fmt;
use std::io::Write;

use tracing::{debug, warn};

use crate::error::CleanupError;
use crate::sanitize::alloc::TrackedAllocator;

/// One thing to release. A null block is skipped.
pub enum Resource<'a> {
    /// Flushed, then closed by dropping it.
    File(Box<dyn Write + 'a>),
    /// Returned through [`TrackedAllocator::free`].
    Block(*mut u8),
    Custom(Box<dyn FnOnce() + 'a>),
}

impl fmt::Debug for Resource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(_) => f.write_str("File(..)"),
            Self::Block(ptr) => f.debug_tuple("Block").field(ptr).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl<'a> Resource<'a> {
    pub fn file(stream: impl Write + 'a) -> Self {
        Self::File(Box::new(stream))
    }

    pub fn custom(release: impl FnOnce() + 'a) -> Self {
        Self::Custom(Box::new(release))
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub released: usize,
    pub skipped: usize,
    /// Position in the input and what went wrong there.
    pub failures: Vec<(usize, CleanupError)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Release every resource in order. A failure is recorded and the walk
/// continues with the next resource.
///
/// # Safety
/// Every non-null block must be unused after this call, as for
/// [`TrackedAllocator::free`].
pub unsafe fn release_all<'a>(
    allocator: &TrackedAllocator,
    resources: impl IntoIterator<Item = Resource<'a>>,
) -> CleanupReport {
    let mut report = CleanupReport::default();

    for (position, resource) in resources.into_iter().enumerate() {
        let outcome = match resource {
            Resource::Block(ptr) if ptr.is_null() => {
                report.skipped += 1;
                continue;
            }
            Resource::Block(ptr) => {
                // SAFETY: forwarded caller contract.
                let freed = unsafe { allocator.free(ptr) };
                freed.map_err(CleanupError::Block)
            }
            Resource::File(mut stream) => stream
                .flush()
                .map_err(|err| CleanupError::Flush(err.kind())),
            Resource::Custom(release) => {
                release();
                Ok(())
            }
        };

        match outcome {
            Ok(()) => report.released += 1,
            Err(err) => {
                warn!(position, %err, "resource release failed");
                report.failures.push((position, err));
            }
        }
    }

    debug!(
        released = report.released,
        skipped = report.skipped,
        failed = report.failures.len(),
        "cleanup finished"
    );
    report
}
