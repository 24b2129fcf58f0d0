//! Tracked memory with use-after-free checking.
//!
//! Every block handed out by [`TrackedAllocator`] is recorded in a shared
//! [`Registry`]. Entries outlive the blocks they describe, so later calls can
//! tell a freed pointer from one the registry never saw. The rest of the
//! crate consults the registry before touching memory: [`Accessor`] checks
//! indexed reads and writes against block sizes, and [`SafeFormatter`]
//! refuses to print through freed `%s`/`%p` arguments.
//!
//! Most programs build one [`Sanitizer`] and use its parts.
//!
//! ```
//! use safemem::{Sanitizer, Status};
//!
//! let sanitizer = Sanitizer::new();
//! let block = sanitizer.allocator().allocate(16).unwrap();
//! unsafe { sanitizer.allocator().free(block.as_ptr()) }.unwrap();
//! assert_eq!(sanitizer.registry().lookup(block.as_ptr()), Status::Freed);
//! ```

pub mod config;
pub mod error;
pub mod format;
mod platform;
pub mod sanitize;

pub use config::{Config, FatalAction};
pub use error::{AllocError, CleanupError, CopyError, FormatError, RegistryError, TrackError};
pub use format::{Arg, SafeFormatter};
pub use sanitize::Sanitizer;
pub use sanitize::access::Accessor;
pub use sanitize::alloc::TrackedAllocator;
pub use sanitize::registry::{Entry, Registry, Stats, Status};
