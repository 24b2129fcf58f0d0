pub mod access;
pub mod alloc;
pub mod cleanup;
pub mod diagnostic;
pub mod epoch;
pub mod registry;

use std::sync::Arc;

use crate::config::Config;
use crate::format::SafeFormatter;
use access::Accessor;
use alloc::TrackedAllocator;
use registry::Registry;

/// One registry and the front-ends that share it.
///
/// Components built from the same `Sanitizer` agree on which blocks are
/// live. Separate sanitizers track separately, which keeps tests isolated.
pub struct Sanitizer {
    registry: Arc<Registry>,
    config: Config,
    allocator: TrackedAllocator,
    formatter: SafeFormatter,
    accessor: Accessor,
}

impl Sanitizer {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let registry = Arc::new(Registry::new());
        Self {
            allocator: TrackedAllocator::new(Arc::clone(&registry)),
            formatter: SafeFormatter::new(Arc::clone(&registry), config.clone()),
            accessor: Accessor::new(Arc::clone(&registry), config.bounds_action),
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn allocator(&self) -> &TrackedAllocator {
        &self.allocator
    }

    pub fn formatter(&self) -> &SafeFormatter {
        &self.formatter
    }

    pub fn accessor(&self) -> &Accessor {
        &self.accessor
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Log every block still live. Returns how many there were.
    pub fn report_leaks(&self) -> usize {
        self.registry.report_leaks()
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Sanitizer {
    fn drop(&mut self) {
        if self.config.report_leaks_on_drop {
            self.registry.report_leaks();
        }
    }
}
