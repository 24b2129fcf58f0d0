//! Sanitizer configuration.
//!
//! Defaults reproduce the documented contract: bounds violations abort,
//! use-after-free in `snprintf` exits with status 1, truncation is reported.
use serde::{Deserialize, Serialize};

/// What to do once a fatal condition has been reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalAction {
    /// Raise `SIGABRT` through the C runtime.
    Abort,
    /// Exit the process with the given status.
    Exit(i32),
    /// Panic instead of terminating. Intended for host test harnesses.
    Panic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bounds_action: FatalAction,
    pub format_action: FatalAction,
    pub warn_on_truncation: bool,
    pub report_leaks_on_drop: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bounds_action: FatalAction::Abort,
            format_action: FatalAction::Exit(libc::EXIT_FAILURE),
            warn_on_truncation: true,
            report_leaks_on_drop: false,
        }
    }
}

impl Config {
    pub fn with_bounds_action(mut self, action: FatalAction) -> Self {
        self.bounds_action = action;
        self
    }

    pub fn with_format_action(mut self, action: FatalAction) -> Self {
        self.format_action = action;
        self
    }

    pub fn with_truncation_warnings(mut self, enabled: bool) -> Self {
        self.warn_on_truncation = enabled;
        self
    }

    pub fn with_leak_report_on_drop(mut self, enabled: bool) -> Self {
        self.report_leaks_on_drop = enabled;
        self
    }
}
