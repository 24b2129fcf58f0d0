use std::io;

use thiserror::Error;

/// Why the registry could not vouch for a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrackError {
    #[error("pointer is null")]
    Null,
    #[error("pointer is not tracked")]
    NotTracked,
    #[error("pointer was already freed")]
    AlreadyFreed,
}

/// Bookkeeping failures inside the registry itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A live entry already exists for the address being registered.
    #[error("address {addr:#x} already has a live entry")]
    Collision { addr: usize },
    #[error("registry storage could not grow")]
    Exhausted,
    #[error("address {addr:#x} has no live entry")]
    NotTracked { addr: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("underlying allocator could not provide {size} bytes")]
    Exhausted { size: usize },
    #[error("allocation entry could not be recorded")]
    Bookkeeping,
    #[error("reallocation rejected: {0}")]
    Rejected(TrackError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("[{function}] argument for %{conversion} is freed")]
    FreedArgument {
        function: &'static str,
        conversion: char,
        position: usize,
    },
    #[error("[{function}] format string is freed")]
    FreedFormat { function: &'static str },
    #[error("[{function}] NULL file stream")]
    NullStream { function: &'static str },
    #[error("no argument for %{conversion} at position {position}")]
    MissingArgument { conversion: char, position: usize },
    #[error("argument {position} cannot be formatted with %{conversion}")]
    ArgumentMismatch { conversion: char, position: usize },
    #[error("unsupported conversion %{0}")]
    UnsupportedConversion(char),
    #[error("format string ends inside a conversion")]
    Incomplete,
    /// A count or the output length does not fit in a C `int`.
    #[error("formatted length exceeds INT_MAX")]
    Overflow,
    #[error("output failed: {0}")]
    Io(io::ErrorKind),
}

impl From<io::Error> for FormatError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.kind())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CopyError {
    #[error("copy size must be greater than zero")]
    ZeroLength,
    #[error("source pointer is NULL")]
    NullSource,
    #[error("destination pointer is NULL")]
    NullDestination,
    #[error("source block was freed")]
    FreedSource,
    #[error("destination block was freed")]
    FreedDestination,
    #[error("copy of {len} bytes exceeds tracked block of {size} bytes")]
    OutOfBounds { len: usize, size: usize },
}

/// Why one resource in a bulk release could not be released cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CleanupError {
    #[error("block release failed: {0}")]
    Block(TrackError),
    #[error("stream flush failed: {0}")]
    Flush(io::ErrorKind),
}
