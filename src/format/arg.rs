//! Captured argument lists for the safe formatter.

use std::ffi::{CStr, c_char};
use std::ptr::NonNull;

/// One formatting argument.
///
/// The formatter receives the whole list as a slice, validates it through
/// one [`ArgCursor`] and renders through another, so validation never
/// disturbs the arguments the real call sees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg<'a> {
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(&'a str),
    CStr(RawStr),
    Ptr(*const u8),
}

/// A C string pointer that is only read once the registry has cleared it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawStr(*const c_char);

impl RawStr {
    pub fn as_ptr(self) -> *const c_char {
        self.0
    }

    /// Bytes before the terminator, `None` for a null pointer.
    ///
    /// # Safety
    /// A non-null pointer must still satisfy the contract of [`Arg::c_str`].
    pub(crate) unsafe fn to_bytes<'x>(self) -> Option<&'x [u8]> {
        if self.0.is_null() {
            return None;
        }
        // SAFETY: forwarded from Arg::c_str.
        Some(unsafe { CStr::from_ptr(self.0) }.to_bytes())
    }
}

impl<'a> Arg<'a> {
    /// A `%s` argument read from a raw C string.
    ///
    /// # Safety
    /// `ptr` must be null or NUL-terminated and readable whenever the
    /// registry does not report it freed at formatting time.
    pub unsafe fn c_str(ptr: *const c_char) -> Self {
        Self::CStr(RawStr(ptr))
    }

    pub fn ptr<T: ?Sized>(ptr: *const T) -> Self {
        Self::Ptr(ptr.cast())
    }

    /// Address the registry should vet, for pointer-typed arguments.
    pub(crate) fn address(&self) -> Option<*const u8> {
        match *self {
            Self::Str(s) => Some(s.as_ptr()),
            Self::CStr(raw) => Some(raw.as_ptr().cast()),
            Self::Ptr(ptr) => Some(ptr),
            Self::Int(_) | Self::Uint(_) | Self::Float(_) => None,
        }
    }
}

macro_rules! from_signed {
    ($($ty:ty),*) => {$(
        impl From<$ty> for Arg<'_> {
            fn from(value: $ty) -> Self {
                Self::Int(value as i64)
            }
        }
    )*};
}

macro_rules! from_unsigned {
    ($($ty:ty),*) => {$(
        impl From<$ty> for Arg<'_> {
            fn from(value: $ty) -> Self {
                Self::Uint(value as u64)
            }
        }
    )*};
}

from_signed!(i8, i16, i32, i64, isize);
from_unsigned!(u8, u16, u32, u64, usize);

impl From<char> for Arg<'_> {
    fn from(value: char) -> Self {
        Self::Uint(value as u64)
    }
}

impl From<f32> for Arg<'_> {
    fn from(value: f32) -> Self {
        Self::Float(value.into())
    }
}

impl From<f64> for Arg<'_> {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl<'a> From<&'a str> for Arg<'a> {
    fn from(value: &'a str) -> Self {
        Self::Str(value)
    }
}

impl<'a> From<&'a String> for Arg<'a> {
    fn from(value: &'a String) -> Self {
        Self::Str(value)
    }
}

impl<'a> From<&'a CStr> for Arg<'a> {
    fn from(value: &'a CStr) -> Self {
        Self::CStr(RawStr(value.as_ptr()))
    }
}

impl<T> From<*const T> for Arg<'_> {
    fn from(value: *const T) -> Self {
        Self::ptr(value)
    }
}

impl<T> From<*mut T> for Arg<'_> {
    fn from(value: *mut T) -> Self {
        Self::ptr(value.cast_const())
    }
}

impl<T> From<NonNull<T>> for Arg<'_> {
    fn from(value: NonNull<T>) -> Self {
        Self::ptr(value.as_ptr().cast_const())
    }
}

/// Restartable position in a captured argument list.
#[derive(Debug, Clone)]
pub struct ArgCursor<'s, 'a> {
    args: &'s [Arg<'a>],
    position: usize,
}

impl<'s, 'a> ArgCursor<'s, 'a> {
    pub fn new(args: &'s [Arg<'a>]) -> Self {
        Self { args, position: 0 }
    }

    /// Index of the argument the next call to [`Iterator::next`] returns.
    pub fn index(&self) -> usize {
        self.position
    }
}

impl<'a> Iterator for ArgCursor<'_, 'a> {
    type Item = Arg<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let arg = self.args.get(self.position).copied()?;
        self.position += 1;
        Some(arg)
    }
}

/// Build a `&[Arg]` from heterogeneous values.
///
/// ```
/// let args = safemem::args![42, "text", 1.5];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    ($($arg:expr),* $(,)?) => {
        &[$($crate::Arg::from($arg)),*] as &[$crate::Arg<'_>]
    };
}
