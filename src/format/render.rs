//! printf-compatible rendering over a captured argument list.
//!
//! `%s`, `%c` and `%p` are laid out here. Numeric conversions are handed one
//! at a time to the C runtime's `snprintf`, with `*` counts already resolved,
//! so digits, rounding and flag handling are exactly the C library's.

use std::ffi::{CStr, CString, c_char, c_int};
use std::ptr;

use libc::{c_longlong, c_ulonglong};

use crate::error::FormatError;
use crate::format::arg::{Arg, ArgCursor};
use crate::format::directive::{Count, Directive, Length, MAX_COUNT, Piece, Pieces};

/// Render `format` with `args` into an owned buffer.
///
/// Only call this once the arguments have been vetted; `%s` of a
/// [`RawStr`](crate::format::arg::RawStr) reads through the pointer.
pub(crate) fn render(format: &str, args: &[Arg<'_>]) -> Result<Vec<u8>, FormatError> {
    let mut out = Vec::with_capacity(format.len());
    let mut cursor = ArgCursor::new(args);

    for piece in Pieces::new(format) {
        match piece? {
            Piece::Literal(text) => out.extend_from_slice(text.as_bytes()),
            Piece::Percent => out.push(b'%'),
            Piece::Directive(directive) => convert(&mut out, &directive, &mut cursor)?,
        }
        if out.len() > MAX_COUNT {
            return Err(FormatError::Overflow);
        }
    }
    Ok(out)
}

/// Resolved layout for one conversion.
struct Spec {
    left: bool,
    width: usize,
    precision: Option<usize>,
}

/// A numeric value in the C type its conversion reads.
#[derive(Clone, Copy)]
enum Number {
    Signed(i64),
    Unsigned(u64),
    Double(f64),
}

fn next_arg<'a>(
    cursor: &mut ArgCursor<'_, 'a>,
    conversion: char,
) -> Result<Arg<'a>, FormatError> {
    let position = cursor.index();
    cursor.next().ok_or(FormatError::MissingArgument {
        conversion,
        position,
    })
}

fn star_arg(cursor: &mut ArgCursor<'_, '_>, conversion: char) -> Result<i64, FormatError> {
    let position = cursor.index();
    match next_arg(cursor, conversion)? {
        Arg::Int(v) => Ok(v),
        Arg::Uint(v) => i64::try_from(v).map_err(|_| FormatError::Overflow),
        _ => Err(FormatError::ArgumentMismatch {
            conversion,
            position,
        }),
    }
}

fn star_count(value: i64) -> Result<usize, FormatError> {
    usize::try_from(value.unsigned_abs())
        .ok()
        .filter(|&n| n <= MAX_COUNT)
        .ok_or(FormatError::Overflow)
}

fn convert(
    out: &mut Vec<u8>,
    directive: &Directive,
    cursor: &mut ArgCursor<'_, '_>,
) -> Result<(), FormatError> {
    let conversion = directive.conversion;
    let mut spec = Spec {
        left: directive.flags.left,
        width: 0,
        precision: None,
    };
    match directive.width {
        Some(Count::Fixed(n)) => spec.width = n,
        Some(Count::FromArg) => {
            let n = star_arg(cursor, conversion)?;
            spec.left |= n < 0;
            spec.width = star_count(n)?;
        }
        None => {}
    }
    spec.precision = match directive.precision {
        Some(Count::Fixed(n)) => Some(n),
        // A negative precision is taken as if omitted.
        Some(Count::FromArg) => match star_arg(cursor, conversion)? {
            n if n < 0 => None,
            n => Some(star_count(n)?),
        },
        None => None,
    };
    if !directive.takes_value() {
        out.push(b'%');
        return Ok(());
    }

    let position = cursor.index();
    let mismatch = FormatError::ArgumentMismatch {
        conversion,
        position,
    };

    match conversion {
        'd' | 'i' => {
            let value = match next_arg(cursor, conversion)? {
                Arg::Int(v) => v,
                Arg::Uint(v) => v as i64,
                _ => return Err(mismatch),
            };
            let value = truncate_signed(value, directive.length);
            c_format(out, directive, &spec, Number::Signed(value))?;
        }
        'u' | 'o' | 'x' | 'X' => {
            let value = match next_arg(cursor, conversion)? {
                Arg::Int(v) => v as u64,
                Arg::Uint(v) => v,
                _ => return Err(mismatch),
            };
            let value = truncate_unsigned(value, directive.length);
            c_format(out, directive, &spec, Number::Unsigned(value))?;
        }
        'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'a' | 'A' => {
            let value = match next_arg(cursor, conversion)? {
                Arg::Float(v) => v,
                _ => return Err(mismatch),
            };
            c_format(out, directive, &spec, Number::Double(value))?;
        }
        'c' => {
            let byte = match next_arg(cursor, conversion)? {
                Arg::Int(v) => v as u8,
                Arg::Uint(v) => v as u8,
                _ => return Err(mismatch),
            };
            pad_text(out, &spec, &[byte]);
        }
        's' => match next_arg(cursor, conversion)? {
            Arg::Str(s) => pad_text(out, &spec, clip(s.as_bytes(), spec.precision)),
            Arg::CStr(raw) => {
                // SAFETY: the caller of render vetted this pointer against the
                // registry; Arg::c_str carries the readability contract.
                let bytes = unsafe { raw.to_bytes() }.unwrap_or(b"(null)".as_slice());
                pad_text(out, &spec, clip(bytes, spec.precision));
            }
            _ => return Err(mismatch),
        },
        'p' => {
            let arg = next_arg(cursor, conversion)?;
            let Some(ptr) = arg.address() else {
                return Err(mismatch);
            };
            let text = if ptr.is_null() {
                "(nil)".to_owned()
            } else {
                format!("{:#x}", ptr.addr())
            };
            pad_text(out, &spec, text.as_bytes());
        }
        other => return Err(FormatError::UnsupportedConversion(other)),
    }
    Ok(())
}

/// Apply the length modifier. Integer conversions are then printed with
/// `ll`, which shows a pre-truncated value exactly as the narrow type would.
fn truncate_signed(value: i64, length: Length) -> i64 {
    match length {
        Length::Char => value as i8 as i64,
        Length::Short => value as i16 as i64,
        Length::Int => value as i32 as i64,
        Length::Long => value as libc::c_long as i64,
        Length::LongLong | Length::Max => value,
        Length::Size | Length::PtrDiff => value as isize as i64,
    }
}

fn truncate_unsigned(value: u64, length: Length) -> u64 {
    match length {
        Length::Char => value as u8 as u64,
        Length::Short => value as u16 as u64,
        Length::Int => value as u32 as u64,
        Length::Long => value as libc::c_ulong as u64,
        Length::LongLong | Length::Max => value,
        Length::Size | Length::PtrDiff => value as usize as u64,
    }
}

/// Single-conversion C format string for `directive` with counts resolved.
fn c_directive(directive: &Directive, spec: &Spec, value: Number) -> CString {
    let flags = directive.flags;
    let mut format = String::from("%");
    for (set, flag) in [
        (spec.left, '-'),
        (flags.plus, '+'),
        (flags.space, ' '),
        (flags.alt, '#'),
        (flags.zero, '0'),
    ] {
        if set {
            format.push(flag);
        }
    }
    if spec.width > 0 {
        format.push_str(&spec.width.to_string());
    }
    if let Some(precision) = spec.precision {
        format.push('.');
        format.push_str(&precision.to_string());
    }
    if !matches!(value, Number::Double(_)) {
        format.push_str("ll");
    }
    format.push(directive.conversion);
    // Only ASCII flags, digits and a numeric conversion letter went in.
    CString::new(format).unwrap_or_default()
}

fn c_format(
    out: &mut Vec<u8>,
    directive: &Directive,
    spec: &Spec,
    value: Number,
) -> Result<(), FormatError> {
    let format = c_directive(directive, spec, value);

    // SAFETY: a null buffer of length 0 only measures.
    let needed = unsafe { c_snprintf(ptr::null_mut(), 0, &format, value) };
    let len = usize::try_from(needed).map_err(|_| FormatError::Overflow)?;

    let start = out.len();
    out.resize(start + len + 1, 0);
    // SAFETY: out has len + 1 writable bytes from start.
    unsafe { c_snprintf(out.as_mut_ptr().add(start).cast(), len + 1, &format, value) };
    out.truncate(start + len);
    Ok(())
}

/// # Safety
/// `buf` must be writable for `len` bytes, or null with `len == 0`.
unsafe fn c_snprintf(buf: *mut c_char, len: usize, format: &CStr, value: Number) -> c_int {
    // SAFETY: format holds exactly one conversion, and its length modifier
    // matches the C type passed for value.
    unsafe {
        match value {
            Number::Signed(v) => libc::snprintf(buf, len, format.as_ptr(), v as c_longlong),
            Number::Unsigned(v) => libc::snprintf(buf, len, format.as_ptr(), v as c_ulonglong),
            Number::Double(v) => libc::snprintf(buf, len, format.as_ptr(), v),
        }
    }
}

fn clip(bytes: &[u8], precision: Option<usize>) -> &[u8] {
    match precision {
        Some(max) if max < bytes.len() => &bytes[..max],
        _ => bytes,
    }
}

fn pad_text(out: &mut Vec<u8>, spec: &Spec, body: &[u8]) {
    let fill = spec.width.saturating_sub(body.len());
    if spec.left {
        out.extend_from_slice(body);
        out.resize(out.len() + fill, b' ');
    } else {
        out.resize(out.len() + fill, b' ');
        out.extend_from_slice(body);
    }
}
