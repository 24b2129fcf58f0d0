//! printf-family output that refuses freed pointers.
//!
//! Every entry point first walks the format string with a cloned
//! [`ArgCursor`], looking up each `%s`/`%p` argument in the registry. Only a
//! clean scan is followed by rendering, which starts from a fresh cursor.
//!
//! `printf`/`fprintf` reject a freed argument or a malformed format with an
//! error and write nothing. `snprintf` writes into caller memory, so a freed destination,
//! format string or argument is fatal there.

pub mod arg;
mod directive;
mod render;

use std::io::{self, Write};
use std::ptr;
use std::sync::Arc;

use crate::config::Config;
use crate::error::FormatError;
use crate::sanitize::diagnostic;
use crate::sanitize::registry::{Registry, Status};

pub use arg::{Arg, ArgCursor, RawStr};
use directive::{Count, Piece, Pieces};

pub struct SafeFormatter {
    registry: Arc<Registry>,
    config: Config,
}

impl SafeFormatter {
    pub fn new(registry: Arc<Registry>, config: Config) -> Self {
        Self { registry, config }
    }

    fn is_freed<T: ?Sized>(&self, ptr: *const T) -> bool {
        self.registry.lookup(ptr) == Status::Freed
    }

    /// Walk `format` over a copy of `cursor` and fail on the first pointer
    /// argument the registry reports freed. Non-pointer conversions consume
    /// their slot unchecked.
    fn scan(
        &self,
        function: &'static str,
        format: &str,
        cursor: &ArgCursor<'_, '_>,
    ) -> Result<(), FormatError> {
        let mut scan = cursor.clone();
        for piece in Pieces::new(format) {
            let Piece::Directive(directive) = piece? else {
                continue;
            };
            for count in [directive.width, directive.precision] {
                if count == Some(Count::FromArg) {
                    scan.next();
                }
            }
            if !directive.takes_value() {
                continue;
            }

            let position = scan.index();
            let Some(arg) = scan.next() else {
                // Rendering reports the missing argument.
                break;
            };
            if !directive.takes_pointer() {
                continue;
            }
            if let Some(addr) = arg.address() {
                if self.is_freed(addr) {
                    diagnostic::freed_argument(function, directive.conversion, addr.addr());
                    return Err(FormatError::FreedArgument {
                        function,
                        conversion: directive.conversion,
                        position,
                    });
                }
            }
        }
        Ok(())
    }

    /// Vet and render without writing anywhere.
    fn prepare(
        &self,
        function: &'static str,
        format: &str,
        args: &[Arg<'_>],
    ) -> Result<Vec<u8>, FormatError> {
        if self.is_freed(format.as_ptr()) {
            diagnostic::freed_format(function);
            return Err(FormatError::FreedFormat { function });
        }
        let cursor = ArgCursor::new(args);
        self.scan(function, format, &cursor)?;
        render::render(format, args)
    }

    /// Format to stdout. Returns the number of bytes written.
    ///
    /// Output is rendered in full before the first byte is written, so a
    /// rejected call prints nothing. A write error after that point is
    /// returned as [`FormatError::Io`] and may leave part of the output on
    /// the stream.
    pub fn printf(&self, format: &str, args: &[Arg<'_>]) -> Result<usize, FormatError> {
        let out = self.prepare("safe_printf", format, args)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(&out)?;
        stdout.flush()?;
        Ok(out.len())
    }

    /// Format to `stream`. A `None` stream is rejected like a NULL `FILE*`.
    ///
    /// As with [`printf`](Self::printf), only a write error can leave
    /// partial output behind.
    pub fn fprintf<W: Write + ?Sized>(
        &self,
        stream: Option<&mut W>,
        format: &str,
        args: &[Arg<'_>],
    ) -> Result<usize, FormatError> {
        const FUNCTION: &str = "safe_fprintf";
        let Some(stream) = stream else {
            diagnostic::null_stream(FUNCTION);
            return Err(FormatError::NullStream { function: FUNCTION });
        };
        let out = self.prepare(FUNCTION, format, args)?;
        stream.write_all(&out)?;
        Ok(out.len())
    }

    /// Format into `dst`, writing at most `capacity - 1` bytes and a NUL.
    ///
    /// Returns the length the full output would have had, so a result of
    /// `capacity` or more means the output was truncated. A zero `capacity`
    /// writes nothing and returns 0. A freed destination, format string or
    /// `%s`/`%p` argument terminates the process.
    ///
    /// # Safety
    /// Unless the registry reports it freed, `dst` must be valid for writes
    /// of `capacity` bytes.
    pub unsafe fn snprintf(
        &self,
        dst: *mut u8,
        capacity: usize,
        format: &str,
        args: &[Arg<'_>],
    ) -> Result<usize, FormatError> {
        const FUNCTION: &str = "safe_snprintf";
        let action = self.config.format_action;

        if self.is_freed(dst) {
            diagnostic::freed_destination(action, FUNCTION);
        }
        if self.is_freed(format.as_ptr()) {
            diagnostic::freed_format_fatal(action, FUNCTION);
        }
        if capacity == 0 {
            diagnostic::zero_capacity(FUNCTION);
            return Ok(0);
        }

        let cursor = ArgCursor::new(args);
        match self.scan(FUNCTION, format, &cursor) {
            Ok(()) => {}
            Err(FormatError::FreedArgument { conversion, .. }) => {
                diagnostic::freed_argument_fatal(action, FUNCTION, conversion)
            }
            Err(err) => return Err(err),
        }

        let out = render::render(format, args)?;
        let copied = out.len().min(capacity - 1);
        // SAFETY: copied + 1 <= capacity bytes, which the caller guarantees
        // are writable; out is a separate allocation.
        unsafe {
            ptr::copy_nonoverlapping(out.as_ptr(), dst, copied);
            dst.add(copied).write(0);
        }

        if out.len() >= capacity && self.config.warn_on_truncation {
            diagnostic::truncated(FUNCTION, out.len(), capacity);
        }
        Ok(out.len())
    }

    /// [`snprintf`](Self::snprintf) into a slice; capacity is its length.
    pub fn snprintf_slice(
        &self,
        dst: &mut [u8],
        format: &str,
        args: &[Arg<'_>],
    ) -> Result<usize, FormatError> {
        // SAFETY: dst is a live, writable slice of dst.len() bytes.
        unsafe { self.snprintf(dst.as_mut_ptr(), dst.len(), format, args) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::config::FatalAction;
    use crate::sanitize::alloc::TrackedAllocator;
    use std::ffi::CStr;
    use tracing_test::traced_test;

    fn setup() -> (TrackedAllocator, SafeFormatter) {
        let registry = Arc::new(Registry::new());
        let config = Config::default().with_format_action(FatalAction::Panic);
        (
            TrackedAllocator::new(Arc::clone(&registry)),
            SafeFormatter::new(registry, config),
        )
    }

    #[test]
    fn fprintf_writes_whole_output() {
        let (_, fmt) = setup();
        let mut out = Vec::new();
        let n = fmt
            .fprintf(Some(&mut out), "%s=%d\n", args!["answer", 42])
            .unwrap();
        assert_eq!(out, b"answer=42\n");
        assert_eq!(n, out.len());
    }

    #[traced_test]
    #[test]
    fn fprintf_rejects_null_stream() {
        let (_, fmt) = setup();
        assert_eq!(
            fmt.fprintf(None::<&mut Vec<u8>>, "x", args![]),
            Err(FormatError::NullStream {
                function: "safe_fprintf"
            })
        );
        assert!(logs_contain("NULL file stream"));
    }

    #[traced_test]
    #[test]
    fn freed_string_argument_blocks_output() {
        let (alloc, fmt) = setup();
        let block = alloc.allocate_copy(b"secret\0").unwrap();
        unsafe { alloc.free(block.as_ptr()) }.unwrap();

        let mut out = Vec::new();
        let freed = unsafe { Arg::c_str(block.as_ptr().cast()) };
        let result = fmt.fprintf(Some(&mut out), "%d %s", &[Arg::from(1), freed]);

        assert_eq!(
            result,
            Err(FormatError::FreedArgument {
                function: "safe_fprintf",
                conversion: 's',
                position: 1,
            })
        );
        assert!(out.is_empty());
        assert!(logs_contain("Argument for %s is freed"));
    }

    #[test]
    fn freed_pointer_argument_blocks_output() {
        let (alloc, fmt) = setup();
        let block = alloc.allocate(8).unwrap();
        unsafe { alloc.free(block.as_ptr()) }.unwrap();

        let result = fmt.printf("%*d %p\n", args![3, 7, block]);
        assert!(matches!(
            result,
            Err(FormatError::FreedArgument {
                conversion: 'p',
                position: 2,
                ..
            })
        ));
    }

    #[test]
    fn live_tracked_string_is_printed() {
        let (alloc, fmt) = setup();
        let block = alloc.allocate_copy(b"live\0").unwrap();
        let mut out = Vec::new();
        let arg = unsafe { Arg::c_str(block.as_ptr().cast()) };

        fmt.fprintf(Some(&mut out), "[%s]", &[arg]).unwrap();
        assert_eq!(out, b"[live]");
        unsafe { alloc.free(block.as_ptr()) }.unwrap();
    }

    #[test]
    fn freed_numeric_value_is_not_scanned() {
        let (alloc, fmt) = setup();
        let block = alloc.allocate(8).unwrap();
        unsafe { alloc.free(block.as_ptr()) }.unwrap();

        let mut out = Vec::new();
        let addr = block.as_ptr().addr();
        fmt.fprintf(Some(&mut out), "%zx", args![addr]).unwrap();
        assert_eq!(out, format!("{addr:x}").as_bytes());
    }

    #[test]
    fn freed_format_string_is_detected() {
        let (alloc, fmt) = setup();
        let block = alloc.allocate_copy(b"%d").unwrap();
        assert!(!fmt.is_freed(block.as_ptr()));
        unsafe { alloc.free(block.as_ptr()) }.unwrap();
        assert!(fmt.is_freed(block.as_ptr()));
    }

    #[test]
    fn malformed_format_is_an_error_not_output() {
        let (_, fmt) = setup();
        let mut out = Vec::new();
        assert_eq!(
            fmt.fprintf(Some(&mut out), "ok %d %", args![1]),
            Err(FormatError::Incomplete)
        );
        assert!(out.is_empty());
    }

    #[traced_test]
    #[test]
    fn snprintf_zero_capacity_writes_nothing() {
        let (_, fmt) = setup();
        let mut buf = [0xAAu8; 4];
        let n = unsafe { fmt.snprintf(buf.as_mut_ptr(), 0, "%s", args!["hello"]) }.unwrap();
        assert_eq!(n, 0);
        assert_eq!(buf, [0xAA; 4]);
        assert!(logs_contain("size is 0"));
    }

    #[traced_test]
    #[test]
    fn snprintf_truncates_and_terminates() {
        let (_, fmt) = setup();
        let mut buf = [0xAAu8; 4];
        let n = fmt.snprintf_slice(&mut buf, "%s", args!["hello"]).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hel\0");
        assert!(logs_contain("output truncated"));
    }

    #[test]
    fn snprintf_fits_exactly() {
        let (_, fmt) = setup();
        let mut buf = [0xAAu8; 8];
        let n = fmt.snprintf_slice(&mut buf, "%03d|", args![7]).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf[..5], b"007|\0");
    }

    #[test]
    fn snprintf_into_tracked_block() {
        let (alloc, fmt) = setup();
        let block = alloc.allocate(16).unwrap();
        let n = unsafe { fmt.snprintf(block.as_ptr(), 16, "%x-%c", args![48879, 'q']) }.unwrap();
        assert_eq!(n, 6);
        let written = unsafe { std::slice::from_raw_parts(block.as_ptr(), 7) };
        assert_eq!(written, b"beef-q\0");
        unsafe { alloc.free(block.as_ptr()) }.unwrap();
    }

    #[test]
    #[should_panic(expected = "%s argument is freed")]
    fn snprintf_freed_argument_is_fatal() {
        let (alloc, fmt) = setup();
        let block = alloc.allocate_copy(b"gone\0").unwrap();
        unsafe { alloc.free(block.as_ptr()) }.unwrap();

        let mut buf = [0u8; 16];
        let arg = unsafe { Arg::c_str(block.as_ptr().cast()) };
        let _ = fmt.snprintf_slice(&mut buf, "%s", &[arg]);
    }

    #[test]
    #[should_panic(expected = "Destination buffer is freed")]
    fn snprintf_freed_destination_is_fatal() {
        let (alloc, fmt) = setup();
        let block = alloc.allocate(16).unwrap();
        unsafe {
            alloc.free(block.as_ptr()).unwrap();
            let _ = fmt.snprintf(block.as_ptr(), 16, "x", args![]);
        }
    }

    #[test]
    fn snprintf_matches_c_runtime() {
        let (_, fmt) = setup();
        let mut ours = [0u8; 128];
        let mut theirs = [0u8; 128];

        let n = fmt
            .snprintf_slice(
                &mut ours,
                "%5.2f|%-4d|%#x|%+e|%g|%.3s|%c",
                args![3.14159, 42, 255u32, -1234.5, 0.0001, "abcdef", 'Z'],
            )
            .unwrap();
        // SAFETY: variadic arguments match the directives.
        let m = unsafe {
            libc::snprintf(
                theirs.as_mut_ptr().cast(),
                theirs.len(),
                c"%5.2f|%-4d|%#x|%+e|%g|%.3s|%c".as_ptr(),
                3.14159f64,
                42 as libc::c_int,
                255 as libc::c_uint,
                -1234.5f64,
                0.0001f64,
                c"abcdef".as_ptr(),
                'Z' as libc::c_int,
            )
        };

        assert_eq!(n as i32, m);
        assert_eq!(ours, theirs);
    }

    #[test]
    fn snprintf_matches_c_runtime_on_float_corners() {
        let (_, fmt) = setup();
        let cases: [(&str, &CStr, f64); 7] = [
            ("%a", c"%a", 1.0),
            ("%A", c"%A", -0.1),
            ("%.3a", c"%.3a", 3.14159),
            ("%#g", c"%#g", 999999.5),
            ("%#.0f", c"%#.0f", 2.5),
            ("%.17g", c"%.17g", 0.1),
            ("%5%|%f", c"%5%|%f", 1.5),
        ];

        for (format, c_format, value) in cases {
            let mut ours = [0u8; 64];
            let mut theirs = [0u8; 64];
            let n = fmt.snprintf_slice(&mut ours, format, args![value]).unwrap();
            // SAFETY: one double for the one value-taking directive.
            let m = unsafe {
                libc::snprintf(theirs.as_mut_ptr().cast(), theirs.len(), c_format.as_ptr(), value)
            };
            assert_eq!(n as i32, m, "{format}");
            assert_eq!(ours, theirs, "{format}");
        }
    }

    #[test]
    fn oversized_precision_is_an_error() {
        let (_, fmt) = setup();
        let mut out = Vec::new();
        assert_eq!(
            fmt.fprintf(Some(&mut out), "%.99999999999999999999d", args![1]),
            Err(FormatError::Overflow)
        );
        assert!(out.is_empty());

        let n = fmt.fprintf(Some(&mut out), "%.70000f", args![1.0]).unwrap();
        assert_eq!(n, 70002);
    }

    /// Accepts `limit` bytes, then fails.
    struct ShortWriter {
        limit: usize,
        written: Vec<u8>,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.limit - self.written.len();
            if room == 0 {
                return Err(io::Error::other("stream closed"));
            }
            let n = room.min(buf.len());
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stream_failure_is_reported_after_partial_write() {
        let (_, fmt) = setup();
        let mut stream = ShortWriter {
            limit: 3,
            written: Vec::new(),
        };
        assert_eq!(
            fmt.fprintf(Some(&mut stream), "%s", args!["hello"]),
            Err(FormatError::Io(io::ErrorKind::Other))
        );
        assert_eq!(stream.written, b"hel");
    }
}
