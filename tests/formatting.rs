//! Formatting and cleanup through a shared sanitizer.

use std::ffi::c_char;
use std::io::{self, Write};

use safemem::sanitize::cleanup::{Resource, release_all};
use safemem::{Arg, CleanupError, Config, FatalAction, FormatError, Sanitizer, TrackError, args};

fn sanitizer() -> Sanitizer {
    Sanitizer::with_config(
        Config::default()
            .with_format_action(FatalAction::Panic)
            .with_bounds_action(FatalAction::Panic),
    )
}

fn c_string(sanitizer: &Sanitizer, text: &str) -> *mut u8 {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    sanitizer.allocator().allocate_copy(&bytes).unwrap().as_ptr()
}

#[test]
fn tracked_string_matches_unguarded_output() {
    let sanitizer = sanitizer();
    let name = c_string(&sanitizer, "world");

    let mut ours = Vec::new();
    let arg = unsafe { Arg::c_str(name.cast::<c_char>()) };
    let n = sanitizer
        .formatter()
        .fprintf(Some(&mut ours), "hello, %s! %d%%\n", &[arg, Arg::from(100)])
        .unwrap();

    assert_eq!(ours, b"hello, world! 100%\n");
    assert_eq!(n, ours.len());
    unsafe { sanitizer.allocator().free(name) }.unwrap();
}

#[test]
fn freed_string_fails_without_output() {
    let sanitizer = sanitizer();
    let name = c_string(&sanitizer, "world");
    unsafe { sanitizer.allocator().free(name) }.unwrap();

    let mut out = Vec::new();
    let arg = unsafe { Arg::c_str(name.cast::<c_char>()) };
    let result = sanitizer
        .formatter()
        .fprintf(Some(&mut out), "hello, %s!\n", &[arg]);

    assert!(matches!(result, Err(FormatError::FreedArgument { conversion: 's', .. })));
    assert!(out.is_empty());

    let result = sanitizer.formatter().printf("hello, %s!\n", &[arg]);
    assert!(matches!(
        result,
        Err(FormatError::FreedArgument {
            function: "safe_printf",
            ..
        })
    ));
}

#[test]
fn reissued_address_is_live_again() {
    let sanitizer = sanitizer();
    let alloc = sanitizer.allocator();

    // Churn until the C runtime hands back an address it already used.
    let first = alloc.allocate(24).unwrap();
    unsafe { alloc.free(first.as_ptr()) }.unwrap();
    let mut held = Vec::new();
    let reused = loop {
        let next = alloc.allocate(24).unwrap();
        if next == first || held.len() == 64 {
            break next;
        }
        held.push(next);
    };

    let mut out = Vec::new();
    let result = sanitizer
        .formatter()
        .fprintf(Some(&mut out), "%p", args![reused]);
    assert!(result.is_ok());

    for block in held.into_iter().chain([reused]) {
        unsafe { alloc.free(block.as_ptr()) }.unwrap();
    }
}

#[test]
fn snprintf_into_tracked_buffer() {
    let sanitizer = sanitizer();
    let buf = sanitizer.allocator().allocate(4).unwrap();

    let n = unsafe {
        sanitizer
            .formatter()
            .snprintf(buf.as_ptr(), 4, "%s", args!["hello"])
    }
    .unwrap();
    assert_eq!(n, 5);
    assert_eq!(unsafe { std::slice::from_raw_parts(buf.as_ptr(), 4) }, b"hel\0");

    let untouched = unsafe {
        sanitizer
            .formatter()
            .snprintf(buf.as_ptr(), 0, "%s", args!["xyz"])
    }
    .unwrap();
    assert_eq!(untouched, 0);
    assert_eq!(unsafe { std::slice::from_raw_parts(buf.as_ptr(), 4) }, b"hel\0");

    unsafe { sanitizer.allocator().free(buf.as_ptr()) }.unwrap();
}

#[test]
fn truncation_warning_can_be_disabled() {
    let sanitizer = Sanitizer::with_config(Config::default().with_truncation_warnings(false));
    let mut buf = [0u8; 3];
    let n = sanitizer
        .formatter()
        .snprintf_slice(&mut buf, "%05d", args![42])
        .unwrap();
    assert_eq!(n, 5);
    assert_eq!(&buf, b"00\0");
}

#[test]
fn c_runtime_agrees_on_integers() {
    let sanitizer = sanitizer();
    let cases: [(&str, &std::ffi::CStr, i32); 5] = [
        ("%d", c"%d", -17),
        ("%+08d", c"%+08d", 42),
        ("%-6x|", c"%-6x|", 3054),
        ("%#o", c"%#o", 64),
        ("%.4i", c"%.4i", 7),
    ];

    for (format, c_format, value) in cases {
        let mut ours = [0u8; 32];
        let mut theirs = [0u8; 32];
        let n = sanitizer
            .formatter()
            .snprintf_slice(&mut ours, format, args![value])
            .unwrap();
        // SAFETY: one int argument for one int directive.
        let m = unsafe {
            libc::snprintf(theirs.as_mut_ptr().cast(), theirs.len(), c_format.as_ptr(), value)
        };
        assert_eq!(n as i32, m, "{format}");
        assert_eq!(ours, theirs, "{format}");
    }
}

struct Failing;

impl Write for Failing {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::other("disk gone"))
    }
}

#[test]
fn cleanup_releases_everything_it_can() {
    let sanitizer = sanitizer();
    let alloc = sanitizer.allocator();
    let a = alloc.allocate(8).unwrap().as_ptr();
    let b = alloc.allocate(8).unwrap().as_ptr();
    unsafe { alloc.free(b) }.unwrap();

    let mut called = false;
    let report = unsafe {
        release_all(
            alloc,
            [
                Resource::Block(a),
                Resource::Block(std::ptr::null_mut()),
                Resource::Block(b),
                Resource::file(Failing),
                Resource::custom(|| called = true),
            ],
        )
    };

    assert!(called);
    assert_eq!(report.released, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(
        report.failures,
        [
            (2, CleanupError::Block(TrackError::AlreadyFreed)),
            (3, CleanupError::Flush(io::ErrorKind::Other)),
        ]
    );
    assert!(!report.is_clean());
    assert_eq!(sanitizer.registry().stats().live, 0);
}
