//! [`FaultReporter`] writes a diagnostic report when the process segfaults,
//! and then exits.
//!
//! # Linux
//!
//! On Linux a handler for [`SIGSEGV`](https://man7.org/linux/man-pages/man7/signal.7.html)
//! is installed, which is the signal sent to a process when it makes an
//! invalid virtual memory reference, a [segmentation fault](https://en.wikipedia.org/wiki/Segmentation_fault).
//! This covers infamous `null` pointer access, out of bounds access, use after
//! free, stack overflows, etc.
//!
//! When the signal is caught the handler
//!
//! 1. Extracts the signal number, the faulting address and the instruction
//!    pointer at the time of the fault into a [`CrashContext`]
//! 2. Walks the stack of the faulting thread, up to [`MAX_FRAMES`] frames,
//!    and replaces the innermost frame, which is the handler itself, with the
//!    instruction pointer
//! 3. Describes every frame with `dladdr`, eg. `./app(main+0x20) [0x4008f0]`
//! 4. Runs an address to line tool, `addr2line` by default, once per frame,
//!    as `addr2line 0x4008f0 -e ./app`
//! 5. Writes the report to a [`Sink`]
//!
//! ```text
//! Got signal 11, faulty address is 0xdeadbeef, from 0x4005a0
//! [bt] Execution path:
//! [bt] ./app(fault+0x10) [0x4005a0]
//! [bt] ./app(main+0x20) [0x4008f0]
//! ```
//!
//! and finally exits the process with [`Config::exit_code`].
//!
//! Every line is formatted into a fixed size buffer on the stack, and the
//! resolver is spawned with a raw `clone` + `execv` of a tool path prepared
//! when the handler was attached, however note that `dladdr` and the stack
//! walk itself are not on the list of
//! [async signal safe](https://man7.org/linux/man-pages/man7/signal-safety.7.html)
//! functions, so the report is best effort.
//!
//! An [alternate signal stack](https://man7.org/linux/man-pages/man2/sigaltstack.2.html)
//! is installed on the attaching thread so that a `SIGSEGV` caused by a stack
//! overflow on that thread can still be reported, as signals are otherwise
//! handled on the same stack that raised the signal.

#![allow(unsafe_code)]

mod config;
mod error;
pub mod line;

pub use config::{
    Config, ResolverOutput, LINE_BUFFER_SIZE, MAX_FRAMES, MODULE_SCAN_LIMIT, SOURCE_LOCATION_SIZE,
};
pub use error::Error;
pub use fault_context::CrashContext;

#[cfg(feature = "debug-print")]
#[macro_export]
macro_rules! debug_print {
    ($s:literal) => {
        let cstr = concat!($s, "\n");
        $crate::write_stderr(cstr);
    };
}

#[cfg(not(feature = "debug-print"))]
#[macro_export]
macro_rules! debug_print {
    ($s:literal) => {};
}

/// Writes the specified string directly to stderr.
///
/// This is safe to be called from within a compromised context.
#[inline]
pub fn write_stderr(s: &'static str) {
    // SAFETY: syscall
    unsafe {
        libc::write(2, s.as_ptr().cast(), s.len());
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        pub mod ffi;
        pub mod host;
        pub mod report;
        pub mod resolve;
        pub mod symbolize;
        pub mod unwind;

        mod linux;
        mod sink;

        pub use linux::{FaultReporter, HandlerState};
        pub use sink::{write_fd, CallbackSink, LogCallback, LogSink, Sink, StderrSink};
    }
}
