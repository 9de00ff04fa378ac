//! C ABI entry points for plugin shells written in other languages

use crate::{
    host::{self, HostContext},
    CallbackSink, Config, Error, FaultReporter, LogCallback, Sink,
};
use std::ffi::c_void;

static REPORTER: parking_lot::Mutex<Option<FaultReporter>> = parking_lot::const_mutex(None);

/// Attaches the reporter, configured from the `FAULT_REPORTER_*` environment
/// variables, writing reports to `console` and attach failures to `error`.
///
/// A `None` callback writes to stderr instead.
///
/// Returns `false` if the reporter could not be attached.
///
/// # Safety
///
/// The callbacks must be valid to call with a nul terminated string for the
/// remainder of the process, including from within a signal handler.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fault_reporter_attach(
    globals: *mut c_void,
    function_table: *mut c_void,
    console: Option<LogCallback>,
    error: Option<LogCallback>,
) -> bool {
    let sink = Box::new(CallbackSink::new(console, error));

    match host::attach(
        HostContext::new(globals, function_table),
        Config::from_env(),
        sink,
    ) {
        Ok(reporter) => {
            *REPORTER.lock() = Some(reporter);
            true
        }
        // Already written to the error callback
        Err(Error::NullGlobals | Error::NullFunctionTable) => false,
        Err(err) => {
            CallbackSink::new(console, error).error(&format!("failed to attach: {err}"));
            false
        }
    }
}

/// Detaches the reporter, this always succeeds
#[unsafe(no_mangle)]
pub extern "C" fn fault_reporter_detach() -> bool {
    host::detach(REPORTER.lock().take());
    true
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static ERRORS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn on_error(line: *const libc::c_char) {
        let line = unsafe { std::ffi::CStr::from_ptr(line) };
        assert_eq!(line.to_bytes(), b"attach called with null function table");
        ERRORS.fetch_add(1, Ordering::SeqCst);
    }

    unsafe extern "C" fn on_console(_line: *const libc::c_char) {
        panic!("nothing should be reported");
    }

    #[test]
    fn rejects_null_function_table() {
        let mut globals = 0u64;

        let attached = unsafe {
            fault_reporter_attach(
                (&mut globals as *mut u64).cast(),
                std::ptr::null_mut(),
                Some(on_console),
                Some(on_error),
            )
        };

        assert!(!attached);
        assert_eq!(ERRORS.load(Ordering::SeqCst), 1);
        assert!(REPORTER.lock().is_none());
        assert!(fault_reporter_detach());
    }
}
