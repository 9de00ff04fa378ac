use crate::line::LineBuf;

/// The destination of the lines of a fault report.
///
/// # Safety
///
/// Both methods are called from within a signal handler once a fault has
/// occurred, implementations should do as _little_ as possible, ideally
/// nothing more than a `write` to an already open file descriptor.
pub unsafe trait Sink: Send + Sync {
    /// Emits one line of the report, the line does not contain a trailing
    /// newline
    fn console(&self, line: &str);
    /// Emits an error, used for failures when attaching
    fn error(&self, line: &str);
}

/// Writes the specified bytes directly to the given file descriptor,
/// retrying on partial writes and `EINTR`.
///
/// This is safe to be called from within a compromised context.
pub fn write_fd(fd: i32, mut bytes: &[u8]) {
    while !bytes.is_empty() {
        // SAFETY: syscall
        let written = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };

        if written < 0 {
            if std::io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return;
        }

        if written == 0 {
            return;
        }

        bytes = &bytes[written as usize..];
    }
}

/// Writes every line straight to stderr with `write(2)`, no buffering or
/// allocation involved
#[derive(Copy, Clone, Default)]
pub struct StderrSink;

unsafe impl Sink for StderrSink {
    fn console(&self, line: &str) {
        write_fd(2, line.as_bytes());
        write_fd(2, b"\n");
    }

    fn error(&self, line: &str) {
        write_fd(2, b"error: ");
        self.console(line);
    }
}

/// Forwards every line to the [`log`] facade.
///
/// Note that this is only as safe as the installed logger, most of which
/// allocate and take locks.
#[derive(Copy, Clone, Default)]
pub struct LogSink;

unsafe impl Sink for LogSink {
    fn console(&self, line: &str) {
        log::error!(target: "fault_reporter::report", "{line}");
    }

    fn error(&self, line: &str) {
        log::error!(target: "fault_reporter", "{line}");
    }
}

/// A function supplied by a host to log a nul terminated line
pub type LogCallback = unsafe extern "C" fn(line: *const libc::c_char);

/// Forwards every line to the host supplied callbacks, used by the C ABI
pub struct CallbackSink {
    console: Option<LogCallback>,
    error: Option<LogCallback>,
}

impl CallbackSink {
    #[inline]
    pub fn new(console: Option<LogCallback>, error: Option<LogCallback>) -> Self {
        Self { console, error }
    }

    fn call(callback: Option<LogCallback>, line: &str) {
        let Some(callback) = callback else {
            StderrSink.console(line);
            return;
        };

        let mut lb = LineBuf::<{ crate::LINE_BUFFER_SIZE }>::new();
        lb.push_str(line);
        // SAFETY: the host promised a valid function, the line is nul terminated
        unsafe { callback(lb.as_c_ptr()) };
    }
}

unsafe impl Sink for CallbackSink {
    fn console(&self, line: &str) {
        Self::call(self.console, line);
    }

    fn error(&self, line: &str) {
        Self::call(self.error, line);
    }
}
