//! Resolution of a frame to a source location by running an external
//! address to line tool, eg. `addr2line 0x4008f0 -e ./app`
//!
//! The tool is run as a child process with an argument vector, never through a
//! shell, so a module path can't inject anything into the command.

use crate::{
    config::{Config, ResolverOutput},
    line::LineBuf,
    symbolize::module_path,
    Error, MODULE_SCAN_LIMIT, SOURCE_LOCATION_SIZE,
};
use std::{
    ffi::CString,
    fmt::{self, Write},
    os::unix::{ffi::OsStringExt, fs::PermissionsExt},
    path::{Path, PathBuf},
    ptr,
    time::Duration,
};

pub type SourceLocation = LineBuf<SOURCE_LOCATION_SIZE>;

/// The arguments passed to the resolver for a single frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Invocation<'l> {
    /// The return address of the frame
    pub address: usize,
    /// The path of the module containing the address, see [`module_path`]
    pub module: &'l [u8],
}

impl<'l> Invocation<'l> {
    /// Creates the invocation for `address`, taking the module path from the
    /// address's raw symbol line
    #[inline]
    pub fn new(address: usize, raw_symbol_line: &'l [u8]) -> Self {
        Self {
            address,
            module: module_path(raw_symbol_line),
        }
    }

    /// The command line the invocation will run for the specified tool, only
    /// used for diagnostics
    #[inline]
    pub fn command_line<'t>(&'t self, tool: &'t Path) -> CommandLine<'t, 'l> {
        CommandLine {
            tool,
            invocation: self,
        }
    }
}

/// Displays the full command an [`Invocation`] runs
pub struct CommandLine<'t, 'l> {
    tool: &'t Path,
    invocation: &'t Invocation<'l>,
}

impl fmt::Display for CommandLine<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:#x} -e ",
            self.tool.display(),
            self.invocation.address
        )?;

        for chunk in self.invocation.module.utf8_chunks() {
            f.write_str(chunk.valid())?;
            if !chunk.invalid().is_empty() {
                f.write_char(char::REPLACEMENT_CHARACTER)?;
            }
        }

        Ok(())
    }
}

/// Why a frame couldn't be resolved
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    /// The child process couldn't be created, contains the `errno`
    Spawn(i32),
    /// The tool exited with a non-zero status, `127` if it couldn't be executed
    Exit(i32),
    /// The tool was killed by the specified signal
    Signaled(i32),
    /// The tool did not finish in time and was killed
    TimedOut,
    /// The tool's exit status was lost, eg. because `SIGCHLD` is ignored
    Lost,
}

/// The outcome of resolving a single frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Resolved,
    Unavailable(Failure),
}

/// Resolves a frame to its source location
pub trait Resolve {
    /// Runs the invocation. Any output that is captured is written to
    /// `location`, which is empty.
    fn resolve(&self, invocation: &Invocation<'_>, location: &mut SourceLocation) -> Resolution;
}

/// Runs an external tool, once per frame, to resolve them
pub struct ExternalResolver {
    /// Full path to the tool, prepared up front as we can't allocate during
    /// the resolution
    tool: CString,
    output: ResolverOutput,
    timeout: Duration,
}

impl ExternalResolver {
    /// Prepares the resolver from the config, looking the tool up in `PATH`
    /// if needed.
    ///
    /// A tool that can't be found is not an error, it just means every frame
    /// will fail to resolve.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let tool = match find_executable(&config.resolver) {
            Some(path) => {
                log::debug!("resolving frames with '{}'", path.display());
                path
            }
            None => {
                log::warn!(
                    "resolver '{}' could not be found, source locations will be unavailable",
                    config.resolver.display()
                );
                config.resolver.clone()
            }
        };

        Ok(Self {
            tool: CString::new(tool.into_os_string().into_vec())?,
            output: config.resolver_output,
            timeout: config.resolver_timeout,
        })
    }

    #[inline]
    pub fn tool(&self) -> &Path {
        use std::os::unix::ffi::OsStrExt;
        Path::new(std::ffi::OsStr::from_bytes(self.tool.as_bytes()))
    }
}

impl Resolve for ExternalResolver {
    fn resolve(&self, invocation: &Invocation<'_>, location: &mut SourceLocation) -> Resolution {
        let mut address = LineBuf::<24>::new();
        let _ = write!(&mut address, "{:#x}", invocation.address);
        let mut module = LineBuf::<{ MODULE_SCAN_LIMIT + 1 }>::new();
        module.push_bytes(invocation.module);

        let argv = [
            self.tool.as_ptr(),
            address.as_c_ptr(),
            c"-e".as_ptr(),
            module.as_c_ptr(),
            ptr::null(),
        ];

        let deadline = Deadline::after(self.timeout);

        // SAFETY: syscalls, the argument vector outlives the child's exec
        let result = unsafe {
            match self.output {
                ResolverOutput::Inherit => spawn(&argv, None)
                    .and_then(|pid| wait_child(pid, &deadline)),
                ResolverOutput::Capture => capture(&argv, location, &deadline),
            }
        };

        match result {
            Ok(()) => {
                location.trim_end();
                Resolution::Resolved
            }
            Err(failure) => {
                location.clear();
                Resolution::Unavailable(failure)
            }
        }
    }
}

/// Finds the tool to execute. A path with more than one component is used
/// as is, otherwise the directories in `PATH` are searched.
fn find_executable(tool: &Path) -> Option<PathBuf> {
    let is_executable = |path: &Path| {
        path.metadata()
            .is_ok_and(|md| md.is_file() && md.permissions().mode() & 0o111 != 0)
    };

    if tool.components().count() > 1 {
        return is_executable(tool).then(|| tool.to_owned());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(tool))
        .find(|path| is_executable(path))
}

#[inline]
fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn monotonic_ms() -> u64 {
    // SAFETY: syscall, timespec is plain old data
    let ts = unsafe {
        let mut ts: libc::timespec = std::mem::zeroed();
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        ts
    };
    ts.tv_sec as u64 * 1000 + ts.tv_nsec as u64 / 1_000_000
}

struct Deadline(u64);

impl Deadline {
    #[inline]
    fn after(timeout: Duration) -> Self {
        Self(monotonic_ms().saturating_add(timeout.as_millis() as u64))
    }

    #[inline]
    fn remaining_ms(&self) -> u64 {
        self.0.saturating_sub(monotonic_ms())
    }
}

/// `fork` without running any `pthread_atfork` handlers, which may take locks
/// that were held when the fault occurred
unsafe fn raw_fork() -> libc::pid_t {
    unsafe {
        libc::syscall(
            libc::SYS_clone,
            libc::SIGCHLD as libc::c_ulong,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
        ) as libc::pid_t
    }
}

/// Forks and executes the argument vector, optionally redirecting the
/// child's stdout to `stdout`
unsafe fn spawn(argv: &[*const libc::c_char; 5], stdout: Option<i32>) -> Result<libc::pid_t, Failure> {
    unsafe {
        match raw_fork() {
            -1 => Err(Failure::Spawn(errno())),
            0 => {
                if let Some(fd) = stdout {
                    libc::dup2(fd, 1);
                }

                // The fault signal is blocked while the handler runs, and the
                // mask survives exec
                let mut empty: libc::sigset_t = std::mem::zeroed();
                libc::sigemptyset(&mut empty);
                libc::sigprocmask(libc::SIG_SETMASK, &empty, ptr::null_mut());

                libc::execv(argv[0], argv.as_ptr());
                libc::_exit(127);
            }
            pid => Ok(pid),
        }
    }
}

unsafe fn capture(
    argv: &[*const libc::c_char; 5],
    location: &mut SourceLocation,
    deadline: &Deadline,
) -> Result<(), Failure> {
    unsafe {
        let mut fds = [-1; 2];
        if libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) != 0 {
            return Err(Failure::Spawn(errno()));
        }
        let [read_fd, write_fd] = fds;

        let spawned = spawn(argv, Some(write_fd));
        libc::close(write_fd);

        let pid = match spawned {
            Ok(pid) => pid,
            Err(failure) => {
                libc::close(read_fd);
                return Err(failure);
            }
        };

        let finished = read_to_end(read_fd, location, deadline);
        libc::close(read_fd);

        if finished {
            wait_child(pid, deadline)
        } else {
            kill_child(pid);
            Err(Failure::TimedOut)
        }
    }
}

/// Reads until the pipe is closed, keeping as much as fits in `location`.
/// Returns false if the deadline passed first.
unsafe fn read_to_end(fd: i32, location: &mut SourceLocation, deadline: &Deadline) -> bool {
    let mut chunk = [0u8; 256];

    loop {
        let remaining = deadline.remaining_ms();
        if remaining == 0 {
            return false;
        }

        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };

        // SAFETY: syscalls
        unsafe {
            match libc::poll(&mut pfd, 1, remaining.min(i32::MAX as u64) as i32) {
                0 => return false,
                -1 if errno() == libc::EINTR => continue,
                -1 => return true,
                _ => {}
            }

            match libc::read(fd, chunk.as_mut_ptr().cast(), chunk.len()) {
                0 => return true,
                -1 if errno() == libc::EINTR => continue,
                -1 => return true,
                n => location.push_bytes(&chunk[..n as usize]),
            }
        }
    }
}

unsafe fn kill_child(pid: libc::pid_t) {
    unsafe {
        libc::kill(pid, libc::SIGKILL);
        let mut status = 0;
        while libc::waitpid(pid, &mut status, 0) == -1 && errno() == libc::EINTR {}
    }
}

unsafe fn wait_child(pid: libc::pid_t, deadline: &Deadline) -> Result<(), Failure> {
    // SAFETY: plain old data
    let mut nap: libc::timespec = unsafe { std::mem::zeroed() };
    nap.tv_nsec = 5_000_000;

    loop {
        let mut status = 0;

        // SAFETY: syscalls
        unsafe {
            match libc::waitpid(pid, &mut status, libc::WNOHANG) {
                0 => {
                    if deadline.remaining_ms() == 0 {
                        kill_child(pid);
                        return Err(Failure::TimedOut);
                    }

                    libc::nanosleep(&nap, ptr::null_mut());
                }
                -1 if errno() == libc::EINTR => {}
                -1 => return Err(Failure::Lost),
                _ => {
                    return if libc::WIFEXITED(status) {
                        match libc::WEXITSTATUS(status) {
                            0 => Ok(()),
                            code => Err(Failure::Exit(code)),
                        }
                    } else if libc::WIFSIGNALED(status) {
                        Err(Failure::Signaled(libc::WTERMSIG(status)))
                    } else {
                        Err(Failure::Lost)
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn resolver(tool: &str, output: ResolverOutput) -> ExternalResolver {
        ExternalResolver::new(&Config {
            resolver: tool.into(),
            resolver_output: output,
            resolver_timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn invocation_command_line() {
        let inv = Invocation::new(0x4008f0, b"./app(foo+0x20) [0x4008f0]");
        assert_eq!(inv.module, b"./app");
        assert_eq!(
            inv.command_line(Path::new("addr2line")).to_string(),
            "addr2line 0x4008f0 -e ./app"
        );
    }

    #[test]
    fn invocations_are_independent() {
        let first = Invocation::new(0x4008f0, b"./app(foo+0x20) [0x4008f0]");
        let other = Invocation::new(0x7f00_0000_1234, b"/usr/lib/libc.so.6(+0x1234) [0x7f0000001234]");

        assert_eq!(
            other.command_line(Path::new("addr2line")).to_string(),
            "addr2line 0x7f0000001234 -e /usr/lib/libc.so.6"
        );
        assert_eq!(
            first.command_line(Path::new("addr2line")).to_string(),
            "addr2line 0x4008f0 -e ./app"
        );
    }

    #[test]
    fn finds_tools_in_path() {
        let echo = find_executable(Path::new("echo")).expect("echo should be in PATH");
        assert!(echo.is_absolute());
        assert!(find_executable(Path::new("definitely-not-a-real-resolver")).is_none());
        assert_eq!(find_executable(&echo), Some(echo.clone()));
    }

    #[test]
    fn captures_output() {
        let res = resolver("echo", ResolverOutput::Capture);
        let inv = Invocation::new(0x4008f0, b"./app(foo+0x20) [0x4008f0]");

        let mut location = SourceLocation::new();
        assert_eq!(res.resolve(&inv, &mut location), Resolution::Resolved);
        assert_eq!(location.as_str(), "0x4008f0 -e ./app");
    }

    #[test]
    fn inherits_output() {
        let res = resolver("true", ResolverOutput::Inherit);
        let inv = Invocation::new(0x4008f0, b"./app [0x4008f0]");

        let mut location = SourceLocation::new();
        assert_eq!(res.resolve(&inv, &mut location), Resolution::Resolved);
        assert!(location.is_empty());
    }

    #[test]
    fn missing_tool_degrades() {
        let res = resolver("definitely-not-a-real-resolver", ResolverOutput::Capture);
        let inv = Invocation::new(0x4008f0, b"./app [0x4008f0]");

        let mut location = SourceLocation::new();
        assert_eq!(
            res.resolve(&inv, &mut location),
            Resolution::Unavailable(Failure::Exit(127))
        );
        assert!(location.is_empty());
    }

    #[test]
    fn failing_tool_degrades() {
        let res = resolver("false", ResolverOutput::Inherit);
        let inv = Invocation::new(0x4008f0, b"./app [0x4008f0]");

        let mut location = SourceLocation::new();
        assert_eq!(
            res.resolve(&inv, &mut location),
            Resolution::Unavailable(Failure::Exit(1))
        );
    }

    /// A tool that ignores its arguments and never finishes on its own
    fn endless_tool(dir: &Path) -> PathBuf {
        let path = dir.join("endless-resolver");
        std::fs::write(&path, "#!/bin/sh\nexec sleep 60\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn endless_tool_times_out() {
        let dir = tempfile::tempdir().unwrap();

        let res = ExternalResolver::new(&Config {
            resolver: endless_tool(dir.path()),
            resolver_output: ResolverOutput::Capture,
            resolver_timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(res.tool(), dir.path().join("endless-resolver"));

        let inv = Invocation::new(0x4008f0, b"./app [0x4008f0]");

        // A freshly written script can briefly fail with ETXTBSY if another
        // test forks while it is still open for writing
        let mut location = SourceLocation::new();
        let resolution = (0..3)
            .map(|_| {
                location.clear();
                res.resolve(&inv, &mut location)
            })
            .find(|r| *r != Resolution::Unavailable(Failure::Exit(127)))
            .unwrap_or(Resolution::Unavailable(Failure::Exit(127)));

        assert_eq!(resolution, Resolution::Unavailable(Failure::TimedOut));
        assert!(location.is_empty());
    }

    #[test]
    fn endless_tool_is_killed_when_inherited() {
        let dir = tempfile::tempdir().unwrap();

        let res = ExternalResolver::new(&Config {
            resolver: endless_tool(dir.path()),
            resolver_output: ResolverOutput::Inherit,
            resolver_timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .unwrap();
        let inv = Invocation::new(0x4008f0, b"./app [0x4008f0]");

        let mut location = SourceLocation::new();
        let start = std::time::Instant::now();
        let resolution = (0..3)
            .map(|_| res.resolve(&inv, &mut location))
            .find(|r| *r != Resolution::Unavailable(Failure::Exit(127)))
            .unwrap_or(Resolution::Unavailable(Failure::Exit(127)));

        assert_eq!(resolution, Resolution::Unavailable(Failure::TimedOut));
        assert!(start.elapsed() < Duration::from_secs(30));
    }
}
