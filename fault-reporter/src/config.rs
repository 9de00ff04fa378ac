use std::{path::PathBuf, time::Duration};

/// The maximum number of frames that are captured when a fault occurs
pub const MAX_FRAMES: usize = 16;
/// The size of every line formatted during the report, longer lines are
/// truncated
pub const LINE_BUFFER_SIZE: usize = 1024;
/// The maximum number of bytes scanned when looking for the end of the module
/// path in a raw symbol line
pub const MODULE_SCAN_LIMIT: usize = 256;
/// The maximum number of bytes of resolver output kept for a single frame
pub const SOURCE_LOCATION_SIZE: usize = 512;

const RESOLVER_VAR: &str = "FAULT_REPORTER_RESOLVER";
const RESOLVER_OUTPUT_VAR: &str = "FAULT_REPORTER_RESOLVER_OUTPUT";
const RESOLVER_TIMEOUT_VAR: &str = "FAULT_REPORTER_RESOLVER_TIMEOUT_MS";
const MAX_DEPTH_VAR: &str = "FAULT_REPORTER_MAX_DEPTH";

/// Where the output of the resolver tool goes
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ResolverOutput {
    /// The tool writes to the same stdout as the process, its output does not
    /// go through the [`crate::Sink`]
    #[default]
    Inherit,
    /// The tool's stdout is captured and emitted through the [`crate::Sink`]
    /// as the frame's source location
    Capture,
}

impl std::str::FromStr for ResolverOutput {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inherit" => Ok(Self::Inherit),
            "capture" => Ok(Self::Capture),
            _ => Err(()),
        }
    }
}

/// Controls how a fault is reported
#[derive(Clone, Debug)]
pub struct Config {
    /// The address to line tool, invoked as `<resolver> <address> -e <module>`.
    ///
    /// A bare name is looked up in `PATH` when the handler is attached.
    pub resolver: PathBuf,
    pub resolver_output: ResolverOutput,
    /// How long a single resolver invocation may run before it is killed
    pub resolver_timeout: Duration,
    /// The number of frames to capture, clamped to [`MAX_FRAMES`]
    pub max_depth: usize,
    /// Demangle Rust symbol names in the raw symbol lines
    pub demangle: bool,
    /// Install an alternate signal stack on the attaching thread so that
    /// stack overflows can be reported
    pub alt_stack: bool,
    /// The status the process exits with once the report is written
    pub exit_code: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resolver: PathBuf::from("addr2line"),
            resolver_output: ResolverOutput::Inherit,
            resolver_timeout: Duration::from_secs(5),
            max_depth: MAX_FRAMES,
            demangle: true,
            alt_stack: true,
            exit_code: 0,
        }
    }
}

impl Config {
    /// Creates the default config, overridden by any `FAULT_REPORTER_*`
    /// environment variables that are set
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(resolver) = var(RESOLVER_VAR) {
            self.resolver = resolver.into();
        }

        if let Some(output) = var(RESOLVER_OUTPUT_VAR) {
            match output.parse() {
                Ok(output) => self.resolver_output = output,
                Err(()) => log::warn!("ignoring invalid {RESOLVER_OUTPUT_VAR} '{output}'"),
            }
        }

        if let Some(timeout) = var(RESOLVER_TIMEOUT_VAR) {
            match timeout.parse() {
                Ok(ms) => self.resolver_timeout = Duration::from_millis(ms),
                Err(err) => log::warn!("ignoring invalid {RESOLVER_TIMEOUT_VAR} '{timeout}': {err}"),
            }
        }

        if let Some(depth) = var(MAX_DEPTH_VAR) {
            match depth.parse() {
                Ok(depth) => self.max_depth = depth,
                Err(err) => log::warn!("ignoring invalid {MAX_DEPTH_VAR} '{depth}': {err}"),
            }
        }

        self.max_depth = self.max_depth.min(MAX_FRAMES);
        self
    }
}
