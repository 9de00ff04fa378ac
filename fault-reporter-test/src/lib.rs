use sadness_generator::SadnessFlavor;
use std::fmt;

/// The ways the crash client can fault
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flavor {
    Segfault,
    NullDeref,
    StackOverflow,
}

impl From<Flavor> for SadnessFlavor {
    fn from(f: Flavor) -> Self {
        match f {
            Flavor::Segfault => Self::Segfault,
            Flavor::NullDeref => Self::NullDeref,
            Flavor::StackOverflow => Self::StackOverflow,
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Segfault => "segfault",
            Self::NullDeref => "null-deref",
            Self::StackOverflow => "stack-overflow",
        })
    }
}

/// Where the crash client writes its report
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SinkKind {
    #[default]
    Stderr,
    Log,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stderr => "stderr",
            Self::Log => "log",
        })
    }
}

/// The exit code of the crash client if it fails before faulting
pub const CLIENT_ERROR: i32 = 222;

/// How to run the crash client
#[derive(Clone, Debug)]
pub struct Client {
    pub flavor: Flavor,
    pub resolver: Option<String>,
    pub capture: bool,
    pub sink: SinkKind,
    pub use_thread: bool,
    pub null_globals: bool,
}

impl Client {
    pub fn new(flavor: Flavor) -> Self {
        Self {
            flavor,
            resolver: None,
            capture: false,
            sink: SinkKind::Stderr,
            use_thread: false,
            null_globals: false,
        }
    }

    pub fn resolver(mut self, resolver: &str) -> Self {
        self.resolver = Some(resolver.to_owned());
        self
    }

    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    pub fn sink(mut self, sink: SinkKind) -> Self {
        self.sink = sink;
        self
    }

    pub fn use_thread(mut self) -> Self {
        self.use_thread = true;
        self
    }

    pub fn null_globals(mut self) -> Self {
        self.null_globals = true;
        self
    }

    /// Runs the crash client to completion
    pub fn run(&self) -> Output {
        use std::env;

        // Adapted from
        // https://github.com/rust-lang/cargo/blob/485670b3983b52289a2f353d589c57fae2f60f82/tests/testsuite/support/mod.rs#L507
        let mut cmd_path = env::current_exe().expect("failed to get exe path");
        cmd_path.pop();
        if cmd_path.ends_with("deps") {
            cmd_path.pop();
        }

        cmd_path.push("crash-client");
        if !env::consts::EXE_SUFFIX.is_empty() {
            cmd_path.set_extension(env::consts::EXE_SUFFIX);
        }

        let mut cmd = std::process::Command::new(&cmd_path);
        cmd.stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        cmd.args([
            "--flavor",
            &self.flavor.to_string(),
            "--sink",
            &self.sink.to_string(),
        ]);

        if let Some(resolver) = &self.resolver {
            cmd.args(["--resolver", resolver]);
        }
        if self.capture {
            cmd.arg("--capture");
        }
        if self.use_thread {
            cmd.arg("--use-thread");
        }
        if self.null_globals {
            cmd.arg("--null-globals");
        }

        // Don't let the environment of the test change the report
        for var in [
            "FAULT_REPORTER_RESOLVER",
            "FAULT_REPORTER_RESOLVER_OUTPUT",
            "FAULT_REPORTER_RESOLVER_TIMEOUT_MS",
            "FAULT_REPORTER_MAX_DEPTH",
        ] {
            cmd.env_remove(var);
        }

        let output = cmd.output().expect("failed to run crash-client");

        let output = Output {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        println!("{}", output.stdout);
        eprintln!("{}", output.stderr);

        output
    }
}

/// What the crash client left behind
pub struct Output {
    pub status: std::process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    /// Picks the report out of stderr, any prefix added by a logger is
    /// stripped
    pub fn report(&self) -> Report<'_> {
        let mut report = Report::default();

        for line in self.stderr.lines() {
            if let Some(i) = line.find("Got signal ") {
                report.context = Some(&line[i..]);
            } else if line.contains("[bt] Execution path:") {
                report.header = true;
            } else if let Some(i) = line.find("[bt]     at ") {
                report.locations.push(&line[i + "[bt]     at ".len()..]);
            } else if let Some(i) = line.find("[bt] ") {
                report.frames.push(&line[i + "[bt] ".len()..]);
            }
        }

        report
    }

    /// The lines the resolver tool wrote to stdout
    pub fn resolver_lines(&self) -> Vec<&str> {
        self.stdout.lines().collect()
    }
}

#[derive(Default, Debug)]
pub struct Report<'o> {
    pub context: Option<&'o str>,
    pub header: bool,
    /// The raw symbol lines, in order
    pub frames: Vec<&'o str>,
    /// The captured source locations, in order
    pub locations: Vec<&'o str>,
}

impl Report<'_> {
    /// The instruction pointer the context line cites
    pub fn instruction_pointer(&self) -> Option<&str> {
        self.context?.rsplit_once(", from ").map(|(_, ip)| ip)
    }

    /// The address the specified frame line describes
    pub fn frame_address(&self, i: usize) -> Option<&str> {
        let frame = self.frames.get(i)?;
        let start = frame.rfind('[')?;
        frame[start + 1..].strip_suffix(']')
    }
}

/// Checks the parts of a report every fault shares
pub fn assert_report(output: &Output) {
    assert_eq!(
        output.status.code(),
        Some(0),
        "the client should have exited after reporting"
    );

    let report = output.report();
    let context = report.context.expect("no context line in the report");
    assert!(context.starts_with("Got signal 11, faulty address is 0x"));
    assert!(report.header, "no backtrace header in the report");
    assert!(
        (1..=fault_reporter::MAX_FRAMES).contains(&report.frames.len()),
        "unexpected frame count {}",
        report.frames.len()
    );

    // The innermost frame is the faulting instruction
    assert_eq!(report.instruction_pointer(), report.frame_address(0));
}
