use fault_reporter::{
    Config, LogSink, ResolverOutput, Sink, StderrSink,
    host::{self, HostContext},
};
use fault_reporter_test::{CLIENT_ERROR, Flavor, SinkKind};

use clap::Parser;

#[derive(Parser)]
struct Command {
    /// How to fault
    #[clap(long)]
    flavor: Flavor,
    /// The address to line tool to resolve frames with
    #[clap(long)]
    resolver: Option<String>,
    /// Captures the resolver output into the report rather than letting it
    /// write to stdout
    #[clap(long)]
    capture: bool,
    /// Where the report is written
    #[clap(long, default_value_t = SinkKind::Stderr)]
    sink: SinkKind,
    /// Faults on a separate thread rather than the main thread
    #[clap(long)]
    use_thread: bool,
    /// Attaches as a host that didn't supply its globals
    #[clap(long)]
    null_globals: bool,
}

#[allow(unsafe_code)]
fn real_main() -> anyhow::Result<()> {
    let cmd = Command::parse();

    let sink: Box<dyn Sink> = match cmd.sink {
        SinkKind::Stderr => Box::new(StderrSink),
        SinkKind::Log => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .init();
            Box::new(LogSink)
        }
    };

    let mut config = Config::from_env();
    if let Some(resolver) = cmd.resolver {
        config.resolver = resolver.into();
    }
    if cmd.capture {
        config.resolver_output = ResolverOutput::Capture;
    }

    let mut globals = 0u64;
    let mut function_table = 0u64;
    let host = HostContext::new(
        if cmd.null_globals {
            std::ptr::null_mut()
        } else {
            (&mut globals as *mut u64).cast()
        },
        (&mut function_table as *mut u64).cast(),
    );

    let reporter = host::attach(host, config, sink)?;
    log::info!("attached, about to fault with {}", cmd.flavor);

    let flavor = cmd.flavor.into();

    let raise_signal = move || {
        // SAFETY: we're about to intentionally crash ourselves via shenanigans,
        // none of this is safe
        unsafe {
            sadness_generator::SadnessFlavor::make_sad(flavor);
        }
    };

    if cmd.use_thread {
        std::thread::spawn(move || {
            if let Err(err) = fault_reporter::FaultReporter::prepare_thread() {
                eprintln!("error: failed to prepare thread: {err}");
                #[allow(clippy::exit)]
                std::process::exit(CLIENT_ERROR);
            }

            raise_signal()
        })
        .join()
        .map_err(|_| anyhow::anyhow!("the faulting thread panicked"))?;
    } else {
        raise_signal();
    }

    host::detach(Some(reporter));
    anyhow::bail!("we should have faulted and exited");
}

fn main() {
    // We want this program to fault and have a report written, it _shouldn't_
    // have errors that prevent that from happening, so emit an error code if we
    // do encounter an error so that we can fail the test
    if let Err(e) = real_main() {
        eprintln!("error: {e:#}");

        #[allow(clippy::exit)]
        std::process::exit(CLIENT_ERROR);
    }
}
