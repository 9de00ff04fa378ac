//! A fault while the report is being written must still end in the
//! configured exit, rather than the process being killed by the signal.

use fault_reporter::{Config, FaultReporter, Sink, write_fd};

/// Faults on the very first line it is asked to write
struct Faulty;

unsafe impl Sink for Faulty {
    fn console(&self, _line: &str) {
        unsafe {
            sadness_generator::raise_segfault_at(0x10);
        }

        write_fd(2, b"the fault in the sink did not fault\n");
        // SAFETY: syscall
        unsafe { libc::_exit(3) }
    }

    fn error(&self, _line: &str) {}
}

#[test]
fn fault_while_reporting_exits() {
    let config = Config {
        resolver: "true".into(),
        exit_code: 0,
        ..Default::default()
    };

    let _reporter = FaultReporter::attach(config, Box::new(Faulty)).unwrap();

    unsafe {
        sadness_generator::raise_segfault();
    }

    // Only reached if the fault was somehow skipped
    std::process::exit(2);
}
