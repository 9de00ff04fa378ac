use crate::{
    line::LineBuf,
    resolve::{Invocation, Resolution, Resolve, SourceLocation},
    symbolize::{RawSymbolLine, Symbolize},
    unwind::Frames,
    CrashContext, Sink, LINE_BUFFER_SIZE,
};
use std::fmt::Write;

/// The line introducing the frames of the backtrace
pub const BACKTRACE_HEADER: &str = "[bt] Execution path:";

/// A frame after resolution, only alive while the frame is being reported
#[derive(Debug)]
pub struct ResolvedFrame<'l> {
    pub address: usize,
    /// The module path as passed to the resolver
    pub module_path: &'l [u8],
    /// The captured resolver output, `None` if it wasn't captured or the
    /// resolution failed
    pub source_location: Option<&'l [u8]>,
    pub resolution: Resolution,
}

/// Counts of what happened while reporting
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    /// The number of frame lines emitted
    pub frames: usize,
    /// The number of frames the resolver succeeded for
    pub resolved: usize,
    /// The number of frames the resolver failed for
    pub degraded: usize,
}

impl Summary {
    #[inline]
    fn record(&mut self, frame: &ResolvedFrame<'_>) {
        self.frames += 1;
        match frame.resolution {
            Resolution::Resolved => self.resolved += 1,
            Resolution::Unavailable(_) => self.degraded += 1,
        }
    }
}

/// Writes the report for a fault to the sink.
///
/// The frames are reported in the order they were captured, each frame line
/// is followed by exactly one resolver invocation, regardless of whether
/// the previous ones succeeded.
///
/// All formatting is done in fixed buffers on the stack.
pub fn emit<Y, R, K>(
    context: &CrashContext,
    frames: &Frames,
    symbolizer: &Y,
    resolver: &R,
    sink: &K,
) -> Summary
where
    Y: Symbolize + ?Sized,
    R: Resolve + ?Sized,
    K: Sink + ?Sized,
{
    let mut line = LineBuf::<LINE_BUFFER_SIZE>::new();
    let _ = write!(&mut line, "{context}");
    sink.console(line.as_str());
    sink.console(BACKTRACE_HEADER);

    let mut raw = RawSymbolLine::new();
    let mut location = SourceLocation::new();
    let mut summary = Summary::default();

    for address in frames.iter() {
        raw.clear();
        symbolizer.describe(address, &mut raw);

        line.clear();
        line.push_str("[bt] ");
        line.push_lossy(raw.as_bytes());
        sink.console(line.as_str());

        let invocation = Invocation::new(address, raw.as_bytes());
        location.clear();
        let resolution = resolver.resolve(&invocation, &mut location);

        let frame = ResolvedFrame {
            address,
            module_path: invocation.module,
            source_location: (resolution == Resolution::Resolved && !location.is_empty())
                .then(|| location.as_bytes()),
            resolution,
        };

        if let Some(source_location) = frame.source_location {
            line.clear();
            line.push_str("[bt]     at ");
            line.push_lossy(source_location);
            sink.console(line.as_str());
        }

        summary.record(&frame);
    }

    summary
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resolve::Failure;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<String>>,
    }

    unsafe impl Sink for Recorder {
        fn console(&self, line: &str) {
            self.lines.lock().push(line.to_owned());
        }

        fn error(&self, line: &str) {
            self.lines.lock().push(format!("error: {line}"));
        }
    }

    /// Pretends every address lives in `./app`
    struct Synthetic;

    impl Symbolize for Synthetic {
        fn describe(&self, address: usize, line: &mut RawSymbolLine) {
            let _ = write!(line, "./app(frame_{address:x}+0x10) [{address:#x}]");
        }
    }

    /// Records every invocation, failing for the specified addresses, and
    /// optionally "captures" a location
    #[derive(Default)]
    struct Calls {
        invocations: Mutex<Vec<String>>,
        fail: Vec<usize>,
        capture: bool,
    }

    impl Resolve for Calls {
        fn resolve(&self, invocation: &Invocation<'_>, location: &mut SourceLocation) -> Resolution {
            self.invocations.lock().push(
                invocation
                    .command_line(std::path::Path::new("addr2line"))
                    .to_string(),
            );

            if self.fail.contains(&invocation.address) {
                return Resolution::Unavailable(Failure::Exit(127));
            }

            if self.capture {
                let _ = writeln!(location, "src/main.rs:{}", invocation.address & 0xff);
                location.trim_end();
            }

            Resolution::Resolved
        }
    }

    const CONTEXT: CrashContext = CrashContext::new(11, 0xdeadbeef, Some(0x4005a0));

    #[test]
    fn three_frame_report() {
        let mut frames = Frames::from_slice(&[0x1111, 0x4008f0, 0x400a00]);
        frames.substitute_instruction_pointer(CONTEXT.instruction_pointer);

        let sink = Recorder::default();
        let resolver = Calls::default();

        let summary = emit(&CONTEXT, &frames, &Synthetic, &resolver, &sink);

        assert_eq!(
            sink.lines.into_inner(),
            vec![
                "Got signal 11, faulty address is 0xdeadbeef, from 0x4005a0",
                BACKTRACE_HEADER,
                "[bt] ./app(frame_4005a0+0x10) [0x4005a0]",
                "[bt] ./app(frame_4008f0+0x10) [0x4008f0]",
                "[bt] ./app(frame_400a00+0x10) [0x400a00]",
            ]
        );

        assert_eq!(
            resolver.invocations.into_inner(),
            vec![
                "addr2line 0x4005a0 -e ./app",
                "addr2line 0x4008f0 -e ./app",
                "addr2line 0x400a00 -e ./app",
            ]
        );

        assert_eq!(
            summary,
            Summary {
                frames: 3,
                resolved: 3,
                degraded: 0,
            }
        );
    }

    #[test]
    fn one_line_and_one_resolution_per_frame() {
        for n in 0..=crate::MAX_FRAMES {
            let addrs: Vec<usize> = (0..n).map(|i| 0x1000 + i * 0x10).collect();
            let frames = Frames::from_slice(&addrs);

            let sink = Recorder::default();
            let resolver = Calls::default();
            let summary = emit(&CONTEXT, &frames, &Synthetic, &resolver, &sink);

            let lines = sink.lines.into_inner();
            assert_eq!(lines.len(), n + 2);

            let frame_lines: Vec<_> = lines[2..].to_vec();
            let expected: Vec<_> = addrs
                .iter()
                .map(|addr| format!("[bt] ./app(frame_{addr:x}+0x10) [{addr:#x}]"))
                .collect();
            assert_eq!(frame_lines, expected);

            let invocations = resolver.invocations.into_inner();
            let expected: Vec<_> = addrs
                .iter()
                .map(|addr| format!("addr2line {addr:#x} -e ./app"))
                .collect();
            assert_eq!(invocations, expected);
            assert_eq!(summary.frames, n);
        }
    }

    #[test]
    fn failures_do_not_truncate() {
        let frames = Frames::from_slice(&[0x1000, 0x2000, 0x3000, 0x4000]);

        let sink = Recorder::default();
        let resolver = Calls {
            fail: vec![0x1000, 0x3000],
            ..Default::default()
        };

        let summary = emit(&CONTEXT, &frames, &Synthetic, &resolver, &sink);

        assert_eq!(sink.lines.into_inner().len(), 2 + 4);
        assert_eq!(resolver.invocations.into_inner().len(), 4);
        assert_eq!(
            summary,
            Summary {
                frames: 4,
                resolved: 2,
                degraded: 2,
            }
        );
    }

    #[test]
    fn captured_locations_follow_their_frame() {
        let frames = Frames::from_slice(&[0x4005a0, 0x4008f0]);

        let sink = Recorder::default();
        let resolver = Calls {
            fail: vec![0x4008f0],
            capture: true,
            ..Default::default()
        };

        emit(&CONTEXT, &frames, &Synthetic, &resolver, &sink);

        assert_eq!(
            sink.lines.into_inner(),
            vec![
                "Got signal 11, faulty address is 0xdeadbeef, from 0x4005a0",
                BACKTRACE_HEADER,
                "[bt] ./app(frame_4005a0+0x10) [0x4005a0]",
                "[bt]     at src/main.rs:160",
                "[bt] ./app(frame_4008f0+0x10) [0x4008f0]",
            ]
        );
    }

    /// Describes every address as living in a module whose path isn't UTF-8
    struct NonUtf8;

    impl Symbolize for NonUtf8 {
        fn describe(&self, address: usize, line: &mut RawSymbolLine) {
            line.push_bytes(b"/opt/\xffapp(main+0x20) ");
            let _ = write!(line, "[{address:#x}]");
        }
    }

    #[test]
    fn non_utf8_lines_are_kept_whole() {
        let frames = Frames::from_slice(&[0x4005a0]);

        let sink = Recorder::default();
        let resolver = Calls {
            capture: true,
            ..Default::default()
        };
        emit(&CONTEXT, &frames, &NonUtf8, &resolver, &sink);

        let lines = sink.lines.into_inner();
        assert_eq!(lines[2], "[bt] /opt/\u{fffd}app(main+0x20) [0x4005a0]");
        assert_eq!(lines[3], "[bt]     at src/main.rs:160");

        // The resolver still gets the raw module path
        assert_eq!(
            resolver.invocations.into_inner(),
            vec!["addr2line 0x4005a0 -e /opt/\u{fffd}app"]
        );
    }

    #[test]
    fn unknown_instruction_pointer() {
        let context = CrashContext::new(11, 0, None);
        let mut frames = Frames::from_slice(&[0x1000]);
        frames.substitute_instruction_pointer(context.instruction_pointer);

        let sink = Recorder::default();
        emit(&context, &frames, &Synthetic, &Calls::default(), &sink);

        let lines = sink.lines.into_inner();
        assert_eq!(lines[0], "Got signal 11, faulty address is 0x0, from (unknown)");
        assert_eq!(lines[2], "[bt] ./app(frame_1000+0x10) [0x1000]");
    }
}
