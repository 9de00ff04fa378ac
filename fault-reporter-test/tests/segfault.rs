use fault_reporter_test::*;

#[test]
fn segfault_simple() {
    let output = Client::new(Flavor::Segfault).resolver("echo").run();
    assert_report(&output);

    let report = output.report();
    assert!(
        report
            .context
            .unwrap()
            .starts_with("Got signal 11, faulty address is 0xdeadbeef, from 0x")
    );

    // Every frame gets exactly one invocation, in the same order
    let invocations = output.resolver_lines();
    assert_eq!(invocations.len(), report.frames.len());

    for (i, invocation) in invocations.iter().enumerate() {
        let address = report.frame_address(i).unwrap();
        assert!(
            invocation.starts_with(&format!("{address} -e ")),
            "frame {i} was resolved with '{invocation}'"
        );
    }
}

#[test]
fn segfault_threaded() {
    let output = Client::new(Flavor::Segfault)
        .resolver("echo")
        .use_thread()
        .run();
    assert_report(&output);
    assert_eq!(output.resolver_lines().len(), output.report().frames.len());
}

#[test]
fn null_deref() {
    let output = Client::new(Flavor::NullDeref).resolver("true").run();
    assert_report(&output);

    assert!(
        output
            .report()
            .context
            .unwrap()
            .starts_with("Got signal 11, faulty address is 0x0, from 0x")
    );
}

#[test]
fn captured_locations() {
    let output = Client::new(Flavor::Segfault)
        .resolver("echo")
        .capture()
        .run();
    assert_report(&output);

    // Nothing leaks to stdout, every location is in the report instead
    assert!(output.resolver_lines().is_empty());

    let report = output.report();
    assert_eq!(report.locations.len(), report.frames.len());
    for (i, location) in report.locations.iter().enumerate() {
        let address = report.frame_address(i).unwrap();
        assert!(location.starts_with(&format!("{address} -e ")));
    }
}

#[test]
fn log_sink() {
    let output = Client::new(Flavor::Segfault)
        .resolver("true")
        .sink(SinkKind::Log)
        .run();
    assert_report(&output);
}
