use fault_reporter_test::*;

#[test]
fn null_globals() {
    let output = Client::new(Flavor::Segfault).null_globals().run();

    assert_eq!(output.status.code(), Some(CLIENT_ERROR));
    assert!(
        output
            .stderr
            .contains("error: attach called with null host globals")
    );

    let report = output.report();
    assert!(report.context.is_none());
    assert!(report.frames.is_empty());
}
