use cps_telemetry::{init_tracing, metrics, record_receive, record_send, record_stop_failure};

#[test]
fn counters_are_monotonic() {
    init_tracing();
    init_tracing();

    let before = metrics().snapshot();
    record_send();
    record_send();
    record_receive();
    record_stop_failure();
    let after = metrics().snapshot();

    assert!(after.sends >= before.sends + 2);
    assert!(after.receives >= before.receives + 1);
    assert!(after.stop_failures >= before.stop_failures + 1);
}
