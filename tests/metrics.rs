#![cfg(feature = "metrics")]
//! Tests for the metrics helpers.
//!
//! Counters and gauges are observed through
//! `metrics_util::debugging::DebuggingRecorder`.

use httpwire::metrics::{self as wire_metrics, Direction};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use rstest::rstest;

fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

fn counter_with_label(snapshotter: &Snapshotter, name: &str, label: (&str, &str)) -> u64 {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter(|(k, _, _, _)| {
            k.key().name() == name
                && k
                    .key()
                    .labels()
                    .any(|l| l.key() == label.0 && l.value() == label.1)
        })
        .map(|(_, _, _, v)| match v {
            DebugValue::Counter(c) => c,
            _ => 0,
        })
        .sum()
}

#[rstest]
#[case(Direction::Inbound, "inbound")]
#[case(Direction::Outbound, "outbound")]
fn message_metric_is_labelled_by_direction(#[case] direction: Direction, #[case] label: &str) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        wire_metrics::inc_messages(direction);
        wire_metrics::inc_messages(direction);
    });
    assert_eq!(
        counter_with_label(&snapshotter, wire_metrics::MESSAGES_TOTAL, ("direction", label)),
        2
    );
}

#[test]
fn error_metric_is_labelled_by_kind() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        wire_metrics::inc_errors("line_too_large");
    });
    assert_eq!(
        counter_with_label(&snapshotter, wire_metrics::ERRORS_TOTAL, ("kind", "line_too_large")),
        1
    );
}

#[test]
fn connection_gauge_tracks_open_connections() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        wire_metrics::inc_connections();
        wire_metrics::inc_connections();
        wire_metrics::dec_connections();
    });
    let metrics = snapshotter.snapshot().into_vec();
    let found = metrics.iter().any(|(k, _, _, v)| {
        k.key().name() == wire_metrics::CONNECTIONS_ACTIVE
            && matches!(v, DebugValue::Gauge(g) if (g.into_inner() - 1.0).abs() < f64::EPSILON)
    });
    assert!(found, "connection gauge not recorded");
}

#[test]
fn rejected_dispatch_is_counted() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, wire_metrics::inc_dispatch_rejected);
    let metrics = snapshotter.snapshot().into_vec();
    assert!(metrics.iter().any(|(k, _, _, v)| {
        k.key().name() == wire_metrics::DISPATCH_REJECTED && matches!(v, DebugValue::Counter(1))
    }));
}
