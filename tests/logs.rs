// ABOUTME: Integration tests for the log aggregator.
// ABOUTME: Buffer bounds under arbitrary input, progress folding and delivery through the bus.

use hearth::events::{Event, EventBus};
use hearth::logs::{LogAggregator, log_dir};
use hearth::model::{DownloadProgress, LogKind, LogMessage};
use hearth::types::ContainerId;
use proptest::prelude::*;
use std::sync::Arc;

fn progress(id: &str, current: u64) -> LogMessage {
    LogMessage::Download(DownloadProgress {
        id: id.into(),
        status: "Downloading".into(),
        current: Some(current),
        total: Some(10),
    })
}

proptest! {
    #[test]
    fn buffer_keeps_the_newest_lines(capacity in 1usize..20, count in 0usize..60) {
        let dir = tempfile::tempdir().unwrap();
        let logs = LogAggregator::new(dir.path(), capacity);
        let id = ContainerId::new("c1");
        logs.register(&id).unwrap();

        for i in 0..count {
            logs.record(&id, LogKind::Out, LogMessage::Text(format!("line {i}")));
        }

        let buffer = logs.load_buffer(&id);
        prop_assert_eq!(buffer.len(), count.min(capacity));
        let first = count.saturating_sub(capacity) as u64;
        let ids: Vec<u64> = buffer.iter().map(|l| l.id).collect();
        let expected: Vec<u64> = (first..count as u64).collect();
        prop_assert_eq!(ids, expected);
    }
}

#[test]
fn interleaved_layers_fold_into_one_line() {
    let dir = tempfile::tempdir().unwrap();
    let logs = LogAggregator::new(dir.path(), 10);
    let id = ContainerId::new("c1");
    logs.register(&id).unwrap();

    logs.record(&id, LogKind::Out, LogMessage::Text("pulling".into()));
    logs.record(&id, LogKind::Download, progress("a", 1));
    logs.record(&id, LogKind::Download, progress("b", 1));
    logs.record(&id, LogKind::Download, progress("a", 2));

    let buffer = logs.load_buffer(&id);
    assert_eq!(buffer.len(), 2);
    let folded = &buffer[1];
    assert_eq!(folded.id, 1);
    assert_eq!(folded.kind, LogKind::Downloads);
    let LogMessage::Downloads(set) = &folded.message else {
        panic!("expected a folded download line, got {:?}", folded.message);
    };
    assert_eq!(set.len(), 2);
    assert_eq!(set["a"].current, Some(2));
    assert_eq!(set["b"].current, Some(1));
}

#[test]
fn folding_does_not_consume_ids() {
    let dir = tempfile::tempdir().unwrap();
    let logs = LogAggregator::new(dir.path(), 10);
    let id = ContainerId::new("c1");
    logs.register(&id).unwrap();

    logs.record(&id, LogKind::Download, progress("a", 1));
    logs.record(&id, LogKind::Download, progress("a", 2));
    let next = logs
        .record(&id, LogKind::Err, LogMessage::Text("done".into()))
        .unwrap();
    assert_eq!(next.id, 1);
}

#[tokio::test]
async fn bus_events_reach_buffer_and_file() {
    let dir = tempfile::tempdir().unwrap();
    let bus = EventBus::new();
    let logs = Arc::new(LogAggregator::new(dir.path(), 10));
    bus.subscribe(logs.clone());
    let id = ContainerId::new("c1");
    logs.register(&id).unwrap();

    bus.publish(&Event::ContainerLog {
        id: id.clone(),
        kind: LogKind::Out,
        message: LogMessage::Text("hello".into()),
    })
    .unwrap();
    bus.publish(&Event::ContainerLog {
        id: ContainerId::new("unknown"),
        kind: LogKind::Out,
        message: LogMessage::Text("dropped".into()),
    })
    .unwrap();

    assert_eq!(logs.load_buffer(&id).len(), 1);
    let file = logs.current_file(&id).unwrap();
    assert!(file.starts_with(log_dir(dir.path(), &id)));
    let content = std::fs::read_to_string(file).unwrap();
    assert!(content.contains("[out] hello"), "file was: {content}");
    assert!(!content.contains("dropped"));
}
