//! Flow control scenarios against a scripted device

mod common;

use common::MockConnection;
use gcodestream_communication::{
    Acknowledgement, Communicator, CommunicatorConfig, CommunicatorEvent, ResponseClassifier,
};
use gcodestream_core::{Command, CommandCreator, CommandList, Error, GcodeStreamReader};
use proptest::prelude::*;
use std::io::Cursor;
use std::sync::Arc;

struct OkErrorClassifier;

impl ResponseClassifier for OkErrorClassifier {
    fn acknowledgement(&self, response: &str) -> Option<Acknowledgement> {
        match response {
            "ok" => Some(Acknowledgement::Ok),
            r if r.starts_with("error") => Some(Acknowledgement::Error),
            _ => None,
        }
    }
}

fn communicator(buffer_size: usize) -> (Communicator, MockConnection) {
    let mock = MockConnection::new();
    let comm = Communicator::new(
        CommunicatorConfig {
            buffer_size,
            single_step_mode: false,
        },
        Arc::new(OkErrorClassifier),
    );
    comm.connect(Box::new(mock.clone())).unwrap();
    (comm, mock)
}

#[test]
fn test_source_streams_after_manual_queue() {
    let (comm, mock) = communicator(128);
    let creator = CommandCreator::new();
    let file = "G21\n; setup\nG0 X1\nG0 X2\n";
    let reader = GcodeStreamReader::new(Cursor::new(file.as_bytes().to_vec()), creator.clone());

    comm.queue_command_source(Box::new(reader)).unwrap();
    comm.queue_command(creator.create("$X")).unwrap();
    let progress = comm.stream_commands().unwrap();

    assert_eq!(mock.written_lines(), vec!["$X", "G21", "G0 X1", "G0 X2"]);
    assert_eq!(progress.sent.len(), 4);
    assert_eq!(progress.skipped.len(), 1);
    assert_eq!(comm.active_count(), 4);
}

#[test]
fn test_acknowledgments_drain_in_order() {
    let (comm, _mock) = communicator(128);
    comm.queue_command(Command::new("G0 X1")).unwrap();
    comm.queue_command(Command::new("G0 X2")).unwrap();
    comm.stream_commands().unwrap();

    let first = comm.handle_response("ok").unwrap().unwrap();
    assert_eq!(first.text(), "G0 X1");
    assert!(first.is_done());
    let second = comm.handle_response("error:20").unwrap().unwrap();
    assert_eq!(second.text(), "G0 X2");
    assert!(second.is_error());
    assert_eq!(second.response(), Some("error:20"));

    // Nothing outstanding, so the error did not pause sending
    assert!(!comm.is_paused());
    assert!(comm.handle_response("ok").unwrap().is_none());
}

#[test]
fn test_error_with_work_outstanding_pauses() {
    let (comm, mock) = communicator(12);
    let mut events = comm.subscribe();
    for text in ["G0 X1", "G0 X2", "G0 X3"] {
        comm.queue_command(Command::new(text)).unwrap();
    }
    comm.stream_commands().unwrap();
    assert_eq!(mock.written_lines().len(), 2);

    comm.handle_response("error:9").unwrap();
    assert!(comm.is_paused());
    // Room was freed but nothing more goes out while paused
    comm.stream_commands().unwrap();
    assert_eq!(mock.written_lines().len(), 2);

    let paused = std::iter::from_fn(|| events.try_recv().ok())
        .any(|e| matches!(e, CommunicatorEvent::PausedOnError(c) if c.text() == "G0 X1"));
    assert!(paused);

    comm.resume_send().unwrap();
    assert_eq!(mock.written_lines(), vec!["G0 X1", "G0 X2", "G0 X3"]);
}

#[test]
fn test_pausing_twice_matches_pausing_once() {
    let (once, once_mock) = communicator(12);
    let (twice, twice_mock) = communicator(12);
    for comm in [&once, &twice] {
        for text in ["G0 X1", "G0 X2", "G0 X3", "G0 X4"] {
            comm.queue_command(Command::new(text)).unwrap();
        }
        comm.stream_commands().unwrap();
    }

    once.pause_send();
    twice.pause_send();
    twice.pause_send();
    for comm in [&once, &twice] {
        assert!(comm.is_paused());
        comm.handle_response("ok").unwrap();
        comm.stream_commands().unwrap();
        assert_eq!(comm.active_count(), 1);
        assert_eq!(comm.buffered_count(), 2);
    }
    assert_eq!(once_mock.written_lines(), twice_mock.written_lines());
    assert_eq!(twice_mock.written_lines(), vec!["G0 X1", "G0 X2"]);

    // One resume undoes any number of pauses
    twice.resume_send().unwrap();
    assert!(!twice.is_paused());
    assert_eq!(
        twice_mock.written_lines(),
        vec!["G0 X1", "G0 X2", "G0 X3"]
    );
}

#[test]
fn test_unreadable_source_line_keeps_queues_consistent() {
    let (comm, mock) = communicator(128);
    let reader = GcodeStreamReader::new(
        Cursor::new(b"G0 X1\n\xff\xfe\nG0 X2\n".to_vec()),
        CommandCreator::new(),
    );
    comm.queue_command_source(Box::new(reader)).unwrap();

    assert!(comm.stream_commands().is_err());
    // Only what reached the device is awaiting acknowledgment
    assert_eq!(mock.written_lines(), vec!["G0 X1"]);
    assert_eq!(comm.active_count(), 1);
    assert_eq!(comm.active_bytes(), 6);
    assert_eq!(comm.buffered_count(), 0);

    let done = comm.handle_response("ok").unwrap().unwrap();
    assert_eq!(done.text(), "G0 X1");
    assert_eq!(comm.active_bytes(), 0);
    assert!(!comm.has_pending_work());
    assert_eq!(mock.written_lines(), vec!["G0 X1"]);
}

#[test]
fn test_queueing_while_source_is_attached() {
    let (comm, mock) = communicator(128);
    let creator = CommandCreator::new();
    comm.queue_command_source(Box::new(CommandList::from_lines(&creator, ["G0 X1"])))
        .unwrap();
    comm.queue_command(creator.create("G0 X9")).unwrap();
    assert_eq!(comm.buffered_count(), 1);
    assert!(comm.has_pending_work());

    comm.stream_commands().unwrap();
    assert_eq!(mock.written_lines(), vec!["G0 X9", "G0 X1"]);
}

#[test]
fn test_cancel_unsent_keeps_active() {
    let (comm, mock) = communicator(12);
    let creator = CommandCreator::new();
    let list = CommandList::from_lines(&creator, ["G0 X1", "G0 X2", "G0 X3", "G0 X4"]);
    comm.queue_command_source(Box::new(list)).unwrap();
    comm.stream_commands().unwrap();

    assert_eq!(comm.cancel_unsent(), 2);
    assert_eq!(comm.active_count(), 2);
    assert!(comm.has_pending_work());

    comm.handle_response("ok").unwrap();
    comm.handle_response("ok").unwrap();
    comm.stream_commands().unwrap();
    assert!(!comm.has_pending_work());
    assert_eq!(mock.written_lines().len(), 2);
}

#[test]
fn test_cancel_send_forgets_everything() {
    let (comm, _mock) = communicator(12);
    for text in ["G0 X1", "G0 X2", "G0 X3"] {
        comm.queue_command(Command::new(text)).unwrap();
    }
    comm.stream_commands().unwrap();
    comm.cancel_send();

    assert_eq!(comm.active_count(), 0);
    assert_eq!(comm.active_bytes(), 0);
    assert!(!comm.has_pending_work());
    assert!(comm.handle_response("ok").unwrap().is_none());
}

#[test]
fn test_transport_failure_disconnects() {
    let (comm, mock) = communicator(128);
    mock.set_fail_writes(true);
    comm.queue_command(Command::new("G0 X1")).unwrap();

    let err = comm.stream_commands().unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
    assert!(!comm.is_connected());
    assert!(!mock.is_open());
    assert!(!comm.has_pending_work());
}

#[test]
fn test_realtime_bytes_bypass_queues() {
    let (comm, mock) = communicator(6);
    comm.queue_command(Command::new("G0 X1")).unwrap();
    comm.stream_commands().unwrap();

    comm.send_immediate(&[b'?']).unwrap();
    assert_eq!(mock.realtime_bytes(), vec![b'?']);
    assert_eq!(comm.active_bytes(), 6);
}

#[test]
fn test_read_lines_frames_device_output() {
    let (comm, mock) = communicator(128);
    mock.push_line("ok");
    mock.push_line("<Idle|MPos:0.000,0.000,0.000|FS:0,0>");
    assert_eq!(
        comm.read_lines().unwrap(),
        vec!["ok", "<Idle|MPos:0.000,0.000,0.000|FS:0,0>"]
    );
    assert!(comm.read_lines().unwrap().is_empty());
}

#[derive(Debug, Clone)]
enum Step {
    Queue(usize),
    Ack,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![(1usize..30).prop_map(Step::Queue), Just(Step::Ack)]
}

proptest! {
    #[test]
    fn prop_buffer_never_exceeds_capacity(steps in proptest::collection::vec(step(), 1..60)) {
        let capacity = 32;
        let (comm, mock) = communicator(capacity);
        let mut queued = Vec::new();
        let mut completed = Vec::new();

        for (i, step) in steps.into_iter().enumerate() {
            match step {
                Step::Queue(len) => {
                    let prefix = format!("G{}", i);
                    let text = format!("{}{}", prefix, "X".repeat(len.saturating_sub(prefix.len())));
                    queued.push(text.clone());
                    comm.queue_command(Command::new(text)).unwrap();
                }
                Step::Ack => {
                    if let Some(done) = comm.handle_response("ok").unwrap() {
                        completed.push(done.text().to_string());
                    }
                }
            }
            comm.stream_commands().unwrap();
            prop_assert!(comm.active_bytes() <= capacity);
        }

        // Sent and completed in queue order
        let written = mock.written_lines();
        prop_assert_eq!(&written[..], &queued[..written.len()]);
        prop_assert_eq!(&completed[..], &written[..completed.len()]);
        prop_assert_eq!(written.len() - completed.len(), comm.active_count());
    }
}
