//! Flow-controlled communicator
//!
//! Implements character-counting flow control for firmwares without a
//! hardware handshake: commands move from a buffered queue into an active
//! queue only while the bytes awaiting acknowledgment fit in the device's
//! receive buffer, and every acknowledgment retires the oldest active
//! command.
//!
//! # Locking
//! Locks are taken in the order connection, source, state. Writers hold the
//! connection lock for a whole pass, so wire order always matches
//! active-queue order. Source reads happen under the source lock alone and
//! writes under the connection lock alone, so queueing a command never waits
//! on file I/O and responses never wait on a write.

use super::Connection;
use gcodestream_core::{
    Command, CommandSource, ConnectionError, ControllerError, Error, EventDispatcher, Result,
};
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

/// How a response line acknowledges the oldest active command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Command accepted
    Ok,
    /// Command rejected
    Error,
}

/// Decides whether a line acknowledges a command
///
/// Every firmware dialect implements this; lines that return `None` leave
/// the queues untouched.
pub trait ResponseClassifier: Send + Sync {
    fn acknowledgement(&self, response: &str) -> Option<Acknowledgement>;
}

/// Configuration for the communicator
#[derive(Debug, Clone)]
pub struct CommunicatorConfig {
    /// Device receive buffer capacity in bytes
    pub buffer_size: usize,
    /// Send the next command only after the previous one is acknowledged
    pub single_step_mode: bool,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            buffer_size: 128,
            single_step_mode: false,
        }
    }
}

/// Events published by the communicator, in mutation order
#[derive(Debug, Clone)]
pub enum CommunicatorEvent {
    /// Command added to the buffered queue
    CommandQueued(Command),
    /// Command moved to the active queue and handed to the connection
    CommandSent(Command),
    /// Empty command dropped without being sent
    CommandSkipped(Command),
    /// Oldest active command retired by a response
    CommandComplete(Command),
    /// Sending paused after a rejected command
    PausedOnError(Command),
    /// Every framed line, acknowledgment or not
    RawResponse(String),
}

/// Commands handled by a single streaming pass
#[derive(Debug, Default)]
pub struct StreamProgress {
    /// Commands written to the connection
    pub sent: Vec<Command>,
    /// Empty commands dropped
    pub skipped: Vec<Command>,
}

#[derive(Default)]
struct SendState {
    buffered: VecDeque<Command>,
    active: VecDeque<Command>,
    active_bytes: usize,
    capacity: usize,
    paused: bool,
    connected: bool,
    single_step: bool,
}

impl SendState {
    fn clear(&mut self) {
        self.buffered.clear();
        self.active.clear();
        self.active_bytes = 0;
        self.paused = false;
    }
}

/// The attached command source and the one command pulled ahead of it
#[derive(Default)]
struct SourceSlot {
    source: Option<Box<dyn CommandSource>>,
    lookahead: Option<Command>,
}

impl SourceSlot {
    fn clear(&mut self) {
        self.source = None;
        self.lookahead = None;
    }

    /// Pull the next source command into the lookahead
    ///
    /// An exhausted source is detached. A source that fails to read is
    /// detached too and the error returned.
    fn fill(&mut self) -> Result<()> {
        if self.lookahead.is_some() {
            return Ok(());
        }
        let Some(source) = self.source.as_mut() else {
            return Ok(());
        };
        match source.next_command() {
            Ok(Some(command)) => self.lookahead = Some(command),
            Ok(None) => self.source = None,
            Err(e) => {
                tracing::error!("Command source failed, dropping it: {}", e);
                self.source = None;
                return Err(e);
            }
        }
        Ok(())
    }

    fn has_unsent(&mut self) -> bool {
        if self.lookahead.is_some() {
            return true;
        }
        match self.source.as_mut() {
            Some(source) => source.has_next().unwrap_or(true),
            None => false,
        }
    }
}

/// Why a picking pass stopped
enum Pick {
    /// Nothing more can be sent right now
    Done,
    /// The lookahead is spent and the source must be read
    Refill,
    /// Picking failed; commands picked before the failure still go out
    Failed(Error),
}

/// Flow-controlled transport over a [`Connection`]
pub struct Communicator {
    classifier: Arc<dyn ResponseClassifier>,
    connection: Mutex<Option<Box<dyn Connection>>>,
    source: Mutex<SourceSlot>,
    state: Mutex<SendState>,
    line_buffer: Mutex<String>,
    events: EventDispatcher<CommunicatorEvent>,
}

impl Communicator {
    pub fn new(config: CommunicatorConfig, classifier: Arc<dyn ResponseClassifier>) -> Self {
        Self {
            classifier,
            connection: Mutex::new(None),
            source: Mutex::new(SourceSlot::default()),
            state: Mutex::new(SendState {
                capacity: config.buffer_size,
                single_step: config.single_step_mode,
                ..SendState::default()
            }),
            line_buffer: Mutex::new(String::new()),
            events: EventDispatcher::new(),
        }
    }

    /// Subscribe to communicator events
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CommunicatorEvent> {
        self.events.subscribe()
    }

    /// Open `connection` and take exclusive ownership of it
    pub fn connect(&self, mut connection: Box<dyn Connection>) -> Result<()> {
        let mut conn = self.connection.lock();
        if conn.is_some() {
            return Err(ControllerError::AlreadyConnected.into());
        }

        connection.open()?;
        tracing::info!("Communicator connected to {}", connection.name());
        *conn = Some(connection);

        self.source.lock().clear();
        let mut state = self.state.lock();
        state.clear();
        state.connected = true;
        self.line_buffer.lock().clear();
        Ok(())
    }

    /// Drop all queued work and close the connection
    pub fn disconnect(&self) -> Result<()> {
        let mut conn = self.connection.lock();
        self.source.lock().clear();
        {
            let mut state = self.state.lock();
            state.clear();
            state.connected = false;
        }
        match conn.take() {
            Some(mut connection) => connection.close(),
            None => Ok(()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Append a command to the buffered queue
    ///
    /// Commands that could never fit in the receive buffer are rejected.
    pub fn queue_command(&self, command: Command) -> Result<()> {
        let mut state = self.state.lock();
        if command.wire_len() > state.capacity {
            return Err(ControllerError::BufferOverflow {
                message: format!(
                    "command of {} bytes exceeds the {} byte receive buffer",
                    command.wire_len(),
                    state.capacity
                ),
            }
            .into());
        }
        state.buffered.push_back(command.clone());
        self.events.publish(CommunicatorEvent::CommandQueued(command));
        Ok(())
    }

    /// Attach a command source drained after the buffered queue
    pub fn queue_command_source(&self, source: Box<dyn CommandSource>) -> Result<()> {
        let mut slot = self.source.lock();
        if slot.source.is_some() || slot.lookahead.is_some() {
            return Err(ControllerError::CommandRejected {
                reason: "a command source is already queued".to_string(),
            }
            .into());
        }
        slot.source = Some(source);
        Ok(())
    }

    /// Send as many commands as fit in the receive buffer
    ///
    /// Commands picked before a failure are still written, so the active
    /// queue only ever holds commands that reached the connection.
    pub fn stream_commands(&self) -> Result<StreamProgress> {
        let mut conn = self.connection.lock();
        let mut progress = StreamProgress::default();

        loop {
            let (batch, pick) = {
                let mut slot = self.source.lock();
                let mut state = self.state.lock();
                if !state.connected {
                    return Err(ConnectionError::NotOpen.into());
                }
                self.take_sendable(&mut state, &mut slot, &mut progress)
            };

            for command in &batch {
                let mut line = String::with_capacity(command.wire_len());
                line.push_str(command.text());
                line.push('\n');

                let written = match conn.as_mut() {
                    Some(connection) => connection.send_bytes(line.as_bytes()),
                    None => Err(ConnectionError::NotOpen.into()),
                };
                if let Err(e) = written {
                    tracing::error!("Failed to send {}: {}", command, e);
                    self.assume_disconnected(&mut conn, &mut self.source.lock());
                    return Err(e);
                }
                tracing::debug!("Sent: {}", command.text());
            }
            progress.sent.extend(batch);

            match pick {
                Pick::Done => break,
                Pick::Refill => self.source.lock().fill()?,
                Pick::Failed(e) => return Err(e),
            }
        }

        Ok(progress)
    }

    fn take_sendable(
        &self,
        state: &mut SendState,
        slot: &mut SourceSlot,
        progress: &mut StreamProgress,
    ) -> (Vec<Command>, Pick) {
        let mut batch = Vec::new();

        loop {
            if state.paused || (state.single_step && !state.active.is_empty()) {
                return (batch, Pick::Done);
            }

            // Manual commands always go before the source
            let from_source = state.buffered.is_empty();
            let next = if from_source {
                slot.lookahead.as_ref()
            } else {
                state.buffered.front()
            };
            let Some((wire_len, empty)) = next.map(|cmd| (cmd.wire_len(), cmd.is_empty())) else {
                let pick = if from_source && slot.source.is_some() {
                    Pick::Refill
                } else {
                    Pick::Done
                };
                return (batch, pick);
            };

            if !empty && state.active_bytes + wire_len > state.capacity {
                if state.active.is_empty() {
                    let overflow = ControllerError::BufferOverflow {
                        message: format!(
                            "command of {} bytes exceeds the {} byte receive buffer",
                            wire_len, state.capacity
                        ),
                    };
                    return (batch, Pick::Failed(overflow.into()));
                }
                return (batch, Pick::Done);
            }

            let taken = if from_source {
                slot.lookahead.take()
            } else {
                state.buffered.pop_front()
            };
            let Some(mut command) = taken else {
                return (batch, Pick::Done);
            };

            if empty {
                if let Err(e) = command.mark_skipped() {
                    return (batch, Pick::Failed(e));
                }
                self.events
                    .publish(CommunicatorEvent::CommandSkipped(command.clone()));
                progress.skipped.push(command);
                continue;
            }

            if let Err(e) = command.mark_sent() {
                return (batch, Pick::Failed(e));
            }
            state.active_bytes += command.wire_len();
            state.active.push_back(command.clone());
            self.events
                .publish(CommunicatorEvent::CommandSent(command.clone()));
            batch.push(command);

            if state.single_step {
                return (batch, Pick::Done);
            }
        }
    }

    /// Write raw bytes outside both queues, used for real-time controls
    pub fn send_immediate(&self, bytes: &[u8]) -> Result<()> {
        let mut conn = self.connection.lock();
        let written = match conn.as_mut() {
            Some(connection) if bytes.len() == 1 => connection.send_byte_immediately(bytes[0]),
            Some(connection) => connection.send_bytes(bytes),
            None => return Err(ConnectionError::NotOpen.into()),
        };
        if let Err(e) = written {
            tracing::error!("Failed to send real-time bytes {:02X?}: {}", bytes, e);
            self.assume_disconnected(&mut conn, &mut self.source.lock());
            return Err(e);
        }
        Ok(())
    }

    fn assume_disconnected(
        &self,
        conn: &mut MutexGuard<'_, Option<Box<dyn Connection>>>,
        slot: &mut SourceSlot,
    ) {
        slot.clear();
        {
            let mut state = self.state.lock();
            state.clear();
            state.connected = false;
        }
        if let Some(mut connection) = conn.take() {
            if let Err(e) = connection.close() {
                tracing::warn!("Error closing failed connection: {}", e);
            }
        }
    }

    /// Stop taking commands from the buffered queue
    pub fn pause_send(&self) {
        self.state.lock().paused = true;
    }

    /// Resume taking commands and refill the device buffer
    pub fn resume_send(&self) -> Result<StreamProgress> {
        self.state.lock().paused = false;
        self.stream_commands()
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Forget everything queued or in flight; bytes already written stay written
    pub fn cancel_send(&self) {
        self.source.lock().clear();
        self.state.lock().clear();
    }

    /// Drop only what has not been sent yet, returning how many commands
    /// are still awaiting acknowledgment
    pub fn cancel_unsent(&self) -> usize {
        self.source.lock().clear();
        let mut state = self.state.lock();
        state.buffered.clear();
        state.paused = false;
        state.active.len()
    }

    /// Retire the oldest active command if `response` acknowledges it
    ///
    /// Returns the completed command. A rejected command pauses sending
    /// unless it was the last outstanding one.
    pub fn handle_response(&self, response: &str) -> Result<Option<Command>> {
        let Some(ack) = self.classifier.acknowledgement(response) else {
            self.events
                .publish(CommunicatorEvent::RawResponse(response.to_string()));
            return Ok(None);
        };

        let completed = {
            let mut slot = self.source.lock();
            // Checked before the state lock since it may read the source
            let source_work = ack == Acknowledgement::Error && slot.has_unsent();
            let mut state = self.state.lock();
            self.events
                .publish(CommunicatorEvent::RawResponse(response.to_string()));

            let Some(mut command) = state.active.pop_front() else {
                tracing::debug!("Acknowledgment with no active command: {}", response);
                return Ok(None);
            };
            state.active_bytes = state.active_bytes.saturating_sub(command.wire_len());

            let is_error = ack == Acknowledgement::Error;
            command.complete(response, is_error)?;
            self.events
                .publish(CommunicatorEvent::CommandComplete(command.clone()));

            let work_remains =
                source_work || !state.active.is_empty() || !state.buffered.is_empty();
            if is_error && work_remains {
                state.paused = true;
                tracing::warn!("Pausing after error on {}: {}", command, response);
                self.events
                    .publish(CommunicatorEvent::PausedOnError(command.clone()));
            }
            command
        };

        completed.notify_completion();

        if !self.is_paused() && self.is_connected() {
            self.stream_commands()?;
        }
        Ok(Some(completed))
    }

    /// Read available bytes and return the complete lines among them
    pub fn read_lines(&self) -> Result<Vec<String>> {
        let bytes = {
            let mut conn = self.connection.lock();
            let received = match conn.as_mut() {
                Some(connection) => connection.receive(),
                None => return Err(ConnectionError::NotOpen.into()),
            };
            match received {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!("Failed to read from connection: {}", e);
                    self.assume_disconnected(&mut conn, &mut self.source.lock());
                    return Err(e);
                }
            }
        };
        Ok(self.frame(&bytes))
    }

    /// Append raw bytes to the line buffer and return every completed line
    ///
    /// Lines are trimmed and blank lines are dropped. A partial line stays
    /// buffered until its terminator arrives.
    pub fn frame(&self, bytes: &[u8]) -> Vec<String> {
        let mut buffer = self.line_buffer.lock();
        buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut lines = Vec::new();
        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=pos).collect();
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Commands queued but not yet sent, including a source command
    /// already pulled for sending
    pub fn buffered_count(&self) -> usize {
        let lookahead = self.source.lock().lookahead.is_some();
        self.state.lock().buffered.len() + usize::from(lookahead)
    }

    /// Commands sent and awaiting acknowledgment
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn are_active_commands(&self) -> bool {
        !self.state.lock().active.is_empty()
    }

    /// Bytes sent and not yet acknowledged
    pub fn active_bytes(&self) -> usize {
        self.state.lock().active_bytes
    }

    /// True while anything is queued, pulled from a source, or in flight
    pub fn has_pending_work(&self) -> bool {
        let mut slot = self.source.lock();
        {
            let state = self.state.lock();
            if !state.active.is_empty() || !state.buffered.is_empty() {
                return true;
            }
        }
        slot.has_unsent()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn set_buffer_capacity(&self, capacity: usize) {
        self.state.lock().capacity = capacity;
    }

    pub fn single_step_mode(&self) -> bool {
        self.state.lock().single_step
    }

    pub fn set_single_step_mode(&self, enabled: bool) {
        self.state.lock().single_step = enabled;
    }

    /// Receive buffer usage as a percentage
    pub fn buffer_usage_percent(&self) -> u32 {
        let state = self.state.lock();
        if state.capacity == 0 {
            return 0;
        }
        ((state.active_bytes as f64 / state.capacity as f64) * 100.0) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcodestream_core::{CommandCreator, CommandList};
    use std::sync::Arc;

    struct OkClassifier;

    impl ResponseClassifier for OkClassifier {
        fn acknowledgement(&self, response: &str) -> Option<Acknowledgement> {
            if response == "ok" {
                Some(Acknowledgement::Ok)
            } else if response.starts_with("error") {
                Some(Acknowledgement::Error)
            } else {
                None
            }
        }
    }

    #[derive(Clone, Default)]
    struct RecordingConnection {
        written: Arc<Mutex<Vec<String>>>,
        open: bool,
        fail_writes: bool,
    }

    impl Connection for RecordingConnection {
        fn open(&mut self) -> Result<()> {
            self.open = true;
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            self.open = false;
            Ok(())
        }
        fn is_open(&self) -> bool {
            self.open
        }
        fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
            if self.fail_writes {
                return Err(ConnectionError::ConnectionLost {
                    reason: "unplugged".to_string(),
                }
                .into());
            }
            self.written
                .lock()
                .push(String::from_utf8_lossy(data).to_string());
            Ok(())
        }
        fn receive(&mut self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        fn name(&self) -> String {
            "recording".to_string()
        }
    }

    fn connected(buffer_size: usize) -> (Communicator, Arc<Mutex<Vec<String>>>) {
        let conn = RecordingConnection::default();
        let written = conn.written.clone();
        let comm = Communicator::new(
            CommunicatorConfig {
                buffer_size,
                single_step_mode: false,
            },
            Arc::new(OkClassifier),
        );
        comm.connect(Box::new(conn)).unwrap();
        (comm, written)
    }

    #[test]
    fn test_flow_control_withholds_until_room() {
        let (comm, written) = connected(128);
        let thirty = "G1 X1.000 Y2.000 Z3.000 F10000";
        assert_eq!(thirty.len(), 30);

        comm.queue_command(Command::new(thirty)).unwrap();
        comm.queue_command(Command::new(thirty)).unwrap();
        let progress = comm.stream_commands().unwrap();
        assert_eq!(progress.sent.len(), 2);
        assert_eq!(comm.active_bytes(), 62);

        let hundred = format!("G1 X{}", "1".repeat(96));
        assert_eq!(hundred.len(), 100);
        comm.queue_command(Command::new(hundred.clone())).unwrap();
        assert!(comm.stream_commands().unwrap().sent.is_empty());
        assert_eq!(comm.buffered_count(), 1);

        // 31 + 101 still exceeds 128
        comm.handle_response("ok").unwrap();
        assert_eq!(comm.buffered_count(), 1);

        comm.handle_response("ok").unwrap();
        assert_eq!(comm.buffered_count(), 0);
        assert_eq!(comm.active_bytes(), 101);
        assert_eq!(written.lock().last().unwrap(), &format!("{}\n", hundred));
    }

    #[test]
    fn test_error_pauses_unless_last() {
        let (comm, _) = connected(128);
        comm.queue_command(Command::new("G0 X1")).unwrap();
        comm.queue_command(Command::new("G0 X2")).unwrap();
        comm.stream_commands().unwrap();

        let errored = comm.handle_response("error:20").unwrap().unwrap();
        assert!(errored.is_error());
        assert!(comm.is_paused());

        comm.resume_send().unwrap();
        let last = comm.handle_response("error:20").unwrap().unwrap();
        assert!(last.is_error());
        assert!(!comm.is_paused());
    }

    #[test]
    fn test_manual_queue_preferred_over_source() {
        let (comm, written) = connected(128);
        let creator = CommandCreator::new();
        comm.queue_command_source(Box::new(CommandList::from_lines(
            &creator,
            ["G1 X1", "G1 X2"],
        )))
        .unwrap();
        comm.queue_command(Command::new("$X")).unwrap();
        comm.stream_commands().unwrap();

        let written = written.lock();
        assert_eq!(written.as_slice(), ["$X\n", "G1 X1\n", "G1 X2\n"]);
    }

    #[test]
    fn test_empty_commands_skipped() {
        let (comm, written) = connected(128);
        comm.queue_command(Command::new("; comment")).unwrap();
        comm.queue_command(Command::new("G0 X0")).unwrap();
        let progress = comm.stream_commands().unwrap();
        assert_eq!(progress.skipped.len(), 1);
        assert!(progress.skipped[0].is_skipped());
        assert_eq!(written.lock().as_slice(), ["G0 X0\n"]);
    }

    #[test]
    fn test_single_step_mode() {
        let (comm, _) = connected(128);
        comm.set_single_step_mode(true);
        comm.queue_command(Command::new("G0 X1")).unwrap();
        comm.queue_command(Command::new("G0 X2")).unwrap();
        assert_eq!(comm.stream_commands().unwrap().sent.len(), 1);
        assert_eq!(comm.stream_commands().unwrap().sent.len(), 0);
        comm.handle_response("ok").unwrap();
        assert_eq!(comm.active_count(), 1);
        assert_eq!(comm.buffered_count(), 0);
    }

    #[test]
    fn test_oversized_command_rejected() {
        let (comm, _) = connected(16);
        let err = comm
            .queue_command(Command::new("G1 X100 Y100 Z100"))
            .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_write_failure_assumes_disconnected() {
        let conn = RecordingConnection {
            fail_writes: true,
            ..RecordingConnection::default()
        };
        let comm = Communicator::new(CommunicatorConfig::default(), Arc::new(OkClassifier));
        comm.connect(Box::new(conn)).unwrap();
        comm.queue_command(Command::new("G0 X1")).unwrap();

        assert!(comm.stream_commands().is_err());
        assert!(!comm.is_connected());
        assert_eq!(comm.active_count(), 0);
        assert_eq!(comm.buffered_count(), 0);
        assert_eq!(comm.active_bytes(), 0);
        assert!(comm.send_immediate(b"?").is_err());
    }

    #[test]
    fn test_framing_across_reads() {
        let (comm, _) = connected(128);
        assert!(comm.frame(b"o").is_empty());
        assert_eq!(comm.frame(b"k\r\n<Idle|MPos:0,0,0"), vec!["ok"]);
        assert_eq!(comm.frame(b">\n\n"), vec!["<Idle|MPos:0,0,0>"]);
    }

    #[test]
    fn test_events_in_order() {
        let (comm, _) = connected(128);
        let mut rx = comm.subscribe();
        comm.queue_command(Command::new("G0 X1")).unwrap();
        comm.stream_commands().unwrap();
        comm.handle_response("ok").unwrap();

        assert!(matches!(rx.try_recv(), Ok(CommunicatorEvent::CommandQueued(_))));
        assert!(matches!(rx.try_recv(), Ok(CommunicatorEvent::CommandSent(_))));
        assert!(matches!(rx.try_recv(), Ok(CommunicatorEvent::RawResponse(_))));
        match rx.try_recv() {
            Ok(CommunicatorEvent::CommandComplete(cmd)) => assert_eq!(cmd.response(), Some("ok")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    /// Records whether the queue state was free each time it was read
    struct WatchingSource {
        comm: std::sync::Weak<Communicator>,
        lines: VecDeque<&'static str>,
        state_free: Arc<Mutex<Vec<bool>>>,
    }

    impl WatchingSource {
        fn observe(&self) {
            if let Some(comm) = self.comm.upgrade() {
                self.state_free.lock().push(comm.state.try_lock().is_some());
            }
        }
    }

    impl CommandSource for WatchingSource {
        fn next_command(&mut self) -> Result<Option<Command>> {
            self.observe();
            Ok(self.lines.pop_front().map(Command::new))
        }
        fn has_next(&mut self) -> Result<bool> {
            self.observe();
            Ok(!self.lines.is_empty())
        }
        fn total_rows(&self) -> Option<usize> {
            None
        }
        fn rows_remaining(&self) -> Option<usize> {
            None
        }
        fn restart(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_source_read_outside_state_lock() {
        let (comm, written) = connected(128);
        let comm = Arc::new(comm);
        comm.set_single_step_mode(true);
        let state_free = Arc::new(Mutex::new(Vec::new()));
        comm.queue_command_source(Box::new(WatchingSource {
            comm: Arc::downgrade(&comm),
            lines: VecDeque::from(["G0 X1", "G0 X2"]),
            state_free: state_free.clone(),
        }))
        .unwrap();

        comm.stream_commands().unwrap();
        // Deciding whether to pause asks the source for more work
        comm.handle_response("error:1").unwrap();
        assert!(comm.is_paused());

        comm.resume_send().unwrap();
        comm.handle_response("ok").unwrap();
        assert!(!comm.has_pending_work());

        assert_eq!(written.lock().as_slice(), ["G0 X1\n", "G0 X2\n"]);
        let observed = state_free.lock();
        assert!(!observed.is_empty());
        assert!(observed.iter().all(|free| *free));
    }

    #[test]
    fn test_double_connect_rejected() {
        let (comm, _) = connected(128);
        assert!(comm
            .connect(Box::new(RecordingConnection::default()))
            .is_err());
        comm.disconnect().unwrap();
        assert!(!comm.is_connected());
        assert!(comm.stream_commands().is_err());
    }
}
