//! Controller orchestration
//!
//! The [`Controller`] owns a [`Communicator`], routes every received line
//! through its firmware dialect, keeps device state, and runs streaming
//! sessions. Communicator events are drained into controller bookkeeping
//! after each interaction so counters and observers see them in order.

pub mod initializer;
pub mod poll_timer;
pub mod stopwatch;

pub use initializer::Initializer;
pub use poll_timer::{PollCallback, StatusPollTimer};
pub use stopwatch::Stopwatch;

use crate::communication::{
    Acknowledgement, Communicator, CommunicatorConfig, CommunicatorEvent, Connection,
    ResponseClassifier,
};
use crate::firmware::{
    dialect_for, Capabilities, Capability, CommandKind, ControlSignal, ControllerType,
    DeviceResponse, FirmwareDialect, FirmwareVersion, OverrideAction, RealtimeCommand,
};
use gcodestream_core::{
    control_state, deliver, Command, CommandCreator, CommandSource, ConsoleMessage,
    ControlState, ControllerError, ControllerEvent, ControllerListener,
    ControllerListenerHandle, ControllerState, ControllerStatus, Error, EventDispatcher,
    MessageLevel, Position, Result, Units, UNKNOWN_ROWS,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Unanswered status polls tolerated before polling resumes regardless
pub const MAX_OUTSTANDING_POLLS: u32 = 20;

/// Status observations made while waiting for a cancel to settle
pub const CANCEL_STATUS_ATTEMPTS: u32 = 50;

const READER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Firmware dialect to speak
    pub controller_type: ControllerType,
    /// Receive buffer size; the dialect default when `None`
    pub buffer_size: Option<usize>,
    /// Send one command at a time
    pub single_step_mode: bool,
    /// Status poll interval in milliseconds
    pub status_poll_interval_ms: u64,
    /// Poll for status reports after the handshake
    pub status_updates_enabled: bool,
    /// How long to wait for each status reply
    pub status_timeout_ms: u64,
    /// How long to wait for a handshake command to complete
    pub command_timeout_ms: u64,
    /// Skip the reader task and the handshake; lines arrive through
    /// [`Controller::handle_line`]
    pub test_mode: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_type: ControllerType::Grbl,
            buffer_size: None,
            single_step_mode: false,
            status_poll_interval_ms: 200,
            status_updates_enabled: true,
            status_timeout_ms: 1000,
            command_timeout_ms: 5000,
            test_mode: false,
        }
    }
}

impl ControllerConfig {
    pub fn new(controller_type: ControllerType) -> Self {
        Self {
            controller_type,
            ..Self::default()
        }
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Result of [`Controller::cancel_send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CancelOutcome {
    /// Commands already on the device that could not be retracted
    pub unretracted: usize,
    /// Whether a held device had to be soft reset
    pub soft_reset: bool,
}

// Adapts the dialect to the communicator's acknowledgment hook.
struct DialectClassifier(Arc<dyn FirmwareDialect>);

impl ResponseClassifier for DialectClassifier {
    fn acknowledgement(&self, response: &str) -> Option<Acknowledgement> {
        self.0.acknowledgement(response)
    }
}

/// Work held back until the next stream begins
#[derive(Default)]
struct PendingWork {
    commands: Vec<Command>,
    source: Option<Box<dyn CommandSource>>,
}

impl PendingWork {
    fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.source.is_none()
    }

    fn row_count(&self) -> i64 {
        let source_rows = match &self.source {
            Some(source) => source.total_rows(),
            None => Some(0),
        };
        match source_rows {
            Some(rows) => (self.commands.len() + rows) as i64,
            None => UNKNOWN_ROWS,
        }
    }
}

#[derive(Default)]
struct SessionState {
    connected: bool,
    ready: bool,
    status: ControllerStatus,
    control_state: ControlState,
    version: Option<FirmwareVersion>,
    capabilities: Capabilities,
    settings: BTreeMap<String, String>,
    parser_state: Option<String>,
    units: Units,
    outstanding_polls: u32,
    pending: PendingWork,
    streaming: bool,
    cancelled: bool,
    rows_in_send: i64,
    rows_sent: i64,
    rows_completed: i64,
    error_count: usize,
    stopwatch: Stopwatch,
}

struct ReaderTask {
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Streaming controller for one device
pub struct Controller {
    config: ControllerConfig,
    dialect: Arc<dyn FirmwareDialect>,
    comm: Communicator,
    comm_events: Mutex<mpsc::UnboundedReceiver<CommunicatorEvent>>,
    creator: CommandCreator,
    session: Mutex<SessionState>,
    events: EventDispatcher<ControllerEvent>,
    initializer: Initializer,
    poll_timer: StatusPollTimer,
    reader: Mutex<Option<ReaderTask>>,
    listeners: Mutex<HashMap<ControllerListenerHandle, JoinHandle<()>>>,
    self_ref: Weak<Controller>,
}

impl Controller {
    /// Create a controller for the configured firmware
    pub fn new(config: ControllerConfig) -> Arc<Self> {
        let dialect = dialect_for(config.controller_type);
        Self::with_dialect(config, dialect)
    }

    /// Create a controller around an explicit dialect
    pub fn with_dialect(config: ControllerConfig, dialect: Arc<dyn FirmwareDialect>) -> Arc<Self> {
        let comm = Communicator::new(
            CommunicatorConfig {
                buffer_size: config
                    .buffer_size
                    .unwrap_or_else(|| dialect.receive_buffer_size()),
                single_step_mode: config.single_step_mode,
            },
            Arc::new(DialectClassifier(Arc::clone(&dialect))),
        );
        let comm_events = comm.subscribe();
        let capabilities = dialect.capabilities(None);

        Arc::new_cyclic(|weak: &Weak<Controller>| {
            let poller = weak.clone();
            let poll_timer = StatusPollTimer::new(
                Duration::from_millis(config.status_poll_interval_ms),
                Arc::new(move || {
                    if let Some(controller) = poller.upgrade() {
                        if let Err(e) = controller.request_status_report() {
                            tracing::debug!("Status poll failed: {}", e);
                        }
                    }
                }),
            );

            Self {
                dialect,
                comm,
                comm_events: Mutex::new(comm_events),
                creator: CommandCreator::new(),
                session: Mutex::new(SessionState {
                    capabilities,
                    ..SessionState::default()
                }),
                events: EventDispatcher::new(),
                initializer: Initializer::new(),
                poll_timer,
                reader: Mutex::new(None),
                listeners: Mutex::new(HashMap::new()),
                self_ref: weak.clone(),
                config,
            }
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn controller_type(&self) -> ControllerType {
        self.dialect.controller_type()
    }

    pub fn dialect(&self) -> &Arc<dyn FirmwareDialect> {
        &self.dialect
    }

    /// The flow-controlled transport underneath this controller
    pub fn communicator(&self) -> &Communicator {
        &self.comm
    }

    pub fn poll_timer(&self) -> &StatusPollTimer {
        &self.poll_timer
    }

    /// Raw controller event channel
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Drive `listener` from its own task until removed
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_listener(&self, listener: Arc<dyn ControllerListener>) -> ControllerListenerHandle {
        let handle = ControllerListenerHandle::new();
        let mut rx = self.events.subscribe();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                deliver(listener.as_ref(), &event).await;
            }
        });
        self.listeners.lock().insert(handle.clone(), task);
        handle
    }

    pub fn remove_listener(&self, handle: &ControllerListenerHandle) -> bool {
        match self.listeners.lock().remove(handle) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Create a numbered command
    pub fn create_command(&self, text: impl Into<String>) -> Command {
        self.creator.create(text)
    }

    // ---- connection ----

    /// Connect and run the handshake
    ///
    /// In test mode the reader task and the handshake are skipped and the
    /// controller is ready as soon as the connection opens.
    pub async fn open_connection(&self, connection: Box<dyn Connection>) -> Result<()> {
        if self.is_connected() {
            return Err(ControllerError::AlreadyConnected.into());
        }

        let name = connection.name();
        self.comm.connect(connection)?;
        self.pump();

        {
            let mut session = self.session.lock();
            *session = SessionState {
                connected: true,
                ready: self.config.test_mode,
                capabilities: self.dialect.capabilities(None),
                ..SessionState::default()
            };
            self.events.publish(ControllerEvent::Connected(name.clone()));
        }
        tracing::info!("Connected to {} ({})", name, self.controller_type());
        self.refresh_control_state();

        if self.config.test_mode {
            return Ok(());
        }

        self.start_reader();
        match self.initializer.initialize(self).await {
            Ok(_) => {
                self.session.lock().ready = true;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Controller initialization failed: {}", e);
                if let Err(close_err) = self.close_connection() {
                    tracing::warn!("Error closing after failed initialization: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Stop polling and reading, then close the connection
    pub fn close_connection(&self) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }
        self.poll_timer.stop();
        self.stop_reader();

        let result = self.comm.disconnect();
        self.pump();
        self.mark_disconnected();
        tracing::info!("Connection closed");
        result
    }

    /// Run the handshake on an open connection
    ///
    /// Returns `false` when it already ran for this connection.
    pub async fn initialize(&self) -> Result<bool> {
        let initialized = self.initializer.initialize(self).await?;
        if initialized {
            self.session.lock().ready = true;
        }
        Ok(initialized)
    }

    pub fn is_connected(&self) -> bool {
        self.session.lock().connected
    }

    /// Connected and past the handshake
    pub fn is_ready(&self) -> bool {
        let session = self.session.lock();
        session.connected && session.ready
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ControllerError::NotConnected.into())
        }
    }

    fn mark_disconnected(&self) {
        self.finish_stream(false);
        {
            let mut session = self.session.lock();
            session.connected = false;
            session.ready = false;
            session.outstanding_polls = 0;
            session.pending = PendingWork::default();
            session.status = session.status.replace_state(ControllerState::Disconnected);
            self.events
                .publish(ControllerEvent::StatusUpdated(session.status.clone()));
            self.events.publish(ControllerEvent::Disconnected);
        }
        self.initializer.reset();
        self.refresh_control_state();
    }

    fn start_reader(&self) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let weak = self.self_ref.clone();

        let handle = tokio::spawn(async move {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                let Some(controller) = weak.upgrade() else {
                    break;
                };

                match controller.comm.read_lines() {
                    Ok(lines) => {
                        let mut link_lost = false;
                        for line in lines {
                            match controller.handle_line(&line) {
                                Ok(()) => {}
                                Err(e) if !controller.comm.is_connected() => {
                                    tracing::error!("Connection lost while handling '{}': {}", line, e);
                                    link_lost = true;
                                    break;
                                }
                                Err(e) => tracing::warn!("Error handling '{}': {}", line, e),
                            }
                        }
                        if link_lost {
                            controller.poll_timer.stop();
                            controller.mark_disconnected();
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Connection lost: {}", e);
                        controller.poll_timer.stop();
                        controller.pump();
                        controller.mark_disconnected();
                        break;
                    }
                }
                drop(controller);

                tokio::time::sleep(READER_POLL_INTERVAL).await;
            }
        });

        *self.reader.lock() = Some(ReaderTask {
            shutdown: shutdown_tx,
            handle,
        });
    }

    fn stop_reader(&self) {
        if let Some(task) = self.reader.lock().take() {
            let _ = task.shutdown.try_send(());
            task.handle.abort();
        }
    }

    // ---- queueing and streaming ----

    /// Queue a command for the next stream
    ///
    /// While a stream runs the command joins it and is sent as room allows.
    /// Otherwise it is held until [`Controller::begin_streaming`].
    pub fn queue_command(&self, command: Command) -> Result<()> {
        self.ensure_connected()?;
        let capacity = self.comm.buffer_capacity();
        if command.wire_len() > capacity {
            return Err(ControllerError::BufferOverflow {
                message: format!(
                    "command of {} bytes exceeds the {} byte receive buffer",
                    command.wire_len(),
                    capacity
                ),
            }
            .into());
        }

        {
            let mut session = self.session.lock();
            if !session.streaming {
                session.pending.commands.push(command.clone());
                self.events.publish(ControllerEvent::CommandQueued(command));
                return Ok(());
            }
            if session.rows_in_send >= 0 {
                session.rows_in_send += 1;
            }
            self.events
                .publish(ControllerEvent::CommandQueued(command.clone()));
        }

        self.comm.queue_command(command)?;
        let sent = self.comm.stream_commands();
        self.pump();
        sent.map(|_| ())
    }

    /// Queue a command source for the next stream
    pub fn queue_command_source(&self, source: Box<dyn CommandSource>) -> Result<()> {
        self.ensure_connected()?;
        let total = source.total_rows();

        let source = {
            let mut session = self.session.lock();
            if !session.streaming {
                if session.pending.source.is_some() {
                    return Err(ControllerError::CommandRejected {
                        reason: "a command source is already queued".to_string(),
                    }
                    .into());
                }
                session.pending.source = Some(source);
                return Ok(());
            }
            source
        };

        self.comm.queue_command_source(source)?;
        {
            let mut session = self.session.lock();
            session.rows_in_send = match total {
                Some(rows) if session.rows_in_send >= 0 => session.rows_in_send + rows as i64,
                _ => UNKNOWN_ROWS,
            };
        }
        let sent = self.comm.stream_commands();
        self.pump();
        sent.map(|_| ())
    }

    /// Start sending everything queued
    pub fn begin_streaming(&self) -> Result<()> {
        {
            let session = self.session.lock();
            if !session.connected {
                return Err(ControllerError::NotConnected.into());
            }
            if !session.ready {
                return Err(ControllerError::NotReady {
                    reason: "connection handshake has not completed".to_string(),
                }
                .into());
            }
            if session.streaming {
                return Err(ControllerError::AlreadyStreaming.into());
            }
            if session.status.state == ControllerState::Alarm {
                return Err(ControllerError::Alarm {
                    message: "clear the alarm before streaming".to_string(),
                }
                .into());
            }
            if session.pending.is_empty() {
                return Err(ControllerError::NothingQueued.into());
            }
        }

        let active = self.comm.active_count();
        if active > 0 {
            return Err(ControllerError::ActiveCommands { count: active }.into());
        }

        let (pending, rows) = {
            let mut session = self.session.lock();
            let pending = std::mem::take(&mut session.pending);
            let rows = pending.row_count();
            session.streaming = true;
            session.cancelled = false;
            session.rows_in_send = rows;
            session.rows_sent = 0;
            session.rows_completed = 0;
            session.error_count = 0;
            session.stopwatch.reset();
            self.events.publish(ControllerEvent::StreamStarted);
            (pending, rows)
        };
        tracing::info!("Streaming started ({} rows)", rows);
        self.refresh_control_state();

        let sent = self.hand_over(pending).and_then(|_| self.comm.resume_send());
        self.pump();
        if let Err(e) = sent {
            self.comm.cancel_unsent();
            self.finish_stream(false);
            return Err(e);
        }
        // An empty source retires nothing
        self.check_stream_finished();
        Ok(())
    }

    fn hand_over(&self, pending: PendingWork) -> Result<()> {
        for command in pending.commands {
            self.comm.queue_command(command)?;
        }
        if let Some(source) = pending.source {
            self.comm.queue_command_source(source)?;
        }
        Ok(())
    }

    /// Hold the machine and stop sending
    pub fn pause_streaming(&self) -> Result<()> {
        self.ensure_connected()?;
        tracing::info!("Pausing stream");
        if let Some(byte) = self.realtime_byte(RealtimeCommand::Pause) {
            self.comm.send_immediate(&[byte])?;
        }
        self.comm.pause_send();
        self.session.lock().stopwatch.suspend();
        self.refresh_control_state();
        Ok(())
    }

    /// Release a hold and continue sending
    pub fn resume_streaming(&self) -> Result<()> {
        self.ensure_connected()?;
        tracing::info!("Resuming stream");
        if let Some(byte) = self.realtime_byte(RealtimeCommand::Resume) {
            self.comm.send_immediate(&[byte])?;
        }
        self.session.lock().stopwatch.resume();

        let sent = self.comm.resume_send();
        self.pump();
        sent?;
        self.check_stream_finished();
        self.refresh_control_state();
        Ok(())
    }

    /// Abort the current send
    ///
    /// With real-time support the device is paused (or its jog cancelled),
    /// every queue is cleared, and status reports are watched until the
    /// machine settles, soft resetting a device stuck in a hold. Without
    /// real-time support only unsent commands are dropped; the outcome
    /// reports how many were already on the device.
    pub async fn cancel_send(&self) -> Result<CancelOutcome> {
        self.ensure_connected()?;

        if !self.capabilities().has_capability(Capability::RealTime) {
            let unretracted = self.comm.cancel_unsent();
            {
                let mut session = self.session.lock();
                session.pending = PendingWork::default();
                session.cancelled = true;
            }
            self.pump();
            if unretracted == 0 {
                self.finish_stream(false);
            } else {
                tracing::warn!(
                    "Cancel cannot retract {} commands already sent to the device",
                    unretracted
                );
            }
            self.refresh_control_state();
            return Ok(CancelOutcome {
                unretracted,
                soft_reset: false,
            });
        }

        let mut events = self.subscribe();
        let jogging = self.status().state == ControllerState::Jog;
        let jog_cancel = if jogging {
            self.realtime_byte(RealtimeCommand::JogCancel)
        } else {
            None
        };
        if let Some(byte) = jog_cancel.or_else(|| self.realtime_byte(RealtimeCommand::Pause)) {
            self.comm.send_immediate(&[byte])?;
        }

        self.comm.cancel_send();
        self.session.lock().pending = PendingWork::default();
        self.pump();
        self.finish_stream(false);

        let soft_reset = self.settle_after_cancel(&mut events).await?;
        Ok(CancelOutcome {
            unretracted: 0,
            soft_reset,
        })
    }

    async fn settle_after_cancel(
        &self,
        events: &mut mpsc::UnboundedReceiver<ControllerEvent>,
    ) -> Result<bool> {
        let timeout = self.config.status_timeout();
        let mut held_at: Option<Position> = None;

        for _ in 0..CANCEL_STATUS_ATTEMPTS {
            if !self.is_connected() {
                return Ok(false);
            }
            self.poll_status(true, false)?;
            let Some(status) = next_status(events, timeout).await else {
                continue;
            };

            match status.state {
                ControllerState::Idle | ControllerState::Check => return Ok(false),
                ControllerState::Hold | ControllerState::Door => {
                    if held_at == Some(status.machine_position) {
                        tracing::info!("Machine held after cancel, issuing soft reset");
                        self.issue_soft_reset()?;
                        return Ok(true);
                    }
                    held_at = Some(status.machine_position);
                }
                ControllerState::Jog => {
                    if let Some(byte) = self.realtime_byte(RealtimeCommand::JogCancel) {
                        self.comm.send_immediate(&[byte])?;
                    }
                }
                _ => {}
            }
        }

        tracing::warn!(
            "Machine did not settle within {} status reports after cancel",
            CANCEL_STATUS_ATTEMPTS
        );
        Ok(false)
    }

    // ---- direct commands ----

    /// Queue one command ahead of any stream and send it right away
    pub fn send_command_immediately(&self, text: &str) -> Result<Command> {
        self.ensure_connected()?;
        let command = self.creator.create(text);
        self.comm.queue_command(command.clone())?;
        {
            let mut session = self.session.lock();
            if session.streaming && session.rows_in_send >= 0 {
                session.rows_in_send += 1;
            }
            self.events
                .publish(ControllerEvent::CommandQueued(command.clone()));
        }
        let sent = self.comm.stream_commands();
        self.pump();
        sent?;
        Ok(command)
    }

    /// Command text for a vocabulary entry at the detected version
    pub fn command_text(&self, kind: CommandKind) -> Option<String> {
        let version = self.firmware_version();
        self.dialect.command(kind, version.as_ref())
    }

    fn send_vocabulary(&self, kind: CommandKind, feature: &str) -> Result<Command> {
        self.ensure_connected()?;
        let text = self
            .command_text(kind)
            .ok_or_else(|| Error::unsupported(self.controller_type().to_string(), feature))?;
        self.send_command_immediately(&text)
    }

    pub fn perform_homing_cycle(&self) -> Result<()> {
        self.send_vocabulary(CommandKind::Homing, "homing cycle")
            .map(|_| ())
    }

    pub fn kill_alarm_lock(&self) -> Result<()> {
        self.send_vocabulary(CommandKind::KillAlarmLock, "kill alarm lock")
            .map(|_| ())
    }

    pub fn toggle_check_mode(&self) -> Result<()> {
        self.send_vocabulary(CommandKind::ToggleCheckMode, "check mode")
            .map(|_| ())
    }

    pub fn view_parser_state(&self) -> Result<()> {
        self.send_vocabulary(CommandKind::ViewParserState, "parser state")
            .map(|_| ())
    }

    pub fn reset_coordinates_to_zero(&self) -> Result<()> {
        self.send_vocabulary(CommandKind::ResetCoordinatesToZero, "coordinate reset")
            .map(|_| ())
    }

    /// Move back to the work origin, lifting Z first when below it
    pub fn return_to_home(&self) -> Result<()> {
        self.ensure_connected()?;
        let (version, capabilities, z) = {
            let session = self.session.lock();
            (
                session.version.clone(),
                session.capabilities.clone(),
                session.status.work_position.z,
            )
        };
        let commands = if capabilities.has_capability(Capability::ReturnToZero) {
            self.dialect.return_to_home(version.as_ref(), z)
        } else {
            Vec::new()
        };
        if commands.is_empty() {
            return Err(Error::unsupported(
                self.controller_type().to_string(),
                "return to home",
            ));
        }
        for command in commands {
            self.send_command_immediately(&command)?;
        }
        Ok(())
    }

    /// Reset the device and forget everything queued
    ///
    /// No-op while disconnected. The reset byte is only sent when the
    /// firmware supports it; local queues are cleared either way.
    pub fn issue_soft_reset(&self) -> Result<()> {
        self.soft_reset(false)
    }

    pub(crate) fn soft_reset(&self, assume_realtime: bool) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }

        let capabilities = self.effective_capabilities(assume_realtime);
        let written = match self.dialect.realtime(RealtimeCommand::SoftReset, &capabilities) {
            Some(byte) => {
                tracing::info!("Issuing soft reset");
                self.comm.send_immediate(&[byte])
            }
            None => Ok(()),
        };

        self.comm.cancel_send();
        self.pump();
        {
            let mut session = self.session.lock();
            session.pending = PendingWork::default();
            session.outstanding_polls = 0;
            if let Some(state) = self.dialect.state_after_reset() {
                session.status = session.status.replace_state(state);
                self.events
                    .publish(ControllerEvent::StatusUpdated(session.status.clone()));
            }
        }
        self.finish_stream(false);
        self.refresh_control_state();
        written
    }

    /// Apply a feed, rapid or spindle override
    pub fn send_override(&self, action: OverrideAction) -> Result<()> {
        self.ensure_connected()?;
        let (current, capabilities) = {
            let session = self.session.lock();
            (session.status.overrides, session.capabilities.clone())
        };
        let signal = self
            .dialect
            .override_command(action, &current, &capabilities)
            .ok_or_else(|| {
                Error::unsupported(
                    self.controller_type().to_string(),
                    format!("{:?} override", action),
                )
            })?;
        self.send_signal(signal)
    }

    fn send_signal(&self, signal: ControlSignal) -> Result<()> {
        match signal {
            ControlSignal::Byte(byte) => self.comm.send_immediate(&[byte]),
            ControlSignal::Line(text) => self.send_command_immediately(&text).map(|_| ()),
        }
    }

    fn realtime_byte(&self, command: RealtimeCommand) -> Option<u8> {
        let capabilities = self.capabilities();
        self.dialect.realtime(command, &capabilities)
    }

    // Before the version is known the handshake treats the device as
    // real-time capable so it can probe and reset it.
    fn effective_capabilities(&self, assume_realtime: bool) -> Capabilities {
        let mut capabilities = self.capabilities();
        if assume_realtime {
            capabilities.set_capability(Capability::RealTime, true);
        }
        capabilities
    }

    /// Ask the device for a status report
    ///
    /// Skipped while an earlier request is unanswered; after
    /// [`MAX_OUTSTANDING_POLLS`] skipped polls the next one goes out.
    pub fn request_status_report(&self) -> Result<()> {
        self.poll_status(false, false)
    }

    pub(crate) fn poll_status(&self, force: bool, assume_realtime: bool) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }
        let capabilities = self.effective_capabilities(assume_realtime);
        let Some(signal) = self.dialect.status_request(&capabilities) else {
            return Ok(());
        };

        {
            let mut session = self.session.lock();
            if !force && session.outstanding_polls > 0 {
                session.outstanding_polls += 1;
                if session.outstanding_polls >= MAX_OUTSTANDING_POLLS {
                    tracing::debug!(
                        "No status reply after {} polls, polling again",
                        MAX_OUTSTANDING_POLLS
                    );
                    session.outstanding_polls = 0;
                }
                return Ok(());
            }
            session.outstanding_polls = 1;
        }
        self.send_signal(signal)
    }

    // ---- inbound ----

    /// Route one received line through the dialect
    pub fn handle_line(&self, line: &str) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let result = match self.dialect.classify(line) {
            response @ (DeviceResponse::Ok | DeviceResponse::Error { .. }) => {
                self.handle_acknowledgement(line, response)
            }
            DeviceResponse::Alarm { code, description } => {
                self.handle_alarm(line, code, description)
            }
            DeviceResponse::Status => {
                self.handle_status(line);
                Ok(())
            }
            DeviceResponse::Welcome(version) => {
                self.handle_welcome(version);
                Ok(())
            }
            DeviceResponse::Version(version) => {
                self.update_version(version);
                Ok(())
            }
            DeviceResponse::Setting { key, value } => {
                self.store_setting(key, value);
                Ok(())
            }
            DeviceResponse::ParserState(state) => {
                self.console(MessageLevel::Verbose, format!("[{}]", state));
                self.session.lock().parser_state = Some(state);
                Ok(())
            }
            DeviceResponse::Ready => {
                self.handle_ready(line);
                Ok(())
            }
            DeviceResponse::Message(text) => {
                self.console(MessageLevel::Info, text);
                Ok(())
            }
            DeviceResponse::Unknown => {
                tracing::warn!("Unexpected response: {}", line);
                Ok(())
            }
        };

        self.pump();
        result
    }

    fn handle_acknowledgement(&self, line: &str, response: DeviceResponse) -> Result<()> {
        // TinyG acknowledgments can carry a version or a status report
        if let Some(version) = self.dialect.parse_version(line) {
            self.update_version(version);
        }
        let (previous, units) = {
            let session = self.session.lock();
            (session.status.clone(), session.units)
        };
        if let Some(status) = self.dialect.parse_status(line, Some(&previous), units) {
            self.apply_status(status);
        }

        if let DeviceResponse::Error { message } = response {
            tracing::warn!("Device error: {}", message);
            self.console(MessageLevel::Error, message);
        }

        self.comm.handle_response(line).map(|_| ())
    }

    fn handle_alarm(&self, line: &str, code: u32, description: String) -> Result<()> {
        tracing::warn!("Alarm {}: {}", code, description);
        {
            let mut session = self.session.lock();
            session.status = session.status.replace_state(ControllerState::Alarm);
            self.events
                .publish(ControllerEvent::StatusUpdated(session.status.clone()));
            self.events.publish(ControllerEvent::Alarm {
                code,
                description: description.clone(),
            });
        }
        self.console(
            MessageLevel::Error,
            format!("ALARM:{} ({})", code, description),
        );
        self.refresh_control_state();
        self.comm.handle_response(line).map(|_| ())
    }

    fn handle_status(&self, line: &str) {
        let (previous, units) = {
            let session = self.session.lock();
            (session.status.clone(), session.units)
        };
        match self.dialect.parse_status(line, Some(&previous), units) {
            Some(status) => self.apply_status(status),
            None => tracing::warn!("Unparsable status report: {}", line),
        }
    }

    fn apply_status(&self, status: ControllerStatus) {
        {
            let mut session = self.session.lock();
            session.outstanding_polls = 0;
            session.status = status.clone();
            self.events.publish(ControllerEvent::StatusUpdated(status));
        }
        self.refresh_control_state();
    }

    fn handle_welcome(&self, version: FirmwareVersion) {
        tracing::info!("Device reset detected: {}", version.raw);
        self.comm.cancel_send();
        self.pump();
        {
            let mut session = self.session.lock();
            session.pending = PendingWork::default();
            session.outstanding_polls = 0;
        }
        self.console(MessageLevel::Info, version.raw.clone());
        self.update_version(version);
        self.finish_stream(false);
    }

    fn handle_ready(&self, line: &str) {
        tracing::info!("Device ready: {}", line);
        let status = {
            let session = self.session.lock();
            matches!(
                session.status.state,
                ControllerState::Unknown | ControllerState::Disconnected
            )
            .then(|| session.status.replace_state(ControllerState::Idle))
        };
        if let Some(status) = status {
            self.apply_status(status);
        }
        self.console(MessageLevel::Info, line.to_string());
    }

    fn update_version(&self, version: FirmwareVersion) {
        let capabilities = self.dialect.capabilities(Some(&version));
        tracing::info!(
            "Detected {} firmware {} with {}",
            self.controller_type(),
            version,
            capabilities
        );
        let mut session = self.session.lock();
        self.events.publish(ControllerEvent::FirmwareDetected {
            version: version.raw.clone(),
        });
        session.version = Some(version);
        session.capabilities = capabilities;
    }

    fn store_setting(&self, key: String, value: String) {
        let mut session = self.session.lock();
        // $13 selects inch reporting on GRBL
        if key == "$13" {
            session.units = if value.trim() == "1" {
                Units::INCH
            } else {
                Units::MM
            };
        }
        session.settings.insert(key, value);
    }

    fn console(&self, level: MessageLevel, text: impl Into<String>) {
        self.events
            .publish(ControllerEvent::ConsoleMessage(ConsoleMessage::new(level, text)));
    }

    // ---- communicator event bookkeeping ----

    /// Drain communicator events into counters and controller events
    ///
    /// The end of a stream is judged only after every pending event is
    /// counted.
    fn pump(&self) {
        let mut rx = self.comm_events.lock();
        let mut retired = false;
        while let Ok(event) = rx.try_recv() {
            retired |= self.apply_comm_event(event);
        }
        if retired {
            self.check_stream_finished();
        }
    }

    /// Returns whether the event retired a command
    fn apply_comm_event(&self, event: CommunicatorEvent) -> bool {
        match event {
            // Published by the controller when the command is queued here
            CommunicatorEvent::CommandQueued(_) => false,
            CommunicatorEvent::CommandSent(command) => {
                let mut session = self.session.lock();
                if session.streaming {
                    session.rows_sent += 1;
                    session.stopwatch.start();
                }
                self.events.publish(ControllerEvent::CommandSent(command));
                false
            }
            CommunicatorEvent::CommandSkipped(command) => {
                let mut session = self.session.lock();
                if session.streaming {
                    session.rows_completed += 1;
                }
                self.events.publish(ControllerEvent::CommandSkipped(command));
                true
            }
            CommunicatorEvent::CommandComplete(command) => {
                let mut session = self.session.lock();
                if session.streaming {
                    session.rows_completed += 1;
                    if command.is_error() {
                        session.error_count += 1;
                    }
                }
                self.events
                    .publish(ControllerEvent::CommandComplete(command));
                true
            }
            CommunicatorEvent::PausedOnError(command) => {
                {
                    let mut session = self.session.lock();
                    session.stopwatch.suspend();
                    self.events
                        .publish(ControllerEvent::PausedOnError(command.clone()));
                }
                self.console(
                    MessageLevel::Error,
                    format!("Sending paused after error on '{}'", command.text()),
                );
                self.refresh_control_state();
                false
            }
            CommunicatorEvent::RawResponse(_) => false,
        }
    }

    fn check_stream_finished(&self) {
        let done = {
            let session = self.session.lock();
            session.streaming && !self.comm.has_pending_work()
        };
        if done {
            self.finish_stream(true);
        }
    }

    /// End the stream, if one is running
    ///
    /// Success also requires that no command failed and the stream was not
    /// cancelled.
    fn finish_stream(&self, completed: bool) {
        let success = {
            let mut session = self.session.lock();
            if !session.streaming {
                return;
            }
            session.streaming = false;
            session.stopwatch.freeze();
            let success = completed && !session.cancelled && session.error_count == 0;
            self.events
                .publish(ControllerEvent::StreamComplete { success });
            success
        };
        tracing::info!(
            "Stream finished ({})",
            if success { "success" } else { "failed" }
        );
        self.refresh_control_state();
    }

    fn refresh_control_state(&self) {
        let mut session = self.session.lock();
        let state = self.compute_control_state(&session);
        if state != session.control_state {
            session.control_state = state;
            self.events
                .publish(ControllerEvent::ControlStateChanged(state));
        }
    }

    fn compute_control_state(&self, session: &SessionState) -> ControlState {
        if !session.connected {
            return ControlState::Disconnected;
        }
        control_state(
            session.status.state,
            session.streaming,
            self.comm.is_paused(),
        )
    }

    // ---- queries ----

    /// Rows in the current or last stream, `-1` when unknown
    pub fn rows_in_send(&self) -> i64 {
        self.session.lock().rows_in_send
    }

    pub fn rows_sent(&self) -> i64 {
        self.session.lock().rows_sent
    }

    /// Rows acknowledged or skipped
    pub fn rows_completed(&self) -> i64 {
        self.session.lock().rows_completed
    }

    /// Rows not yet completed, `-1` when the total is unknown
    pub fn rows_remaining(&self) -> i64 {
        let session = self.session.lock();
        if session.rows_in_send < 0 {
            UNKNOWN_ROWS
        } else {
            (session.rows_in_send - session.rows_completed).max(0)
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.session.lock().streaming
    }

    /// Time spent sending, excluding pauses; frozen once a stream ends
    pub fn send_duration(&self) -> Duration {
        self.session.lock().stopwatch.elapsed()
    }

    /// Rejected commands in the current or last stream
    pub fn error_count(&self) -> usize {
        self.session.lock().error_count
    }

    pub fn control_state(&self) -> ControlState {
        let session = self.session.lock();
        self.compute_control_state(&session)
    }

    /// Latest status snapshot
    pub fn status(&self) -> ControllerStatus {
        self.session.lock().status.clone()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.session.lock().capabilities.clone()
    }

    pub fn firmware_version(&self) -> Option<FirmwareVersion> {
        self.session.lock().version.clone()
    }

    /// Stored value of a firmware setting such as `$110`
    pub fn firmware_setting(&self, key: &str) -> Option<String> {
        self.session.lock().settings.get(key).cloned()
    }

    pub fn firmware_settings(&self) -> BTreeMap<String, String> {
        self.session.lock().settings.clone()
    }

    pub fn parser_state(&self) -> Option<String> {
        self.session.lock().parser_state.clone()
    }

    /// Units status reports are interpreted in
    pub fn report_units(&self) -> Units {
        self.session.lock().units
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop_reader();
        for (_, task) in self.listeners.lock().drain() {
            task.abort();
        }
    }
}

/// Next status snapshot from `events`, or `None` after `timeout`
pub(crate) async fn next_status(
    events: &mut mpsc::UnboundedReceiver<ControllerEvent>,
    timeout: Duration,
) -> Option<ControllerStatus> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(ControllerEvent::StatusUpdated(status))) => return Some(status),
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return None,
        }
    }
}
