//! Event system for controller communication
//!
//! Provides:
//! - Event types for command lifecycle and machine state changes
//! - Console messages with severity levels
//! - An ordered, channel-per-observer event dispatcher

use crate::command::Command;
use crate::data::{ControlState, ControllerStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use tokio::sync::mpsc;

/// Severity of a console message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageLevel {
    /// Chatty protocol traffic such as status reports
    Verbose,
    /// Normal device output
    Info,
    /// Errors reported by the device or the controller
    Error,
}

/// Text destined for a device console
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleMessage {
    /// Message severity
    pub level: MessageLevel,
    /// Message text without a trailing newline
    pub text: String,
    /// When the message was produced
    pub timestamp: DateTime<Utc>,
}

impl ConsoleMessage {
    pub fn new(level: MessageLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Controller event types
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// Connection opened on the named port
    Connected(String),
    /// Connection closed
    Disconnected,
    /// Command accepted for sending
    CommandQueued(Command),
    /// Command written to the device
    CommandSent(Command),
    /// Empty command dropped without being sent
    CommandSkipped(Command),
    /// Command acknowledged by the device
    CommandComplete(Command),
    /// New status snapshot parsed
    StatusUpdated(ControllerStatus),
    /// Streaming-aware state changed
    ControlStateChanged(ControlState),
    /// Sending paused because the device rejected a command
    PausedOnError(Command),
    /// Text for a device console
    ConsoleMessage(ConsoleMessage),
    /// Device raised an alarm
    Alarm {
        /// Alarm code reported by the device
        code: u32,
        /// Human readable description
        description: String,
    },
    /// Firmware version announced by the device
    FirmwareDetected {
        /// Version text as reported
        version: String,
    },
    /// A stream began
    StreamStarted,
    /// A stream finished
    StreamComplete {
        /// True when no command in the stream was rejected
        success: bool,
    },
}

impl fmt::Display for ControllerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected(port) => write!(f, "Connected to {}", port),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::CommandQueued(cmd) => write!(f, "Queued {}", cmd),
            Self::CommandSent(cmd) => write!(f, "Sent {}", cmd),
            Self::CommandSkipped(cmd) => write!(f, "Skipped {}", cmd),
            Self::CommandComplete(cmd) => write!(f, "Complete {}", cmd),
            Self::StatusUpdated(status) => write!(f, "Status: {}", status),
            Self::ControlStateChanged(state) => write!(f, "Control state: {}", state),
            Self::PausedOnError(cmd) => write!(f, "Paused on error at {}", cmd),
            Self::ConsoleMessage(msg) => write!(f, "{}", msg.text),
            Self::Alarm { code, description } => write!(f, "Alarm {} ({})", code, description),
            Self::FirmwareDetected { version } => write!(f, "Firmware {}", version),
            Self::StreamStarted => write!(f, "Stream started"),
            Self::StreamComplete { success } => write!(f, "Stream complete (success: {})", success),
        }
    }
}

/// Ordered event fan-out with one unbounded channel per subscriber
///
/// Publishing never blocks, so it is safe to publish while holding the lock
/// that guards the mutation being reported. Each subscriber sees events in
/// publish order. Subscribers whose receiver was dropped are pruned on the
/// next publish.
pub struct EventDispatcher<E> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<E>>>,
}

impl<E: Clone> EventDispatcher<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Publish an event to all live subscribers
    pub fn publish(&self, event: E) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<E: Clone> Default for EventDispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}
