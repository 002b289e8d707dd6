//! Controller listener interface
//!
//! Defines the listener trait for controller events

use crate::command::Command;
use crate::core::event::{ConsoleMessage, ControllerEvent};
use crate::data::{ControlState, ControllerStatus};
use async_trait::async_trait;

/// Handle for a registered controller listener.
///
/// Uniquely identifies a listener subscription. Can be used to unsubscribe
/// from controller events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ControllerListenerHandle(pub String);

impl ControllerListenerHandle {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ControllerListenerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener trait for controller events
///
/// Implement this trait to receive notifications of controller activity.
/// Every method has an empty default so implementors pick what they need.
#[async_trait]
pub trait ControllerListener: Send + Sync {
    /// Called when a command is accepted for sending
    async fn on_command_queued(&self, _command: &Command) {}

    /// Called when a command is written to the device
    async fn on_command_sent(&self, _command: &Command) {}

    /// Called when an empty command is dropped
    async fn on_command_skipped(&self, _command: &Command) {}

    /// Called when a command is acknowledged
    async fn on_command_complete(&self, _command: &Command) {}

    /// Called when a status report is parsed
    async fn on_status_updated(&self, _status: &ControllerStatus) {}

    /// Called when the streaming-aware state changes
    async fn on_control_state_changed(&self, _state: ControlState) {}

    /// Called when sending pauses on a rejected command
    async fn on_paused_on_error(&self, _command: &Command) {}

    /// Called for device console output
    async fn on_console_message(&self, _message: &ConsoleMessage) {}

    /// Called when an alarm occurs
    async fn on_alarm(&self, _code: u32, _description: &str) {}

    /// Called when a stream finishes
    async fn on_stream_complete(&self, _success: bool) {}

    /// Called for every event before the specific callback
    async fn on_event(&self, _event: &ControllerEvent) {}
}

/// Route one event to the matching listener callbacks
pub async fn deliver(listener: &dyn ControllerListener, event: &ControllerEvent) {
    listener.on_event(event).await;
    match event {
        ControllerEvent::CommandQueued(cmd) => listener.on_command_queued(cmd).await,
        ControllerEvent::CommandSent(cmd) => listener.on_command_sent(cmd).await,
        ControllerEvent::CommandSkipped(cmd) => listener.on_command_skipped(cmd).await,
        ControllerEvent::CommandComplete(cmd) => listener.on_command_complete(cmd).await,
        ControllerEvent::StatusUpdated(status) => listener.on_status_updated(status).await,
        ControllerEvent::ControlStateChanged(state) => {
            listener.on_control_state_changed(*state).await
        }
        ControllerEvent::PausedOnError(cmd) => listener.on_paused_on_error(cmd).await,
        ControllerEvent::ConsoleMessage(msg) => listener.on_console_message(msg).await,
        ControllerEvent::Alarm { code, description } => {
            listener.on_alarm(*code, description).await
        }
        ControllerEvent::StreamComplete { success } => {
            listener.on_stream_complete(*success).await
        }
        ControllerEvent::Connected(_)
        | ControllerEvent::Disconnected
        | ControllerEvent::FirmwareDetected { .. }
        | ControllerEvent::StreamStarted => {}
    }
}
