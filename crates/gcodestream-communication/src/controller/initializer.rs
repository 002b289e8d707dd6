//! Connection handshake
//!
//! Runs once per connection: make sure the device answers status queries,
//! learn its version, read its settings and parser state, then start
//! status polling.

use super::{next_status, Controller};
use crate::firmware::CommandKind;
use gcodestream_core::{Command, ControllerError, ControllerEvent, ControllerState, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Status queries attempted before the device is declared unresponsive
pub const STATUS_ATTEMPTS: u32 = 3;

/// One-shot handshake guarded against re-entry
#[derive(Debug, Default)]
pub struct Initializer {
    initialized: AtomicBool,
    running: AtomicBool,
}

impl Initializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Allow the handshake to run again on the next connection
    pub fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
    }

    /// Run the handshake against `controller`
    ///
    /// Returns `Ok(false)` without doing anything when the handshake already
    /// succeeded or is in progress.
    pub async fn initialize(&self, controller: &Controller) -> Result<bool> {
        if self.is_initialized() || self.running.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        let result = self.run(controller).await;
        self.running.store(false, Ordering::SeqCst);
        result?;

        self.initialized.store(true, Ordering::SeqCst);
        Ok(true)
    }

    async fn run(&self, controller: &Controller) -> Result<()> {
        let config = controller.config().clone();
        let mut events = controller.subscribe();
        controller.poll_timer().stop();

        tracing::info!("Initializing {} controller", controller.controller_type());
        wait_until_responsive(controller, &mut events, config.status_timeout()).await?;

        if let Some(build_info) = controller.command_text(CommandKind::BuildInfo) {
            send_and_wait(controller, &mut events, &build_info, config.command_timeout()).await?;
        }
        match controller.firmware_version() {
            Some(version) => tracing::info!(
                "Firmware {} with capabilities: {}",
                version,
                controller.capabilities()
            ),
            None => tracing::warn!("Firmware did not report a version"),
        }

        for kind in [CommandKind::ViewSettings, CommandKind::ViewParserState] {
            if let Some(text) = controller.command_text(kind) {
                send_and_wait(controller, &mut events, &text, config.command_timeout()).await?;
            }
        }

        if config.status_updates_enabled {
            controller.poll_timer().start();
        }
        tracing::info!("Controller initialized");
        Ok(())
    }
}

/// Query status until the device answers in a usable state
///
/// A blocked or silent device gets a benign probe and a soft reset before
/// the next attempt. An alarm that survives the reset is accepted, since a
/// reset cannot clear a homing lock.
async fn wait_until_responsive(
    controller: &Controller,
    events: &mut mpsc::UnboundedReceiver<ControllerEvent>,
    timeout: Duration,
) -> Result<()> {
    let mut reset_issued = false;

    for attempt in 1..=STATUS_ATTEMPTS {
        while events.try_recv().is_ok() {}
        controller.poll_status(true, true)?;

        match next_status(events, timeout).await {
            Some(status) if is_usable(status.state, reset_issued) => {
                tracing::info!("Device responded in state {}", status.state);
                return Ok(());
            }
            Some(status) => tracing::info!(
                "Device reports {} on attempt {}, resetting",
                status.state,
                attempt
            ),
            None => tracing::info!("No status reply on attempt {}, resetting", attempt),
        }

        if attempt == STATUS_ATTEMPTS {
            break;
        }
        if let Some(probe) = controller.command_text(CommandKind::BuildInfo) {
            if let Err(e) = controller.send_command_immediately(&probe) {
                tracing::debug!("Probe '{}' failed: {}", probe, e);
            }
        }
        controller.soft_reset(true)?;
        reset_issued = true;
    }

    Err(ControllerError::Unresponsive {
        attempts: STATUS_ATTEMPTS,
    }
    .into())
}

fn is_usable(state: ControllerState, reset_issued: bool) -> bool {
    match state {
        ControllerState::Alarm => reset_issued,
        ControllerState::Disconnected => false,
        other => !other.is_blocked(),
    }
}

/// Send `text` and wait for its acknowledgment
async fn send_and_wait(
    controller: &Controller,
    events: &mut mpsc::UnboundedReceiver<ControllerEvent>,
    text: &str,
    timeout: Duration,
) -> Result<Command> {
    let command = controller.send_command_immediately(text)?;
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(ControllerEvent::CommandComplete(done))) if done.number() == command.number() => {
                if done.is_error() {
                    tracing::warn!(
                        "'{}' rejected: {}",
                        text,
                        done.response().unwrap_or_default()
                    );
                }
                return Ok(done);
            }
            Ok(Some(_)) => continue,
            Ok(None) => return Err(ControllerError::NotConnected.into()),
            Err(_) => {
                return Err(ControllerError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }
                .into())
            }
        }
    }
}
