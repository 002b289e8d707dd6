//! # gcodestream
//!
//! A G-code streaming engine for GRBL, TinyG and Smoothieware controllers.
//!
//! ## Architecture
//!
//! gcodestream is organized as a workspace with multiple crates:
//!
//! 1. **gcodestream-core** - Commands, command sources, status types, events, errors
//! 2. **gcodestream-communication** - Serial transport, flow-controlled communicator,
//!    firmware dialects, controller, handshake and status polling
//! 3. **gcodestream-settings** - Configuration file handling
//! 4. **gcodestream** - This facade and a command line streamer

pub use gcodestream_communication::{
    list_ports, CancelOutcome, Capabilities, Capability, CommandKind, Communicator,
    CommunicatorConfig, CommunicatorEvent, Connection, ConnectionParams, Controller,
    ControllerConfig, ControllerType, FirmwareDialect, FirmwareVersion, OverrideAction,
    SerialConnection, SerialParity, SerialPortInfo,
};

pub use gcodestream_core::{
    Command, CommandCreator, CommandList, CommandSource, ConnectionError, ControlState,
    ControllerError, ControllerEvent, ControllerListener, ControllerListenerHandle,
    ControllerState, ControllerStatus, Error, FirmwareError, GcodeStreamReader, MessageLevel,
    Position, Result, Units,
};

pub use gcodestream_settings::{Config, SettingsError, SettingsPersistence};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with the default configuration
///
/// Console output filtered by `RUST_LOG`, at `info` when unset. Fails if a
/// global subscriber is already installed.
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_logger_install_fails() {
        // Another test may have installed it first
        let _ = init_logging();
        assert!(init_logging().is_err());
    }

    #[test]
    fn test_version_set() {
        assert!(!VERSION.is_empty());
    }
}
