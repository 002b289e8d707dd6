//! Byte transports and the flow-controlled communicator
//!
//! A [`Connection`] moves raw bytes. The [`Communicator`] owns line framing,
//! the send queues, and receive-buffer accounting on top of it.

pub mod communicator;
pub mod serial;

use gcodestream_core::Result;
use serde::{Deserialize, Serialize};

pub use communicator::{
    Acknowledgement, Communicator, CommunicatorConfig, CommunicatorEvent, ResponseClassifier,
    StreamProgress,
};
pub use serial::{list_ports, SerialConnection, SerialPortInfo};

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    #[default]
    None,
    Even,
    Odd,
}

/// Parameters used to open a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1-2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Hardware flow control
    pub flow_control: bool,
    /// Read timeout in milliseconds
    pub timeout_ms: u64,
}

impl ConnectionParams {
    /// Typical 8N1 serial settings for the given port and baud rate
    pub fn serial(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Self::default()
        }
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
            timeout_ms: 10,
        }
    }
}

/// Byte-oriented channel to a device
///
/// Implementations deliver whatever bytes are available; message framing
/// is the communicator's job.
pub trait Connection: Send {
    /// Open the underlying channel
    fn open(&mut self) -> Result<()>;

    /// Close the underlying channel
    fn close(&mut self) -> Result<()>;

    /// Whether the channel is open
    fn is_open(&self) -> bool;

    /// Write all bytes
    fn send_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Write a single real-time byte
    fn send_byte_immediately(&mut self, byte: u8) -> Result<()> {
        self.send_bytes(&[byte])
    }

    /// Bytes received since the last call; empty when none are waiting
    fn receive(&mut self) -> Result<Vec<u8>>;

    /// Human readable name such as the port path
    fn name(&self) -> String;
}
