//! Serial port transport
//!
//! Provides port discovery and a [`Connection`] backed by the `serialport`
//! crate for USB or RS-232 attached controllers.

use super::{Connection, ConnectionParams, SerialParity};
use gcodestream_core::{ConnectionError, Error, Result};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            vid: None,
            pid: None,
        }
    }

    /// Set manufacturer
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }
}

/// List serial ports that look like CNC controllers
///
/// Keeps Windows `COM*`, Linux `/dev/ttyUSB*` and `/dev/ttyACM*`, and macOS
/// `/dev/cu.usbserial-*` and `/dev/cu.usbmodem*` ports.
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        Error::other(format!("Failed to enumerate ports: {}", e))
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_valid_cnc_port(&port.port_name))
        .map(|port| {
            let info = SerialPortInfo::new(&port.port_name, port_description(port));
            match &port.port_type {
                serialport::SerialPortType::UsbPort(usb) => {
                    let info = info.with_usb_ids(usb.vid, usb.pid);
                    match &usb.manufacturer {
                        Some(mfg) => info.with_manufacturer(mfg),
                        None => info,
                    }
                }
                _ => info,
            }
        })
        .collect())
}

fn is_valid_cnc_port(port_name: &str) -> bool {
    if let Some(num) = port_name.strip_prefix("COM") {
        return !num.is_empty() && num.chars().all(|c| c.is_ascii_digit());
    }

    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

fn port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

fn to_serialport_parity(parity: SerialParity) -> serialport::Parity {
    match parity {
        SerialParity::None => serialport::Parity::None,
        SerialParity::Even => serialport::Parity::Even,
        SerialParity::Odd => serialport::Parity::Odd,
    }
}

/// Trait for serial port I/O operations
trait ReadWrite: Read + Write + Send {}
impl<T: Read + Write + Send> ReadWrite for T {}

/// Serial connection using the serialport crate
pub struct SerialConnection {
    params: ConnectionParams,
    port: Option<Box<dyn ReadWrite>>,
}

impl SerialConnection {
    pub fn new(params: ConnectionParams) -> Self {
        Self { params, port: None }
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn ReadWrite>> {
        self.port
            .as_mut()
            .ok_or_else(|| ConnectionError::NotOpen.into())
    }
}

impl Connection for SerialConnection {
    fn open(&mut self) -> Result<()> {
        let params = &self.params;
        let data_bits = match params.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            other => {
                return Err(ConnectionError::InvalidParameters {
                    reason: format!("Invalid data bits: {}", other),
                }
                .into())
            }
        };
        let stop_bits = match params.stop_bits {
            1 => serialport::StopBits::One,
            2 => serialport::StopBits::Two,
            other => {
                return Err(ConnectionError::InvalidParameters {
                    reason: format!("Invalid stop bits: {}", other),
                }
                .into())
            }
        };

        let builder = serialport::new(&params.port, params.baud_rate)
            .timeout(Duration::from_millis(params.timeout_ms))
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(to_serialport_parity(params.parity))
            .flow_control(if params.flow_control {
                serialport::FlowControl::Hardware
            } else {
                serialport::FlowControl::None
            });

        let port = builder.open_native().map_err(|e| {
            tracing::warn!("Failed to open serial port {}: {}", params.port, e);
            ConnectionError::FailedToOpen {
                port: params.port.clone(),
                reason: e.to_string(),
            }
        })?;

        tracing::info!("Opened {} at {} baud", params.port, params.baud_rate);
        self.port = Some(Box::new(port));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            port.flush()?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        let port = self.port_mut()?;
        let mut buf = [0u8; 1024];
        match port.read(&mut buf) {
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> String {
        self.params.port.clone()
    }
}
