//! # gcodestream Communication
//!
//! Flow-controlled G-code streaming over serial links, firmware dialects
//! for GRBL, TinyG and Smoothieware, and the controller that ties them
//! together.

pub mod communication;
pub mod controller;
pub mod firmware;

pub use communication::{
    list_ports, Acknowledgement, Communicator, CommunicatorConfig, CommunicatorEvent, Connection,
    ConnectionParams, ResponseClassifier, SerialConnection, SerialParity, SerialPortInfo,
    StreamProgress,
};

pub use controller::{
    CancelOutcome, Controller, ControllerConfig, Initializer, StatusPollTimer, Stopwatch,
};

pub use firmware::{
    dialect_for, Capabilities, Capability, CommandKind, ControlSignal, ControllerType,
    DeviceResponse, FirmwareDialect, FirmwareVersion, GrblDialect, OverrideAction,
    RealtimeCommand, SmoothieDialect, TinyGDialect, VersionRequirement,
};
