//! # gcodestream Core
//!
//! Core types for the gcodestream engine: commands and command sources,
//! controller status snapshots, events, listeners, and the shared error
//! taxonomy.

pub mod command;
pub mod core;
pub mod data;
pub mod error;

pub use command::{
    Command, CommandCreator, CommandList, CommandSource, CompletionObserver, GcodeStreamReader,
    UNKNOWN_ROWS,
};

pub use crate::core::{
    deliver, ConsoleMessage, ControllerEvent, ControllerListener, ControllerListenerHandle,
    EventDispatcher, MessageLevel,
};

pub use data::{
    control_state, Accessory, ControlState, ControllerState, ControllerStatus, OverridePercents,
    Pin, Position, Units,
};

pub use error::{ConnectionError, ControllerError, Error, FirmwareError, Result};
