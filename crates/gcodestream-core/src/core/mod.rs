//! Controller events and listener plumbing

pub mod event;
pub mod listener;

pub use event::{ConsoleMessage, ControllerEvent, EventDispatcher, MessageLevel};
pub use listener::{deliver, ControllerListener, ControllerListenerHandle};
