//! Device-bound commands and their lifecycle
//!
//! A [`Command`] moves through `queued -> sent -> done` and is frozen once
//! done. Commands whose text is empty after comment stripping are skipped
//! instead of sent.

pub mod source;

use crate::error::{ControllerError, Result};
use regex::Regex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

pub use source::{CommandList, CommandSource, GcodeStreamReader, UNKNOWN_ROWS};

/// Callback run once a command has been completed
pub type CompletionObserver = Arc<dyn Fn(&Command) + Send + Sync>;

/// A single line of device-bound text plus lifecycle flags
#[derive(Clone)]
pub struct Command {
    number: u64,
    original: String,
    text: String,
    comment: Option<String>,
    line_number: Option<u64>,
    sent: bool,
    done: bool,
    error: bool,
    skipped: bool,
    response: Option<String>,
    observers: Vec<CompletionObserver>,
}

impl Command {
    /// Create an unnumbered command from raw text
    pub fn new(original: impl Into<String>) -> Self {
        Self::build(original.into(), 0, None)
    }

    fn build(original: String, number: u64, line_number: Option<u64>) -> Self {
        let (text, comment) = split_comment(&original);
        Self {
            number,
            original,
            text,
            comment,
            line_number,
            sent: false,
            done: false,
            error: false,
            skipped: false,
            response: None,
            observers: Vec::new(),
        }
    }

    /// Per-session sequence number assigned by [`CommandCreator`]
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Text exactly as it was supplied
    pub fn original_text(&self) -> &str {
        &self.original
    }

    /// Normalized text transmitted to the device, without terminator
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Comment stripped from the original text
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Line number in the originating source, if any
    pub fn line_number(&self) -> Option<u64> {
        self.line_number
    }

    /// Bytes this command occupies in the device receive buffer
    pub fn wire_len(&self) -> usize {
        self.text.len() + 1
    }

    /// True when nothing would be sent
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    /// Response that completed the command
    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// Register a callback run when the command completes
    pub fn add_completion_observer(&mut self, observer: CompletionObserver) {
        self.observers.push(observer);
    }

    /// Mark the command as transmitted
    pub fn mark_sent(&mut self) -> Result<()> {
        if self.sent || self.skipped {
            return Err(ControllerError::InvalidCommandState {
                reason: format!("command {} already sent or skipped", self.number),
            }
            .into());
        }
        self.sent = true;
        Ok(())
    }

    /// Mark an empty command as skipped; it will never be sent
    pub fn mark_skipped(&mut self) -> Result<()> {
        if self.sent {
            return Err(ControllerError::InvalidCommandState {
                reason: format!("command {} was sent and cannot be skipped", self.number),
            }
            .into());
        }
        self.skipped = true;
        Ok(())
    }

    /// Record the device response and freeze the command
    pub fn complete(&mut self, response: impl Into<String>, is_error: bool) -> Result<()> {
        if !self.sent {
            return Err(ControllerError::InvalidCommandState {
                reason: format!("command {} completed before it was sent", self.number),
            }
            .into());
        }
        if self.done {
            return Err(ControllerError::InvalidCommandState {
                reason: format!("command {} is already done", self.number),
            }
            .into());
        }
        self.response = Some(response.into());
        self.error = is_error;
        self.done = true;
        Ok(())
    }

    /// Run completion observers in registration order
    pub fn notify_completion(&self) {
        for observer in &self.observers {
            observer(self);
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("number", &self.number)
            .field("text", &self.text)
            .field("comment", &self.comment)
            .field("line_number", &self.line_number)
            .field("sent", &self.sent)
            .field("done", &self.done)
            .field("error", &self.error)
            .field("skipped", &self.skipped)
            .field("response", &self.response)
            .finish()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.number, self.text)
    }
}

/// Split `G1 X10 (rough) ; pass 1` into `G1 X10` and `rough pass 1`
fn split_comment(line: &str) -> (String, Option<String>) {
    static COMMENT_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = COMMENT_REGEX
        .get_or_init(|| Regex::new(r"\(([^)]*)\)|;(.*)$").expect("invalid regex pattern"));

    let comments: Vec<&str> = regex
        .captures_iter(line)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().trim())
        .filter(|c| !c.is_empty())
        .collect();

    let text = regex.replace_all(line, "").trim().to_string();
    let comment = if comments.is_empty() {
        None
    } else {
        Some(comments.join(" "))
    };
    (text, comment)
}

/// Factory that numbers commands for a session
///
/// Clones share one counter, so a command source and the controller that
/// owns it produce a single monotonically increasing sequence.
#[derive(Clone, Default)]
pub struct CommandCreator {
    counter: Arc<AtomicU64>,
}

impl CommandCreator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a numbered command
    pub fn create(&self, text: impl Into<String>) -> Command {
        Command::build(text.into(), self.next_number(), None)
    }

    /// Create a numbered command that remembers its source line
    pub fn create_from_line(&self, text: impl Into<String>, line_number: u64) -> Command {
        Command::build(text.into(), self.next_number(), Some(line_number))
    }

    /// Restart numbering, used after a device reset
    pub fn reset(&self) {
        self.counter.store(0, Ordering::SeqCst);
    }

    fn next_number(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}
