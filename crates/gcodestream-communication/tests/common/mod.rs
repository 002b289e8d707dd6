//! Shared test doubles

#![allow(dead_code)]

use gcodestream_communication::Connection;
use gcodestream_core::{ConnectionError, ControllerEvent, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Produces reply lines for bytes written to the device
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<String> + Send>;

#[derive(Default)]
struct MockState {
    open: bool,
    lines: Vec<String>,
    realtime: Vec<u8>,
    inbox: VecDeque<u8>,
    responder: Option<Responder>,
    fail_writes: bool,
}

impl MockState {
    fn reply(&mut self, data: &[u8]) {
        let replies = match self.responder.as_mut() {
            Some(responder) => responder(data),
            None => Vec::new(),
        };
        for line in replies {
            self.inbox.extend(line.as_bytes());
            self.inbox.extend(b"\r\n");
        }
    }
}

/// In-memory connection that records writes and replies from a script
#[derive(Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responder(responder: impl FnMut(&[u8]) -> Vec<String> + Send + 'static) -> Self {
        let mock = Self::new();
        mock.state.lock().responder = Some(Box::new(responder));
        mock
    }

    /// Lines written through the queues, without terminators
    pub fn written_lines(&self) -> Vec<String> {
        self.state.lock().lines.clone()
    }

    /// Single bytes written outside the queues
    pub fn realtime_bytes(&self) -> Vec<u8> {
        self.state.lock().realtime.clone()
    }

    pub fn clear_written(&self) {
        let mut state = self.state.lock();
        state.lines.clear();
        state.realtime.clear();
    }

    /// Make the device send `line`
    pub fn push_line(&self, line: &str) {
        let mut state = self.state.lock();
        state.inbox.extend(line.as_bytes());
        state.inbox.extend(b"\n");
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

impl Connection for MockConnection {
    fn open(&mut self) -> Result<()> {
        self.state.lock().open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.state.lock().open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(ConnectionError::ConnectionLost {
                reason: "device unplugged".to_string(),
            }
            .into());
        }
        let text = String::from_utf8_lossy(data);
        for line in text.lines() {
            state.lines.push(line.to_string());
        }
        state.reply(data);
        Ok(())
    }

    fn send_byte_immediately(&mut self, byte: u8) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(ConnectionError::ConnectionLost {
                reason: "device unplugged".to_string(),
            }
            .into());
        }
        state.realtime.push(byte);
        state.reply(&[byte]);
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        Ok(self.state.lock().inbox.drain(..).collect())
    }

    fn name(&self) -> String {
        "mock".to_string()
    }
}

pub const IDLE_STATUS: &str = "<Idle|MPos:0.000,0.000,0.000|FS:0,0|WCO:0.000,0.000,0.000>";

/// Responder emulating a GRBL 1.1h board in `status` state
pub fn grbl_device(status: &'static str) -> impl FnMut(&[u8]) -> Vec<String> + Send + 'static {
    move |data: &[u8]| {
        let lines = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        match data {
            [b'?'] => lines(&[status]),
            [0x18] => lines(&["", "Grbl 1.1h ['$' for help]"]),
            [_] => Vec::new(),
            b"$I\n" => lines(&["[VER:1.1h.20190825:]", "[OPT:V,15,128]", "ok"]),
            b"$$\n" => lines(&["$0=10", "$13=0", "$110=500.000", "ok"]),
            b"$G\n" => lines(&["[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]", "ok"]),
            _ => lines(&["ok"]),
        }
    }
}

/// Wait for the first event matching `predicate`
pub async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<ControllerEvent>,
    timeout: Duration,
    mut predicate: impl FnMut(&ControllerEvent) -> bool,
) -> Option<ControllerEvent> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) if predicate(&event) => return Some(event),
            Ok(Some(_)) => continue,
            _ => return None,
        }
    }
}

/// Everything currently buffered on `events`
pub fn drain(events: &mut mpsc::UnboundedReceiver<ControllerEvent>) -> Vec<ControllerEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}
