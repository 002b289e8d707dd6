//! Command sources
//!
//! A source hands out commands one at a time so the communicator can pull
//! only as many as fit in the device buffer. Sources that cannot know their
//! length up front report `None`, which callers surface as [`UNKNOWN_ROWS`].

use super::{Command, CommandCreator};
use crate::error::Result;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

/// Row count reported when a source cannot say how long it is
pub const UNKNOWN_ROWS: i64 = -1;

/// Restartable, incrementally read sequence of commands
pub trait CommandSource: Send {
    /// Next command, or `None` when exhausted
    fn next_command(&mut self) -> Result<Option<Command>>;

    /// Whether another command is available without consuming it
    fn has_next(&mut self) -> Result<bool>;

    /// Total number of rows, when known
    fn total_rows(&self) -> Option<usize>;

    /// Rows not yet handed out, when known
    fn rows_remaining(&self) -> Option<usize>;

    /// Rewind to the first row
    fn restart(&mut self) -> Result<()>;
}

/// Finite in-memory list of commands
#[derive(Debug, Default)]
pub struct CommandList {
    commands: Vec<Command>,
    cursor: usize,
}

impl CommandList {
    pub fn new(commands: Vec<Command>) -> Self {
        Self {
            commands,
            cursor: 0,
        }
    }

    /// Build a list from text lines, numbering them in order
    pub fn from_lines<I, S>(creator: &CommandCreator, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let commands = lines
            .into_iter()
            .enumerate()
            .map(|(i, line)| creator.create_from_line(line, i as u64 + 1))
            .collect();
        Self::new(commands)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl CommandSource for CommandList {
    fn next_command(&mut self) -> Result<Option<Command>> {
        let next = self.commands.get(self.cursor).cloned();
        if next.is_some() {
            self.cursor += 1;
        }
        Ok(next)
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(self.cursor < self.commands.len())
    }

    fn total_rows(&self) -> Option<usize> {
        Some(self.commands.len())
    }

    fn rows_remaining(&self) -> Option<usize> {
        Some(self.commands.len() - self.cursor)
    }

    fn restart(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }
}

/// Lazy line reader over persisted G-code
///
/// Lines are read only when requested. The total is unknown unless declared
/// with [`GcodeStreamReader::with_row_count`].
pub struct GcodeStreamReader<R> {
    reader: R,
    creator: CommandCreator,
    declared_rows: Option<usize>,
    rows_read: usize,
    buf: String,
}

impl GcodeStreamReader<BufReader<File>> {
    /// Open a file for streaming
    pub fn open(path: &Path, creator: CommandCreator) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), creator))
    }
}

impl<R: BufRead + Seek + Send> GcodeStreamReader<R> {
    pub fn new(reader: R, creator: CommandCreator) -> Self {
        Self {
            reader,
            creator,
            declared_rows: None,
            rows_read: 0,
            buf: String::new(),
        }
    }

    /// Declare the number of rows the reader will produce
    pub fn with_row_count(mut self, rows: usize) -> Self {
        self.declared_rows = Some(rows);
        self
    }

    /// Rows handed out so far
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }
}

impl<R: BufRead + Seek + Send> CommandSource for GcodeStreamReader<R> {
    fn next_command(&mut self) -> Result<Option<Command>> {
        self.buf.clear();
        if self.reader.read_line(&mut self.buf)? == 0 {
            return Ok(None);
        }

        self.rows_read += 1;
        let line = self.buf.trim_end_matches(['\r', '\n']);
        Ok(Some(
            self.creator.create_from_line(line, self.rows_read as u64),
        ))
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(!self.reader.fill_buf()?.is_empty())
    }

    fn total_rows(&self) -> Option<usize> {
        self.declared_rows
    }

    fn rows_remaining(&self) -> Option<usize> {
        self.declared_rows
            .map(|total| total.saturating_sub(self.rows_read))
    }

    fn restart(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.rows_read = 0;
        tracing::debug!("Command stream rewound");
        Ok(())
    }
}
