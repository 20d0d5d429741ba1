//! The boundary between the engine and the system it drives.
//!
//! Everything the engine needs from the host is expressed here: resolving a
//! load module by name, branching to it with a parameter list, opening a DD
//! for record or stream input, and writing a line to the user's terminal.
//! [`crate::emulator::SimHost`] implements it in-process.

use std::io::Read;

use serde::Serialize;

use crate::abi::Storage;
use crate::error::Result;

/// A resolved load module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub module: String,
    pub address: u32,
}

/// Severity of a terminal message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

impl MessageLevel {
    /// Map a script-level severity number (0, 1, 2).
    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            0 => Some(Self::Info),
            1 => Some(Self::Warning),
            2 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Sequential reader over the logical records of a DD.
pub trait RecordSource {
    /// Next record, or `None` at end of data.
    fn next_record(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Services provided by the host system.
pub trait HostServices {
    /// Resolve a load module; `None` when it cannot be found.
    fn load(&mut self, module: &str) -> Option<EntryPoint>;

    /// Branch to `entry` with R1 addressing a parameter list; returns R15.
    fn call(&mut self, entry: &EntryPoint, r1: u32, storage: &mut Storage) -> i32;

    /// Open `ddname` for record input.
    ///
    /// `Ok(None)` means record access is not supported for this DD and the
    /// caller should fall back to [`HostServices::open_stream`].
    fn open_records(&mut self, ddname: &str) -> Result<Option<Box<dyn RecordSource + '_>>>;

    /// Open `ddname` as a byte stream (EBCDIC, NL-delimited).
    fn open_stream(&mut self, ddname: &str) -> Result<Box<dyn Read + '_>>;

    /// Write one line to the terminal.
    fn putline(&mut self, text: &str, level: MessageLevel) -> Result<()>;
}
