//!
//! Destinations for formatted consume output.
//!
use std::io::{self, Write};

use crate::config::ConsumeSettings;
use crate::error::ClientError;
use crate::format::MessageFormatter;
use crate::rotate::RotatingFileSink;

pub trait MessageSink: Send {
    /// Writes one formatted message, including any delimiter that must precede it.
    fn write_message(&mut self, formatted: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;
}

impl<S: MessageSink + ?Sized> MessageSink for Box<S> {
    fn write_message(&mut self, formatted: &[u8]) -> io::Result<()> {
        (**self).write_message(formatted)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// The delimiter to place between messages, if the format needs one.
pub fn delimiter_for(formatter: &dyn MessageFormatter, delimiter: &str) -> Option<Vec<u8>> {
    if formatter.is_self_delimiting() || delimiter.is_empty() {
        None
    } else {
        Some(delimiter.as_bytes().to_vec())
    }
}

/// Writes to a terminal or any other `io::Write`.
pub struct ConsoleSink<W: Write + Send> {
    out: W,
    delimiter: Option<Vec<u8>>,
    written: usize,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout(delimiter: Option<Vec<u8>>) -> Self {
        ConsoleSink::new(io::stdout(), delimiter)
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W, delimiter: Option<Vec<u8>>) -> Self {
        ConsoleSink {
            out,
            delimiter,
            written: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> MessageSink for ConsoleSink<W> {
    fn write_message(&mut self, formatted: &[u8]) -> io::Result<()> {
        if self.written > 0 {
            if let Some(delimiter) = &self.delimiter {
                self.out.write_all(delimiter)?;
            }
        }
        self.out.write_all(formatted)?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Builds the sink described by `settings`: the rotating file sink when an output path is
/// configured, stdout otherwise.
pub fn open_sink(
    settings: &ConsumeSettings,
    formatter: &dyn MessageFormatter,
) -> Result<Box<dyn MessageSink>, ClientError> {
    let delimiter = delimiter_for(formatter, &settings.delimiter);
    match &settings.output {
        Some(path) => Ok(Box::new(RotatingFileSink::new(
            path,
            settings.messages_per_file,
            settings.count,
            delimiter,
        )?)),
        None => Ok(Box::new(ConsoleSink::stdout(delimiter))),
    }
}
