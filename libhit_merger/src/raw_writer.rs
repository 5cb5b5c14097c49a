use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::constants::RAW_FILE_SUFFIX;
use super::error::RawFormatError;
use super::event::Event;
use super::raw_format::{encoded_size, write_event};

/// Build the conventional file name for a source: `<dir>/<name>_data.raw`
pub fn raw_file_path(dir: &Path, source_name: &str) -> PathBuf {
    dir.join(format!("{source_name}{RAW_FILE_SUFFIX}"))
}

/// Writes events to disk in the raw event format.
#[derive(Debug)]
pub struct RawWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    events_written: u64,
    bytes_written: u64,
}

impl RawWriter {
    /// Create (or truncate) the file at path
    pub fn new(path: &Path) -> Result<Self, RawFormatError> {
        Ok(Self::from_file(File::create(path)?, path))
    }

    /// Open the file at path for appending, creating it if needed
    pub fn append(path: &Path) -> Result<Self, RawFormatError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_file(file, path))
    }

    fn from_file(file: File, path: &Path) -> Self {
        Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            events_written: 0,
            bytes_written: 0,
        }
    }

    pub fn write_events(&mut self, events: &[Event]) -> Result<(), RawFormatError> {
        for event in events {
            write_event(&mut self.writer, event)?;
            self.events_written += 1;
            self.bytes_written += encoded_size(event) as u64;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), RawFormatError> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}
