use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::clipboard::ClipBoard;
use super::config::SourceConfig;
use super::data_loader::{DataLoader, EventSource, Fill, LoaderCore};
use super::error::{LoaderError, RawFormatError};
use super::event_data::EventData;
use super::raw_format::{encoded_size, read_header, read_hits};
use super::worker::StopFlag;
use super::worker_status::{LoaderStats, WorkerStatus};

/// Replays (or follows) a raw event file.
///
/// The file may still be growing while it is read. Whenever a record is incomplete the read
/// position goes back to the end of the last complete record and the worker waits
/// `block_timeout` before trying again, so a partially-written event is never handed on.
#[derive(Debug, Default)]
pub struct FileDataLoader {
    core: LoaderCore,
    path: Option<PathBuf>,
    block_timeout: Duration,
}

impl FileDataLoader {
    pub const KIND: &'static str = "file";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl DataLoader for FileDataLoader {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn name(&self) -> &str {
        &self.core.name
    }

    fn configure(&mut self, config: &SourceConfig) -> Result<(), LoaderError> {
        let path = config.file_path()?;
        self.core.configure(config)?;
        self.block_timeout = config.block_timeout();
        log::debug!("{} will read from {}", self.core.name, path.display());
        self.path = Some(path);
        Ok(())
    }

    fn init(&mut self) {
        self.core.init();
    }

    fn connect(&mut self, clipboard: Arc<ClipBoard<EventData>>) {
        self.core.connect(clipboard);
    }

    fn run(&mut self) -> Result<(), LoaderError> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| LoaderError::NotConfigured(self.core.name.clone()))?;
        let source = FileSource::new(path, self.block_timeout);
        self.core.start(source)
    }

    fn join(&mut self) -> LoaderStats {
        self.core.join()
    }

    fn stats(&self) -> LoaderStats {
        self.core.stats()
    }
}

/// Read one full record into the batch, returning its encoded size.
///
/// The event is added to the batch as soon as its header is decoded; if the hit block then
/// turns out to be short the event is taken back out again.
fn read_record<R: Read>(reader: &mut R, batch: &mut EventData) -> Result<u64, RawFormatError> {
    batch.add_event(read_header(reader)?);
    let result = match batch.last_event_mut() {
        Some(event) => read_hits(reader, event),
        None => Ok(()),
    };
    if let Err(e) = result {
        batch.remove_last_event();
        return Err(e);
    }
    Ok(batch.events().last().map_or(0, |e| encoded_size(e) as u64))
}

#[derive(Debug)]
struct FileSource {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    /// Offset just past the last complete record
    position: u64,
    block_timeout: Duration,
}

impl FileSource {
    fn new(path: PathBuf, block_timeout: Duration) -> Self {
        Self {
            path,
            reader: None,
            position: 0,
            block_timeout,
        }
    }

    fn open(&self) -> Option<BufReader<File>> {
        match File::open(&self.path) {
            Ok(file) => {
                let mut reader = BufReader::new(file);
                match reader.seek(SeekFrom::Start(self.position)) {
                    Ok(_) => Some(reader),
                    Err(e) => {
                        log::warn!("Could not seek in {}: {e}", self.path.display());
                        None
                    }
                }
            }
            Err(e) => {
                log::debug!("Waiting for {}: {e}", self.path.display());
                None
            }
        }
    }
}

impl EventSource for FileSource {
    fn fill_batch(
        &mut self,
        batch: &mut EventData,
        max_events: usize,
        status: &WorkerStatus,
        _stop: &StopFlag,
    ) -> Fill {
        if self.reader.is_none() {
            self.reader = self.open();
        }
        let Some(reader) = self.reader.as_mut() else {
            return Fill::Idle;
        };

        while batch.size() < max_events {
            match read_record(reader, batch) {
                Ok(bytes) => {
                    self.position += bytes;
                    status.record_bytes(bytes);
                }
                Err(e) => {
                    if !matches!(e, RawFormatError::Truncated { .. }) {
                        log::warn!("Error reading {}: {e}", self.path.display());
                    }
                    if let Err(e) = reader.seek(SeekFrom::Start(self.position)) {
                        log::warn!("Could not rewind {}: {e}", self.path.display());
                        self.reader = None;
                    }
                    return Fill::Idle;
                }
            }
        }
        Fill::More
    }

    fn idle_time(&self) -> Duration {
        self.block_timeout
    }
}
