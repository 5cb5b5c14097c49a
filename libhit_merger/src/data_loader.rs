use fxhash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;

use super::clipboard::ClipBoard;
use super::config::SourceConfig;
use super::error::LoaderError;
use super::event_data::EventData;
use super::file_loader::FileDataLoader;
use super::socket_loader::SocketDataLoader;
use super::worker::{StopFlag, Worker};
use super::worker_status::{LoaderState, LoaderStats, WorkerStatus};

/// A source of event batches running on its own thread.
///
/// The expected call order is `configure`, `init`, `connect`, `run`, and finally `join`.
/// `configure` is the only step that validates user input; once it succeeds, transport
/// problems are handled inside the worker and only show up in the logs and the final
/// [`LoaderState`].
pub trait DataLoader: Send {
    /// The registry key for this loader kind
    fn kind(&self) -> &'static str;

    /// The configured source name (empty until configured)
    fn name(&self) -> &str;

    fn configure(&mut self, config: &SourceConfig) -> Result<(), LoaderError>;

    /// Reset the counters. Socket loaders also make a first connection attempt here.
    fn init(&mut self);

    /// Bind the ClipBoard the worker pushes batches onto
    fn connect(&mut self, clipboard: Arc<ClipBoard<EventData>>);

    /// Start the background worker
    fn run(&mut self) -> Result<(), LoaderError>;

    /// Stop the worker, wait for it and log a summary
    fn join(&mut self) -> LoaderStats;

    fn stats(&self) -> LoaderStats;
}

/// Outcome of one attempt to fill a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fill {
    /// Go straight back for more
    More,
    /// Nothing left right now; wait before trying again
    Idle,
    /// Unrecoverable; the worker stops itself
    Failed,
}

/// The transport-specific half of a loader, moved onto the worker thread.
pub(crate) trait EventSource: Send + 'static {
    /// Decode events into the batch until the transport has nothing more to give, the batch
    /// holds max_events, or the transport fails.
    fn fill_batch(
        &mut self,
        batch: &mut EventData,
        max_events: usize,
        status: &WorkerStatus,
        stop: &StopFlag,
    ) -> Fill;

    /// How long to wait after an [`Fill::Idle`]
    fn idle_time(&self) -> Duration;
}

/// The loop shared by every loader kind
fn worker_loop<S: EventSource>(
    mut source: S,
    name: String,
    clipboard: Arc<ClipBoard<EventData>>,
    status: Arc<WorkerStatus>,
    stop: StopFlag,
    max_events: usize,
) -> LoaderState {
    log::debug!("Worker for {name} started");
    while !stop.is_set() {
        let mut batch = EventData::new();
        let fill = source.fill_batch(&mut batch, max_events, &status, &stop);
        if !batch.is_empty() {
            if batch.has_desync_events() {
                log::debug!(
                    "{name}: batch of {} events has desync at {:?}",
                    batch.size(),
                    batch.desync_indices()
                );
            }
            status.record_batch(batch.size() as u64, batch.total_hits());
            clipboard.push_data(batch);
        }
        match fill {
            Fill::More => (),
            Fill::Idle => {
                stop.sleep(source.idle_time());
            }
            Fill::Failed => {
                log::error!("{name}: worker gave up and stopped itself");
                return LoaderState::Failed;
            }
        }
    }
    log::debug!("Worker for {name} stopped");
    LoaderState::Stopped
}

/// The bookkeeping every loader kind shares: name, output, counters, and the worker handle.
#[derive(Debug)]
pub(crate) struct LoaderCore {
    pub name: String,
    pub max_events: usize,
    pub configured: bool,
    clipboard: Option<Arc<ClipBoard<EventData>>>,
    status: Arc<WorkerStatus>,
    worker: Option<Worker>,
}

impl Default for LoaderCore {
    fn default() -> Self {
        Self {
            name: String::new(),
            max_events: usize::MAX,
            configured: false,
            clipboard: None,
            status: Arc::new(WorkerStatus::new()),
            worker: None,
        }
    }
}

impl LoaderCore {
    pub fn configure(&mut self, config: &SourceConfig) -> Result<(), LoaderError> {
        self.name = config.name()?.to_string();
        self.max_events = config.max_events_per_block();
        self.configured = true;
        Ok(())
    }

    pub fn init(&mut self) {
        self.status.reset();
    }

    pub fn connect(&mut self, clipboard: Arc<ClipBoard<EventData>>) {
        self.clipboard = Some(clipboard);
    }

    /// Check the loader is ready to start and return its output
    pub fn prepare(&self) -> Result<Arc<ClipBoard<EventData>>, LoaderError> {
        if !self.configured {
            return Err(LoaderError::NotConfigured(self.name.clone()));
        }
        if self.worker.as_ref().is_some_and(|w| w.is_running()) {
            return Err(LoaderError::AlreadyRunning(self.name.clone()));
        }
        self.clipboard
            .clone()
            .ok_or_else(|| LoaderError::NotConnected(self.name.clone()))
    }

    pub fn start<S: EventSource>(&mut self, source: S) -> Result<(), LoaderError> {
        let clipboard = self.prepare()?;
        let mut worker = Worker::new(&format!("loader-{}", self.name), self.status.clone());
        let name = self.name.clone();
        let status = self.status.clone();
        let max_events = self.max_events;
        worker.start(move |stop| worker_loop(source, name, clipboard, status, stop, max_events))?;
        self.worker = Some(worker);
        log::info!("Started DataLoader {}", self.name);
        Ok(())
    }

    pub fn join(&mut self) -> LoaderStats {
        if let Some(mut worker) = self.worker.take() {
            worker.join();
        }
        let stats = self.status.snapshot();
        log::info!(
            "DataLoader {} joined ({:?}) -- events: {} hits: {} read: {}",
            self.name,
            stats.state,
            stats.total_events,
            stats.total_hits,
            human_bytes::human_bytes(stats.total_bytes as f64)
        );
        stats
    }

    pub fn stats(&self) -> LoaderStats {
        self.status.snapshot()
    }
}

pub type LoaderFactory = fn() -> Box<dyn DataLoader>;

/// Maps a loader kind (the `loader` key of a source config) to its constructor.
#[derive(Debug, Clone, Default)]
pub struct LoaderRegistry {
    factories: FxHashMap<String, LoaderFactory>,
}

impl LoaderRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every loader kind built into this crate
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(FileDataLoader::KIND, || Box::new(FileDataLoader::new()));
        registry.register(SocketDataLoader::KIND, || Box::new(SocketDataLoader::new()));
        #[cfg(feature = "zmq")]
        registry.register(super::zmq_loader::ZmqDataLoader::KIND, || {
            Box::new(super::zmq_loader::ZmqDataLoader::new())
        });
        registry
    }

    pub fn register(&mut self, kind: &str, factory: LoaderFactory) {
        self.factories.insert(kind.to_string(), factory);
    }

    pub fn create(&self, kind: &str) -> Result<Box<dyn DataLoader>, LoaderError> {
        self.factories
            .get(kind)
            .map(|factory| factory())
            .ok_or_else(|| LoaderError::UnknownKind(kind.to_string()))
    }

    /// Create and configure the loader named by config.loader
    pub fn create_configured(
        &self,
        config: &SourceConfig,
    ) -> Result<Box<dyn DataLoader>, LoaderError> {
        let mut loader = self.create(&config.loader)?;
        loader.configure(config)?;
        Ok(loader)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(|k| k.as_str()).collect();
        kinds.sort();
        kinds
    }
}
