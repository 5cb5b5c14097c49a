use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use time::macros::format_description;
use time::OffsetDateTime;

use super::clipboard::ClipBoard;
use super::config::BridgeConfig;
use super::constants::{
    BRIDGE_CONFIG_NAME, BRIDGE_INPUT_DIR, BRIDGE_POLL_INTERVAL_MS, DEFAULT_BRIDGE_PROGRAM,
};
use super::error::{BridgeError, ConfigError, LoaderError};
use super::event::Event;
use super::raw_writer::{raw_file_path, RawWriter};
use super::track::{scan_tracks, Track};
use super::worker::{StopFlag, Worker};
use super::worker_status::{LoaderState, LoaderStats, WorkerStatus};

/// One aligned batch per source, as produced by the EventReconstructor
pub type EventMatrix = Vec<Vec<Event>>;

const DEFAULT_WORK_DIR: &str = "./reconstruction";

// The generated reconstruction config
#[derive(Debug, Serialize)]
struct ReconstructionConf<'a> {
    #[serde(rename = "Corryvreckan")]
    global: GlobalSection<'a>,
    #[serde(rename = "EventLoaderRaw")]
    loader: LoaderSection<'a>,
    #[serde(rename = "Tracking4D")]
    tracking: TrackingSection,
}

#[derive(Debug, Serialize)]
struct GlobalSection<'a> {
    detectors_file: &'a Path,
    output_directory: &'a Path,
    number_of_events: u64,
}

#[derive(Debug, Serialize)]
struct LoaderSection<'a> {
    input_directory: &'a Path,
    file_suffix: &'static str,
    detectors: &'a [String],
}

#[derive(Debug, Serialize)]
struct TrackingSection {
    track_model: &'static str,
}

/// Validated bridge settings
#[derive(Debug, Clone)]
struct BridgeSettings {
    geometry: PathBuf,
    run_script: Option<PathBuf>,
    program: String,
    run_dir: PathBuf,
    source_names: Vec<String>,
}

impl BridgeSettings {
    fn input_dir(&self) -> PathBuf {
        self.run_dir.join(BRIDGE_INPUT_DIR)
    }

    fn config_path(&self) -> PathBuf {
        self.run_dir.join(BRIDGE_CONFIG_NAME)
    }

    /// Write one raw file per source and the matching config
    fn stage(&self, matrix: &EventMatrix) -> Result<(), BridgeError> {
        let input_dir = self.input_dir();
        let mut n_events = 0;
        for (name, events) in self.source_names.iter().zip(matrix) {
            let mut writer = RawWriter::new(&raw_file_path(&input_dir, name))?;
            writer.write_events(events)?;
            writer.flush()?;
            n_events = n_events.max(events.len() as u64);
        }

        let conf = ReconstructionConf {
            global: GlobalSection {
                detectors_file: &self.geometry,
                output_directory: &self.run_dir,
                number_of_events: n_events,
            },
            loader: LoaderSection {
                input_directory: &input_dir,
                file_suffix: crate::constants::RAW_FILE_SUFFIX,
                detectors: &self.source_names,
            },
            tracking: TrackingSection {
                track_model: "straightline",
            },
        };
        std::fs::write(self.config_path(), toml::to_string(&conf)?)?;
        Ok(())
    }

    fn invoke(&self) -> Result<String, BridgeError> {
        let mut command = match &self.run_script {
            Some(script) => {
                let mut command = Command::new(script);
                command.arg(self.config_path());
                command
            }
            None => {
                let mut command = Command::new(&self.program);
                command.arg("-c").arg(self.config_path());
                command
            }
        };
        let output = command.current_dir(&self.run_dir).output()?;
        if !output.status.success() {
            log::debug!(
                "External reconstruction stderr: {}",
                String::from_utf8_lossy(&output.stderr)
            );
            return Err(BridgeError::ExternalFailed(output.status));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn reconstruct(&self, matrix: &EventMatrix) -> Result<Vec<Track>, BridgeError> {
        self.stage(matrix)?;
        let scan = scan_tracks(&self.invoke()?);
        if scan.malformed > 0 {
            log::warn!("{} track lines could not be parsed", scan.malformed);
        }
        Ok(scan.tracks)
    }
}

/// Hands reconstructed events to an external tracking program and collects its tracks.
///
/// Every batch popped from the input ClipBoard is written to `<source>_data.raw` files in the
/// bridge's working directory, the external program is run once over them, and then the
/// batch and the tracks found in it are pushed onto two separate output ClipBoards.
#[derive(Debug)]
pub struct ReconstructionBridge {
    settings: Option<BridgeSettings>,
    input: Option<Arc<ClipBoard<EventMatrix>>>,
    events_out: Arc<ClipBoard<EventMatrix>>,
    tracks_out: Arc<ClipBoard<Vec<Track>>>,
    status: Arc<WorkerStatus>,
    worker: Option<Worker>,
}

impl Default for ReconstructionBridge {
    fn default() -> Self {
        Self {
            settings: None,
            input: None,
            events_out: Arc::new(ClipBoard::new()),
            tracks_out: Arc::new(ClipBoard::new()),
            status: Arc::new(WorkerStatus::new()),
            worker: None,
        }
    }
}

impl ReconstructionBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config and create a fresh working directory
    pub fn configure(
        &mut self,
        config: &BridgeConfig,
        source_names: Vec<String>,
    ) -> Result<(), BridgeError> {
        let geometry = config
            .geometry
            .clone()
            .ok_or(ConfigError::MissingField("geometry"))?;
        if !geometry.exists() {
            return Err(BridgeError::MissingGeometry(geometry));
        }
        if let Some(script) = &config.run_script {
            if !script.exists() {
                return Err(BridgeError::MissingRunScript(script.clone()));
            }
        }

        let stamp = OffsetDateTime::now_utc().format(format_description!(
            "[year][month][day]_[hour][minute][second]_[subsecond digits:6]"
        ))?;
        let work_dir = config
            .work_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR));
        let run_dir = work_dir.join(format!("run_{stamp}"));
        std::fs::create_dir_all(run_dir.join(BRIDGE_INPUT_DIR))?;
        log::info!("Bridge working directory: {}", run_dir.display());

        self.settings = Some(BridgeSettings {
            geometry,
            run_script: config.run_script.clone(),
            program: config
                .program
                .clone()
                .unwrap_or_else(|| String::from(DEFAULT_BRIDGE_PROGRAM)),
            run_dir,
            source_names,
        });
        Ok(())
    }

    pub fn connect(&mut self, input: Arc<ClipBoard<EventMatrix>>) {
        self.input = Some(input);
    }

    pub fn work_dir(&self) -> Option<&Path> {
        self.settings.as_ref().map(|s| s.run_dir.as_path())
    }

    pub fn run(&mut self) -> Result<(), BridgeError> {
        if self.worker.is_some() {
            return Err(BridgeError::AlreadyRunning);
        }
        let (Some(settings), Some(input)) = (self.settings.clone(), self.input.clone()) else {
            return Err(BridgeError::NotConfigured);
        };
        let events_out = self.events_out.clone();
        let tracks_out = self.tracks_out.clone();

        let mut worker = Worker::new("bridge", self.status.clone());
        let started = worker.start(move |stop: StopFlag| {
            let poll = Duration::from_millis(BRIDGE_POLL_INTERVAL_MS);
            while !stop.is_set() {
                let Some(matrix) = input.pop_data() else {
                    stop.sleep(poll);
                    continue;
                };
                let tracks = match settings.reconstruct(&matrix) {
                    Ok(tracks) => tracks,
                    Err(e) => {
                        log::error!("External reconstruction failed: {e}");
                        Vec::new()
                    }
                };
                log::debug!("Bridge found {} tracks", tracks.len());
                // tracks first, so a batch of events always has its tracks waiting
                tracks_out.push_data(tracks);
                events_out.push_data(matrix);
            }
            LoaderState::Stopped
        });
        match started {
            Ok(()) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(LoaderError::IOError(e)) => Err(BridgeError::IOError(e)),
            Err(_) => Err(BridgeError::AlreadyRunning),
        }
    }

    pub fn join(&mut self) -> LoaderStats {
        if let Some(mut worker) = self.worker.take() {
            worker.join();
        }
        self.status.snapshot()
    }

    /// Events that went through the external reconstruction, in the order they were handed in
    pub fn get_events(&self) -> Option<EventMatrix> {
        self.events_out.pop_data()
    }

    /// Tracks for each batch, paired in order with [`ReconstructionBridge::get_events`]
    pub fn get_tracks(&self) -> Option<Vec<Track>> {
        self.tracks_out.pop_data()
    }
}
