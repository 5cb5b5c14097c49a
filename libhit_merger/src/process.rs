use std::sync::Arc;

use super::bridge::{EventMatrix, ReconstructionBridge};
use super::clipboard::ClipBoard;
use super::config::Config;
use super::data_loader::{DataLoader, LoaderRegistry};
use super::error::ProcessorError;
use super::event_reconstructor::EventReconstructor;
use super::fe_bookie::FeBookie;
use super::worker_status::LoaderStats;

/// The bridge and the ClipBoard the pipeline feeds it through
#[derive(Debug)]
struct BridgeStage {
    bridge: ReconstructionBridge,
    input: Arc<ClipBoard<EventMatrix>>,
}

/// The full reconstruction chain: one loader per enabled source feeding an EventReconstructor,
/// and optionally the external reconstruction bridge after it.
///
/// Front end ids are assigned in the order enabled sources appear in the config, starting at
/// 0, and every source is registered in the [`FeBookie`] under that id.
pub struct Pipeline {
    loaders: Vec<Box<dyn DataLoader>>,
    reconstructor: EventReconstructor,
    source_names: Vec<String>,
    bridge: Option<BridgeStage>,
    running: bool,
}

impl Pipeline {
    /// Build (but do not start) the pipeline described by config.
    ///
    /// Every enabled source is validated and configured before anything runs, so a bad config
    /// never leaves half a pipeline running.
    pub fn new(config: &Config, registry: &LoaderRegistry) -> Result<Self, ProcessorError> {
        config.validate()?;

        let mut reconstructor = EventReconstructor::new();
        if let Some(mult) = config.trigger_multiplier {
            reconstructor.set_trigger_multiplier(mult);
        }

        let mut loaders = Vec::new();
        let mut source_names = Vec::new();
        for (fe_id, source) in config.enabled_sources().enumerate() {
            let name = source.name()?;
            FeBookie::register(fe_id as u32, name)?;
            let mut loader = registry.create_configured(source)?;
            reconstructor.configure(loader.as_mut(), fe_id, source)?;
            log::info!("Source {fe_id}: {name} via {} loader", loader.kind());
            source_names.push(name.to_string());
            loaders.push(loader);
        }

        let bridge = match &config.bridge {
            Some(bridge_config) => {
                let mut bridge = ReconstructionBridge::new();
                bridge.configure(bridge_config, source_names.clone())?;
                let input = Arc::new(ClipBoard::new());
                bridge.connect(input.clone());
                Some(BridgeStage { bridge, input })
            }
            None => None,
        };

        Ok(Self {
            loaders,
            reconstructor,
            source_names,
            bridge,
            running: false,
        })
    }

    /// Initialize and start every loader, and the bridge if there is one
    pub fn start(&mut self) -> Result<(), ProcessorError> {
        for loader in self.loaders.iter_mut() {
            loader.init();
            loader.run()?;
        }
        if let Some(stage) = self.bridge.as_mut() {
            stage.bridge.run()?;
        }
        self.running = true;
        Ok(())
    }

    /// Run one reconstruction cycle.
    ///
    /// Without a bridge the aligned events are returned, one entry per source. With a bridge
    /// they are moved into it instead and every returned entry is empty; the events come back
    /// out of [`ReconstructionBridge::get_events`] alongside their tracks.
    pub fn cycle(&mut self) -> EventMatrix {
        let events = self.reconstructor.get_events();
        match &self.bridge {
            Some(stage) => {
                let n_slots = events.len();
                if events.iter().any(|e| !e.is_empty()) {
                    stage.input.push_data(events);
                }
                vec![Vec::new(); n_slots]
            }
            None => events,
        }
    }

    /// True once every loader has stopped on its own and nothing is left to reconstruct or
    /// queued for the bridge.
    ///
    /// File loaders follow their file and never stop on their own, so a pipeline with a file
    /// source only finishes when the caller stops it.
    pub fn is_finished(&self) -> bool {
        let bridge_idle = self.bridge.as_ref().map_or(true, |s| s.input.empty());
        self.loaders.iter().all(|l| l.stats().state.is_finished())
            && self.reconstructor.is_drained()
            && bridge_idle
    }

    pub fn has_bridge(&self) -> bool {
        self.bridge.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Stop and join every loader (and the bridge). Returns the final stats per source.
    pub fn stop(&mut self) -> Vec<LoaderStats> {
        let stats = self.loaders.iter_mut().map(|l| l.join()).collect();
        if let Some(stage) = self.bridge.as_mut() {
            stage.bridge.join();
            if !stage.input.empty() {
                log::warn!(
                    "{} batches never reached the external reconstruction",
                    stage.input.size()
                );
            }
        }
        self.running = false;
        stats
    }

    pub fn stats(&self) -> Vec<LoaderStats> {
        self.loaders.iter().map(|l| l.stats()).collect()
    }

    pub fn source_names(&self) -> &[String] {
        &self.source_names
    }

    pub fn reconstructor(&self) -> &EventReconstructor {
        &self.reconstructor
    }

    pub fn bridge(&self) -> Option<&ReconstructionBridge> {
        self.bridge.as_ref().map(|s| &s.bridge)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.running {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::event::{Event, Hit};
    use crate::raw_writer::{raw_file_path, RawWriter};
    use serde_json::json;
    use std::time::{Duration, Instant};

    fn source(name: &str) -> serde_json::Value {
        json!({
            "name": name,
            "position": [0.0, 0.0, 0.0],
            "angle": [0.0, 0.0, 0.0],
            "size": [20.0, 16.8],
            "rowcol": [336, 80],
        })
    }

    fn write_source(dir: &std::path::Path, name: &str, n_events: u32) {
        let events: Vec<Event> = (0..n_events)
            .map(|i| Event::with_hits(i, 7, 7, vec![Hit::new(i as u16, 1, 2)]).unwrap())
            .collect();
        let mut writer = RawWriter::new(&raw_file_path(dir, name)).unwrap();
        writer.write_events(&events).unwrap();
        writer.flush().unwrap();
    }

    #[test]
    fn test_invalid_config_starts_nothing() {
        let config = Config::from_value(json!({
            "sources": [{ "name": "fe0", "enable": false }],
        }))
        .unwrap();
        assert!(matches!(
            Pipeline::new(&config, &LoaderRegistry::with_defaults()),
            Err(ProcessorError::ConfigError(ConfigError::NoSources))
        ));

        let config = Config::from_value(json!({
            "sources": [{ "name": "fe0" }],
        }))
        .unwrap();
        assert!(matches!(
            Pipeline::new(&config, &LoaderRegistry::with_defaults()),
            Err(ProcessorError::ConfigError(ConfigError::MissingField(_)))
        ));
    }

    #[test]
    fn test_file_sources_are_aligned() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), "fe0", 4);
        write_source(dir.path(), "fe1", 3);

        let config = Config::from_value(json!({
            "global_source_config": { "auto": true, "path": dir.path() },
            "sources": [source("fe0"), source("fe1")],
            "trigger_multiplier": 2,
        }))
        .unwrap();
        let mut pipeline = Pipeline::new(&config, &LoaderRegistry::with_defaults()).unwrap();
        assert_eq!(pipeline.source_names(), ["fe0", "fe1"]);
        assert_eq!(FeBookie::name(1).as_deref(), Some("fe1"));
        pipeline.start().unwrap();
        assert!(pipeline.is_running());

        let mut fe0 = Vec::new();
        let mut fe1 = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        while fe1.len() < 3 && Instant::now() < deadline {
            let mut events = pipeline.cycle();
            fe1.append(&mut events[1]);
            fe0.append(&mut events[0]);
            std::thread::sleep(Duration::from_millis(1));
        }
        let stats = pipeline.stop();

        assert_eq!(fe0.len(), 3);
        assert_eq!(fe1.len(), 3);
        let ids: Vec<(u16, u16)> = fe1.iter().map(|e| (e.l1id, e.bcid)).collect();
        assert_eq!(ids, vec![(0, 0), (1, 0), (2, 1)]);
        assert_eq!(fe0[2].tag, 2);
        assert_eq!(pipeline.reconstructor().leftover_len(0), 1);
        assert_eq!(stats.iter().map(|s| s.total_events).sum::<u64>(), 7);
        assert!(!pipeline.is_finished());
    }

    #[cfg(unix)]
    #[test]
    fn test_bridge_takes_the_events() {
        use crate::config::BridgeConfig;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), "fe0", 1);
        write_source(dir.path(), "fe1", 1);
        let geometry = dir.path().join("telescope.geo");
        std::fs::write(&geometry, "[fe0]\n[fe1]\n").unwrap();
        let script = dir.path().join("reconstruct.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = Config::from_value(json!({
            "global_source_config": { "auto": true, "path": dir.path() },
            "sources": [source("fe0"), source("fe1")],
        }))
        .unwrap();
        config.bridge = Some(BridgeConfig {
            geometry: Some(geometry),
            run_script: Some(script),
            work_dir: Some(dir.path().join("work")),
            ..Default::default()
        });
        let mut pipeline = Pipeline::new(&config, &LoaderRegistry::with_defaults()).unwrap();
        assert!(pipeline.has_bridge());
        pipeline.start().unwrap();

        let mut direct = 0;
        let mut via_bridge = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        while via_bridge.is_empty() && Instant::now() < deadline {
            let events = pipeline.cycle();
            assert_eq!(events.len(), 2);
            direct += events.iter().map(|e| e.len()).sum::<usize>();
            if let Some(bridge) = pipeline.bridge() {
                via_bridge.extend(bridge.get_events());
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        // a few more cycles must not produce the batch again
        for _ in 0..20 {
            direct += pipeline.cycle().iter().map(|e| e.len()).sum::<usize>();
            std::thread::sleep(Duration::from_millis(1));
        }
        let bridge = pipeline.bridge().unwrap();
        assert!(bridge.get_events().is_none());
        assert_eq!(bridge.get_tracks(), Some(Vec::new()));
        pipeline.stop();

        assert_eq!(direct, 0);
        assert_eq!(via_bridge.len(), 1);
        assert_eq!(via_bridge[0][0].len(), 1);
        assert_eq!(via_bridge[0][1].len(), 1);
        assert!(pipeline.is_finished());
    }
}
