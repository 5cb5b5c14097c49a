use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use libhit_merger::config::{Config, ConfigFile};
use libhit_merger::data_loader::LoaderRegistry;
use libhit_merger::error::ProcessorError;
use libhit_merger::process::Pipeline;
use libhit_merger::raw_writer::{raw_file_path, RawWriter};

const LOG_FILE: &str = "hit_merger.log";
const CYCLE_SLEEP: Duration = Duration::from_millis(5);

fn make_template_config(path: &Path) -> Result<(), std::io::Error> {
    let json_str = serde_json::to_string_pretty(&ConfigFile::template())?;
    let mut file = File::create(path)?;
    file.write_all(json_str.as_bytes())?;
    Ok(())
}

/// Drive the pipeline until every source has been quiet for idle_timeout (or has stopped),
/// writing the aligned events to one raw file per source.
///
/// File sources never stop on their own, so runs over files always end on the idle timeout.
fn merge(
    config: &Config,
    output: &Path,
    idle_timeout: Duration,
    pb: &ProgressBar,
) -> Result<u64, ProcessorError> {
    let mut pipeline = Pipeline::new(config, &LoaderRegistry::with_defaults())?;
    std::fs::create_dir_all(output)?;
    let mut writers = pipeline
        .source_names()
        .iter()
        .map(|name| RawWriter::new(&raw_file_path(output, name)))
        .collect::<Result<Vec<_>, _>>()?;

    pipeline.start()?;
    let mut aligned: u64 = 0;
    let mut tracks: u64 = 0;
    let mut last_data = Instant::now();
    loop {
        // with a bridge the aligned events come back out of it, each batch exactly once
        let mut batches = vec![pipeline.cycle()];
        if let Some(bridge) = pipeline.bridge() {
            batches.extend(std::iter::from_fn(|| bridge.get_events()));
            while let Some(found) = bridge.get_tracks() {
                tracks += found.len() as u64;
            }
        }
        let mut n_aligned = 0;
        for events in batches {
            let n_batch = events.iter().map(|e| e.len()).max().unwrap_or(0);
            if n_batch == 0 {
                continue;
            }
            for (writer, source_events) in writers.iter_mut().zip(&events) {
                writer.write_events(source_events)?;
            }
            n_aligned += n_batch;
        }
        if n_aligned > 0 {
            aligned += n_aligned as u64;
            last_data = Instant::now();
            pb.set_message(format!("{aligned} aligned events"));
        }
        pb.tick();

        if pipeline.is_finished() {
            log::info!("Every source has stopped.");
            break;
        }
        if last_data.elapsed() >= idle_timeout {
            log::info!(
                "No new events for {} s, stopping.",
                idle_timeout.as_secs_f64()
            );
            break;
        }
        if n_aligned == 0 {
            std::thread::sleep(CYCLE_SLEEP);
        }
    }

    let stats = pipeline.stop();
    for (name, stat) in pipeline.source_names().iter().zip(&stats) {
        log::info!(
            "{name}: {:?} after {} events, {} hits",
            stat.state,
            stat.total_events,
            stat.total_hits
        );
    }
    for (name, leftover) in pipeline
        .source_names()
        .iter()
        .enumerate()
        .map(|(fe, name)| (name, pipeline.reconstructor().leftover_len(fe)))
        .filter(|(_, leftover)| *leftover > 0)
    {
        log::warn!("{name}: {leftover} events could not be aligned and were dropped");
    }
    for writer in writers.iter_mut() {
        writer.flush()?;
        log::info!(
            "Wrote {} events to {}",
            writer.events_written(),
            writer.path().to_string_lossy()
        );
    }
    if pipeline.bridge().is_some() {
        log::info!("External reconstruction found {tracks} tracks");
    }
    Ok(aligned)
}

fn main() {
    // Create a cli
    let matches = Command::new("hit_merger_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration json file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the config file"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .default_value("./merged")
                .help("Directory the aligned raw files are written to"),
        )
        .arg(
            Arg::new("idle-timeout")
                .short('t')
                .long("idle-timeout")
                .value_parser(clap::value_parser!(u64))
                .default_value("5")
                .help("Stop after this many seconds without new events"),
        )
        .get_matches();

    // Initialize feedback
    let mut loggers: Vec<Box<dyn simplelog::SharedLogger>> = vec![simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )];
    match File::create(LOG_FILE) {
        Ok(file) => loggers.push(simplelog::WriteLogger::new(
            simplelog::LevelFilter::Debug,
            simplelog::Config::default(),
            file,
        )),
        Err(e) => eprintln!("Could not create log file {LOG_FILE}: {e}"),
    }
    let logger = simplelog::CombinedLogger::new(loggers);

    let pb_manager = MultiProgress::new();
    if let Err(e) = LogWrapper::new(pb_manager.clone(), logger).try_init() {
        eprintln!("Could not create logging/progress: {e}");
        return;
    }
    log::set_max_level(log::LevelFilter::Debug);

    // Parse the cli
    let Some(config_path) = matches.get_one::<String>("path").map(PathBuf::from) else {
        log::error!("A config path is required");
        return;
    };

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        match make_template_config(&config_path) {
            Ok(()) => log::info!("Done."),
            Err(e) => log::error!("Could not write template config: {e}"),
        }
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    for source in config.enabled_sources() {
        log::info!(
            "Source {} ({})",
            source.name.as_deref().unwrap_or("<unnamed>"),
            source.loader
        );
    }
    match config.trigger_multiplier {
        Some(mult) => log::info!("Trigger multiplier: {mult}"),
        None => log::info!("Trigger multiplier: not set"),
    }

    let output = matches
        .get_one::<String>("output")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./merged"));
    let idle_timeout = Duration::from_secs(
        matches
            .get_one::<u64>("idle-timeout")
            .copied()
            .unwrap_or(5),
    );

    // Setup the progress spinner
    let pb = pb_manager.add(ProgressBar::new_spinner());
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }

    match merge(&config, &output, idle_timeout, &pb) {
        Ok(aligned) => log::info!("Successfully merged {aligned} events!"),
        Err(e) => log::error!("Merging failed with error: {e}"),
    }

    pb.finish();

    log::info!("Done.");
}
