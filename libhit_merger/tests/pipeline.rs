use serde_json::json;
use std::path::Path;
use std::time::{Duration, Instant};

use libhit_merger::config::Config;
use libhit_merger::constants::INVALID_L1ID;
use libhit_merger::data_loader::LoaderRegistry;
use libhit_merger::event::{Event, Hit};
use libhit_merger::process::Pipeline;
use libhit_merger::raw_writer::{raw_file_path, RawWriter};
use libhit_merger::worker_status::LoaderState;

fn append_events(dir: &Path, name: &str, events: &[Event]) {
    let mut writer = RawWriter::append(&raw_file_path(dir, name)).unwrap();
    writer.write_events(events).unwrap();
    writer.flush().unwrap();
}

fn events(tags: std::ops::Range<u32>, l1id: u16) -> Vec<Event> {
    tags.map(|t| Event::with_hits(t, l1id, 40, vec![Hit::new(t as u16, 3, 9)]).unwrap())
        .collect()
}

fn source(name: &str, z: f64) -> serde_json::Value {
    json!({
        "name": name,
        "position": [0.0, 0.0, z],
        "angle": [0.0, 0.0, 0.0],
        "size": [20.0, 16.8],
        "rowcol": [336, 80],
    })
}

fn collect_until(pipeline: &mut Pipeline, total: usize, out: &mut [Vec<Event>]) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while out[0].len() < total {
        assert!(Instant::now() < deadline, "timed out waiting for events");
        let batch = pipeline.cycle();
        assert!(batch.iter().all(|b| b.len() == batch[0].len()));
        for (collected, mut new) in out.iter_mut().zip(batch) {
            collected.append(&mut new);
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_growing_files_are_reconstructed() {
    let dir = tempfile::tempdir().unwrap();
    append_events(dir.path(), "telescope0", &events(0..3, 11));
    append_events(dir.path(), "telescope1", &events(0..2, INVALID_L1ID));

    let config = Config::from_value(json!({
        "global_source_config": { "auto": true, "path": dir.path(), "block_timeout": 200 },
        "sources": [
            source("telescope0", 0.0),
            source("telescope1", 25.0),
            { "name": "spare", "enable": false },
        ],
    }))
    .unwrap();

    let mut pipeline = Pipeline::new(&config, &LoaderRegistry::with_defaults()).unwrap();
    assert_eq!(pipeline.source_names(), ["telescope0", "telescope1"]);
    assert!(!pipeline.reconstructor().is_renumbering());
    pipeline.start().unwrap();

    let mut out = vec![Vec::new(), Vec::new()];
    collect_until(&mut pipeline, 2, &mut out);
    assert!(pipeline.reconstructor().is_renumbering());

    // The slower source catches up while the pipeline is running
    append_events(dir.path(), "telescope1", &events(2..5, INVALID_L1ID));
    append_events(dir.path(), "telescope0", &events(3..5, 11));
    collect_until(&mut pipeline, 5, &mut out);

    let stats = pipeline.stop();
    assert!(stats.iter().all(|s| s.state == LoaderState::Stopped));
    assert_eq!(stats[0].total_events, 5);
    assert_eq!(stats[1].total_hits, 5);

    for source_events in &out {
        let tags: Vec<u32> = source_events.iter().map(|e| e.tag).collect();
        assert_eq!(tags, vec![0, 1, 2, 3, 4]);
        let ids: Vec<(u16, u16)> = source_events.iter().map(|e| (e.l1id, e.bcid)).collect();
        assert_eq!(ids, vec![(0, 0), (1, 1), (2, 2), (3, 3), (4, 4)]);
        assert!(source_events.iter().all(|e| e.n_hits() == 1));
    }
    assert!(pipeline.reconstructor().is_drained());
}
