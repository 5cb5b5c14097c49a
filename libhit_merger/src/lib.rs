//! # hit_merger
//!
//! hit_merger reconstructs the hit streams of several pixel detector front ends into aligned,
//! consistently numbered events. Each front end (a raw file on disk, a TCP stream, or a ZeroMQ
//! publisher) is read by its own DataLoader thread; the batches it decodes are handed over a
//! ClipBoard to the EventReconstructor, which matches them up event by event and, when asked
//! to, re-stamps them with a shared trigger counter. The aligned events can then be written
//! back to disk or handed to an external track reconstruction program.
//!
//! ## Building
//!
//! The library has no system dependencies by default. The ZeroMQ loader is behind the `zmq`
//! feature, which needs libzmq to be installed:
//!
//! ```text
//! cargo build --features zmq
//! ```
//!
//! To build and install the CLI use `cargo install --path ./hit_merger_cli` from the top level
//! of the repository.
//!
//! ## Configuration
//!
//! Configs are JSON (`.json`) or YAML (`.yml`/`.yaml`) documents. Keys in
//! `global_source_config` apply to every source unless the source sets them itself.
//!
//! ```json
//! {
//!     "global_source_config": { "auto": true, "path": "./data", "block_timeout": 1000 },
//!     "sources": [
//!         {
//!             "name": "fe0",
//!             "loader": "file",
//!             "position": [0.0, 0.0, 0.0],
//!             "angle": [0.0, 0.0, 0.0],
//!             "size": [20.0, 16.8],
//!             "rowcol": [336, 80]
//!         },
//!         {
//!             "name": "fe1",
//!             "loader": "tcp",
//!             "server_ip": "192.168.1.10",
//!             "port": "5000",
//!             "position": [0.0, 0.0, 25.0],
//!             "angle": [0.0, 0.0, 0.0],
//!             "size": [20.0, 16.8],
//!             "rowcol": [336, 80]
//!         }
//!     ],
//!     "trigger_multiplier": 16,
//!     "bridge": { "geometry": "./telescope.geo" }
//! }
//! ```
//!
//! The source keys are:
//!
//! - `name`: unique name of the front end. Required.
//! - `loader`: `file` (default), `tcp`, or `zmq`.
//! - `enable`: disabled sources are skipped entirely. Defaults to true.
//! - `path`, `auto`: the raw file to read. With `auto` set, `path` is a directory and the file
//! is `<path>/<name>_data.raw`.
//! - `server_ip`, `port`: where a socket source connects. The port may be a string or an integer.
//! - `max_connection_retries`, `max_retry_delay` (ms): reconnect budget of socket sources.
//! - `block_timeout` (µs): how long a file source waits for more data.
//! - `receive_timeout` (ms): read timeout of socket sources.
//! - `max_events_per_block`: upper bound on the batch size.
//! - `trigger_multiplier`: enables re-numbering (also accepted at the top level).
//! - `position`, `angle`, `size`, `rowcol`: geometry of the front end.
//!
//! ## Raw Event Format
//!
//! Raw files, TCP packets and ZeroMQ messages all carry events in the same little-endian
//! layout, one record after another with no file header:
//!
//! ```text
//! tag(u32) l1id(u16) bcid(u16) nHits(u16) [col(u16) row(u16) tot(u16)] * nHits
//! ```
//!
//! On TCP each packet is prefixed by its length as a big-endian u32.
pub mod bridge;
pub mod clipboard;
pub mod config;
pub mod constants;
pub mod data_loader;
pub mod error;
pub mod event;
pub mod event_data;
pub mod event_reconstructor;
pub mod fe_bookie;
pub mod file_loader;
pub mod process;
pub mod raw_format;
pub mod raw_writer;
pub mod socket_loader;
pub mod track;
pub mod worker;
pub mod worker_status;
#[cfg(feature = "zmq")]
pub mod zmq_loader;
