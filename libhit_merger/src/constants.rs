// Raw event format
pub const EVENT_HEADER_SIZE: usize = 8; // tag(4) + l1id(2) + bcid(2)
pub const NHITS_SIZE: usize = 2;
pub const HIT_SIZE: usize = 6; // col(2) + row(2) + tot(2)
pub const RAW_FILE_SUFFIX: &str = "_data.raw";

// Sockets
pub const PACKET_LENGTH_SIZE: usize = 4;
/// Length prefixes above this are treated as a corrupt stream
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;
pub const BASE_RETRY_DELAY_MS: u64 = 100;
pub const RETRY_SLEEP_SLICE_MS: u64 = 10;

/// Front ends that cannot provide a usable level-1 trigger id report this value
pub const INVALID_L1ID: u16 = u16::MAX;

// Source config defaults
pub const DEFAULT_SERVER_IP: &str = "127.0.0.1";
pub const DEFAULT_MAX_CONNECTION_RETRIES: u32 = 10;
pub const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 60_000;
pub const DEFAULT_BLOCK_TIMEOUT_US: u64 = 1_000;
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_LOADER_KIND: &str = "file";

// External reconstruction
pub const STRAIGHT_LINE_TRACK: &str = "StraightLineTrack";
pub const GBL_TRACK: &str = "GblTrack";
pub const MULTIPLET_TRACK: &str = "Multiplet";
pub const STRAIGHT_LINE_TRACK_VALUES: usize = 10;
pub const DEFAULT_BRIDGE_PROGRAM: &str = "corry";
pub const BRIDGE_CONFIG_NAME: &str = "reconstruction.conf";
pub const BRIDGE_INPUT_DIR: &str = "input";
pub const BRIDGE_POLL_INTERVAL_MS: u64 = 10;
