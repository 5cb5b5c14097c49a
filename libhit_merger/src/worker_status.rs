use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoaderState {
    #[default]
    Idle,
    Running,
    /// Stopped because join() asked it to
    Stopped,
    /// Stopped on its own after exhausting its retry budget
    Failed,
}

impl LoaderState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Stopped,
            3 => Self::Failed,
            _ => Self::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Stopped => 2,
            Self::Failed => 3,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

/// Status of one loader worker, shared between the worker thread and its owner.
#[derive(Debug, Default)]
pub struct WorkerStatus {
    state: AtomicU8,
    total_events: AtomicU64,
    total_hits: AtomicU64,
    total_bytes: AtomicU64,
    retries: AtomicU64,
}

/// A point-in-time copy of a [`WorkerStatus`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub state: LoaderState,
    pub total_events: u64,
    pub total_hits: u64,
    pub total_bytes: u64,
    pub retries: u64,
}

impl WorkerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LoaderState {
        LoaderState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: LoaderState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Clear the counters (the state is left alone)
    pub fn reset(&self) {
        self.total_events.store(0, Ordering::Relaxed);
        self.total_hits.store(0, Ordering::Relaxed);
        self.total_bytes.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
    }

    pub fn record_batch(&self, events: u64, hits: u64) {
        self.total_events.fetch_add(events, Ordering::Relaxed);
        self.total_hits.fetch_add(hits, Ordering::Relaxed);
    }

    pub fn record_bytes(&self, bytes: u64) {
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LoaderStats {
        LoaderStats {
            state: self.state(),
            total_events: self.total_events.load(Ordering::Relaxed),
            total_hits: self.total_hits.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}
