use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::constants::RETRY_SLEEP_SLICE_MS;
use super::error::LoaderError;
use super::worker_status::{LoaderState, WorkerStatus};

/// The cooperative stop signal observed by a worker thread.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Sleep for the given duration in short slices, waking early if the flag is set.
    ///
    /// Returns false if the sleep was cut short by a stop request.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let slice = Duration::from_millis(RETRY_SLEEP_SLICE_MS);
        loop {
            if self.is_set() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(slice.min(deadline - now));
        }
    }
}

/// Owns the background thread of a DataLoader.
///
/// The thread body receives a [`StopFlag`] it must check at the top of each iteration and
/// returns the state it finished in. The worker is never terminated forcibly.
#[derive(Debug)]
pub struct Worker {
    name: String,
    stop: StopFlag,
    status: Arc<WorkerStatus>,
    handle: Option<JoinHandle<LoaderState>>,
}

impl Worker {
    pub fn new(name: &str, status: Arc<WorkerStatus>) -> Self {
        Self {
            name: name.to_string(),
            stop: StopFlag::new(),
            status,
            handle: None,
        }
    }

    pub fn start<F>(&mut self, body: F) -> Result<(), LoaderError>
    where
        F: FnOnce(StopFlag) -> LoaderState + Send + 'static,
    {
        if self.handle.is_some() {
            return Err(LoaderError::AlreadyRunning(self.name.clone()));
        }
        self.stop.clear();
        self.status.set_state(LoaderState::Running);

        let stop = self.stop.clone();
        let status = self.status.clone();
        let handle = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let state = body(stop);
                status.set_state(state);
                state
            });
        match handle {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.status.set_state(LoaderState::Failed);
                Err(LoaderError::IOError(e))
            }
        }
    }

    pub fn request_stop(&self) {
        self.stop.set();
    }

    /// Stop the worker and wait for it to exit. Joining a worker that never started is a no-op.
    pub fn join(&mut self) -> LoaderState {
        self.request_stop();
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(state) => state,
                Err(_) => {
                    log::error!("Worker thread for {} panicked!", self.name);
                    self.status.set_state(LoaderState::Failed);
                    LoaderState::Failed
                }
            },
            None => self.status.state(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooperative_stop() {
        let status = Arc::new(WorkerStatus::new());
        let mut worker = Worker::new("test", status.clone());
        worker
            .start(|stop| {
                while !stop.is_set() {
                    std::thread::sleep(Duration::from_millis(1));
                }
                LoaderState::Stopped
            })
            .unwrap();
        assert!(worker.is_running());
        assert_eq!(status.state(), LoaderState::Running);
        assert!(matches!(
            worker.start(|_| LoaderState::Stopped),
            Err(LoaderError::AlreadyRunning(_))
        ));

        assert_eq!(worker.join(), LoaderState::Stopped);
        assert_eq!(status.state(), LoaderState::Stopped);
        assert!(!worker.is_running());
    }

    #[test]
    fn test_self_stop_reports_failure() {
        let status = Arc::new(WorkerStatus::new());
        let mut worker = Worker::new("failing", status.clone());
        worker.start(|_| LoaderState::Failed).unwrap();
        while worker.is_running() {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(status.state(), LoaderState::Failed);
        assert_eq!(worker.join(), LoaderState::Failed);
    }

    #[test]
    fn test_sleep_interrupted() {
        let stop = StopFlag::new();
        assert!(stop.sleep(Duration::from_millis(5)));
        stop.set();
        let start = Instant::now();
        assert!(!stop.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
