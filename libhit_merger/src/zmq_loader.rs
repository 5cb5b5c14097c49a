use std::sync::Arc;
use std::time::Duration;

use super::clipboard::ClipBoard;
use super::config::SourceConfig;
use super::data_loader::{DataLoader, EventSource, Fill, LoaderCore};
use super::error::LoaderError;
use super::event_data::EventData;
use super::socket_loader::{add_packet, Reconnect, RetryPolicy};
use super::worker::StopFlag;
use super::worker_status::{LoaderStats, WorkerStatus};

fn open_subscriber(
    context: &zmq::Context,
    endpoint: &str,
    timeout: Duration,
) -> std::io::Result<zmq::Socket> {
    let inner = || -> zmq::Result<zmq::Socket> {
        let socket = context.socket(zmq::SUB)?;
        socket.set_linger(0)?;
        socket.set_rcvtimeo(timeout.as_millis().min(i32::MAX as u128) as i32)?;
        socket.set_subscribe(b"")?;
        socket.connect(endpoint)?;
        Ok(socket)
    };
    inner().map_err(std::io::Error::other)
}

/// Receives events from a ZeroMQ publisher.
///
/// Every message is one payload of back-to-back raw event records. If a message has several
/// parts (topic + data) the last part is the payload.
#[derive(Default)]
pub struct ZmqDataLoader {
    core: LoaderCore,
    endpoint: Option<String>,
    receive_timeout: Duration,
    retry: Option<RetryPolicy>,
    socket: Option<(zmq::Context, zmq::Socket)>,
}

impl ZmqDataLoader {
    pub const KIND: &'static str = "zmq";

    pub fn new() -> Self {
        Self::default()
    }
}

impl DataLoader for ZmqDataLoader {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn name(&self) -> &str {
        &self.core.name
    }

    fn configure(&mut self, config: &SourceConfig) -> Result<(), LoaderError> {
        self.core.configure(config)?;
        self.endpoint = Some(format!("tcp://{}", config.address()?));
        self.receive_timeout = config.receive_timeout();
        self.retry = Some(RetryPolicy::from_config(config));
        Ok(())
    }

    fn init(&mut self) {
        self.core.init();
        self.socket = None;
        if let Some(endpoint) = &self.endpoint {
            let context = zmq::Context::new();
            match open_subscriber(&context, endpoint, self.receive_timeout) {
                Ok(socket) => {
                    log::info!("{} subscribed to {endpoint}", self.core.name);
                    self.socket = Some((context, socket));
                }
                Err(e) => log::debug!(
                    "{}: initial subscribe to {endpoint} failed: {e}",
                    self.core.name
                ),
            }
        }
    }

    fn connect(&mut self, clipboard: Arc<ClipBoard<EventData>>) {
        self.core.connect(clipboard);
    }

    fn run(&mut self) -> Result<(), LoaderError> {
        let (Some(endpoint), Some(retry)) = (self.endpoint.clone(), self.retry) else {
            return Err(LoaderError::NotConfigured(self.core.name.clone()));
        };
        self.core.prepare()?;
        let (context, socket) = match self.socket.take() {
            Some((context, socket)) => (context, Some(socket)),
            None => (zmq::Context::new(), None),
        };
        self.core.start(ZmqSource {
            name: self.core.name.clone(),
            endpoint,
            receive_timeout: self.receive_timeout,
            retry,
            retries: 0,
            context,
            socket,
        })
    }

    fn join(&mut self) -> LoaderStats {
        self.core.join()
    }

    fn stats(&self) -> LoaderStats {
        self.core.stats()
    }
}

struct ZmqSource {
    name: String,
    endpoint: String,
    receive_timeout: Duration,
    retry: RetryPolicy,
    retries: u32,
    context: zmq::Context,
    socket: Option<zmq::Socket>,
}

impl EventSource for ZmqSource {
    fn fill_batch(
        &mut self,
        batch: &mut EventData,
        max_events: usize,
        status: &WorkerStatus,
        stop: &StopFlag,
    ) -> Fill {
        if self.socket.is_none() {
            let context = &self.context;
            let (endpoint, timeout) = (&self.endpoint, self.receive_timeout);
            match self.retry.connect_with_backoff(
                &self.name,
                &mut self.retries,
                status,
                stop,
                || open_subscriber(context, endpoint, timeout),
            ) {
                Reconnect::Connected(socket) => self.socket = Some(socket),
                Reconnect::Stopped => return Fill::More,
                Reconnect::Exhausted => return Fill::Failed,
            }
        }
        let Some(socket) = self.socket.as_ref() else {
            return Fill::More;
        };

        while batch.size() < max_events {
            let flags = if batch.is_empty() { 0 } else { zmq::DONTWAIT };
            match socket.recv_multipart(flags) {
                Ok(mut parts) => {
                    let payload = parts.pop().unwrap_or_default();
                    status.record_bytes(payload.len() as u64);
                    add_packet(&self.name, &payload, batch);
                }
                Err(zmq::Error::EAGAIN) => break,
                Err(e) => {
                    log::warn!("{}: receive failed: {e}", self.name);
                    self.socket = None;
                    break;
                }
            }
        }
        Fill::More
    }

    fn idle_time(&self) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, Hit};
    use crate::raw_format::encode_events;
    use std::time::Instant;

    #[test]
    fn test_receives_published_events() {
        let context = zmq::Context::new();
        let publisher = context.socket(zmq::PUB).unwrap();
        publisher.bind("tcp://127.0.0.1:*").unwrap();
        let endpoint = publisher.get_last_endpoint().unwrap().unwrap();
        let port = endpoint.rsplit(':').next().unwrap().to_string();

        let mut config = SourceConfig::named("zmq_fe");
        config.port = Some(port);
        config.receive_timeout = 20;

        let clipboard = Arc::new(ClipBoard::new());
        let mut loader = ZmqDataLoader::new();
        loader.configure(&config).unwrap();
        loader.init();
        loader.connect(clipboard.clone());
        loader.run().unwrap();

        let events = vec![Event::with_hits(9, 1, 1, vec![Hit::new(3, 4, 5)]).unwrap()];
        let payload = encode_events(&events).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        // subscribers miss anything published before they finish connecting
        let batch = loop {
            publisher.send(payload.as_slice(), 0).unwrap();
            std::thread::sleep(Duration::from_millis(10));
            if let Some(batch) = clipboard.pop_data() {
                break batch;
            }
            assert!(Instant::now() < deadline, "no message arrived");
        };
        assert_eq!(batch.events()[0], events[0]);
        loader.join();
    }
}
