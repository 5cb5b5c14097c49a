use byteorder::{BigEndian, ByteOrder};
use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use super::clipboard::ClipBoard;
use super::config::SourceConfig;
use super::constants::{BASE_RETRY_DELAY_MS, MAX_PACKET_SIZE, PACKET_LENGTH_SIZE};
use super::data_loader::{DataLoader, EventSource, Fill, LoaderCore};
use super::error::LoaderError;
use super::event_data::EventData;
use super::raw_format::decode_events;
use super::worker::StopFlag;
use super::worker_status::{LoaderStats, WorkerStatus};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Delay before reconnection attempt number `retry`: min(2^retry * 100ms, max_delay)
pub fn backoff_delay(retry: u32, max_delay: Duration) -> Duration {
    let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
    Duration::from_millis(BASE_RETRY_DELAY_MS.saturating_mul(factor)).min(max_delay)
}

/// Reconnection policy shared by the socket loaders
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            max_retries: config.max_connection_retries,
            max_delay: config.max_retry_delay(),
        }
    }

    /// Keep calling connect until it succeeds, the stop flag is raised, or the budget runs out.
    ///
    /// `retries` carries over between calls and is reset on success.
    pub fn connect_with_backoff<T, F>(
        &self,
        name: &str,
        retries: &mut u32,
        status: &WorkerStatus,
        stop: &StopFlag,
        mut connect: F,
    ) -> Reconnect<T>
    where
        F: FnMut() -> std::io::Result<T>,
    {
        loop {
            if stop.is_set() {
                return Reconnect::Stopped;
            }
            match connect() {
                Ok(connection) => {
                    *retries = 0;
                    return Reconnect::Connected(connection);
                }
                Err(e) => {
                    *retries += 1;
                    status.record_retry();
                    if *retries > self.max_retries {
                        log::error!(
                            "{name}: giving up after {} connection attempts: {e}",
                            *retries
                        );
                        return Reconnect::Exhausted;
                    }
                    let delay = backoff_delay(*retries, self.max_delay);
                    log::warn!("{name}: connection failed ({e}); retrying in {delay:?}");
                    if !stop.sleep(delay) {
                        return Reconnect::Stopped;
                    }
                }
            }
        }
    }
}

pub(crate) enum Reconnect<T> {
    Connected(T),
    Stopped,
    Exhausted,
}

/// Decode one packet and add its events to the batch.
///
/// A malformed packet is dropped whole; none of its events are kept.
pub(crate) fn add_packet(name: &str, payload: &[u8], batch: &mut EventData) {
    match decode_events(payload) {
        Ok(events) => {
            for event in events {
                batch.add_event(event);
            }
        }
        Err(e) => log::warn!("{name}: dropping malformed packet of {} bytes: {e}", payload.len()),
    }
}

fn open_stream(address: &str, timeout: Duration) -> std::io::Result<TcpStream> {
    let addr = address.to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(ErrorKind::AddrNotAvailable, format!("{address} did not resolve"))
    })?;
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    Ok(stream)
}

/// Receives events over TCP.
///
/// Each packet is a big-endian u32 payload length followed by that many bytes of back-to-back
/// raw event records.
#[derive(Debug, Default)]
pub struct SocketDataLoader {
    core: LoaderCore,
    address: Option<String>,
    receive_timeout: Duration,
    retry: Option<RetryPolicy>,
    stream: Option<TcpStream>,
}

impl SocketDataLoader {
    pub const KIND: &'static str = "tcp";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

impl DataLoader for SocketDataLoader {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn name(&self) -> &str {
        &self.core.name
    }

    fn configure(&mut self, config: &SourceConfig) -> Result<(), LoaderError> {
        self.core.configure(config)?;
        self.address = Some(config.address()?);
        self.receive_timeout = config.receive_timeout();
        self.retry = Some(RetryPolicy::from_config(config));
        Ok(())
    }

    fn init(&mut self) {
        self.core.init();
        self.stream = None;
        if let Some(address) = &self.address {
            match open_stream(address, self.receive_timeout) {
                Ok(stream) => {
                    log::info!("{} connected to {address}", self.core.name);
                    self.stream = Some(stream);
                }
                Err(e) => log::debug!(
                    "{}: initial connection to {address} failed: {e}",
                    self.core.name
                ),
            }
        }
    }

    fn connect(&mut self, clipboard: Arc<ClipBoard<EventData>>) {
        self.core.connect(clipboard);
    }

    fn run(&mut self) -> Result<(), LoaderError> {
        let (Some(address), Some(retry)) = (self.address.clone(), self.retry) else {
            return Err(LoaderError::NotConfigured(self.core.name.clone()));
        };
        self.core.prepare()?;
        let source = TcpSource {
            name: self.core.name.clone(),
            address,
            receive_timeout: self.receive_timeout,
            retry,
            retries: 0,
            stream: self.stream.take(),
            pending: Vec::new(),
        };
        self.core.start(source)
    }

    fn join(&mut self) -> LoaderStats {
        self.core.join()
    }

    fn stats(&self) -> LoaderStats {
        self.core.stats()
    }
}

#[derive(Debug)]
struct TcpSource {
    name: String,
    address: String,
    receive_timeout: Duration,
    retry: RetryPolicy,
    retries: u32,
    stream: Option<TcpStream>,
    /// Bytes received but not yet forming a complete packet
    pending: Vec<u8>,
}

impl TcpSource {
    fn disconnect(&mut self) {
        self.stream = None;
        self.pending.clear();
    }

    /// Move every complete packet in the pending buffer into the batch.
    ///
    /// A length prefix over MAX_PACKET_SIZE means the framing is lost; the connection is dropped
    /// so the next one starts on a packet boundary.
    fn drain_packets(&mut self, batch: &mut EventData, max_events: usize) {
        let mut offset = 0;
        while batch.size() < max_events && self.pending.len() - offset >= PACKET_LENGTH_SIZE {
            let length =
                BigEndian::read_u32(&self.pending[offset..offset + PACKET_LENGTH_SIZE]) as usize;
            if length > MAX_PACKET_SIZE {
                log::warn!(
                    "{}: packet length {length} exceeds {MAX_PACKET_SIZE} bytes; reconnecting",
                    self.name
                );
                self.disconnect();
                return;
            }
            let start = offset + PACKET_LENGTH_SIZE;
            if self.pending.len() - start < length {
                break;
            }
            add_packet(&self.name, &self.pending[start..start + length], batch);
            offset = start + length;
        }
        self.pending.drain(..offset);
    }
}

impl EventSource for TcpSource {
    fn fill_batch(
        &mut self,
        batch: &mut EventData,
        max_events: usize,
        status: &WorkerStatus,
        stop: &StopFlag,
    ) -> Fill {
        if self.stream.is_none() {
            let (address, timeout) = (self.address.clone(), self.receive_timeout);
            match self.retry.connect_with_backoff(
                &self.name,
                &mut self.retries,
                status,
                stop,
                || open_stream(&address, timeout),
            ) {
                Reconnect::Connected(stream) => {
                    log::info!("{} connected to {address}", self.name);
                    self.stream = Some(stream);
                }
                Reconnect::Stopped => return Fill::More,
                Reconnect::Exhausted => return Fill::Failed,
            }
        }

        // packets already buffered go out first
        self.drain_packets(batch, max_events);
        if batch.size() >= max_events {
            return Fill::More;
        }

        let Some(stream) = self.stream.as_mut() else {
            return Fill::More;
        };
        let mut buffer = [0u8; READ_BUFFER_SIZE];
        match stream.read(&mut buffer) {
            Ok(0) => {
                log::warn!("{}: connection closed by {}", self.name, self.address);
                self.disconnect();
            }
            Ok(n) => {
                status.record_bytes(n as u64);
                self.pending.extend_from_slice(&buffer[..n]);
                self.drain_packets(batch, max_events);
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => (),
            Err(e) if e.kind() == ErrorKind::Interrupted => (),
            Err(e) => {
                log::warn!("{}: receive failed: {e}", self.name);
                self.disconnect();
            }
        }
        Fill::More
    }

    fn idle_time(&self) -> Duration {
        Duration::ZERO
    }
}
