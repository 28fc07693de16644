//! Physical connections
//!
//! One `Connection` per endpoint key. Each connected endpoint runs a single
//! background worker that serves every sensor bound to it. Workers hand
//! decoded frames and faults to an `EventSink`; they never block on
//! consumers.

pub mod modbus;
pub mod reconnect;
pub mod registry;
pub mod serial;
pub mod tcp;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{Endpoint, EndpointKey, ModbusAddress};
use crate::error::Result;
use crate::protocols::{FrameCodec, FrameItem, RawReading};

pub use reconnect::{ReconnectHelper, ReconnectPolicy, ReconnectSettings};
pub use registry::EndpointRegistry;

// ============================================================================
// Events
// ============================================================================

/// What a worker produces
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Reading {
        endpoint: EndpointKey,
        reading: RawReading,
    },
    /// The listed sensors could not produce a value
    Fault {
        endpoint: EndpointKey,
        sensor_ids: Vec<u32>,
        reason: String,
    },
}

/// Receiver of worker output; called on the worker task
pub trait EventSink: Send + Sync + 'static {
    fn on_event(&self, event: ConnectionEvent);
}

// ============================================================================
// Settings
// ============================================================================

/// Timing shared by every connection of a manager
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    /// Modbus poll tick (system-wide update rate)
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    /// Idle read bound for Serial/TCP streams
    pub read_timeout: Duration,
    /// Modbus request/response bound
    pub response_timeout: Duration,
    pub modbus_connect_attempts: u32,
    pub modbus_retry_delay: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(1),
            response_timeout: Duration::from_secs(3),
            modbus_connect_attempts: 3,
            modbus_retry_delay: Duration::from_secs(1),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

// ============================================================================
// Worker plumbing
// ============================================================================

/// A sensor's subscription to an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorBinding {
    pub sensor_id: u32,
    /// Set for Modbus endpoints
    pub modbus: Option<ModbusAddress>,
}

#[derive(Debug, Default)]
struct LinkState {
    connected: AtomicBool,
    decode_errors: AtomicU64,
}

/// Everything a worker task needs; cheap to clone
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) key: EndpointKey,
    pub(crate) settings: ConnectionSettings,
    pub(crate) cancel: CancellationToken,
    bindings: Arc<RwLock<Vec<SensorBinding>>>,
    link: Arc<LinkState>,
    sink: Arc<dyn EventSink>,
}

impl WorkerContext {
    pub(crate) fn bindings(&self) -> Vec<SensorBinding> {
        self.bindings.read().clone()
    }

    pub(crate) fn sensor_ids(&self) -> Vec<u32> {
        self.bindings.read().iter().map(|b| b.sensor_id).collect()
    }

    fn is_bound(&self, sensor_id: u32) -> bool {
        self.bindings.read().iter().any(|b| b.sensor_id == sensor_id)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.link.connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn publish_reading(&self, reading: RawReading) {
        if !self.is_bound(reading.sensor_id) {
            warn!(
                "{}: reading for unbound sensor {} dropped",
                self.key, reading.sensor_id
            );
            return;
        }
        debug!("{}: sensor {} = {}", self.key, reading.sensor_id, reading.value);
        self.sink.on_event(ConnectionEvent::Reading {
            endpoint: self.key.clone(),
            reading,
        });
    }

    pub(crate) fn fault(&self, sensor_ids: Vec<u32>, reason: impl Into<String>) {
        if sensor_ids.is_empty() {
            return;
        }
        self.sink.on_event(ConnectionEvent::Fault {
            endpoint: self.key.clone(),
            sensor_ids,
            reason: reason.into(),
        });
    }

    pub(crate) fn fault_all(&self, reason: impl Into<String>) {
        self.fault(self.sensor_ids(), reason);
    }

    /// Mark disconnected, then fault every bound sensor
    pub(crate) fn link_lost(&self, reason: &str) {
        self.set_connected(false);
        warn!("{}: link lost: {}", self.key, reason);
        self.fault_all(format!("link lost: {reason}"));
    }

    pub(crate) fn record_decode_error(&self, reason: &str) {
        let count = self.link.decode_errors.fetch_add(1, Ordering::Relaxed) + 1;
        warn!("{}: decode error #{}: {}", self.key, count, reason);
    }
}

/// How a stream pump ended
pub(crate) enum LinkEnd {
    Cancelled,
    Lost(String),
}

/// Read newline frames until cancellation or link loss
pub(crate) async fn pump_frames<R>(ctx: &WorkerContext, reader: R) -> LinkEnd
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, FrameCodec::new());
    loop {
        let next = tokio::select! {
            _ = ctx.cancel.cancelled() => return LinkEnd::Cancelled,
            next = tokio::time::timeout(ctx.settings.read_timeout, frames.next()) => next,
        };
        match next {
            // Idle, re-check cancellation
            Err(_) => continue,
            Ok(None) => return LinkEnd::Lost("closed by peer".to_string()),
            Ok(Some(Err(e))) => return LinkEnd::Lost(e.to_string()),
            Ok(Some(Ok(FrameItem::Reading(reading)))) => ctx.publish_reading(reading),
            Ok(Some(Ok(FrameItem::Malformed(reason)))) => ctx.record_decode_error(&reason),
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One physical endpoint shared by all sensors bound to it
pub struct Connection {
    endpoint: Endpoint,
    key: EndpointKey,
    settings: ConnectionSettings,
    bindings: Arc<RwLock<Vec<SensorBinding>>>,
    link: Arc<LinkState>,
    sink: Arc<dyn EventSink>,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("subscribers", &self.subscriber_count())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Connection {
    pub fn new(endpoint: Endpoint, settings: ConnectionSettings, sink: Arc<dyn EventSink>) -> Self {
        Self {
            key: endpoint.key(),
            endpoint,
            settings,
            bindings: Arc::new(RwLock::new(Vec::new())),
            link: Arc::new(LinkState::default()),
            sink,
            worker: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &EndpointKey {
        &self.key
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Bind a sensor; returns the new subscriber count
    pub fn attach(&self, binding: SensorBinding) -> usize {
        let mut bindings = self.bindings.write();
        if !bindings.iter().any(|b| b.sensor_id == binding.sensor_id) {
            bindings.push(binding);
        }
        bindings.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn sensor_ids(&self) -> Vec<u32> {
        self.bindings.read().iter().map(|b| b.sensor_id).collect()
    }

    pub fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }

    /// Malformed frames/responses seen since creation
    pub fn decode_errors(&self) -> u64 {
        self.link.decode_errors.load(Ordering::Relaxed)
    }

    fn context(&self, cancel: CancellationToken) -> WorkerContext {
        WorkerContext {
            key: self.key.clone(),
            settings: self.settings.clone(),
            cancel,
            bindings: self.bindings.clone(),
            link: self.link.clone(),
            sink: self.sink.clone(),
        }
    }

    /// Open the endpoint and start its worker; no-op when already connected
    ///
    /// On failure every bound sensor is reported FAULTY.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        // Worker left over from an earlier link loss
        self.stop_worker();

        let cancel = CancellationToken::new();
        let ctx = self.context(cancel.clone());

        let handle = match self.open_and_spawn(ctx.clone()).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("{}: connect failed: {}", self.key, e);
                ctx.fault_all(e.to_string());
                return Err(e);
            },
        };

        *self.worker.lock() = Some(Worker { cancel, handle });
        info!("{}: connected ({} sensors)", self.key, self.subscriber_count());
        Ok(())
    }

    async fn open_and_spawn(&self, ctx: WorkerContext) -> Result<JoinHandle<()>> {
        let handle = match &self.endpoint {
            Endpoint::Serial { port, baudrate } => {
                let stream = serial::open(&self.key, port, *baudrate, &self.settings).await?;
                ctx.set_connected(true);
                tokio::spawn(serial::run(ctx, stream))
            },
            Endpoint::Tcp { host, port } => {
                let addr = format!("{host}:{port}");
                let stream = tcp::open(&self.key, &addr, self.settings.connect_timeout).await?;
                ctx.set_connected(true);
                tokio::spawn(tcp::run(ctx, stream, addr))
            },
            Endpoint::Modbus { host, port } => {
                let addr = format!("{host}:{port}");
                let stream = modbus::open(&self.key, &addr, &self.settings).await?;
                ctx.set_connected(true);
                tokio::spawn(modbus::run(ctx, stream))
            },
        };
        Ok(handle)
    }

    /// Stop the worker and release the handle; idempotent
    pub fn disconnect(&self) {
        let was_running = self.stop_worker();
        let was_connected = self.link.connected.swap(false, Ordering::SeqCst);
        if was_running || was_connected {
            info!("{}: disconnected", self.key);
        }
    }

    fn stop_worker(&self) -> bool {
        match self.worker.lock().take() {
            Some(worker) => {
                worker.cancel.cancel();
                worker.handle.abort();
                true
            },
            None => false,
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
pub(crate) mod test_support {
    use super::*;
    use tokio::sync::mpsc;

    /// Sink forwarding into an unbounded channel
    pub(crate) struct ChannelSink(pub mpsc::UnboundedSender<ConnectionEvent>);

    impl EventSink for ChannelSink {
        fn on_event(&self, event: ConnectionEvent) {
            let _ = self.0.send(event);
        }
    }

    pub(crate) fn channel_sink() -> (Arc<dyn EventSink>, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ChannelSink(tx)), rx)
    }

    pub(crate) fn fast_settings() -> ConnectionSettings {
        ConnectionSettings {
            poll_interval: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_millis(100),
            response_timeout: Duration::from_millis(200),
            modbus_connect_attempts: 1,
            modbus_retry_delay: Duration::from_millis(10),
            reconnect: ReconnectPolicy {
                max_attempts: 0,
                initial_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(5),
                backoff_multiplier: 1.0,
                jitter: false,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::domain::ProtocolConfig;

    #[test]
    fn test_attach_counts_unique_sensors() {
        let (sink, _rx) = channel_sink();
        let conn = Connection::new(
            ProtocolConfig::serial("P1").endpoint(),
            ConnectionSettings::default(),
            sink,
        );
        let binding = |id| SensorBinding {
            sensor_id: id,
            modbus: None,
        };
        assert_eq!(conn.attach(binding(1)), 1);
        assert_eq!(conn.attach(binding(2)), 2);
        assert_eq!(conn.attach(binding(2)), 2);
        assert_eq!(conn.sensor_ids(), vec![1, 2]);
        assert_eq!(conn.key().as_str(), "serial:P1");
    }

    #[tokio::test]
    async fn test_connect_failure_faults_bound_sensors() {
        // Bind then drop a listener to get a port with nothing behind it
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (sink, mut rx) = channel_sink();
        let conn = Connection::new(
            ProtocolConfig::tcp("127.0.0.1", port).endpoint(),
            fast_settings(),
            sink,
        );
        conn.attach(SensorBinding {
            sensor_id: 3,
            modbus: None,
        });

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, crate::error::SensorSrvError::ConnectError { .. }));
        assert!(!conn.is_connected());

        match rx.recv().await.unwrap() {
            ConnectionEvent::Fault { sensor_ids, .. } => assert_eq!(sensor_ids, vec![3]),
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (sink, _rx) = channel_sink();
        let conn = Connection::new(
            ProtocolConfig::tcp("localhost", 5000).endpoint(),
            ConnectionSettings::default(),
            sink,
        );
        conn.disconnect();
        conn.disconnect();
        assert!(!conn.is_connected());
    }
}
