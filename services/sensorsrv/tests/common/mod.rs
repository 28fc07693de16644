//! Test Common Utilities
//!
//! Loopback frame servers and fast connection settings shared by the
//! sensorsrv integration tests.

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::net::SocketAddr;
use std::time::Duration;

use sensorsrv::connection::{ConnectionSettings, ReconnectPolicy};
use sensorsrv::domain::{ProtocolConfig, SensorConfig};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

pub const WAIT: Duration = Duration::from_secs(5);

/// Short timeouts; reconnect deliberately slow so a dropped link stays down
pub fn fast_settings() -> ConnectionSettings {
    ConnectionSettings {
        poll_interval: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(1),
        read_timeout: Duration::from_millis(100),
        response_timeout: Duration::from_millis(200),
        modbus_connect_attempts: 1,
        modbus_retry_delay: Duration::from_millis(10),
        reconnect: ReconnectPolicy {
            max_attempts: 0,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 1.0,
            jitter: false,
        },
    }
}

pub fn sensor(id: u32, low: f64, high: f64, protocol: ProtocolConfig) -> SensorConfig {
    SensorConfig::new(id, format!("Sensor {id}"), low, high, "°C", protocol).unwrap()
}

/// One newline-terminated reading frame
pub fn frame(sensor_id: u32, value: f64) -> String {
    format!(
        "{{\"sensor_id\": {sensor_id}, \"sensor_name\": \"\", \"value\": {value}, \
         \"unit\": \"\", \"timestamp\": \"2024-05-01T12:00:00Z\", \"status\": \"OK\"}}\n"
    )
}

enum ServerCommand {
    Send(String),
    Drop,
}

/// Writes whatever lines the test pushes to the current client; after
/// `drop_client` it accepts the next one
pub struct FrameServer {
    pub addr: SocketAddr,
    tx: mpsc::UnboundedSender<ServerCommand>,
}

impl FrameServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                loop {
                    match rx.recv().await {
                        Some(ServerCommand::Send(data)) => {
                            if socket.write_all(data.as_bytes()).await.is_err() {
                                break;
                            }
                        },
                        Some(ServerCommand::Drop) => break,
                        None => return,
                    }
                }
            }
        });

        Self { addr, tx }
    }

    pub fn send(&self, data: impl Into<String>) {
        self.tx.send(ServerCommand::Send(data.into())).unwrap();
    }

    pub fn drop_client(&self) {
        self.tx.send(ServerCommand::Drop).unwrap();
    }
}

/// Reconnect quickly so recovery fits in a test
pub fn quick_reconnect_settings() -> ConnectionSettings {
    ConnectionSettings {
        reconnect: ReconnectPolicy {
            max_attempts: 0,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        ..fast_settings()
    }
}

/// Receive with a deadline
pub async fn recv<T: Clone>(rx: &mut broadcast::Receiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .unwrap()
}

/// Let workers settle, then discard anything already queued
pub async fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    while rx.try_recv().is_ok() {}
}
