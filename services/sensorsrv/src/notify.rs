//! Alarm notification delivery
//!
//! Webhook POSTs and desktop popups. Delivery runs on spawned tasks so a slow
//! receiver never stalls evaluation; failures are logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::config::{AlarmSettings, NotifyMode};
use crate::domain::AlarmEvent;
use crate::error::Result;
use crate::manager::SensorManager;

pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);
const DESKTOP_EXPIRE_MS: u32 = 5000;

/// JSON body POSTed to the webhook
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookPayload {
    pub event_type: &'static str,
    pub sensor_id: u32,
    pub sensor_name: String,
    pub alarm_type: String,
    pub value: f64,
    pub unit: String,
    /// RFC 3339
    pub timestamp: String,
    pub low_limit: f64,
    pub high_limit: f64,
}

impl From<&AlarmEvent> for WebhookPayload {
    fn from(alarm: &AlarmEvent) -> Self {
        Self {
            event_type: "alarm",
            sensor_id: alarm.sensor_id,
            sensor_name: alarm.sensor_name.clone(),
            alarm_type: alarm.alarm_type.to_string(),
            value: alarm.value,
            unit: alarm.unit.clone(),
            timestamp: alarm.timestamp.to_rfc3339(),
            low_limit: alarm.low_limit,
            high_limit: alarm.high_limit,
        }
    }
}

pub struct NotificationDispatcher {
    settings: AlarmSettings,
    client: reqwest::Client,
}

impl NotificationDispatcher {
    pub fn new(settings: AlarmSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Self { settings, client })
    }

    pub fn settings(&self) -> &AlarmSettings {
        &self.settings
    }

    pub fn webhook_enabled(&self) -> bool {
        self.settings.enable_notifications && !self.settings.webhook_url.is_empty()
    }

    /// POST the alarm; true on 200/201/202, false when disabled or rejected
    pub async fn send_webhook(&self, alarm: &AlarmEvent) -> Result<bool> {
        if !self.webhook_enabled() {
            return Ok(false);
        }

        let response = self
            .client
            .post(&self.settings.webhook_url)
            .json(&WebhookPayload::from(alarm))
            .send()
            .await?;

        let status = response.status().as_u16();
        if matches!(status, 200 | 201 | 202) {
            debug!("Webhook sent: sensor {} {}", alarm.sensor_id, alarm.alarm_type);
            Ok(true)
        } else {
            warn!("Webhook rejected: HTTP {}", status);
            Ok(false)
        }
    }

    /// Show a popup; falls back to a log line when no notifier is available
    pub async fn send_desktop(&self, alarm: &AlarmEvent) -> bool {
        if !self.settings.enable_desktop_notifications {
            return false;
        }

        if cfg!(target_os = "linux") {
            let title = format!("ALARM: {}", alarm.sensor_name);
            let output = Command::new("notify-send")
                .arg("--urgency=critical")
                .arg(format!("--expire-time={DESKTOP_EXPIRE_MS}"))
                .arg("--icon=error")
                .arg(&title)
                .arg(alarm.message())
                .output()
                .await;
            match output {
                Ok(out) if out.status.success() => return true,
                Ok(out) => debug!("notify-send exited with {}", out.status),
                Err(e) => debug!("notify-send unavailable: {}", e),
            }
        }

        warn!("{}", alarm.message().replace('\n', " | "));
        true
    }

    /// Deliver through every enabled channel
    pub async fn notify(&self, alarm: &AlarmEvent) {
        if let Err(e) = self.send_webhook(alarm).await {
            error!("Webhook failed: {}", e);
        }
        self.send_desktop(alarm).await;
    }

    /// Fire-and-forget delivery of one alarm
    pub fn dispatch(self: &Arc<Self>, alarm: AlarmEvent) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.notify(&alarm).await })
    }

    /// Follow the manager's alarm stream until cancelled
    pub fn start(self: Arc<Self>, manager: &SensorManager, cancel: CancellationToken) -> JoinHandle<()> {
        let mut rx = match self.settings.notify_mode {
            NotifyMode::Transitions => manager.subscribe_alarms(),
            NotifyMode::EveryViolation => manager.subscribe_violations(),
        };
        info!("Notifier started ({:?})", self.settings.notify_mode);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(alarm) => {
                            self.dispatch(alarm);
                        },
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Notifier lagged, {} alarms skipped", skipped);
                        },
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("Notifier stopped");
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::connection::{ConnectionEvent, ConnectionSettings};
    use crate::domain::{AlarmType, ProtocolConfig, SensorConfig};
    use crate::protocols::RawReading;
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Minimal HTTP responder that forwards each request body
    async fn http_responder(status_line: &'static str) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                let body = loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break String::new();
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    let text = String::from_utf8_lossy(&buf).to_string();
                    if let Some(split) = text.find("\r\n\r\n") {
                        let length = text[..split]
                            .lines()
                            .find_map(|l| {
                                let (name, value) = l.split_once(':')?;
                                name.eq_ignore_ascii_case("content-length")
                                    .then(|| value.trim().parse::<usize>().ok())?
                            })
                            .unwrap_or(0);
                        if buf.len() >= split + 4 + length {
                            break text[split + 4..split + 4 + length].to_string();
                        }
                    }
                };
                let _ = tx.send(body);
                let response =
                    format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                socket.write_all(response.as_bytes()).await.unwrap();
            }
        });
        (url, rx)
    }

    fn alarm() -> AlarmEvent {
        AlarmEvent {
            timestamp: Utc::now(),
            sensor_id: 2,
            sensor_name: "Pressure Sensor".into(),
            value: 160.0,
            alarm_type: AlarmType::High,
            unit: "PSI".into(),
            low_limit: 50.0,
            high_limit: 150.0,
        }
    }

    fn settings(url: &str) -> AlarmSettings {
        AlarmSettings {
            enable_notifications: true,
            enable_desktop_notifications: false,
            webhook_url: url.to_string(),
            notify_mode: NotifyMode::Transitions,
        }
    }

    #[tokio::test]
    async fn test_webhook_payload() {
        let (url, mut bodies) = http_responder("HTTP/1.1 200 OK").await;
        let dispatcher = NotificationDispatcher::new(settings(&url)).unwrap();

        assert!(dispatcher.send_webhook(&alarm()).await.unwrap());

        let body: serde_json::Value = serde_json::from_str(&bodies.recv().await.unwrap()).unwrap();
        assert_eq!(body["event_type"], "alarm");
        assert_eq!(body["sensor_id"], 2);
        assert_eq!(body["alarm_type"], "HIGH");
        assert_eq!(body["high_limit"], 150.0);
        assert!(chrono::DateTime::parse_from_rfc3339(body["timestamp"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_webhook_rejected_status() {
        let (url, _bodies) = http_responder("HTTP/1.1 500 Internal Server Error").await;
        let dispatcher = NotificationDispatcher::new(settings(&url)).unwrap();
        assert!(!dispatcher.send_webhook(&alarm()).await.unwrap());
    }

    #[tokio::test]
    async fn test_webhook_disabled() {
        let mut s = settings("http://127.0.0.1:9/hook");
        s.enable_notifications = false;
        let dispatcher = NotificationDispatcher::new(s).unwrap();
        assert!(!dispatcher.webhook_enabled());
        assert!(!dispatcher.send_webhook(&alarm()).await.unwrap());

        let dispatcher = NotificationDispatcher::new(settings("")).unwrap();
        assert!(!dispatcher.webhook_enabled());
    }

    #[tokio::test]
    async fn test_start_forwards_transitions() {
        let (url, mut bodies) = http_responder("HTTP/1.1 202 Accepted").await;
        let dispatcher = Arc::new(NotificationDispatcher::new(settings(&url)).unwrap());

        let manager = SensorManager::new(ConnectionSettings::default(), 16);
        let config = SensorConfig::new(
            1,
            "Temperature Sensor 1",
            20.0,
            80.0,
            "°C",
            ProtocolConfig::serial("P1"),
        )
        .unwrap();
        manager.add_sensor(config).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = Arc::clone(&dispatcher).start(&manager, cancel.clone());

        manager.ingest(ConnectionEvent::Reading {
            endpoint: ProtocolConfig::serial("P1").endpoint().key(),
            reading: RawReading {
                sensor_id: 1,
                sensor_name: String::new(),
                value: 95.0,
                unit: String::new(),
                timestamp: Utc::now(),
            },
        });

        let body = tokio::time::timeout(Duration::from_secs(5), bodies.recv())
            .await
            .unwrap()
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["sensor_name"], "Temperature Sensor 1");
        assert_eq!(body["alarm_type"], "HIGH");

        cancel.cancel();
        handle.await.unwrap();
    }
}
