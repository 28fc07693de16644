//! Sensor manager
//!
//! Owns the endpoint registry and every connection, evaluates each incoming
//! value against the sensor's current limits, and publishes results on
//! broadcast streams:
//!
//! - readings: every accepted reading, classified
//! - alarms: status transitions into LOW/HIGH/FAULT (also appended to the log)
//! - violations: every LOW/HIGH/FAULT reading, transition or not
//!
//! Broadcast sends never wait; a slow subscriber lags and skips.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::alarm::{AlarmEvaluator, AlarmLog};
use crate::connection::{
    Connection, ConnectionEvent, ConnectionSettings, EndpointRegistry, EventSink, SensorBinding,
};
use crate::domain::{
    AlarmEvent, EndpointKey, Limits, SensorConfig, SensorReading, SensorStatus, FAULT_SENTINEL,
};
use crate::error::{Result, SensorSrvError};

pub const DEFAULT_EVENT_BUFFER: usize = 1024;

// ============================================================================
// Per-sensor state
// ============================================================================

#[derive(Debug)]
struct SensorState {
    config: SensorConfig,
    limits: Limits,
    previous: SensorStatus,
    latest: Option<SensorReading>,
}

/// Evaluation state shared with every worker through `EventSink`
struct ManagerCore {
    sensors: DashMap<u32, SensorState>,
    alarm_log: AlarmLog,
    readings: broadcast::Sender<SensorReading>,
    alarms: broadcast::Sender<AlarmEvent>,
    violations: broadcast::Sender<AlarmEvent>,
}

impl ManagerCore {
    fn new(event_buffer: usize) -> Self {
        let capacity = event_buffer.max(1);
        let (readings, _) = broadcast::channel(capacity);
        let (alarms, _) = broadcast::channel(capacity);
        let (violations, _) = broadcast::channel(capacity);
        Self {
            sensors: DashMap::new(),
            alarm_log: AlarmLog::new(),
            readings,
            alarms,
            violations,
        }
    }

    /// Classify one value and publish the outcome
    ///
    /// The sensor's map entry stays locked for the whole check-then-set,
    /// so transitions of one sensor are detected and logged in order.
    fn evaluate(
        &self,
        sensor_id: u32,
        value: f64,
        reading_failed: bool,
        timestamp: DateTime<Utc>,
        sensor_name: String,
        unit: String,
    ) {
        let Some(mut state) = self.sensors.get_mut(&sensor_id) else {
            warn!("Reading for unknown sensor {} dropped", sensor_id);
            return;
        };

        let evaluation = AlarmEvaluator::evaluate(value, reading_failed, state.limits, state.previous);
        state.previous = evaluation.status;

        let reading = SensorReading {
            sensor_id,
            sensor_name: if sensor_name.is_empty() {
                state.config.name.clone()
            } else {
                sensor_name
            },
            value,
            unit: if unit.is_empty() {
                state.config.unit.clone()
            } else {
                unit
            },
            timestamp,
            status: evaluation.status,
        };
        state.latest = Some(reading.clone());

        if let Some(alarm_type) = evaluation.status.alarm_type() {
            let event = AlarmEvaluator::alarm_event(&reading, alarm_type, state.limits);
            if evaluation.transitioned {
                warn!(
                    "Sensor{} {}: {} (value {:.2} {})",
                    sensor_id, reading.sensor_name, alarm_type, value, reading.unit
                );
                self.alarm_log.append(event.clone());
                let _ = self.alarms.send(event.clone());
            }
            let _ = self.violations.send(event);
        } else if evaluation.transitioned {
            info!("Sensor{} {}: back to OK", sensor_id, reading.sensor_name);
        }

        let _ = self.readings.send(reading);
    }
}

impl EventSink for ManagerCore {
    fn on_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Reading { reading, .. } => self.evaluate(
                reading.sensor_id,
                reading.value,
                false,
                reading.timestamp,
                reading.sensor_name,
                reading.unit,
            ),
            ConnectionEvent::Fault {
                endpoint,
                sensor_ids,
                reason,
            } => {
                debug!("{}: fault for {:?}: {}", endpoint, sensor_ids, reason);
                let now = Utc::now();
                for sensor_id in sensor_ids {
                    self.evaluate(
                        sensor_id,
                        FAULT_SENTINEL,
                        true,
                        now,
                        String::new(),
                        String::new(),
                    );
                }
            },
        }
    }
}

// ============================================================================
// SensorManager
// ============================================================================

/// Snapshot answered to `get_status`
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerStatus {
    pub sensor_count: usize,
    pub alarm_count: usize,
    pub timestamp: DateTime<Utc>,
}

pub struct SensorManager {
    core: Arc<ManagerCore>,
    registry: RwLock<EndpointRegistry>,
    // Serializes add_sensor / connect_all / disconnect_all
    lifecycle: Mutex<()>,
    settings: ConnectionSettings,
}

impl SensorManager {
    pub fn new(settings: ConnectionSettings, event_buffer: usize) -> Self {
        Self {
            core: Arc::new(ManagerCore::new(event_buffer)),
            registry: RwLock::new(EndpointRegistry::new()),
            lifecycle: Mutex::new(()),
            settings,
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    // ------------------------------------------------------------------------
    // Registration and lifecycle
    // ------------------------------------------------------------------------

    /// Register a sensor and bind it to its endpoint's connection
    ///
    /// Fails with `ConfigError` when the id is already registered. Sensors
    /// added to an already connected endpoint are polled from the next cycle.
    pub async fn add_sensor(&self, config: SensorConfig) -> Result<EndpointKey> {
        let _guard = self.lifecycle.lock().await;

        let key = EndpointRegistry::resolve(&config);
        let binding = SensorBinding {
            sensor_id: config.id,
            modbus: config.protocol.modbus_address(),
        };
        let endpoint = config.protocol.endpoint();

        match self.core.sensors.entry(config.id) {
            Entry::Occupied(_) => return Err(SensorSrvError::sensor_exists(config.id)),
            Entry::Vacant(slot) => {
                info!("Sensor{} added: {} -> {}", config.id, config.name, key);
                slot.insert(SensorState {
                    limits: config.limits(),
                    config,
                    previous: SensorStatus::Ok,
                    latest: None,
                });
            },
        }

        let sink: Arc<dyn EventSink> = self.core.clone();
        self.registry
            .write()
            .get_or_create(key.clone(), binding, || {
                Connection::new(endpoint, self.settings.clone(), sink)
            });
        Ok(key)
    }

    /// Connect every distinct endpoint once, concurrently
    ///
    /// Partial failure is fine: the map reports each endpoint's outcome and
    /// connected endpoints start producing immediately.
    pub async fn connect_all(&self) -> BTreeMap<EndpointKey, bool> {
        let _guard = self.lifecycle.lock().await;
        let connections = self.registry.read().connections();
        info!("Connecting {} endpoint(s)", connections.len());

        let results = join_all(connections.iter().map(|conn| async move {
            let connected = match conn.connect().await {
                Ok(()) => true,
                Err(e) => {
                    warn!("{}: {}", conn.key(), e);
                    false
                },
            };
            (conn.key().clone(), connected)
        }))
        .await;

        results.into_iter().collect()
    }

    /// Explicit reconnect of one endpoint (Serial and Modbus never retry on their own)
    pub async fn connect_endpoint(&self, key: &str) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        let conn = self
            .registry
            .read()
            .get(key)
            .ok_or_else(|| SensorSrvError::NotFound(format!("Endpoint not found: {key}")))?;
        conn.connect().await
    }

    /// Release every connection; idempotent
    pub async fn disconnect_all(&self) {
        let _guard = self.lifecycle.lock().await;
        for conn in self.registry.read().connections() {
            conn.disconnect();
        }
        info!("All endpoints disconnected");
    }

    pub fn get_connection_status(&self) -> BTreeMap<EndpointKey, bool> {
        self.registry.read().status()
    }

    /// Malformed frames/responses per endpoint
    pub fn decode_errors(&self) -> BTreeMap<EndpointKey, u64> {
        self.registry
            .read()
            .connections()
            .into_iter()
            .map(|conn| (conn.key().clone(), conn.decode_errors()))
            .collect()
    }

    pub fn endpoint_count(&self) -> usize {
        self.registry.read().len()
    }

    /// Feed an event exactly as a worker would
    pub fn ingest(&self, event: ConnectionEvent) {
        self.core.on_event(event);
    }

    // ------------------------------------------------------------------------
    // Limits
    // ------------------------------------------------------------------------

    /// Replace a sensor's limit pair; applies from the next evaluation
    pub fn set_limit(&self, sensor_id: u32, low: f64, high: f64) -> Result<()> {
        let limits = Limits::new(low, high)?;
        let mut state = self
            .core
            .sensors
            .get_mut(&sensor_id)
            .ok_or_else(|| SensorSrvError::sensor_not_found(sensor_id))?;
        state.limits = limits;
        info!("Sensor{} limits: [{}, {}]", sensor_id, low, high);
        Ok(())
    }

    pub fn limits(&self, sensor_id: u32) -> Option<Limits> {
        self.core.sensors.get(&sensor_id).map(|s| s.limits)
    }

    // ------------------------------------------------------------------------
    // Streams
    // ------------------------------------------------------------------------

    pub fn subscribe_readings(&self) -> broadcast::Receiver<SensorReading> {
        self.core.readings.subscribe()
    }

    pub fn subscribe_alarms(&self) -> broadcast::Receiver<AlarmEvent> {
        self.core.alarms.subscribe()
    }

    pub fn subscribe_violations(&self) -> broadcast::Receiver<AlarmEvent> {
        self.core.violations.subscribe()
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Most recent `limit` alarms, oldest first
    pub fn alarms(&self, limit: usize) -> Vec<AlarmEvent> {
        self.core.alarm_log.recent(limit)
    }

    /// Quick-display view, capped at 10
    pub fn recent_alarms(&self) -> Vec<AlarmEvent> {
        self.core.alarm_log.recent_view()
    }

    pub fn alarm_count(&self) -> usize {
        self.core.alarm_log.len()
    }

    /// Operator clear; returns the number of removed entries
    pub fn clear_alarms(&self) -> usize {
        let removed = self.core.alarm_log.clear();
        info!("Alarm log cleared ({} removed)", removed);
        removed
    }

    /// Latest reading per sensor, ordered by sensor id
    pub fn latest_readings(&self) -> Vec<SensorReading> {
        let mut readings: Vec<_> = self
            .core
            .sensors
            .iter()
            .filter_map(|entry| entry.latest.clone())
            .collect();
        readings.sort_by_key(|r| r.sensor_id);
        readings
    }

    pub fn sensor_status(&self, sensor_id: u32) -> Option<SensorStatus> {
        self.core.sensors.get(&sensor_id).map(|s| s.previous)
    }

    pub fn sensor_config(&self, sensor_id: u32) -> Option<SensorConfig> {
        self.core.sensors.get(&sensor_id).map(|s| s.config.clone())
    }

    pub fn sensor_count(&self) -> usize {
        self.core.sensors.len()
    }

    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            sensor_count: self.sensor_count(),
            alarm_count: self.alarm_count(),
            timestamp: Utc::now(),
        }
    }
}
