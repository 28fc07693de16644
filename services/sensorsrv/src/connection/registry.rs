//! Endpoint key -> Connection map
//!
//! Exactly one `Connection` per key. Keys are kept ordered so iteration,
//! status maps and logs are stable across runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::{Connection, SensorBinding};
use crate::domain::{EndpointKey, SensorConfig};

#[derive(Debug, Default)]
pub struct EndpointRegistry {
    connections: BTreeMap<EndpointKey, Arc<Connection>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical key of the endpoint this sensor lives on
    pub fn resolve(config: &SensorConfig) -> EndpointKey {
        config.protocol.endpoint().key()
    }

    /// Return the connection for `key`, creating it with `factory` on first
    /// use, and bind the sensor to it
    pub fn get_or_create<F>(
        &mut self,
        key: EndpointKey,
        binding: SensorBinding,
        factory: F,
    ) -> Arc<Connection>
    where
        F: FnOnce() -> Connection,
    {
        let connection = self
            .connections
            .entry(key)
            .or_insert_with_key(|key| {
                debug!("New endpoint: {}", key);
                Arc::new(factory())
            })
            .clone();
        let subscribers = connection.attach(binding);
        debug!(
            "Sensor {} -> {} ({} subscribers)",
            binding.sensor_id,
            connection.key(),
            subscribers
        );
        connection
    }

    pub fn get(&self, key: &str) -> Option<Arc<Connection>> {
        self.connections.get(key).cloned()
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.values().cloned().collect()
    }

    pub fn keys(&self) -> Vec<EndpointKey> {
        self.connections.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Connected flag per endpoint
    pub fn status(&self) -> BTreeMap<EndpointKey, bool> {
        self.connections
            .iter()
            .map(|(key, conn)| (key.clone(), conn.is_connected()))
            .collect()
    }
}
