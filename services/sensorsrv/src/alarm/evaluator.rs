//! Status classification and transition detection
//!
//! Pure functions; the previous-status map lives with the caller.

use crate::domain::{AlarmEvent, AlarmType, Limits, SensorReading, SensorStatus, FAULT_SENTINEL};

/// Outcome of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub status: SensorStatus,
    /// Status differs from the previous evaluation of this sensor
    pub transitioned: bool,
}

impl Evaluation {
    /// Alarm to emit, if this evaluation entered an alarm status
    pub fn alarm_type(&self) -> Option<AlarmType> {
        if self.transitioned {
            self.status.alarm_type()
        } else {
            None
        }
    }
}

pub struct AlarmEvaluator;

impl AlarmEvaluator {
    /// Classify a value; FAULTY has priority, limits are inclusive
    pub fn classify(value: f64, reading_failed: bool, limits: Limits) -> SensorStatus {
        if reading_failed || value == FAULT_SENTINEL {
            SensorStatus::Faulty
        } else if value < limits.low {
            SensorStatus::LowAlarm
        } else if value > limits.high {
            SensorStatus::HighAlarm
        } else {
            SensorStatus::Ok
        }
    }

    pub fn evaluate(
        value: f64,
        reading_failed: bool,
        limits: Limits,
        previous: SensorStatus,
    ) -> Evaluation {
        let status = Self::classify(value, reading_failed, limits);
        Evaluation {
            status,
            transitioned: status != previous,
        }
    }

    /// Alarm record carrying the limits in effect right now
    pub fn alarm_event(reading: &SensorReading, alarm_type: AlarmType, limits: Limits) -> AlarmEvent {
        AlarmEvent {
            timestamp: reading.timestamp,
            sensor_id: reading.sensor_id,
            sensor_name: reading.sensor_name.clone(),
            value: reading.value,
            alarm_type,
            unit: reading.unit.clone(),
            low_limit: limits.low,
            high_limit: limits.high,
        }
    }
}
