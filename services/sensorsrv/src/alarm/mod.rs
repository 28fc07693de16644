//! Alarm detection and the alarm log

pub mod evaluator;
pub mod log;

pub use evaluator::{AlarmEvaluator, Evaluation};
pub use log::{AlarmLog, RECENT_ALARMS_VIEW};
