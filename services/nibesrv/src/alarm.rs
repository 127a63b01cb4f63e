//! Heat pump alarm handling
//!
//! The alarm register is read once at startup. Whenever it is later seen
//! carrying the configured reset code, a reset write is queued.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AlarmConfig;
use crate::core::{DataPoint, Request, RequestQueue};
use crate::registers::Value;

pub struct AlarmWatcher {
    alarm_name: String,
    reset_name: String,
    reset_code: i64,
    auto_reset: bool,
    queue: Arc<RequestQueue>,
}

impl AlarmWatcher {
    pub fn new(config: &AlarmConfig, queue: Arc<RequestQueue>) -> Self {
        Self {
            alarm_name: format!("alarm-{}", config.register),
            reset_name: format!("alarm-reset-{}", config.reset_register),
            reset_code: config.reset_code,
            auto_reset: config.auto_reset,
            queue,
        }
    }

    pub fn alarm_name(&self) -> &str {
        &self.alarm_name
    }

    pub fn reset_name(&self) -> &str {
        &self.reset_name
    }

    /// Queue the startup read of the alarm register
    pub fn seed(&self) {
        info!("Seeding startup read of {}", self.alarm_name);
        self.queue.push(Request::read(&self.alarm_name));
    }

    /// Inspect decoded values, queueing a reset when the alarm shows the reset code
    ///
    /// Returns the number of resets queued.
    pub fn observe(&self, points: &[DataPoint]) -> usize {
        let mut queued = 0;
        for point in points.iter().filter(|p| p.name == self.alarm_name) {
            if !self.is_reset_code(&point.value) {
                continue;
            }
            if self.auto_reset {
                warn!(
                    "{} reports {}, queueing {}",
                    self.alarm_name, point.value, self.reset_name
                );
                self.queue
                    .push(Request::write(&self.reset_name, Value::Integer(1)));
                queued += 1;
            } else {
                warn!("{} reports {}, auto reset disabled", self.alarm_name, point.value);
            }
        }
        queued
    }

    fn is_reset_code(&self, value: &Value) -> bool {
        match value {
            Value::Integer(v) => *v == self.reset_code,
            Value::Float(v) => *v == self.reset_code as f64,
            Value::Text(_) => false,
        }
    }
}
