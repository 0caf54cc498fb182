use std::time::Duration;
use tokio::sync::Mutex;

pub const USAGE_WARNING_MINUTES: f64 = 60.0;
pub const USAGE_CRITICAL_MINUTES: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageLevel {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageThresholds {
    pub warning_minutes: f64,
    pub critical_minutes: f64,
}

impl Default for UsageThresholds {
    fn default() -> Self {
        Self {
            warning_minutes: USAGE_WARNING_MINUTES,
            critical_minutes: USAGE_CRITICAL_MINUTES,
        }
    }
}

impl UsageThresholds {
    pub fn level(&self, total_minutes: f64) -> UsageLevel {
        if total_minutes > self.critical_minutes {
            UsageLevel::Critical
        } else if total_minutes > self.warning_minutes {
            UsageLevel::Warning
        } else {
            UsageLevel::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageReport {
    pub active_sessions: usize,
    pub total_minutes: f64,
    pub level: UsageLevel,
}

/// Running total of avatar minutes consumed by this process.
#[derive(Debug, Default)]
pub struct UsageMeter {
    total_minutes: Mutex<f64>,
    thresholds: UsageThresholds,
}

impl UsageMeter {
    pub fn new(thresholds: UsageThresholds) -> Self {
        Self {
            total_minutes: Mutex::new(0.0),
            thresholds,
        }
    }

    /// Adds `active_sessions × interval` minutes and classifies the new total.
    pub async fn record(&self, active_sessions: usize, interval: Duration) -> UsageReport {
        let mut total = self.total_minutes.lock().await;
        *total += active_sessions as f64 * interval.as_secs_f64() / 60.0;
        UsageReport {
            active_sessions,
            total_minutes: *total,
            level: self.thresholds.level(*total),
        }
    }

    pub async fn total_minutes(&self) -> f64 {
        *self.total_minutes.lock().await
    }

    pub fn thresholds(&self) -> UsageThresholds {
        self.thresholds
    }
}
