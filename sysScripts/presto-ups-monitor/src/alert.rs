//! When to notify. Power is averaged over a window of readings; the charge
//! direction from the last few currents evaluated outside the cooldown.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::ina219::Reading;

pub const POWER_WINDOW: usize = 5;
pub const CURRENT_WINDOW: usize = 3;
pub const COOLDOWN: Duration = Duration::from_secs(5 * 60);
/// Below this the runtime estimate is meaningless.
const MIN_POWER_FOR_ESTIMATE: f64 = 0.1;
/// mA; the sign says which way the battery is going.
const CURRENT_DEADBAND: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Alert {
    Unplugged { runtime_hours: Option<f64> },
    Reconnected,
    LowPower { power: f64 },
    LowPercent { percent: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub power_w: f64,
    pub percent: f64,
    pub capacity_mah: u32,
    pub voltage: f64,
}

#[derive(Debug)]
pub struct AlertPolicy {
    thresholds: Thresholds,
    power: VecDeque<f64>,
    current: VecDeque<f64>,
    unplugged: bool,
    last_sent: Option<Instant>,
}

fn push_bounded(window: &mut VecDeque<f64>, value: f64, cap: usize) {
    if window.len() == cap {
        window.pop_front();
    }
    window.push_back(value);
}

impl AlertPolicy {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            power: VecDeque::with_capacity(POWER_WINDOW),
            current: VecDeque::with_capacity(CURRENT_WINDOW),
            unplugged: false,
            last_sent: None,
        }
    }

    pub fn is_unplugged(&self) -> bool {
        self.unplugged
    }

    /// Battery energy over the average draw of the power window.
    pub fn runtime_hours(&self) -> Option<f64> {
        if self.power.len() < POWER_WINDOW {
            return None;
        }
        let avg_w = self.power.iter().sum::<f64>() / self.power.len() as f64;
        if avg_w < MIN_POWER_FOR_ESTIMATE {
            return None;
        }
        let energy_mwh = f64::from(self.thresholds.capacity_mah) * self.thresholds.voltage;
        Some(energy_mwh / (avg_w * 1000.0))
    }

    /// Feeds one reading. Returns the alert to send, if any; call
    /// [`mark_sent`](Self::mark_sent) once it actually went out.
    pub fn evaluate(&mut self, reading: &Reading, now: Instant) -> Option<Alert> {
        push_bounded(&mut self.power, reading.power_w, POWER_WINDOW);
        if self.power.len() < POWER_WINDOW {
            return None;
        }
        if self.last_sent.is_some_and(|t| now.duration_since(t) < COOLDOWN) {
            return None;
        }

        push_bounded(&mut self.current, reading.current_ma, CURRENT_WINDOW);
        let discharging = self.current.iter().all(|&c| c < -CURRENT_DEADBAND);
        let charging = self.current.iter().all(|&c| c > CURRENT_DEADBAND);

        if discharging && !self.unplugged {
            self.unplugged = true;
            Some(Alert::Unplugged {
                runtime_hours: self.runtime_hours(),
            })
        } else if charging && self.unplugged {
            self.unplugged = false;
            Some(Alert::Reconnected)
        } else if charging && reading.power_w < self.thresholds.power_w {
            Some(Alert::LowPower {
                power: reading.power_w,
            })
        } else if charging && reading.percent < self.thresholds.percent {
            Some(Alert::LowPercent {
                percent: reading.percent,
            })
        } else {
            None
        }
    }

    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    pub fn message(&self, alert: &Alert, host: &str) -> String {
        match alert {
            Alert::Unplugged { runtime_hours } => {
                let runtime = runtime_hours
                    .map_or_else(|| "unknown".to_string(), |h| format!("{h:.1} hours"));
                format!(
                    "USB charger unplugged on {host}: Running on battery, \
                     estimated runtime {runtime}"
                )
            }
            Alert::Reconnected => {
                format!("USB charger reconnected on {host}: System back on external power")
            }
            Alert::LowPower { power } => format!(
                "Low power alert on {host}: {power:.3} W (Threshold: {} W)",
                self.thresholds.power_w
            ),
            Alert::LowPercent { percent } => format!(
                "Low percent alert on {host}: {percent:.1}% (Threshold: {}%)",
                self.thresholds.percent
            ),
        }
    }
}
