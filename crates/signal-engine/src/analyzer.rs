use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use watch_core::{Alert, AlertReason, Bar, Symbol};

use crate::indicators::*;

/// Thresholds and windows for the sell-side checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    /// Fraction, 0.10 = 10% below the recent high.
    pub drawdown_threshold: f64,
    pub drawdown_window: usize,
    pub volume_spike_factor: f64,
    pub volume_window: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_overbought: 70.0,
            drawdown_threshold: 0.10,
            drawdown_window: 30,
            volume_spike_factor: 3.0,
            volume_window: 30,
        }
    }
}

impl SignalConfig {
    /// Shortest series that is evaluated at all.
    pub fn min_bars(&self) -> usize {
        self.rsi_period + 5
    }
}

/// Raw measurements at the latest bar, before thresholds are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSnapshot {
    pub rsi: Option<f64>,
    /// Fraction below the recent high.
    pub drawdown: f64,
    pub avg_volume: Option<f64>,
    pub latest_volume: f64,
    pub latest_close: f64,
    pub timestamp: DateTime<Utc>,
}

impl SignalSnapshot {
    pub fn volume_ratio(&self) -> Option<f64> {
        self.avg_volume
            .filter(|avg| *avg > 0.0)
            .map(|avg| self.latest_volume / avg)
    }
}

/// Turns a bar series into the set of triggered sell conditions.
///
/// Pure: no I/O, no state. The three checks are independent and any subset may fire.
#[derive(Debug, Clone, Default)]
pub struct SignalEngine {
    config: SignalConfig,
}

impl SignalEngine {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Measure the latest bar. `None` when the series is too short to evaluate.
    pub fn measure(&self, bars: &[Bar]) -> Option<SignalSnapshot> {
        if bars.len() < self.config.min_bars() {
            return None;
        }
        let latest = bars.last()?;

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        Some(SignalSnapshot {
            rsi: rsi(&closes, self.config.rsi_period),
            drawdown: drawdown(bars, self.config.drawdown_window),
            avg_volume: mean_nonzero_volume(bars, self.config.volume_window),
            latest_volume: latest.volume,
            latest_close: latest.close,
            timestamp: latest.timestamp,
        })
    }

    /// Apply thresholds. Reasons come out ordered Overbought, Drawdown, VolumeSpike.
    pub fn reasons(&self, snapshot: &SignalSnapshot) -> Vec<AlertReason> {
        let mut reasons = Vec::new();

        if let Some(rsi) = snapshot.rsi {
            if rsi >= self.config.rsi_overbought {
                reasons.push(AlertReason::Overbought { rsi });
            }
        }

        if snapshot.drawdown >= self.config.drawdown_threshold {
            reasons.push(AlertReason::Drawdown {
                drop_pct: snapshot.drawdown * 100.0,
            });
        }

        if let Some(ratio) = snapshot.volume_ratio() {
            if ratio >= self.config.volume_spike_factor {
                reasons.push(AlertReason::VolumeSpike {
                    ratio,
                    volume: snapshot.latest_volume,
                });
            }
        }

        reasons
    }

    /// Triggered conditions for the series. Empty means no signal, including
    /// when there is too little history.
    pub fn analyze(&self, bars: &[Bar]) -> Vec<AlertReason> {
        self.measure(bars)
            .map(|snapshot| self.reasons(&snapshot))
            .unwrap_or_default()
    }

    /// Build an alert for `symbol` if anything fired.
    pub fn evaluate(&self, symbol: &Symbol, bars: &[Bar]) -> Option<Alert> {
        let snapshot = self.measure(bars)?;
        let reasons = self.reasons(&snapshot);
        if reasons.is_empty() {
            return None;
        }

        Some(Alert {
            symbol: symbol.clone(),
            reasons,
            latest_close: snapshot.latest_close,
            timestamp: snapshot.timestamp,
        })
    }
}
