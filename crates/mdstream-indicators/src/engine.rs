//! The calculator set driven by one candle series.
//!
//! The engine only ever holds derived state. Committed bars go through
//! `commit`; the in-progress bar is evaluated with `preview`, which works
//! on a copy so a revised tick never double-counts.

use crate::{Bands, Bollinger, Indicator, IndicatorResult, Macd, MacdValue, Rsi, Sma};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub ma_period: usize,
    pub rsi_period: usize,
    pub macd_short: usize,
    pub macd_long: usize,
    pub macd_signal: usize,
    pub boll_period: usize,
    pub boll_std_dev: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ma_period: 20,
            rsi_period: 14,
            macd_short: 12,
            macd_long: 26,
            macd_signal: 9,
            boll_period: 20,
            boll_std_dev: 2.0,
        }
    }
}

impl IndicatorConfig {
    /// Build the calculators once to surface any parameter error.
    pub fn validate(&self) -> IndicatorResult<()> {
        IndicatorEngine::new(self.clone()).map(|_| ())
    }
}

/// Latest value of every calculator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub ma: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<MacdValue>,
    pub bollinger: Option<Bands>,
}

#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
    sma: Sma,
    rsi: Rsi,
    macd: Macd,
    bollinger: Bollinger,
    committed: usize,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> IndicatorResult<Self> {
        Ok(Self {
            sma: Sma::new(config.ma_period)?,
            rsi: Rsi::new(config.rsi_period)?,
            macd: Macd::new(config.macd_short, config.macd_long, config.macd_signal)?,
            bollinger: Bollinger::new(config.boll_period, config.boll_std_dev)?,
            committed: 0,
            config,
        })
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// Number of closes folded in since the last seed.
    pub fn committed(&self) -> usize {
        self.committed
    }

    /// Replace all state with a replay of `closes`.
    pub fn seed(&mut self, closes: &[f64]) -> IndicatorSnapshot {
        self.sma.seed(closes);
        self.rsi.seed(closes);
        self.macd.seed(closes);
        self.bollinger.seed(closes);
        self.committed = closes.len();
        debug!(closes = closes.len(), "Seeded indicators");
        self.snapshot()
    }

    /// Fold the close of a finished bar.
    pub fn commit(&mut self, close: f64) -> IndicatorSnapshot {
        self.sma.update(close);
        self.rsi.update(close);
        self.macd.update(close);
        self.bollinger.update(close);
        self.committed += 1;
        self.snapshot()
    }

    /// Values as if `close` were committed, without changing state.
    pub fn preview(&self, close: f64) -> IndicatorSnapshot {
        let mut scratch = self.clone();
        scratch.commit(close)
    }

    pub fn snapshot(&self) -> IndicatorSnapshot {
        IndicatorSnapshot {
            ma: self.sma.value(),
            rsi: self.rsi.value(),
            macd: self.macd.value(),
            bollinger: self.bollinger.value(),
        }
    }

    /// Swap in new parameters. All calculators are rebuilt empty; callers
    /// reseed from their series.
    pub fn reconfigure(&mut self, config: IndicatorConfig) -> IndicatorResult<()> {
        *self = Self::new(config)?;
        Ok(())
    }
}
