use crate::{check_period, Indicator, IndicatorResult};

/// Relative Strength Index with Wilder smoothing.
///
/// The first `period` deltas are averaged plainly; every later delta is
/// folded in with `avg = (avg·(period−1) + x) / period`.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev: Option<f64>,
    deltas: usize,
    gain_sum: f64,
    loss_sum: f64,
    avg_gain: f64,
    avg_loss: f64,
    value: Option<f64>,
}

impl Rsi {
    pub fn new(period: usize) -> IndicatorResult<Self> {
        check_period("RSI", period)?;
        Ok(Self {
            period,
            prev: None,
            deltas: 0,
            gain_sum: 0.0,
            loss_sum: 0.0,
            avg_gain: 0.0,
            avg_loss: 0.0,
            value: None,
        })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn is_ready(&self) -> bool {
        self.value.is_some()
    }

    fn compute(&self) -> f64 {
        if self.avg_loss == 0.0 {
            return 100.0;
        }
        let rs = self.avg_gain / self.avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

impl Indicator for Rsi {
    type Output = f64;

    fn update(&mut self, price: f64) -> Option<f64> {
        if !price.is_finite() {
            return self.value;
        }
        let Some(prev) = self.prev.replace(price) else {
            return None;
        };

        let change = price - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        let period = self.period as f64;

        if self.value.is_some() {
            self.avg_gain = (self.avg_gain * (period - 1.0) + gain) / period;
            self.avg_loss = (self.avg_loss * (period - 1.0) + loss) / period;
        } else {
            self.deltas += 1;
            self.gain_sum += gain;
            self.loss_sum += loss;
            if self.deltas < self.period {
                return None;
            }
            self.avg_gain = self.gain_sum / period;
            self.avg_loss = self.loss_sum / period;
        }

        self.value = Some(self.compute());
        self.value
    }

    fn value(&self) -> Option<f64> {
        self.value
    }

    fn reset(&mut self) {
        self.prev = None;
        self.deltas = 0;
        self.gain_sum = 0.0;
        self.loss_sum = 0.0;
        self.avg_gain = 0.0;
        self.avg_loss = 0.0;
        self.value = None;
    }
}
