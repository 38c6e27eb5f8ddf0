use crate::{check_period, Indicator, IndicatorResult};

/// Exponential moving average, seeded with the SMA of the first `period`
/// prices.
///
/// Behaviour:
///   samples 1..period → `None`; the `period`th sample yields their mean
///   afterwards        → `ema = price·k + ema·(1−k)` where `k = 2/(period+1)`
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    k: f64,
    count: usize,
    warmup_sum: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> IndicatorResult<Self> {
        check_period("EMA", period)?;
        Ok(Self {
            period,
            k: 2.0 / (period as f64 + 1.0),
            count: 0,
            warmup_sum: 0.0,
            value: None,
        })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn is_ready(&self) -> bool {
        self.value.is_some()
    }
}

impl Indicator for Ema {
    type Output = f64;

    fn update(&mut self, price: f64) -> Option<f64> {
        if !price.is_finite() {
            return self.value;
        }
        self.value = match self.value {
            Some(prev) => Some(price * self.k + prev * (1.0 - self.k)),
            None => {
                self.count += 1;
                self.warmup_sum += price;
                (self.count == self.period).then(|| self.warmup_sum / self.period as f64)
            }
        };
        self.value
    }

    fn value(&self) -> Option<f64> {
        self.value
    }

    fn reset(&mut self) {
        self.count = 0;
        self.warmup_sum = 0.0;
        self.value = None;
    }
}
