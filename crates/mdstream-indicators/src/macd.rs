use crate::ema::Ema;
use crate::{Indicator, IndicatorError, IndicatorResult};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD line `ema(short) − ema(long)` with an EMA signal line over it.
///
/// First output after `long + signal − 1` prices.
#[derive(Debug, Clone)]
pub struct Macd {
    short: Ema,
    long: Ema,
    signal: Ema,
    value: Option<MacdValue>,
}

impl Macd {
    pub fn new(short: usize, long: usize, signal: usize) -> IndicatorResult<Self> {
        if short >= long {
            return Err(IndicatorError::InvalidParameter {
                indicator: "MACD",
                reason: format!("short period {} must be below long period {}", short, long),
            });
        }
        Ok(Self {
            short: Ema::new(short)?,
            long: Ema::new(long)?,
            signal: Ema::new(signal)?,
            value: None,
        })
    }

    pub fn periods(&self) -> (usize, usize, usize) {
        (self.short.period(), self.long.period(), self.signal.period())
    }

    /// Prices needed before the first output.
    pub fn warmup(&self) -> usize {
        self.long.period() + self.signal.period() - 1
    }
}

impl Indicator for Macd {
    type Output = MacdValue;

    fn update(&mut self, price: f64) -> Option<MacdValue> {
        if !price.is_finite() {
            return self.value;
        }
        let short = self.short.update(price);
        let long = self.long.update(price);
        let (Some(short), Some(long)) = (short, long) else {
            return None;
        };
        let macd = short - long;
        let signal = self.signal.update(macd)?;
        self.value = Some(MacdValue {
            macd,
            signal,
            histogram: macd - signal,
        });
        self.value
    }

    fn value(&self) -> Option<MacdValue> {
        self.value
    }

    fn reset(&mut self) {
        self.short.reset();
        self.long.reset();
        self.signal.reset();
        self.value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_must_be_below_long() {
        assert!(matches!(
            Macd::new(26, 12, 9),
            Err(IndicatorError::InvalidParameter { .. })
        ));
        assert!(Macd::new(12, 12, 9).is_err());
        assert!(Macd::new(12, 26, 0).is_err());
        assert!(Macd::new(0, 26, 9).is_err());
    }

    #[test]
    fn test_first_value_at_long_plus_signal_minus_one() {
        let mut macd = Macd::new(3, 5, 4).unwrap();
        assert_eq!(macd.warmup(), 8);
        for i in 0..7 {
            assert_eq!(macd.update(100.0 + i as f64), None, "sample {}", i + 1);
        }
        assert!(macd.update(108.0).is_some());
    }

    #[test]
    fn test_histogram_is_macd_minus_signal() {
        let mut macd = Macd::new(3, 6, 3).unwrap();
        let prices: Vec<f64> = (0..30).map(|i| 10.0 + ((i * 5) % 9) as f64).collect();
        let v = macd.seed(&prices).unwrap();
        assert!((v.histogram - (v.macd - v.signal)).abs() < 1e-12);
    }

    #[test]
    fn test_constant_prices_give_zero_lines() {
        let mut macd = Macd::new(2, 4, 2).unwrap();
        let v = macd.seed(&[7.0; 10]).unwrap();
        assert_eq!(v.macd, 0.0);
        assert_eq!(v.signal, 0.0);
        assert_eq!(v.histogram, 0.0);
    }
}
