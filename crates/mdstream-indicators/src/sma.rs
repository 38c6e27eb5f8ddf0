use crate::{check_period, Indicator, IndicatorResult};
use std::collections::VecDeque;

/// Simple moving average over the last `period` prices.
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    window: VecDeque<f64>,
    sum: f64,
}

impl Sma {
    pub fn new(period: usize) -> IndicatorResult<Self> {
        check_period("SMA", period)?;
        Ok(Self {
            period,
            window: VecDeque::with_capacity(period + 1),
            sum: 0.0,
        })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn is_ready(&self) -> bool {
        self.window.len() == self.period
    }
}

impl Indicator for Sma {
    type Output = f64;

    fn update(&mut self, price: f64) -> Option<f64> {
        if !price.is_finite() {
            return self.value();
        }
        self.window.push_back(price);
        self.sum += price;
        if self.window.len() > self.period {
            if let Some(oldest) = self.window.pop_front() {
                self.sum -= oldest;
            }
        }
        self.value()
    }

    fn value(&self) -> Option<f64> {
        self.is_ready().then(|| self.sum / self.period as f64)
    }

    fn reset(&mut self) {
        self.window.clear();
        self.sum = 0.0;
    }

    /// Only the trailing `period` prices matter.
    fn seed(&mut self, prices: &[f64]) -> Option<f64> {
        self.reset();
        let finite: Vec<f64> = prices.iter().copied().filter(|p| p.is_finite()).collect();
        let start = finite.len().saturating_sub(self.period);
        for &price in &finite[start..] {
            self.update(price);
        }
        self.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_period_rejected() {
        assert!(Sma::new(0).is_err());
    }

    #[test]
    fn test_null_until_full() {
        let mut sma = Sma::new(3).unwrap();
        assert_eq!(sma.update(1.0), None);
        assert_eq!(sma.update(2.0), None);
        assert_eq!(sma.update(3.0), Some(2.0));
        assert_eq!(sma.update(6.0), Some(11.0 / 3.0));
    }

    #[test]
    fn test_seed_matches_streaming() {
        let prices = [5.0, 7.0, 6.0, 9.0, 11.0, 10.0, 8.0];
        let mut streamed = Sma::new(4).unwrap();
        let mut last = None;
        for &p in &prices {
            last = streamed.update(p);
        }
        let mut seeded = Sma::new(4).unwrap();
        let seeded_value = seeded.seed(&prices).unwrap();
        assert!((seeded_value - last.unwrap()).abs() < 1e-12);

        // Both continue identically.
        let a = streamed.update(12.0).unwrap();
        let b = seeded.update(12.0).unwrap();
        assert!((a - b).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_ignored() {
        let mut sma = Sma::new(2).unwrap();
        sma.update(1.0);
        assert_eq!(sma.update(f64::NAN), None);
        assert_eq!(sma.update(3.0), Some(2.0));
    }
}
