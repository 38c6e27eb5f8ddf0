use crate::{check_period, Indicator, IndicatorError, IndicatorResult};
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bands {
    pub middle: f64,
    pub upper: f64,
    pub lower: f64,
}

/// Bollinger bands: rolling mean ± `num_std_dev` population deviations.
///
/// The window is recomputed on each update, O(period).
#[derive(Debug, Clone)]
pub struct Bollinger {
    period: usize,
    num_std_dev: f64,
    window: VecDeque<f64>,
}

impl Bollinger {
    pub fn new(period: usize, num_std_dev: f64) -> IndicatorResult<Self> {
        check_period("Bollinger", period)?;
        if !num_std_dev.is_finite() || num_std_dev <= 0.0 {
            return Err(IndicatorError::InvalidParameter {
                indicator: "Bollinger",
                reason: format!("std dev multiplier must be positive, got {}", num_std_dev),
            });
        }
        Ok(Self {
            period,
            num_std_dev,
            window: VecDeque::with_capacity(period + 1),
        })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn num_std_dev(&self) -> f64 {
        self.num_std_dev
    }
}

impl Indicator for Bollinger {
    type Output = Bands;

    fn update(&mut self, price: f64) -> Option<Bands> {
        if !price.is_finite() {
            return self.value();
        }
        self.window.push_back(price);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        self.value()
    }

    fn value(&self) -> Option<Bands> {
        if self.window.len() < self.period {
            return None;
        }
        let n = self.period as f64;
        let mean = self.window.iter().sum::<f64>() / n;
        let variance = self.window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
        let width = self.num_std_dev * variance.sqrt();
        Some(Bands {
            middle: mean,
            upper: mean + width,
            lower: mean - width,
        })
    }

    fn reset(&mut self) {
        self.window.clear();
    }

    /// Only the trailing `period` prices are kept.
    fn seed(&mut self, prices: &[f64]) -> Option<Bands> {
        self.reset();
        let finite: Vec<f64> = prices.iter().copied().filter(|p| p.is_finite()).collect();
        let start = finite.len().saturating_sub(self.period);
        self.window.extend(&finite[start..]);
        self.value()
    }
}
