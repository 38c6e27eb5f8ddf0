//! Incremental indicator calculators.
//!
//! Every calculator consumes one closing price per call and returns `None`
//! until it has seen enough samples. `seed` resets and replays a history,
//! so a seeded calculator is indistinguishable from one fed the same prices
//! one at a time.

pub mod bollinger;
pub mod ema;
pub mod engine;
pub mod error;
pub mod macd;
pub mod rsi;
pub mod sma;

pub use bollinger::{Bands, Bollinger};
pub use ema::Ema;
pub use engine::{IndicatorConfig, IndicatorEngine, IndicatorSnapshot};
pub use error::{IndicatorError, IndicatorResult};
pub use macd::{Macd, MacdValue};
pub use rsi::Rsi;
pub use sma::Sma;

/// A streaming calculator over closing prices.
pub trait Indicator {
    type Output: Copy;

    /// Fold one price. Non-finite prices leave the state untouched.
    fn update(&mut self, price: f64) -> Option<Self::Output>;

    /// Latest output without consuming a price.
    fn value(&self) -> Option<Self::Output>;

    fn reset(&mut self);

    /// Reset, then replay `prices` oldest first.
    fn seed(&mut self, prices: &[f64]) -> Option<Self::Output> {
        self.reset();
        for &price in prices {
            self.update(price);
        }
        self.value()
    }
}

pub(crate) fn check_period(name: &'static str, period: usize) -> IndicatorResult<()> {
    if period == 0 {
        return Err(IndicatorError::InvalidPeriod {
            indicator: name,
            reason: "period must be positive".to_string(),
        });
    }
    Ok(())
}
