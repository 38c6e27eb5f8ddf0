//! Time-keyed series records and order-book levels.
//!
//! Candle and volume shapes are also the on-disk cache shapes, so field
//! names here are part of the persisted format.

use crate::{Price, Size};
use serde::{Deserialize, Serialize};

/// A record keyed by an integer timestamp in seconds.
///
/// The series store keeps at most one record per key.
pub trait TimeKeyed {
    fn time(&self) -> i64;
}

/// OHLC candle. `time` is the bucket open time in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
        }
    }

    pub fn direction(&self) -> Direction {
        Direction::of(self.open, self.close)
    }

    /// All prices finite and `low <= open, close <= high`.
    pub fn is_well_formed(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        prices.iter().all(|p| p.is_finite())
            && self.low <= self.high
            && self.open >= self.low
            && self.open <= self.high
            && self.close >= self.low
            && self.close <= self.high
    }
}

impl TimeKeyed for Candle {
    fn time(&self) -> i64 {
        self.time
    }
}

/// Candle body direction, persisted as the bar colour used by chart
/// consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "#26a69a")]
    Up,
    #[serde(rename = "#ef5350")]
    Down,
}

impl Direction {
    /// Flat candles count as up.
    pub fn of(open: f64, close: f64) -> Self {
        if close >= open {
            Self::Up
        } else {
            Self::Down
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Self::Up => "#26a69a",
            Self::Down => "#ef5350",
        }
    }
}

/// Traded volume for one candle bucket, kept in lockstep with `Candle`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub time: i64,
    pub value: f64,
    pub color: Direction,
}

impl TimeKeyed for Volume {
    fn time(&self) -> i64 {
        self.time
    }
}

/// A candle together with its volume, as delivered by one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub candle: Candle,
    pub volume: Volume,
}

impl Bar {
    pub fn new(candle: Candle, volume: f64) -> Self {
        Self {
            volume: Volume {
                time: candle.time,
                value: volume,
                color: candle.direction(),
            },
            candle,
        }
    }

    pub fn time(&self) -> i64 {
        self.candle.time
    }

    pub fn close(&self) -> f64 {
        self.candle.close
    }
}

/// One derived indicator value on the candle time axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorPoint {
    pub time: i64,
    pub value: f64,
}

impl IndicatorPoint {
    pub fn new(time: i64, value: f64) -> Self {
        Self { time, value }
    }
}

impl TimeKeyed for IndicatorPoint {
    fn time(&self) -> i64 {
        self.time
    }
}

/// Side of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Bid,
    Ask,
}

impl std::fmt::Display for BookSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bid => write!(f, "BID"),
            Self::Ask => write!(f, "ASK"),
        }
    }
}

/// One price level of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: Price,
    pub quantity: Size,
}

impl OrderBookLevel {
    pub fn new(price: Price, quantity: Size) -> Self {
        Self { price, quantity }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_from_open_close() {
        assert_eq!(Direction::of(10.0, 11.0), Direction::Up);
        assert_eq!(Direction::of(10.0, 10.0), Direction::Up);
        assert_eq!(Direction::of(10.0, 9.0), Direction::Down);
    }

    #[test]
    fn test_volume_serializes_color() {
        let bar = Bar::new(Candle::new(60, 10.0, 12.0, 8.0, 9.0), 3.5);
        let json = serde_json::to_string(&bar.volume).unwrap();
        assert_eq!(json, r##"{"time":60,"value":3.5,"color":"#ef5350"}"##);

        let back: Volume = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bar.volume);
    }

    #[test]
    fn test_volume_rejects_unknown_color() {
        let json = r##"{"time":60,"value":3.5,"color":"red"}"##;
        assert!(serde_json::from_str::<Volume>(json).is_err());
    }

    #[test]
    fn test_candle_well_formed() {
        assert!(Candle::new(0, 10.0, 12.0, 9.0, 11.0).is_well_formed());
        assert!(!Candle::new(0, 10.0, 9.0, 12.0, 11.0).is_well_formed());
        assert!(!Candle::new(0, f64::NAN, 12.0, 9.0, 11.0).is_well_formed());
    }
}
