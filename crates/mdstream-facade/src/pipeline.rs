//! Per-stream state: the series store, the indicator engine and the
//! indicator lines derived from it.
//!
//! The newest bar is usually still forming. It is kept out of the engine
//! and evaluated with `preview` on every tick; it is committed once the
//! exchange marks it closed or a newer bar starts. A tick for a bar that
//! was already committed rewrites history, so the engine and the lines are
//! rebuilt from the store.

use crate::error::FacadeResult;
use crate::output::StreamOutput;
use mdstream_core::{Bar, IndicatorPoint};
use mdstream_feed::KlineTick;
use mdstream_indicators::{IndicatorConfig, IndicatorEngine, IndicatorSnapshot};
use mdstream_series::{Series, SeriesStore, UpsertOutcome};
use tracing::debug;

/// One time-keyed series per indicator output.
#[derive(Debug, Clone)]
pub struct IndicatorLines {
    pub ma: Series<IndicatorPoint>,
    pub rsi: Series<IndicatorPoint>,
    pub macd: Series<IndicatorPoint>,
    pub signal: Series<IndicatorPoint>,
    pub histogram: Series<IndicatorPoint>,
    pub boll_upper: Series<IndicatorPoint>,
    pub boll_lower: Series<IndicatorPoint>,
}

impl IndicatorLines {
    pub fn new(limit: usize) -> Self {
        Self {
            ma: Series::new(limit),
            rsi: Series::new(limit),
            macd: Series::new(limit),
            signal: Series::new(limit),
            histogram: Series::new(limit),
            boll_upper: Series::new(limit),
            boll_lower: Series::new(limit),
        }
    }

    pub fn clear(&mut self) {
        self.ma.clear();
        self.rsi.clear();
        self.macd.clear();
        self.signal.clear();
        self.histogram.clear();
        self.boll_upper.clear();
        self.boll_lower.clear();
    }

    /// Upsert every available value at `time`.
    pub fn record(&mut self, time: i64, snapshot: &IndicatorSnapshot) {
        if let Some(ma) = snapshot.ma {
            self.ma.upsert(IndicatorPoint::new(time, ma));
        }
        if let Some(rsi) = snapshot.rsi {
            self.rsi.upsert(IndicatorPoint::new(time, rsi));
        }
        if let Some(macd) = snapshot.macd {
            self.macd.upsert(IndicatorPoint::new(time, macd.macd));
            self.signal.upsert(IndicatorPoint::new(time, macd.signal));
            self.histogram.upsert(IndicatorPoint::new(time, macd.histogram));
        }
        if let Some(bands) = snapshot.bollinger {
            self.boll_upper.upsert(IndicatorPoint::new(time, bands.upper));
            self.boll_lower.upsert(IndicatorPoint::new(time, bands.lower));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// The forming bar was revised; committed state untouched.
    Previewed,
    /// At least one bar was folded into the engine.
    Committed,
    /// A committed bar changed; everything was rebuilt.
    Reseeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub upsert: UpsertOutcome,
    pub action: TickAction,
}

#[derive(Debug, Clone)]
pub struct StreamState {
    store: SeriesStore,
    engine: IndicatorEngine,
    lines: IndicatorLines,
    open_bar: Option<Bar>,
}

impl StreamState {
    pub fn new(max_len: usize, config: IndicatorConfig) -> FacadeResult<Self> {
        Ok(Self {
            store: SeriesStore::new(max_len),
            engine: IndicatorEngine::new(config)?,
            lines: IndicatorLines::new(max_len),
            open_bar: None,
        })
    }

    /// Replace everything with a history snapshot.
    pub fn seed(&mut self, bars: Vec<Bar>) {
        self.store.replace_bars(bars);
        self.open_bar = self.store.last_bar();
        self.rebuild();
    }

    /// Adopt a store restored from the cache.
    pub fn restore(&mut self, store: SeriesStore) {
        self.store = store;
        self.open_bar = self.store.last_bar();
        self.rebuild();
    }

    /// Upsert fetched bars on top of what is already held, e.g. after a
    /// reconnect.
    pub fn merge_history(&mut self, bars: Vec<Bar>) {
        for bar in bars {
            self.store.upsert_bar(bar);
        }
        self.open_bar = self.store.last_bar();
        self.rebuild();
    }

    pub fn apply_tick(&mut self, tick: &KlineTick) -> TickOutcome {
        let bar = tick.bar;
        let time = bar.time();
        let newest_before = self.store.candles().last().map(|c| c.time);
        let upsert = self.store.upsert_bar(bar);

        let late = match self.open_bar {
            Some(open) => time < open.time(),
            None => newest_before.map_or(false, |newest| time <= newest),
        };
        if late {
            debug!(time, "Tick for a committed bar, rebuilding indicators");
            self.rebuild();
            return TickOutcome {
                upsert,
                action: TickAction::Reseeded,
            };
        }

        let mut action = TickAction::Previewed;
        if let Some(open) = self.open_bar.take() {
            if time > open.time() {
                self.commit(open);
                action = TickAction::Committed;
            }
        }

        if tick.is_closed {
            self.commit(bar);
            action = TickAction::Committed;
        } else {
            self.open_bar = Some(bar);
            let snapshot = self.engine.preview(bar.close());
            self.lines.record(time, &snapshot);
        }

        TickOutcome { upsert, action }
    }

    /// Rebuild the engine with new parameters and replay the store.
    pub fn reconfigure(&mut self, config: IndicatorConfig) -> FacadeResult<()> {
        self.engine.reconfigure(config)?;
        self.rebuild();
        Ok(())
    }

    pub fn store(&self) -> &SeriesStore {
        &self.store
    }

    pub fn engine(&self) -> &IndicatorEngine {
        &self.engine
    }

    pub fn lines(&self) -> &IndicatorLines {
        &self.lines
    }

    /// The bar still forming, if any.
    pub fn open_bar(&self) -> Option<Bar> {
        self.open_bar
    }

    /// Indicator values including the forming bar.
    pub fn current(&self) -> IndicatorSnapshot {
        match self.open_bar {
            Some(open) => self.engine.preview(open.close()),
            None => self.engine.snapshot(),
        }
    }

    /// Copy series and lines into `out`.
    pub fn fill(&self, out: &mut StreamOutput) {
        out.candles = self.store.candles().to_vec();
        out.volumes = self.store.volumes().to_vec();
        out.ma = self.lines.ma.to_vec();
        out.rsi = self.lines.rsi.to_vec();
        out.macd = self.lines.macd.to_vec();
        out.signal = self.lines.signal.to_vec();
        out.histogram = self.lines.histogram.to_vec();
        out.boll_upper = self.lines.boll_upper.to_vec();
        out.boll_lower = self.lines.boll_lower.to_vec();
    }

    fn commit(&mut self, bar: Bar) {
        let snapshot = self.engine.commit(bar.close());
        self.lines.record(bar.time(), &snapshot);
    }

    fn rebuild(&mut self) {
        self.engine.seed(&[]);
        self.lines.clear();

        let open_time = self.open_bar.map(|b| b.time());
        if let Some(time) = open_time {
            self.open_bar = self.store.bar(time);
        }

        for candle in self.store.candles().iter() {
            if Some(candle.time) == open_time {
                continue;
            }
            let snapshot = self.engine.commit(candle.close);
            self.lines.record(candle.time, &snapshot);
        }

        if let Some(open) = self.open_bar {
            let snapshot = self.engine.preview(open.close());
            self.lines.record(open.time(), &snapshot);
        }
    }
}
