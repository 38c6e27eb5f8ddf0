mod common;

use common::*;
use mdstream_core::Interval;
use mdstream_facade::{FacadeError, MarketStream, MarketStreamConfig};
use mdstream_indicators::IndicatorConfig;
use mdstream_rest::{MockMarketDataApi, RestError};
use mdstream_series::{candles_key, CacheBackend, MemoryCache, SeriesCache, SeriesStore};
use mdstream_ws::testing::ServerEnd;
use mdstream_ws::ConnectionState;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

fn stream_config() -> MarketStreamConfig {
    MarketStreamConfig {
        indicators: small_indicators(),
        ..MarketStreamConfig::new("btcusdt", Interval::OneMinute)
    }
}

fn api_with_history(bars: i64) -> MockMarketDataApi {
    let mut api = MockMarketDataApi::new();
    api.expect_fetch_klines()
        .returning(move |_, _, _| Ok(history(bars)));
    api
}

// ============================================================================
// History then live
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_history_seeds_then_live_ticks_extend() {
    let (mux, _connector, mut sessions) = setup();
    let stream =
        MarketStream::open(stream_config(), mux, Arc::new(api_with_history(30)), None).unwrap();

    let out = wait_until(stream.watch(), |o| !o.loading).await;
    assert_eq!(out.candles.len(), 30);
    assert_eq!(out.volumes.len(), 30);
    assert!(out.error.is_none());
    assert!(!out.ma.is_empty());
    assert!(!out.macd.is_empty());

    let server = next_session(&mut sessions).await;
    assert_eq!(server.key.as_str(), "btcusdt@kline_1m");
    wait_until(stream.watch(), |o| o.connected == ConnectionState::Connected).await;

    server.send_json(&kline(31 * 60, 120.0, false));
    let out = wait_until(stream.watch(), |o| o.candles.len() == 31).await;
    assert_eq!(out.last_close(), Some(120.0));
    assert_eq!(out.ma.last().unwrap().time, 31 * 60);
    assert_eq!(out.rsi.last().unwrap().time, 31 * 60);

    // Revising the forming bar updates in place.
    server.send_json(&kline(31 * 60, 90.0, false));
    let out = wait_until(stream.watch(), |o| o.last_close() == Some(90.0)).await;
    assert_eq!(out.candles.len(), 31);
    assert_eq!(out.ma.last().unwrap().time, 31 * 60);

    stream.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_history_failure_runs_degraded() {
    let (mux, _connector, mut sessions) = setup();
    let mut api = MockMarketDataApi::new();
    api.expect_fetch_klines().returning(|_, _, _| {
        Err(RestError::Status {
            status: 503,
            body: "maintenance".to_string(),
        })
    });

    let stream = MarketStream::open(stream_config(), mux, Arc::new(api), None).unwrap();
    let out = wait_until(stream.watch(), |o| !o.loading).await;
    assert!(out.candles.is_empty());
    assert!(out.error.as_deref().unwrap().contains("503"));

    // Live data still flows.
    let server = next_session(&mut sessions).await;
    for i in 1..=5 {
        server.send_json(&kline(60 * i, 100.0 + i as f64, true));
    }
    let out = wait_until(stream.watch(), |o| o.candles.len() == 5).await;
    assert!(out.error.is_some());
    assert_eq!(out.ma.last().unwrap().value, 104.0);

    stream.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_history_failure_is_retried_until_it_succeeds() {
    let (mux, connector, mut sessions) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut api = MockMarketDataApi::new();
    api.expect_fetch_klines().returning(move |_, _, limit| {
        assert_eq!(limit, 500);
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 | 1 => Err(RestError::HttpClient("offline".to_string())),
            _ => Ok(history(20)),
        }
    });

    let stream = MarketStream::open(stream_config(), mux, Arc::new(api), None).unwrap();
    let out = wait_until(stream.watch(), |o| !o.loading).await;
    assert!(out.error.is_some());

    let server = next_session(&mut sessions).await;
    server.send_json(&kline(21 * 60, 130.0, false));

    let out = wait_until(stream.watch(), |o| o.error.is_none() && o.candles.len() == 21).await;
    assert_eq!(out.candles.first().unwrap().time, 60);
    assert_eq!(out.last_close(), Some(130.0));
    assert_eq!(out.ma.last().unwrap().time, 21 * 60);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(connector.connect_count(), 1);

    // No further refetches once history is in.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    stream.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_and_foreign_payloads_are_dropped() {
    let (mux, _connector, mut sessions) = setup();
    let stream =
        MarketStream::open(stream_config(), mux, Arc::new(api_with_history(5)), None).unwrap();
    wait_until(stream.watch(), |o| !o.loading).await;
    let server = next_session(&mut sessions).await;

    server.send_text("not json at all");
    server.send_json(&json!({"unexpected": true}));
    server.send_json(&json!({"k": {"t": 360000, "o": "1", "h": "0.5", "l": "2", "c": "1", "v": "1"}}));
    let mut wrong_interval = kline(360, 1.0, false);
    wrong_interval["k"]["i"] = json!("5m");
    server.send_json(&wrong_interval);
    server.send_json(&kline(420, 101.0, false));

    let out = wait_until(stream.watch(), |o| o.candles.len() == 6).await;
    assert_eq!(out.candles.last().unwrap().time, 420);
    assert_eq!(out.connected, ConnectionState::Connected);

    stream.close().await;
}

// ============================================================================
// Reconnect
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnect_backfills_gap() {
    let (mux, connector, mut sessions) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut api = MockMarketDataApi::new();
    api.expect_fetch_klines().returning(move |_, _, limit| {
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Ok(history(10)),
            _ => {
                assert_eq!(limit, 100);
                Ok(history(13))
            }
        }
    });

    let stream = MarketStream::open(stream_config(), mux, Arc::new(api), None).unwrap();
    wait_until(stream.watch(), |o| !o.loading && o.candles.len() == 10).await;

    let server = next_session(&mut sessions).await;
    wait_until(stream.watch(), |o| o.is_connected()).await;
    server.close();

    let _server2 = next_session(&mut sessions).await;
    let out = wait_until(stream.watch(), |o| o.candles.len() == 13).await;
    assert!(out.is_connected());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(out.ma.last().unwrap().time, 13 * 60);

    stream.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_gave_up_surfaces_error_and_retry_recovers() {
    let (connector, mut sessions) = mdstream_ws::testing::MemoryConnector::new();
    let connector = Arc::new(connector);
    let config = mdstream_ws::ConnectionConfig {
        max_reconnect_attempts: 2,
        ..ws_config()
    };
    let mux = mdstream_ws::Multiplexer::new(config, connector.clone());
    connector.refuse_all(true);

    let stream =
        MarketStream::open(stream_config(), mux, Arc::new(api_with_history(3)), None).unwrap();
    let out = wait_until(stream.watch(), |o| {
        o.connected == ConnectionState::Disconnected
            && o
                .connection_error
                .as_deref()
                .map_or(false, |e| e.to_lowercase().contains("giving up"))
    })
    .await;
    assert_eq!(out.candles.len(), 3);

    connector.refuse_all(false);
    assert!(stream.retry());
    let _server = next_session(&mut sessions).await;
    let out = wait_until(stream.watch(), |o| o.is_connected()).await;
    assert!(out.connection_error.is_none());

    stream.close().await;
}

// ============================================================================
// Cache
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cache_restores_when_history_fails_and_flushes_on_close() {
    let backend = MemoryCache::new();
    {
        let mut store = SeriesStore::new(100);
        for b in history(4) {
            store.upsert_bar(b);
        }
        let mut cache = SeriesCache::new(
            Arc::new(backend.clone()),
            "btcusdt",
            "1m",
            Duration::from_secs(5),
        );
        assert!(cache.persist(&store, true).await);
    }

    let (mux, _connector, mut sessions) = setup();
    let mut api = MockMarketDataApi::new();
    api.expect_fetch_klines()
        .returning(|_, _, _| Err(RestError::HttpClient("offline".to_string())));

    let cache: Arc<dyn CacheBackend> = Arc::new(backend.clone());
    let stream = MarketStream::open(stream_config(), mux, Arc::new(api), Some(cache)).unwrap();

    let out = wait_until(stream.watch(), |o| !o.loading).await;
    assert_eq!(out.candles.len(), 4);
    assert!(out.error.is_some());

    let server = next_session(&mut sessions).await;
    server.send_json(&kline(5 * 60, 111.0, false));
    wait_until(stream.watch(), |o| o.candles.len() == 5).await;

    stream.close().await;
    let persisted = backend.get(&candles_key("btcusdt", "1m")).unwrap();
    assert!(persisted.contains("\"time\":300"));
}

#[tokio::test(start_paused = true)]
async fn test_history_is_flushed_immediately() {
    let backend = MemoryCache::new();
    let (mux, _connector, _sessions) = setup();
    let cache: Arc<dyn CacheBackend> = Arc::new(backend.clone());
    let stream =
        MarketStream::open(stream_config(), mux, Arc::new(api_with_history(7)), Some(cache))
            .unwrap();

    wait_until(stream.watch(), |o| !o.loading).await;
    let persisted = backend.get(&candles_key("btcusdt", "1m")).unwrap();
    assert!(persisted.contains("\"time\":420"));

    stream.close().await;
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_close_releases_connection_after_grace() {
    let (mux, _connector, mut sessions) = setup();
    let stream = MarketStream::open(
        stream_config(),
        mux.clone(),
        Arc::new(api_with_history(5)),
        None,
    )
    .unwrap();
    let mut server: ServerEnd = next_session(&mut sessions).await;
    wait_until(stream.watch(), |o| o.is_connected()).await;
    let key = stream.key().clone();

    stream.close().await;
    assert_eq!(mux.ref_count(&key), 0);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(mux.connection_count(), 0);
    let frame = within(async {
        loop {
            match server.recv().await {
                Some(Message::Close(_)) | None => break true,
                Some(_) => continue,
            }
        }
    })
    .await;
    assert!(frame);
}

#[tokio::test(start_paused = true)]
async fn test_two_streams_share_one_connection() {
    let (mux, connector, mut sessions) = setup();
    let a = MarketStream::open(
        stream_config(),
        mux.clone(),
        Arc::new(api_with_history(5)),
        None,
    )
    .unwrap();
    let b = MarketStream::open(
        stream_config(),
        mux.clone(),
        Arc::new(api_with_history(5)),
        None,
    )
    .unwrap();

    let server = next_session(&mut sessions).await;
    wait_until(a.watch(), |o| o.is_connected()).await;
    wait_until(b.watch(), |o| o.is_connected()).await;
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(mux.ref_count(a.key()), 2);

    server.send_json(&kline(6 * 60, 130.0, false));
    wait_until(a.watch(), |o| o.candles.len() == 6).await;
    wait_until(b.watch(), |o| o.candles.len() == 6).await;

    a.close().await;
    assert_eq!(mux.ref_count(b.key()), 1);
    b.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconfigure() {
    let (mux, _connector, _sessions) = setup();
    let stream =
        MarketStream::open(stream_config(), mux, Arc::new(api_with_history(20)), None).unwrap();
    let before = wait_until(stream.watch(), |o| !o.loading).await;

    let bad = IndicatorConfig {
        macd_short: 9,
        macd_long: 3,
        ..small_indicators()
    };
    assert!(matches!(
        stream.reconfigure(bad).await,
        Err(FacadeError::Indicator(_))
    ));

    let wider = IndicatorConfig {
        ma_period: 10,
        ..small_indicators()
    };
    stream.reconfigure(wider).await.unwrap();
    let after = wait_until(stream.watch(), |o| o.ma.len() != before.ma.len()).await;
    assert_eq!(after.ma.len(), 11);
    assert_eq!(after.candles, before.candles);

    stream.close().await;
}

#[tokio::test]
async fn test_invalid_config_fails_fast() {
    let (mux, _connector, _sessions) = setup();
    let config = MarketStreamConfig {
        indicators: IndicatorConfig {
            rsi_period: 0,
            ..IndicatorConfig::default()
        },
        ..MarketStreamConfig::new("btcusdt", Interval::OneMinute)
    };
    let api = Arc::new(MockMarketDataApi::new());
    assert!(matches!(
        MarketStream::open(config, mux.clone(), api.clone(), None),
        Err(FacadeError::Indicator(_))
    ));

    let config = MarketStreamConfig::new("  ", Interval::OneMinute);
    assert!(matches!(
        MarketStream::open(config, mux.clone(), api, None),
        Err(FacadeError::InvalidConfig(_))
    ));
    assert_eq!(mux.connection_count(), 0);
}
