// =============================================================================
// Integration test — sentiment veto emits SignalRejected (§4.4, §7)
// =============================================================================
//
// Exercises the real `ScanWorker::scan_tick` path end to end: a symbol
// whose sentiment filter returns `Block` must never reach the executor,
// and must surface exactly one `SignalRejected{reason:
// "sentiment_contradiction"}` event on the shared sink.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use ees_engine::app_state::AppState;
use ees_engine::broker::BrokerClient;
use ees_engine::config::Config;
use ees_engine::data_fabric::provider::{Bar, ProviderError, Quote, QuoteProvider, Timeframe};
use ees_engine::data_fabric::DataFabric;
use ees_engine::events::{EventKind, EventSink};
use ees_engine::execution::OrderExecutor;
use ees_engine::oauth::OAuthSessionManager;
use ees_engine::position::PositionStore;
use ees_engine::price::Price;
use ees_engine::scan::ScanWorker;
use ees_engine::secret_store::{Credentials, FileSecretStore, SecretStore};
use ees_engine::sentiment::{FileSentimentSource, SentimentFilter};
use ees_engine::session::{ScanTicker, SessionState};
use ees_engine::trailing::{TrailingEngine, TrailingParams};
use ees_engine::types::AccountMode;
use ees_engine::universe::{SentimentEntry, Universe};

/// Always answers with a fresh quote and 260 bars of gently rising
/// closes, so `indicators::compute` fills every field a strategy might
/// read without any of them needing real market data.
struct FakeProvider;

#[async_trait]
impl QuoteProvider for FakeProvider {
    fn id(&self) -> &'static str {
        "fake"
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, ProviderError> {
        Ok(Quote {
            symbol: symbol.to_string(),
            last_price: Price::from_f64(50.0),
            bid: Price::from_f64(49.9),
            ask: Price::from_f64(50.1),
            open: Price::from_f64(49.0),
            high: Price::from_f64(51.0),
            low: Price::from_f64(48.5),
            volume: 10_000.0,
            timestamp: Utc::now(),
        })
    }

    async fn batch_quote(&self, symbols: &[String]) -> Result<Vec<Quote>, ProviderError> {
        let mut out = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            out.push(self.quote(symbol).await?);
        }
        Ok(out)
    }

    async fn bars(&self, _symbol: &str, _timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, ProviderError> {
        let n = count.max(260);
        let bars = (0..n)
            .map(|i| {
                let close = 100.0 + i as f64 * 0.05;
                Bar {
                    timestamp: Utc::now(),
                    open: Price::from_f64(close - 0.1),
                    high: Price::from_f64(close + 0.2),
                    low: Price::from_f64(close - 0.2),
                    close: Price::from_f64(close),
                    volume: 1000.0,
                }
            })
            .collect();
        Ok(bars)
    }

    fn calls_per_minute(&self) -> u32 {
        1000
    }

    fn burst_capacity(&self) -> u32 {
        1000
    }
}

fn write_universe_csv(dir: &std::path::Path) -> std::path::PathBuf {
    use std::io::Write;
    let path = dir.join("universe.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "symbol,direction,underlyingId,leverageFactor,pairSymbol").unwrap();
    writeln!(file, "TQQQ,Bull,QQQ,3.0,SQQQ").unwrap();
    drop(file);
    path
}

#[tokio::test]
async fn sentiment_block_veto_emits_signal_rejected_with_exact_reason() {
    let dir = std::env::temp_dir().join(format!("ees-signal-rejection-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let universe_path = write_universe_csv(&dir);
    let universe = Arc::new(Universe::load(&universe_path).unwrap());

    let mut sentiment_map = HashMap::new();
    sentiment_map.insert(
        "QQQ".to_string(),
        SentimentEntry {
            underlying_id: "QQQ".to_string(),
            score: -0.5,
            confidence: 0.9,
            news_count: 12,
            as_of: Utc::now(),
        },
    );
    let sentiment = Arc::new(SentimentFilter::new(Arc::new(FileSentimentSource::new(sentiment_map)), chrono::Duration::seconds(900)));

    let secrets_path = dir.join("credentials.json");
    let secret_store = Arc::new(FileSecretStore::new(secrets_path));
    secret_store
        .save(&Credentials {
            consumer_key: "ck".into(),
            consumer_secret: "cs".into(),
            access_token: "at".into(),
            access_token_secret: "ats".into(),
        })
        .await
        .unwrap();

    let events = EventSink::new(16);
    let oauth = Arc::new(
        OAuthSessionManager::new(AccountMode::Sandbox, "http://127.0.0.1:0", secret_store, events.clone())
            .await
            .unwrap(),
    );
    let broker = Arc::new(BrokerClient::new("http://127.0.0.1:0", "test-account", oauth.clone()));

    let positions = Arc::new(PositionStore::new());
    let data_fabric = Arc::new(DataFabric::new(
        vec![Arc::new(FakeProvider) as Arc<dyn QuoteProvider>],
        chrono::Duration::seconds(60),
        chrono::Duration::seconds(3600),
        events.clone(),
    ));
    let executor = Arc::new(OrderExecutor::new(broker.clone(), positions.clone(), events.clone()));
    let trailing = Arc::new(TrailingEngine::new(
        positions.clone(),
        data_fabric.clone(),
        executor.clone(),
        events.clone(),
        TrailingParams::default(),
    ));
    let session_state = Arc::new(SessionState::new("America/New_York"));

    let app_state = Arc::new(AppState::new(
        Config::default(),
        events.clone(),
        positions.clone(),
        data_fabric,
        oauth,
        broker,
        universe,
        sentiment,
        executor,
        trailing,
        session_state,
    ));

    let mut rx = events.subscribe();
    let scan_worker = ScanWorker::new(app_state);
    scan_worker.scan_tick().await;

    let mut saw_rejection = false;
    while let Ok(event) = rx.try_recv() {
        if let EventKind::SignalRejected = event.kind {
            assert_eq!(event.payload["reason"], serde_json::json!("sentiment_contradiction"));
            assert_eq!(event.symbol.as_deref(), Some("TQQQ"));
            saw_rejection = true;
        }
    }
    assert!(saw_rejection, "expected a SignalRejected{{reason=\"sentiment_contradiction\"}} event");

    std::fs::remove_dir_all(&dir).ok();
}
