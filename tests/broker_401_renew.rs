// =============================================================================
// Integration test — renew-on-401 (§4.3, Scenario D)
// =============================================================================
//
// A broker call answering 401 must trigger exactly one `oauth.renew()`
// call, then exactly one retry of the original request before success
// is reported — and the data fabric's circuit breaker for that provider
// must stay Closed throughout, since a renew-and-retry is not a
// provider failure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use ees_engine::broker::BrokerClient;
use ees_engine::data_fabric::circuit_breaker::BreakerState;
use ees_engine::data_fabric::provider::QuoteProvider;
use ees_engine::data_fabric::providers::BrokerProvider;
use ees_engine::data_fabric::DataFabric;
use ees_engine::events::EventSink;
use ees_engine::oauth::OAuthSessionManager;
use ees_engine::secret_store::{Credentials, FileSecretStore, SecretStore};
use ees_engine::types::AccountMode;

const QUOTE_OK_BODY: &str =
    r#"{"quotes":[{"symbol":"TQQQ","lastPrice":50.0,"bid":49.9,"ask":50.1,"open":49.0,"high":51.0,"low":48.5,"volume":1000}]}"#;

/// A tiny raw HTTP server: the first request it ever receives (whatever
/// the path) answers 401; every request after that answers 200 with a
/// body keyed off the path. This lets a single server stand in for both
/// the broker's quote endpoint and the OAuth renewal endpoint, matching
/// how `main.rs` points both at the same `base_url`.
async fn spawn_toggle_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_for_task = counter.clone();

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::spawn(handle_connection(socket, counter_for_task.clone()));
        }
    });

    (format!("http://{addr}"), counter)
}

async fn handle_connection(mut socket: TcpStream, counter: Arc<AtomicUsize>) {
    let mut buf = vec![0u8; 8192];
    let n = match socket.read(&mut buf).await {
        Ok(n) if n > 0 => n,
        _ => return,
    };
    let request = String::from_utf8_lossy(&buf[..n]);
    let path = request.lines().next().and_then(|line| line.split_whitespace().nth(1)).unwrap_or("/").to_string();

    let attempt = counter.fetch_add(1, Ordering::SeqCst);
    let (status_line, body) = if attempt == 0 {
        ("HTTP/1.1 401 Unauthorized", r#"{"error":"unauthorized"}"#.to_string())
    } else if path.starts_with("/market/quote/") {
        ("HTTP/1.1 200 OK", QUOTE_OK_BODY.to_string())
    } else {
        ("HTTP/1.1 200 OK", "{}".to_string())
    };

    let response = format!(
        "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

#[tokio::test]
async fn unauthorized_quote_renews_and_retries_without_tripping_circuit() {
    let dir = std::env::temp_dir().join(format!("ees-401-renew-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let (base_url, counter) = spawn_toggle_server().await;

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
        OAuthSessionManager::new(AccountMode::Sandbox, base_url.clone(), secret_store, events.clone())
            .await
            .unwrap(),
    );
    let broker = Arc::new(BrokerClient::new(base_url, "test-account", oauth.clone()));

    let data_fabric = Arc::new(DataFabric::new(
        vec![Arc::new(BrokerProvider::new(broker)) as Arc<dyn QuoteProvider>],
        chrono::Duration::seconds(60),
        chrono::Duration::seconds(3600),
        events,
    ));

    let quote = data_fabric
        .get_quote("TQQQ", 5000)
        .await
        .expect("quote should succeed after the renew-and-retry");
    assert_eq!(quote.symbol, "TQQQ");

    // GET /market/quote (401), POST /oauth/renew_access_token (200), GET retry (200).
    assert_eq!(counter.load(Ordering::SeqCst), 3, "expected exactly one renew and one retry");

    let statuses = data_fabric.provider_status();
    assert_eq!(statuses, vec![("broker", BreakerState::Closed)], "a renew-and-retry must not trip the circuit breaker");

    std::fs::remove_dir_all(&dir).ok();
}
