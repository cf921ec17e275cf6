// =============================================================================
// Broker HTTP API client (§6.1)
// =============================================================================
//
// Grounded in the codebase's existing Binance REST client: request
// building, #[instrument] tracing, anyhow+context error propagation,
// and a manual Debug impl that redacts secrets. The signing scheme is
// replaced end to end — OAuth 1.0a header signing via OAuthSessionMgr
// instead of an HMAC-SHA256 query-string signature.
// =============================================================================

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::CoreError;
use crate::oauth::OAuthSessionManager;
use crate::price::Price;
use crate::types::BalanceInfo;

#[derive(Debug, Clone)]
pub struct BrokerQuote {
    pub symbol: String,
    pub last_price: Price,
    pub bid: Price,
    pub ask: Price,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub volume: f64,
    pub timestamp: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: f64,
    pub entry_price: Price,
    pub owner_tag: Option<String>,
}

pub struct BrokerClient {
    base_url: String,
    account_id: String,
    oauth: Arc<OAuthSessionManager>,
    client: reqwest::Client,
}

impl BrokerClient {
    pub fn new(base_url: impl Into<String>, account_id: impl Into<String>, oauth: Arc<OAuthSessionManager>) -> Self {
        Self {
            base_url: base_url.into(),
            account_id: account_id.into(),
            oauth,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client"),
        }
    }

    async fn try_get(&self, url: &str, extra_params: &[(&str, &str)]) -> Result<(reqwest::StatusCode, Value)> {
        let auth_header = self
            .oauth
            .sign_request("GET", url, extra_params, Utc::now())
            .await
            .map_err(anyhow::Error::from)
            .context("signing GET request")?;

        let resp = self
            .client
            .get(url)
            .query(extra_params)
            .header("Authorization", auth_header)
            .send()
            .await
            .with_context(|| format!("GET {url} request failed"))?;

        let status = resp.status();
        let body: Value = resp.json().await.with_context(|| format!("parsing response for {url}"))?;
        Ok((status, body))
    }

    async fn try_post(&self, url: &str, body_params: &[(&str, &str)]) -> Result<(reqwest::StatusCode, Value)> {
        let auth_header = self
            .oauth
            .sign_request("POST", url, body_params, Utc::now())
            .await
            .map_err(anyhow::Error::from)
            .context("signing POST request")?;

        let resp = self
            .client
            .post(url)
            .form(body_params)
            .header("Authorization", auth_header)
            .send()
            .await
            .with_context(|| format!("POST {url} request failed"))?;

        let status = resp.status();
        let body: Value = resp.json().await.with_context(|| format!("parsing response for {url}"))?;
        Ok((status, body))
    }

    /// §4.3 renew-on-401: a 401 from the broker triggers exactly one
    /// `oauth.renew()` call, then the original request is retried
    /// exactly once before `NotAuthenticated` surfaces to the caller.
    /// This must live here, at the signing boundary, rather than in a
    /// generic transport retry — only this layer knows a 401 means "the
    /// token is dead", as opposed to a transport hiccup worth retrying
    /// blindly.
    async fn authed_get(&self, path: &str, extra_params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let (status, body) = self.try_get(&url, extra_params).await?;
        if status != reqwest::StatusCode::UNAUTHORIZED {
            if !status.is_success() {
                anyhow::bail!("broker GET {path} returned {status}: {body}");
            }
            return Ok(body);
        }

        debug!(path, "broker GET unauthorized, renewing OAuth session");
        self.oauth.renew().await.context("renewing OAuth session after 401")?;
        let (status, body) = self.try_get(&url, extra_params).await?;
        if !status.is_success() {
            return Err(CoreError::NotAuthenticated(format!(
                "broker GET {path} still unauthorized after renew: {status}"
            ))
            .into());
        }
        Ok(body)
    }

    async fn authed_post(&self, path: &str, body_params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let (status, body) = self.try_post(&url, body_params).await?;
        if status != reqwest::StatusCode::UNAUTHORIZED {
            if !status.is_success() {
                anyhow::bail!("broker POST {path} returned {status}: {body}");
            }
            return Ok(body);
        }

        debug!(path, "broker POST unauthorized, renewing OAuth session");
        self.oauth.renew().await.context("renewing OAuth session after 401")?;
        let (status, body) = self.try_post(&url, body_params).await?;
        if !status.is_success() {
            return Err(CoreError::NotAuthenticated(format!(
                "broker POST {path} still unauthorized after renew: {status}"
            ))
            .into());
        }
        Ok(body)
    }

    #[instrument(skip(self), name = "broker::get_balance")]
    pub async fn get_balance(&self) -> Result<BalanceInfo> {
        let path = format!("/accounts/{}/balance", self.account_id);
        let body = self.authed_get(&path, &[]).await?;
        let free = body["cashAvailableForInvestment"].as_f64().unwrap_or(0.0);
        debug!(free, "account balance retrieved");
        Ok(BalanceInfo {
            asset: "USD".to_string(),
            free,
            locked: 0.0,
        })
    }

    #[instrument(skip(self), name = "broker::get_positions")]
    pub async fn get_positions(&self) -> Result<Vec<BrokerPosition>> {
        let path = format!("/accounts/{}/positions", self.account_id);
        let body = self.authed_get(&path, &[]).await?;
        let entries = body["positions"].as_array().cloned().unwrap_or_default();
        let mut positions = Vec::with_capacity(entries.len());
        for entry in entries {
            let symbol = entry["symbol"].as_str().unwrap_or_default().to_string();
            let quantity = entry["quantity"].as_f64().unwrap_or(0.0);
            let entry_price = Price::from_f64(entry["entryPrice"].as_f64().unwrap_or(0.0));
            let owner_tag = entry["ownerTag"].as_str().map(str::to_string);
            positions.push(BrokerPosition {
                symbol,
                quantity,
                entry_price,
                owner_tag,
            });
        }
        debug!(count = positions.len(), "broker positions retrieved");
        Ok(positions)
    }

    /// `GET /market/quote/{symbols}`, batched up to 50 symbols per call
    /// per §4.2; the fabric is responsible for chunking before calling.
    #[instrument(skip(self), name = "broker::batch_quote")]
    pub async fn batch_quote(&self, symbols: &[String]) -> Result<Vec<BrokerQuote>> {
        let joined = symbols.join(",");
        let path = format!("/market/quote/{joined}");
        let body = self.authed_get(&path, &[]).await?;
        let entries = body["quotes"].as_array().cloned().unwrap_or_default();
        let mut quotes = Vec::with_capacity(entries.len());
        for entry in entries {
            quotes.push(BrokerQuote {
                symbol: entry["symbol"].as_str().unwrap_or_default().to_string(),
                last_price: Price::from_f64(entry["lastPrice"].as_f64().unwrap_or(0.0)),
                bid: Price::from_f64(entry["bid"].as_f64().unwrap_or(0.0)),
                ask: Price::from_f64(entry["ask"].as_f64().unwrap_or(0.0)),
                open: Price::from_f64(entry["open"].as_f64().unwrap_or(0.0)),
                high: Price::from_f64(entry["high"].as_f64().unwrap_or(0.0)),
                low: Price::from_f64(entry["low"].as_f64().unwrap_or(0.0)),
                volume: entry["volume"].as_f64().unwrap_or(0.0),
                timestamp: Utc::now(),
            });
        }
        debug!(count = quotes.len(), "batch quote retrieved");
        Ok(quotes)
    }

    #[instrument(skip(self), name = "broker::preview_order")]
    pub async fn preview_order(&self, symbol: &str, side: &str, quantity: f64, max_price: Price) -> Result<Value> {
        let path = format!("/accounts/{}/orders/preview", self.account_id);
        let quantity_str = quantity.to_string();
        let price_str = max_price.as_f64().to_string();
        self.authed_post(
            &path,
            &[
                ("symbol", symbol),
                ("side", side),
                ("quantity", &quantity_str),
                ("price", &price_str),
                ("type", "LIMIT"),
            ],
        )
        .await
    }

    #[instrument(skip(self), name = "broker::place_order")]
    pub async fn place_order(
        &self,
        symbol: &str,
        side: &str,
        quantity: f64,
        max_price: Price,
        idempotency_key: &str,
    ) -> Result<Value> {
        let path = format!("/accounts/{}/orders/place", self.account_id);
        let quantity_str = quantity.to_string();
        let price_str = max_price.as_f64().to_string();
        let body = self
            .authed_post(
                &path,
                &[
                    ("symbol", symbol),
                    ("side", side),
                    ("quantity", &quantity_str),
                    ("price", &price_str),
                    ("type", "LIMIT"),
                    ("clientOrderId", idempotency_key),
                    ("ownerTag", "EES"),
                ],
            )
            .await?;
        debug!(symbol, side, quantity, "order placed");
        Ok(body)
    }

    #[instrument(skip(self), name = "broker::get_order_status")]
    pub async fn get_order_status(&self, order_id: &str) -> Result<Value> {
        let path = format!("/accounts/{}/orders/{}", self.account_id, order_id);
        self.authed_get(&path, &[]).await
    }

    #[instrument(skip(self), name = "broker::renew_access_token")]
    pub async fn renew_access_token(&self) -> Result<()> {
        self.oauth.renew().await
    }
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("base_url", &self.base_url)
            .field("account_id", &self.account_id)
            .finish()
    }
}
