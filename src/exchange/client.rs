//! REST clients for the exchange API.
//!
//! [`DexClient`] serves unauthenticated market-data endpoints and can be
//! shared. [`AccountClient`] signs transaction endpoints with HMAC-SHA256 and
//! carries a monotonic nonce, so each instance belongs to exactly one account
//! executor.

use crate::config::{AccountConfig, ExchangeConfig};
use crate::exchange::traits::{AccountApi, MarketDataApi};
use crate::exchange::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Public market-data client.
pub struct DexClient {
    http: Client,
    base_url: String,
}

impl DexClient {
    /// Create a new market-data client.
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MarketDataApi for DexClient {
    #[instrument(skip(self))]
    async fn order_book_detail(&self, market_id: u32) -> Result<OrderBookDetail> {
        let url = format!(
            "{}/api/v1/orderBookDetails?market_id={}",
            self.base_url, market_id
        );
        let response: OrderBookDetailsResponse = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to fetch order book details")?
            .json()
            .await
            .context("Failed to parse order book details response")?;

        response
            .order_book_details
            .into_iter()
            .find(|d| d.market_id == market_id)
            .with_context(|| format!("Market {} not found in order book details", market_id))
    }
}

/// Signed client for one account's transaction endpoints.
pub struct AccountClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    account_index: u32,
    nonce: AtomicU64,
}

impl AccountClient {
    /// Create a signing client for one account.
    pub fn new(exchange: &ExchangeConfig, account: &AccountConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: exchange.base_url.trim_end_matches('/').to_string(),
            api_key: account.api_key.clone(),
            api_secret: account.api_secret.clone(),
            account_index: account.account_index,
            nonce: AtomicU64::new(Self::timestamp_ms()),
        })
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_millis() as u64
    }

    /// Generate HMAC-SHA256 signature over `{nonce}{body}`.
    fn sign(&self, nonce: u64, body: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(nonce.to_string().as_bytes());
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// POST a signed transaction payload and unwrap the response envelope.
    async fn send_tx<T: serde::Serialize>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<TxReceipt, ExecutionError> {
        let body = serde_json::to_string(payload)
            .map_err(|e| ExecutionError::Rejected(format!("unserializable payload: {e}")))?;
        // Nonces must be strictly increasing per account; the exchange
        // rejects replays and out-of-order values.
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let signature = self.sign(nonce, &body);

        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .header("X-Account-Index", self.account_index)
            .header("X-Nonce", nonce)
            .header("X-Signature", signature)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let parsed: SendTxResponse = response.json().await.map_err(map_reqwest_error)?;

        if parsed.code == 200 {
            debug!(account_index = self.account_index, path, "Transaction accepted");
            Ok(TxReceipt {
                tx_hash: parsed.tx_hash.unwrap_or_default(),
            })
        } else {
            let message = parsed
                .message
                .unwrap_or_else(|| format!("API error {}", parsed.code));
            Err(ExecutionError::Rejected(message))
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ExecutionError {
    if e.is_timeout() {
        ExecutionError::Timeout(HTTP_TIMEOUT)
    } else {
        ExecutionError::Network(e.to_string())
    }
}

#[async_trait]
impl AccountApi for AccountClient {
    async fn place_order(&self, order: &OrderRequest) -> Result<TxReceipt, ExecutionError> {
        self.send_tx("/api/v1/sendOrder", order).await
    }

    async fn set_leverage(
        &self,
        market_id: u32,
        leverage: u32,
        margin_mode: MarginMode,
    ) -> Result<(), ExecutionError> {
        let update = LeverageUpdate {
            market_id,
            leverage,
            margin_mode: margin_mode.as_code(),
        };
        self.send_tx("/api/v1/updateLeverage", &update).await?;
        Ok(())
    }
}
