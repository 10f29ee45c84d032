//! Configuration management for the delta cycler.
//!
//! Loads settings from environment variables (prefix `DC`, separator `__`)
//! and an optional config file. All components receive the validated value
//! object by reference; there is no global mutable configuration state.

use crate::exchange::MarginMode;
use crate::market::SizingMode;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// New cycles may only open after the previous cycle's latest possible close,
/// plus this safety margin, because both cycles share the same two accounts.
pub const CLOSE_SAFETY_MARGIN_SECS: u64 = 30;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Exchange connectivity
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Account holding the long leg of every cycle
    #[serde(default)]
    pub account_long: AccountConfig,
    /// Account holding the short leg of every cycle
    #[serde(default)]
    pub account_short: AccountConfig,
    /// Market selection, sizing, and leverage policy
    #[serde(default)]
    pub trading: TradingConfig,
    /// Randomized open/close delay bounds and the trade cap
    #[serde(default)]
    pub timing: TimingConfig,
    /// Executor call timeouts and close-retry policy
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Base URL of the exchange REST API
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

/// Credentials for one trading account. Opaque to the core: only the
/// signing client inside the account executor ever touches them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccountConfig {
    /// API key identifying the account
    #[serde(default)]
    pub api_key: String,
    /// Secret used for HMAC request signing
    #[serde(default)]
    pub api_secret: String,
    /// Exchange-side account index
    #[serde(default)]
    pub account_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Candidate market ids. Duplicates are allowed and bias selection:
    /// an id repeated k times is drawn with k times the probability.
    #[serde(default)]
    pub market_whitelist: Vec<u32>,
    /// Fixed trade size in exchange-native base units (0 = unset)
    #[serde(default)]
    pub base_units: u64,
    /// Margin target per leg in quote currency. Takes priority over
    /// `base_units` when both are set.
    #[serde(default)]
    pub margin_usdt: Option<Decimal>,
    /// Slippage tolerance applied to the price limit of both legs (0.0-1.0)
    #[serde(default = "default_max_slippage")]
    pub max_slippage: Decimal,
    /// Maximum bid-ask spread fraction before a cycle is skipped
    #[serde(default = "default_max_spread")]
    pub max_spread: Decimal,
    /// Fixed leverage value (ignored when `dynamic_leverage` is on)
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Draw each leg's leverage from `max_leverage - buffer ..= max_leverage`
    #[serde(default)]
    pub dynamic_leverage: bool,
    /// Width of the dynamic leverage range below the market maximum
    #[serde(default = "default_leverage_buffer")]
    pub leverage_buffer: u32,
    /// Margin mode passed through to set-leverage calls
    #[serde(default = "default_margin_mode")]
    pub margin_mode: MarginMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Minimum wait between cycles, seconds
    #[serde(default = "default_min_open_delay")]
    pub min_open_delay_secs: u64,
    /// Maximum wait between cycles, seconds
    #[serde(default = "default_max_open_delay")]
    pub max_open_delay_secs: u64,
    /// Minimum position hold time, seconds
    #[serde(default = "default_min_close_delay")]
    pub min_close_delay_secs: u64,
    /// Maximum position hold time, seconds
    #[serde(default = "default_max_close_delay")]
    pub max_close_delay_secs: u64,
    /// Stop after this many cycles reach a terminal state (0 = unbounded)
    #[serde(default)]
    pub max_trades: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Bound on every account-executor call, seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Attempts per leg on the close path before giving up
    #[serde(default = "default_close_retry_max")]
    pub close_retry_max: u32,
    /// Base backoff between close retries, milliseconds (linear per attempt)
    #[serde(default = "default_close_retry_backoff")]
    pub close_retry_backoff_ms: u64,
}

// Default value functions
fn default_base_url() -> String {
    "https://testnet.perp.example.exchange".to_string()
}

fn default_max_slippage() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

fn default_max_spread() -> Decimal {
    Decimal::new(1, 3) // 0.001 (0.1%)
}

fn default_leverage() -> u32 {
    10
}

fn default_leverage_buffer() -> u32 {
    5
}

fn default_margin_mode() -> MarginMode {
    MarginMode::Cross
}

fn default_min_open_delay() -> u64 {
    80
}

fn default_max_open_delay() -> u64 {
    120
}

fn default_min_close_delay() -> u64 {
    30
}

fn default_max_close_delay() -> u64 {
    50
}

fn default_call_timeout() -> u64 {
    30
}

fn default_close_retry_max() -> u32 {
    3
}

fn default_close_retry_backoff() -> u64 {
    500
}

impl Config {
    /// Load configuration from environment variables and an optional file.
    pub fn load(file: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        builder = match file {
            Some(path) => builder.add_source(config::File::with_name(path)),
            None => builder.add_source(config::File::with_name("delta-cycler").required(false)),
        };

        let config = builder
            .add_source(
                config::Environment::default()
                    .prefix("DC")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("trading.market_whitelist"),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values. Fatal at startup only.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.account_long.api_key.is_empty() && !self.account_long.api_secret.is_empty(),
            "account_long credentials are required"
        );

        anyhow::ensure!(
            !self.account_short.api_key.is_empty() && !self.account_short.api_secret.is_empty(),
            "account_short credentials are required"
        );

        anyhow::ensure!(
            self.account_long.account_index != self.account_short.account_index,
            "account_long and account_short must use different account indices"
        );

        anyhow::ensure!(
            !self.trading.market_whitelist.is_empty(),
            "market_whitelist must contain at least one market"
        );

        anyhow::ensure!(
            self.trading.max_slippage >= Decimal::ZERO && self.trading.max_slippage <= Decimal::ONE,
            "max_slippage must be between 0 and 1"
        );

        anyhow::ensure!(
            self.trading.max_spread > Decimal::ZERO,
            "max_spread must be positive"
        );

        anyhow::ensure!(
            self.trading.base_units > 0 || self.trading.margin_usdt.is_some(),
            "either base_units or margin_usdt must be set"
        );

        if let Some(margin) = self.trading.margin_usdt {
            anyhow::ensure!(margin > Decimal::ZERO, "margin_usdt must be positive");
        }

        anyhow::ensure!(self.trading.leverage >= 1, "leverage must be at least 1");

        anyhow::ensure!(
            self.timing.min_open_delay_secs <= self.timing.max_open_delay_secs,
            "min_open_delay_secs must be <= max_open_delay_secs"
        );

        anyhow::ensure!(
            self.timing.min_close_delay_secs <= self.timing.max_close_delay_secs,
            "min_close_delay_secs must be <= max_close_delay_secs"
        );

        // Both cycles share the same two accounts, so a new cycle must not
        // open while the previous one might still be closing.
        let required = self.timing.max_close_delay_secs + CLOSE_SAFETY_MARGIN_SECS;
        anyhow::ensure!(
            self.timing.min_open_delay_secs >= required,
            "min_open_delay_secs ({}s) must be at least {}s: max_close_delay_secs ({}s) \
             plus a {}s safety margin, so new cycles only open after old positions close",
            self.timing.min_open_delay_secs,
            required,
            self.timing.max_close_delay_secs,
            CLOSE_SAFETY_MARGIN_SECS,
        );

        anyhow::ensure!(
            self.execution.call_timeout_secs > 0,
            "call_timeout_secs must be positive"
        );

        anyhow::ensure!(
            self.execution.close_retry_max >= 1,
            "close_retry_max must be at least 1"
        );

        Ok(())
    }
}

impl TradingConfig {
    /// Resolve the configured sizing mode. Margin-denominated sizing takes
    /// priority when both options are set.
    pub fn sizing_mode(&self) -> SizingMode {
        match self.margin_usdt {
            Some(margin) => SizingMode::MarginQuote(margin),
            None => SizingMode::BaseUnits(self.base_units),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig::default(),
            account_long: AccountConfig::default(),
            account_short: AccountConfig::default(),
            trading: TradingConfig::default(),
            timing: TimingConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            market_whitelist: Vec::new(),
            base_units: 0,
            margin_usdt: None,
            max_slippage: default_max_slippage(),
            max_spread: default_max_spread(),
            leverage: default_leverage(),
            dynamic_leverage: false,
            leverage_buffer: default_leverage_buffer(),
            margin_mode: default_margin_mode(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            min_open_delay_secs: default_min_open_delay(),
            max_open_delay_secs: default_max_open_delay(),
            min_close_delay_secs: default_min_close_delay(),
            max_close_delay_secs: default_max_close_delay(),
            max_trades: 0,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout(),
            close_retry_max: default_close_retry_max(),
            close_retry_backoff_ms: default_close_retry_backoff(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.account_long = AccountConfig {
            api_key: "key-1".into(),
            api_secret: "secret-1".into(),
            account_index: 1,
        };
        config.account_short = AccountConfig {
            api_key: "key-2".into(),
            api_secret: "secret-2".into(),
            account_index: 2,
        };
        config.trading.market_whitelist = vec![0, 1];
        config.trading.margin_usdt = Some(dec!(100));
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_rejects_overlapping_delays() {
        let mut config = valid_config();
        // 50s max close + 30s margin requires min open >= 80s
        config.timing.min_open_delay_secs = 79;
        config.timing.max_open_delay_secs = 120;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("safety margin"), "unexpected error: {err}");
    }

    #[test]
    fn test_rejects_shared_account_index() {
        let mut config = valid_config();
        config.account_short.account_index = config.account_long.account_index;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_requires_a_sizing_mode() {
        let mut config = valid_config();
        config.trading.base_units = 0;
        config.trading.margin_usdt = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_margin_sizing_takes_priority() {
        let mut config = valid_config();
        config.trading.base_units = 5000;
        config.trading.margin_usdt = Some(dec!(25));
        assert_eq!(
            config.trading.sizing_mode(),
            SizingMode::MarginQuote(dec!(25))
        );

        config.trading.margin_usdt = None;
        assert_eq!(config.trading.sizing_mode(), SizingMode::BaseUnits(5000));
    }

    #[test]
    fn test_rejects_empty_whitelist() {
        let mut config = valid_config();
        config.trading.market_whitelist.clear();
        assert!(config.validate().is_err());
    }
}
