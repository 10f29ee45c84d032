//! # Delta Cycler
//!
//! Coordinates paired long/short orders across two isolated exchange accounts
//! to produce delta-neutral trade cycles, closing both legs after a randomized
//! hold time.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Perpetuals DEX REST client (signed + public endpoints)
//! - `account`: Per-account executor actors with isolated signing state
//! - `market`: Market catalog, random selection, and sizing math
//! - `orchestrator`: Trade-cycle state machine, close scheduler, stats
//! - `utils`: Shared decimal arithmetic helpers

pub mod account;
pub mod config;
pub mod exchange;
pub mod market;
pub mod orchestrator;
pub mod utils;

pub use config::Config;
