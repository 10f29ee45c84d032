//! Exchange integration for the perpetuals DEX.
//!
//! REST-only surface, three operations:
//! - order-book detail by market id (public)
//! - place order (signed, per-account)
//! - set leverage (signed, per-account)
//!
//! Signed operations carry a per-account monotonic nonce, which is why each
//! [`AccountClient`] is owned by exactly one account executor.

mod client;
pub mod mock;
mod traits;
mod types;

pub use client::{AccountClient, DexClient};
pub use traits::{AccountApi, MarketDataApi};
pub use types::*;
