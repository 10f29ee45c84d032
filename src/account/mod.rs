//! Isolated per-account execution workers.

mod executor;

pub use executor::AccountExecutor;
