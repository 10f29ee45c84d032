//! Per-account execution worker.
//!
//! Each trading account gets one spawned worker task that owns the signed
//! client for that account. All calls from the rest of the application go
//! through an [`AccountExecutor`] handle and are serialized by the worker,
//! so per-account state (the signing nonce, client order ids) never sees
//! concurrent access. The two accounts run as two independent workers, which
//! is what keeps a stall or crash on one account from corrupting the other.

use crate::exchange::{AccountApi, ExecutionError, MarginMode, OrderRequest, OrderSide, TxReceipt};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Command executed by an account worker.
#[derive(Debug)]
enum Command {
    PlaceOrder {
        market_id: u32,
        side: OrderSide,
        base_amount: u64,
        price_limit: Decimal,
        reduce_only: bool,
    },
    SetLeverage {
        market_id: u32,
        leverage: u32,
        margin_mode: MarginMode,
    },
}

#[derive(Debug)]
enum CommandOutput {
    Receipt(TxReceipt),
    Ack,
}

struct WorkerRequest {
    command: Command,
    reply: oneshot::Sender<Result<CommandOutput, ExecutionError>>,
}

/// Cloneable handle to one account worker.
///
/// Dropping every handle closes the channel and ends the worker task.
#[derive(Clone)]
pub struct AccountExecutor {
    tx: mpsc::Sender<WorkerRequest>,
    label: Arc<str>,
    account_index: u32,
}

impl AccountExecutor {
    /// Spawn the worker task for one account and return its handle.
    ///
    /// `call_timeout` bounds every exchange call the worker makes; a call
    /// that exceeds it resolves to [`ExecutionError::Timeout`] and the
    /// worker moves on to the next request.
    pub fn spawn(
        label: &str,
        account_index: u32,
        api: Arc<dyn AccountApi>,
        call_timeout: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let worker_label: Arc<str> = Arc::from(label);

        let handle = tokio::spawn(run_worker(
            worker_label.clone(),
            account_index,
            api,
            call_timeout,
            rx,
        ));

        (
            Self {
                tx,
                label: worker_label,
                account_index,
            },
            handle,
        )
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn account_index(&self) -> u32 {
        self.account_index
    }

    /// Submit an order on this account and wait for the acknowledgement.
    pub async fn place_order(
        &self,
        market_id: u32,
        side: OrderSide,
        base_amount: u64,
        price_limit: Decimal,
        reduce_only: bool,
    ) -> Result<TxReceipt, ExecutionError> {
        let output = self
            .send(Command::PlaceOrder {
                market_id,
                side,
                base_amount,
                price_limit,
                reduce_only,
            })
            .await?;
        match output {
            CommandOutput::Receipt(receipt) => Ok(receipt),
            CommandOutput::Ack => Err(ExecutionError::Network(
                "worker returned no receipt for an order".to_string(),
            )),
        }
    }

    /// Update leverage for one market on this account.
    pub async fn set_leverage(
        &self,
        market_id: u32,
        leverage: u32,
        margin_mode: MarginMode,
    ) -> Result<(), ExecutionError> {
        self.send(Command::SetLeverage {
            market_id,
            leverage,
            margin_mode,
        })
        .await?;
        Ok(())
    }

    async fn send(&self, command: Command) -> Result<CommandOutput, ExecutionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WorkerRequest {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ExecutionError::WorkerGone)?;
        reply_rx.await.map_err(|_| ExecutionError::WorkerGone)?
    }
}

async fn run_worker(
    label: Arc<str>,
    account_index: u32,
    api: Arc<dyn AccountApi>,
    call_timeout: Duration,
    mut rx: mpsc::Receiver<WorkerRequest>,
) {
    info!(account = %label, account_index, "Account worker started");

    // Client order ids only need to be unique per account; a plain counter
    // inside the single worker task is enough.
    let mut next_client_order_id: u64 = 1;

    while let Some(request) = rx.recv().await {
        let result = match request.command {
            Command::PlaceOrder {
                market_id,
                side,
                base_amount,
                price_limit,
                reduce_only,
            } => {
                let order = OrderRequest {
                    market_id,
                    client_order_id: next_client_order_id,
                    side,
                    base_amount,
                    price_limit,
                    reduce_only,
                };
                next_client_order_id += 1;

                debug!(
                    account = %label,
                    market_id,
                    ?side,
                    base_amount,
                    %price_limit,
                    reduce_only,
                    "Placing order"
                );

                let outcome = match tokio::time::timeout(call_timeout, api.place_order(&order)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(ExecutionError::Timeout(call_timeout)),
                };

                match &outcome {
                    Ok(receipt) => {
                        info!(
                            account = %label,
                            market_id,
                            ?side,
                            base_amount,
                            reduce_only,
                            tx_hash = %receipt.tx_hash,
                            "Order accepted"
                        );
                    }
                    Err(e) => {
                        warn!(account = %label, market_id, ?side, error = %e, "Order failed");
                    }
                }
                outcome.map(CommandOutput::Receipt)
            }
            Command::SetLeverage {
                market_id,
                leverage,
                margin_mode,
            } => {
                let outcome = match tokio::time::timeout(
                    call_timeout,
                    api.set_leverage(market_id, leverage, margin_mode),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ExecutionError::Timeout(call_timeout)),
                };

                match &outcome {
                    Ok(()) => {
                        info!(account = %label, market_id, leverage, "Leverage updated");
                    }
                    Err(e) => {
                        warn!(account = %label, market_id, leverage, error = %e, "Leverage update failed");
                    }
                }
                outcome.map(|_| CommandOutput::Ack)
            }
        };

        // The caller may have given up waiting; that is not the worker's
        // problem, it just serves the next request.
        let _ = request.reply.send(result);
    }

    info!(account = %label, "Account worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockAccountApi;
    use rust_decimal_macros::dec;

    fn spawn_with(api: Arc<MockAccountApi>, timeout: Duration) -> (AccountExecutor, JoinHandle<()>) {
        AccountExecutor::spawn("test-account", 7, api, timeout)
    }

    #[tokio::test]
    async fn test_orders_get_sequential_client_order_ids() {
        let api = Arc::new(MockAccountApi::new());
        let (executor, handle) = spawn_with(api.clone(), Duration::from_secs(5));

        for _ in 0..3 {
            executor
                .place_order(1, OrderSide::Buy, 100, dec!(2001), false)
                .await
                .unwrap();
        }
        drop(executor);
        handle.await.unwrap();

        let ids: Vec<u64> = api.orders().iter().map(|o| o.client_order_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let api = Arc::new(MockAccountApi::new().with_delay(Duration::from_millis(200)));
        let (executor, _handle) = spawn_with(api, Duration::from_millis(20));

        let result = executor
            .place_order(1, OrderSide::Sell, 50, dec!(1999), false)
            .await;
        assert!(matches!(result, Err(ExecutionError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_rejection_propagates_to_caller() {
        let api = Arc::new(MockAccountApi::new());
        api.fail_next("insufficient margin");
        let (executor, _handle) = spawn_with(api, Duration::from_secs(5));

        let result = executor
            .place_order(1, OrderSide::Buy, 100, dec!(2001), false)
            .await;
        assert!(matches!(result, Err(ExecutionError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_set_leverage_reaches_the_account() {
        let api = Arc::new(MockAccountApi::new());
        let (executor, _handle) = spawn_with(api.clone(), Duration::from_secs(5));

        executor
            .set_leverage(4, 25, MarginMode::Isolated)
            .await
            .unwrap();

        let updates = api.leverage_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].market_id, 4);
        assert_eq!(updates[0].leverage, 25);
        assert_eq!(updates[0].margin_mode, 1);
    }

    #[tokio::test]
    async fn test_calls_after_worker_stops_report_worker_gone() {
        let api = Arc::new(MockAccountApi::new());
        let (executor, handle) = spawn_with(api, Duration::from_secs(5));

        let clone = executor.clone();
        drop(executor);
        handle.abort();
        let _ = handle.await;

        let result = clone
            .place_order(1, OrderSide::Buy, 100, dec!(2001), false)
            .await;
        assert!(matches!(result, Err(ExecutionError::WorkerGone)));
    }
}
