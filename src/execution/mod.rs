use crate::audit::TradeRecorder;
use crate::broker::{OrderSide, OrderStatus, SharedBrokerSession};
use crate::ledger::PositionLedger;
use crate::models::{OrderAction, OrderTask, Position};
use chrono::Utc;
use governor::{Quota, RateLimiter};
use rand::Rng;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Pause after each processed task, on top of the rate limit.
    pub post_task_delay: Duration,
    pub max_orders_per_sec: NonZeroU32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            post_task_delay: Duration::from_millis(200),
            max_orders_per_sec: NonZeroU32::new(5).unwrap(),
        }
    }
}

/// Handle for submitting order tasks to the execution worker.
#[derive(Clone)]
pub struct ExecutionQueue {
    tx: mpsc::UnboundedSender<OrderTask>,
}

impl ExecutionQueue {
    /// Enqueue a task. Returns false if the worker has shut down; the
    /// caller still owns the symbol's lock in that case and must release
    /// it itself.
    pub fn submit(&self, task: OrderTask) -> bool {
        self.tx.send(task).is_ok()
    }
}

/// Spawn the single execution worker. All order placement funnels through
/// it, so broker calls are strictly serialized and paced. The worker owns
/// releasing each task's symbol lock, exactly once, whatever the outcome.
pub fn start(
    broker: SharedBrokerSession,
    ledger: Arc<PositionLedger>,
    recorder: Arc<TradeRecorder>,
    config: ExecutionConfig,
) -> (ExecutionQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OrderTask>();

    let handle = tokio::spawn(async move {
        let limiter = RateLimiter::direct(Quota::per_second(config.max_orders_per_sec));

        while let Some(task) = rx.recv().await {
            limiter.until_ready().await;

            let symbol = task.symbol.clone();
            process_task(&broker, &ledger, &recorder, task).await;
            ledger.release_lock(&symbol);

            tokio::time::sleep(config.post_task_delay).await;
        }
        info!("Execution worker stopping");
    });

    (ExecutionQueue { tx }, handle)
}

async fn process_task(
    broker: &SharedBrokerSession,
    ledger: &PositionLedger,
    recorder: &TradeRecorder,
    task: OrderTask,
) {
    let side = match task.action {
        OrderAction::Buy => OrderSide::Buy,
        OrderAction::Sell => OrderSide::Sell,
    };
    let unique_id = generate_order_id(&task.action);

    info!(
        "Placing {} {} x{} ({})",
        task.action.as_str(),
        task.symbol,
        task.qty,
        task.reason
    );

    let result = broker
        .place_market_order(side, &task.symbol, task.qty, &unique_id)
        .await;

    match result {
        Ok(fill) if fill.status == OrderStatus::Filled => match task.action {
            OrderAction::Buy => {
                ledger.register_fill(
                    &task.symbol,
                    Position {
                        qty: task.qty,
                        order_id: fill.order_id,
                        entry_price: task.reference_price,
                        entry_time: Utc::now(),
                    },
                );
                recorder.record(
                    "BUY",
                    &task.symbol,
                    task.reference_price,
                    task.qty,
                    0.0,
                    &task.reason,
                );
                info!("BUY filled: {} x{}", task.symbol, task.qty);
            }
            OrderAction::Sell => {
                let entry = ledger.entry_price(&task.symbol);
                let pnl = (task.reference_price - entry) * f64::from(task.qty);
                recorder.record(
                    "SELL",
                    &task.symbol,
                    task.reference_price,
                    task.qty,
                    pnl,
                    &task.reason,
                );
                ledger.clear_position(&task.symbol);
                info!("SELL filled: {} x{} (PnL {:.2})", task.symbol, task.qty, pnl);
            }
        },
        Ok(rejected) => {
            warn!(
                "Order rejected for {}: {} (id {})",
                task.symbol,
                task.action.as_str(),
                rejected.order_id
            );
        }
        Err(e) => {
            error!("Order placement failed for {}: {}", task.symbol, e);
        }
    }
}

fn generate_order_id(action: &OrderAction) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(1000..10000);
    format!("{}_{}_{}", action.as_str(), Utc::now().timestamp_millis(), suffix)
}
