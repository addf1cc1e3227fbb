//! # Retention Sweeper
//!
//! Background task that purges terminal orders older than the retention
//! window on a fixed interval.
//!
//! ```text
//!   spawn ──► tick (immediately) ──► cleanup_old(retention) ──► log
//!                 ▲                                              │
//!                 └──────────────── interval ◄───────────────────┘
//!   shutdown() ──► stop signal ──► task exits after the current sweep
//! ```

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::orders::OrderLifecycleManager;

/// Handle to a running retention sweep.
#[derive(Debug)]
pub struct RetentionSweeper {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RetentionSweeper {
    /// Starts sweeping every `interval`; the first sweep runs at once.
    pub fn spawn(
        manager: OrderLifecycleManager,
        interval: Duration,
        retention: chrono::Duration,
    ) -> Self {
        let (stop, mut stopped) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!(
                interval_secs = interval.as_secs(),
                retention_hours = retention.num_hours(),
                "Retention sweeper started"
            );

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => sweep(&manager, retention).await,
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Retention sweeper stopped");
        });

        RetentionSweeper { stop, handle }
    }

    /// Signals the task to stop and waits for it.
    pub async fn shutdown(self) {
        // A send error means the task already exited
        let _ = self.stop.send(true);
        if let Err(err) = self.handle.await {
            if !err.is_cancelled() {
                error!(error = %err, "Retention sweeper panicked");
            }
        }
    }

    /// Stops the task without waiting.
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn sweep(manager: &OrderLifecycleManager, retention: chrono::Duration) {
    match manager.cleanup_old(retention).await {
        Ok(report) if report.deleted == 0 && report.success() => {
            debug!("Retention sweep found nothing to purge");
        }
        Ok(report) => {
            info!(
                deleted = report.deleted,
                failed = report.errors.len(),
                "Retention sweep finished"
            );
        }
        Err(err) => error!(error = %err, "Retention sweep failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixture;
    use meridian_core::NewOrderItem;

    #[tokio::test]
    async fn test_sweeper_purges_expired_orders() {
        let fx = fixture().await;
        let orders = fx.db.orders();

        let expired = orders.create_order(&fx.cashier, None, None).await.unwrap();
        orders
            .add_items(expired.id, vec![NewOrderItem::new(fx.product_x.id, 1)])
            .await
            .unwrap();
        orders.complete_order(expired.id).await.unwrap();
        fx.clock.advance(chrono::Duration::hours(30));
        let fresh = orders.create_order(&fx.cashier, None, None).await.unwrap();
        orders.complete_order(fresh.id).await.unwrap();

        let sweeper = RetentionSweeper::spawn(
            orders.clone(),
            Duration::from_millis(10),
            chrono::Duration::hours(24),
        );

        let mut purged = false;
        for _ in 0..100 {
            if orders.get_order(expired.id).await.is_err() {
                purged = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sweeper.shutdown().await;

        assert!(purged);
        assert!(orders.get_order(fresh.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let fx = fixture().await;
        let sweeper = RetentionSweeper::spawn(
            fx.db.orders(),
            Duration::from_secs(3600),
            chrono::Duration::hours(24),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sweeper.is_finished());
        sweeper.shutdown().await;
    }
}
