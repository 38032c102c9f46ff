//! Background task that expires uncollected reservations.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};

use crate::application::services::ReservationService;
use crate::domain::clock::Clock;
use crate::domain::repositories::LendingRepository;

/// Calls [`ReservationService::expire_overdue`] every `period` until
/// `shutdown` flips to `true` or its sender is dropped.
///
/// A failed sweep is logged and retried on the next tick.
pub async fn run_pickup_sweeper<R: LendingRepository + 'static>(
    reservations: Arc<ReservationService<R>>,
    clock: Arc<dyn Clock>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(period_secs = period.as_secs(), "Pickup sweeper started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match reservations.expire_overdue(clock.now()).await {
                    Ok(sweep) if !sweep.expired.is_empty() => {
                        tracing::info!(
                            expired = sweep.expired.len(),
                            promoted = sweep.promoted.len(),
                            "Pickup sweep finished"
                        );
                    }
                    Ok(_) => tracing::debug!("Pickup sweep found nothing to expire"),
                    Err(e) => tracing::error!(
                        error = %e,
                        details = %e.details(),
                        "Pickup sweep failed"
                    ),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("Pickup sweeper stopped");
}
