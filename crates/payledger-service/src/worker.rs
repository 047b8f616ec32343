//! Background workers: coupon expiry and pending-charge reconciliation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use payledger_engine::{PaymentMethod, Payments, ReconcileReport};

use crate::state::AppState;

/// Handles to the running workers.
pub struct Workers {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Start every worker.
    #[must_use]
    pub fn spawn(state: &AppState) -> Self {
        let (shutdown, signal) = watch::channel(false);
        let sweep_every = Duration::from_secs(state.config.coupon_sweep_seconds.max(1));
        let reconcile_every = Duration::from_secs(state.config.reconcile_seconds.max(1));

        let handles = vec![
            spawn_periodic(
                "coupon_sweep",
                sweep_every,
                signal.clone(),
                Arc::clone(&state.payments),
                sweep_coupons,
            ),
            spawn_periodic(
                "reconcile",
                reconcile_every,
                signal,
                Arc::clone(&state.payments),
                reconcile_charges,
            ),
        ];

        Self { shutdown, handles }
    }

    /// Signal every worker and wait for it to finish its current round.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        tracing::info!("Workers stopped");
    }
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
    payments: Arc<Payments>,
    round: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<Payments>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(worker = name, every_secs = every.as_secs(), "Worker started");

        loop {
            tokio::select! {
                _ = interval.tick() => round(Arc::clone(&payments)).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(worker = name, "Worker exiting");
    })
}

/// Expire coupons past their window on every account.
pub async fn sweep_coupons(payments: Arc<Payments>) {
    match payments.coupons().expire_all(Utc::now()).await {
        Ok(0) => tracing::debug!("Coupon sweep found nothing to expire"),
        Ok(expired) => tracing::info!(expired, "Coupons expired"),
        Err(e) => tracing::error!(error = %e, "Coupon sweep failed"),
    }
}

/// Poll the gateways for every pending charge on both rails.
pub async fn reconcile_charges(payments: Arc<Payments>) {
    let (cards, tokens) = futures::join!(
        payments.credit_cards().reconcile_pending(),
        payments.crypto_tokens().reconcile_pending()
    );
    for (rail, result) in [("card", cards), ("token", tokens)] {
        match result {
            Ok(report) if report == ReconcileReport::default() => {
                tracing::debug!(rail, "Nothing to reconcile");
            }
            Ok(report) => tracing::info!(
                rail,
                settled = report.settled,
                failed = report.failed,
                pending = report.pending,
                errors = report.errors,
                "Reconciliation round finished"
            ),
            Err(e) => tracing::error!(rail, error = %e, "Reconciliation failed"),
        }
    }
}
