//! Escrow reconciler - the scheduled backstop for bookings nobody completes.
//!
//! Each tick releases escrow for CONFIRMED bookings older than the grace
//! window (through [`BookingEngine::run_reconciliation`]) and then audits the
//! cached balances against the ledger. The task runs on its own timer,
//! independent of request traffic, until its [`ReconcilerHandle`] is stopped.

use crate::{
    core::{booking::BookingEngine, ledger},
    errors::Result,
};
use chrono::Duration;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{error, info, warn};

/// Summary of one reconciler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    /// Bookings moved from CONFIRMED to COMPLETED
    pub released: usize,
    /// Accounts whose cached balance disagrees with the ledger
    pub drifted_accounts: usize,
}

/// Periodic auto-release job.
#[derive(Clone)]
pub struct EscrowReconciler {
    engine: BookingEngine,
    grace: Duration,
}

impl EscrowReconciler {
    /// `grace` is how long after the session time a CONFIRMED booking may
    /// stay unresolved.
    #[must_use]
    pub const fn new(engine: BookingEngine, grace: Duration) -> Self {
        Self { engine, grace }
    }

    #[must_use]
    pub const fn grace(&self) -> Duration {
        self.grace
    }

    /// Runs one release pass followed by a balance audit.
    pub async fn tick(&self) -> Result<TickReport> {
        let released = self.engine.run_reconciliation(self.grace).await?;

        let drifts = ledger::audit_balances(self.engine.db()).await?;
        for drift in &drifts {
            warn!(
                account_id = drift.account_id,
                "Cached balance {} disagrees with ledger total {}",
                drift.cached,
                drift.derived
            );
        }

        Ok(TickReport {
            released,
            drifted_accounts: drifts.len(),
        })
    }

    /// Starts the job on the current runtime, ticking every `every`.
    ///
    /// The first tick runs immediately.
    #[must_use]
    pub fn spawn(self, every: std::time::Duration) -> ReconcilerHandle {
        let (shutdown, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            info!(
                "Escrow reconciler started (every {:?}, grace {}h)",
                every,
                self.grace.num_hours()
            );
            let mut ticker = time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.tick().await {
                            Ok(report) => info!(
                                "Reconciler tick: {} released, {} drifted account(s)",
                                report.released, report.drifted_accounts
                            ),
                            Err(err) => error!("Reconciler tick failed: {}", err),
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Escrow reconciler stopped");
        });

        ReconcilerHandle { shutdown, task }
    }
}

/// Running reconciler task.
#[derive(Debug)]
pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Signals the task to stop and waits for the current tick to finish.
    pub async fn stop(self) {
        // A send error only means the task already exited.
        self.shutdown.send(true).ok();
        if let Err(err) = self.task.await {
            error!("Escrow reconciler task ended abnormally: {}", err);
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
