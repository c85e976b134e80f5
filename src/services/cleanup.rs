use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::services::seat_lock::SeatLockManager;

/// Periodic reclamation of abandoned seat holds.
///
/// Several sweepers (one per process) may run at once: each release is
/// conditional on the lock still being an expired `HELD`, so overlapping runs
/// only release each lock once.
#[derive(Clone)]
pub struct ExpirySweeper {
    locks: Arc<SeatLockManager>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(locks: Arc<SeatLockManager>, interval: Duration) -> Self {
        Self { locks, interval }
    }

    /// Один проход очистки. Errors are logged, never propagated.
    pub async fn run_once(&self) -> usize {
        match self.locks.release_expired_locks().await {
            Ok(0) => 0,
            Ok(released) => {
                info!("🧹 Sweep released {} expired seat locks", released);
                released
            }
            Err(e) => {
                error!("🧹 Sweep failed to list expired seat locks: {}", e);
                0
            }
        }
    }

    /// Runs the sweep loop in the background. A panicking sweep is logged
    /// and restarted after one interval; aborting the returned handle stops
    /// the loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                // dropping the set aborts the worker together with this task
                let mut worker = JoinSet::new();
                worker.spawn(self.clone().run());

                match worker.join_next().await {
                    Some(Err(e)) if e.is_panic() => {
                        error!("🧹 Expiry sweeper panicked, restarting: {}", e);
                        tokio::time::sleep(self.interval).await;
                    }
                    _ => {
                        error!("🧹 Expiry sweeper stopped");
                        return;
                    }
                }
            }
        })
    }

    async fn run(self) {
        info!("Expiry sweeper started, interval {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.run_once().await;

            match self.stats().await {
                Ok(stats) if stats.pending_sweep() > 0 => {
                    warn!("{} expired seat locks still pending after sweep", stats.expired_unswept);
                }
                Ok(_) => {}
                Err(e) => error!("Failed to collect sweep stats: {}", e),
            }
        }
    }

    /// Получает статистику для мониторинга
    pub async fn stats(&self) -> Result<SweepStats> {
        let counts = self.locks.lock_counts().await?;
        Ok(SweepStats {
            active_holds: counts.active_holds,
            confirmed: counts.confirmed,
            expired_unswept: counts.expired_unswept,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub active_holds: i64,
    pub confirmed: i64,
    pub expired_unswept: i64,
}

impl SweepStats {
    pub fn pending_sweep(&self) -> i64 {
        self.expired_unswept
    }
}
