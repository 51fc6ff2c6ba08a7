//! Sweep Task
//!
//! Background task that periodically removes expired cache entries.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::error::{CacheError, Result};

const DISABLED: u8 = 0;
const IDLE: u8 = 1;
const SWEEPING: u8 = 2;

// == Sweep State ==
/// Lifecycle of the background sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    /// No sweep task is scheduled
    Disabled,
    /// Waiting for the next tick
    Idle,
    /// Scanning the store
    Sweeping,
}

impl SweepState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            IDLE => Self::Idle,
            SWEEPING => Self::Sweeping,
            _ => Self::Disabled,
        }
    }
}

/// Spawns a background task that periodically sweeps expired entries.
///
/// The first sweep runs after `first_sweep`, then every `succeeding_sweep`.
/// The task ends when `stopped` is set, when it is aborted, or when the store
/// has been dropped. It only holds the store while a sweep is running.
///
/// # Arguments
/// * `runtime` - Runtime to spawn onto
/// * `store` - Store to sweep
/// * `first_sweep` - Delay before the first sweep
/// * `succeeding_sweep` - Interval between sweeps, must be non-zero
/// * `state` - Shared sweep state, moved between Idle and Sweeping
/// * `stopped` - Set to end the task before its next sweep
pub fn spawn_sweep_task(
    runtime: &Handle,
    store: Weak<CacheStore>,
    first_sweep: Duration,
    succeeding_sweep: Duration,
    state: Arc<AtomicU8>,
    stopped: Arc<AtomicBool>,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        info!(
            "Starting cache sweep task: first sweep in {:?}, then every {:?}",
            first_sweep, succeeding_sweep
        );

        tokio::time::sleep(first_sweep).await;
        let mut ticker = tokio::time::interval(succeeding_sweep);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // First tick completes immediately
            ticker.tick().await;

            if stopped.load(Ordering::Acquire) {
                break;
            }
            let Some(store) = store.upgrade() else {
                debug!("Cache store dropped, ending sweep task");
                break;
            };
            if state
                .compare_exchange(IDLE, SWEEPING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                break;
            }

            // Dependencies may block; scan on the blocking pool
            let scan = tokio::task::spawn_blocking(move || store.sweep()).await;
            let _ = state.compare_exchange(SWEEPING, IDLE, Ordering::AcqRel, Ordering::Acquire);
            let removed = match scan {
                Ok(removed) => removed,
                Err(err) => {
                    warn!("Cache sweep failed: {}", err);
                    continue;
                }
            };

            if removed > 0 {
                info!("Cache sweep: removed {} expired entries", removed);
            } else {
                debug!("Cache sweep: no expired entries found");
            }
        }

        info!("Cache sweep task stopped");
    })
}

struct SweepTask {
    handle: JoinHandle<()>,
    stopped: Arc<AtomicBool>,
}

// == Sweeper ==
/// Owns the sweep task of one cache and turns it on and off.
pub struct Sweeper {
    store: Weak<CacheStore>,
    first_sweep: Duration,
    succeeding_sweep: Duration,
    runtime: Option<Handle>,
    state: Arc<AtomicU8>,
    task: Mutex<Option<SweepTask>>,
}

impl Sweeper {
    /// Creates a disabled sweeper.
    ///
    /// Without `runtime`, [`Sweeper::start`] uses the runtime it is called from.
    pub fn new(
        store: Weak<CacheStore>,
        first_sweep: Duration,
        succeeding_sweep: Duration,
        runtime: Option<Handle>,
    ) -> Self {
        Self {
            store,
            first_sweep,
            succeeding_sweep,
            runtime,
            state: Arc::new(AtomicU8::new(DISABLED)),
            task: Mutex::new(None),
        }
    }

    /// Schedules the sweep task if it is not already running.
    pub fn start(&self) -> Result<()> {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return Ok(());
        }
        if self.succeeding_sweep.is_zero() {
            return Err(CacheError::InvalidSweepInterval {
                name: "succeeding_sweep",
                value: self.succeeding_sweep,
            });
        }
        let runtime = match &self.runtime {
            Some(runtime) => runtime.clone(),
            None => Handle::try_current().map_err(|_| CacheError::NoRuntime)?,
        };

        let stopped = Arc::new(AtomicBool::new(false));
        self.state.store(IDLE, Ordering::Release);
        let handle = spawn_sweep_task(
            &runtime,
            self.store.clone(),
            self.first_sweep,
            self.succeeding_sweep,
            Arc::clone(&self.state),
            Arc::clone(&stopped),
        );
        *task = Some(SweepTask { handle, stopped });
        Ok(())
    }

    /// Stops the sweep task. No sweep starts after this returns.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.stopped.store(true, Ordering::Release);
            task.handle.abort();
        }
        self.state.store(DISABLED, Ordering::Release);
    }

    /// Current sweep state.
    pub fn state(&self) -> SweepState {
        SweepState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Whether a sweep task is scheduled.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("first_sweep", &self.first_sweep)
            .field("succeeding_sweep", &self.succeeding_sweep)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
