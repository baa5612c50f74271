//! Background autosave/autoload with skip-if-busy ticks and a final flush.

use crate::{StorageError, StorageResult, StorePersister};
use driftlist_store::{Delta, MergeableStore};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Consecutive save failures after which health reports degraded.
const DEGRADED_AFTER_FAILURES: u32 = 3;

/// Intervals for the background persistence timers.
#[derive(Debug, Clone)]
pub struct AutoPersisterConfig {
    /// How often dirty state is written back.
    pub autosave_interval: Duration,
    /// How often the durable state is re-read to pick up out-of-process
    /// writes.
    pub autoload_interval: Duration,
}

impl Default for AutoPersisterConfig {
    fn default() -> Self {
        Self {
            autosave_interval: Duration::from_secs(2),
            autoload_interval: Duration::from_secs(5),
        }
    }
}

/// Health of the persistence loop. Save failures never interrupt in-memory
/// operation; they are retried on the next tick and surface here once they
/// persist long enough to matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceHealth {
    pub consecutive_save_failures: u32,
    pub degraded: bool,
}

/// Runs autosave and autoload for one store on independent fixed-interval
/// timers.
///
/// Each timer skips ticks while its previous tick is still running
/// (skip-if-busy, never queue-and-pile-up). [`AutoPersister::shutdown`]
/// flushes pending state synchronously before releasing resources.
pub struct AutoPersister {
    store: Arc<Mutex<MergeableStore>>,
    persister: StorePersister,
    last_saved_seq: Arc<AtomicU64>,
    save_failures: Arc<AtomicU32>,
    tasks: Vec<JoinHandle<()>>,
}

impl AutoPersister {
    /// Spawns the background timers. Non-empty autoload merges are reported
    /// through `changes_tx` so the owner can fan them out or refresh a UI.
    pub fn spawn(
        store: Arc<Mutex<MergeableStore>>,
        persister: StorePersister,
        config: AutoPersisterConfig,
        changes_tx: Option<mpsc::UnboundedSender<Delta>>,
    ) -> Self {
        let last_saved_seq = Arc::new(AtomicU64::new(0));
        let save_failures = Arc::new(AtomicU32::new(0));

        let save_task = tokio::spawn(autosave_loop(
            store.clone(),
            persister.clone(),
            config.autosave_interval,
            last_saved_seq.clone(),
            save_failures.clone(),
        ));
        let load_task = tokio::spawn(autoload_loop(
            store.clone(),
            persister.clone(),
            config.autoload_interval,
            changes_tx,
        ));

        Self {
            store,
            persister,
            last_saved_seq,
            save_failures,
            tasks: vec![save_task, load_task],
        }
    }

    pub fn health(&self) -> PersistenceHealth {
        let failures = self.save_failures.load(Ordering::Relaxed);
        PersistenceHealth {
            consecutive_save_failures: failures,
            degraded: failures >= DEGRADED_AFTER_FAILURES,
        }
    }

    /// Writes the current snapshot now, regardless of the timers.
    pub async fn flush(&self) -> StorageResult<()> {
        let (snapshot, seq) = {
            let store = self.store.lock().await;
            (store.snapshot(), store.change_seq())
        };
        let persister = self.persister.clone();
        tokio::task::spawn_blocking(move || persister.save(&snapshot))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))??;
        self.last_saved_seq.store(seq, Ordering::Relaxed);
        self.save_failures.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Stops the timers and performs the final flush.
    pub async fn shutdown(&self) -> StorageResult<()> {
        for task in &self.tasks {
            task.abort();
        }
        self.flush().await
    }
}

impl Drop for AutoPersister {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn autosave_loop(
    store: Arc<Mutex<MergeableStore>>,
    persister: StorePersister,
    interval: Duration,
    last_saved_seq: Arc<AtomicU64>,
    save_failures: Arc<AtomicU32>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;

        let (snapshot, seq) = {
            let store = store.lock().await;
            let seq = store.change_seq();
            if seq == last_saved_seq.load(Ordering::Relaxed) {
                continue;
            }
            (store.snapshot(), seq)
        };

        let p = persister.clone();
        let result = tokio::task::spawn_blocking(move || p.save(&snapshot)).await;
        match result {
            Ok(Ok(())) => {
                last_saved_seq.store(seq, Ordering::Relaxed);
                save_failures.store(0, Ordering::Relaxed);
                debug!("[PERSIST] autosaved {} at seq {}", persister.identity(), seq);
            }
            Ok(Err(e)) => {
                let failures = save_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "[PERSIST] autosave failed for {} ({} consecutive): {}",
                    persister.identity(),
                    failures,
                    e
                );
            }
            Err(e) => {
                warn!("[PERSIST] autosave task panicked: {e}");
            }
        }
    }
}

async fn autoload_loop(
    store: Arc<Mutex<MergeableStore>>,
    persister: StorePersister,
    interval: Duration,
    changes_tx: Option<mpsc::UnboundedSender<Delta>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;

        let p = persister.clone();
        let loaded = match tokio::task::spawn_blocking(move || p.load()).await {
            Ok(Ok(Some(delta))) => delta,
            Ok(Ok(None)) => continue,
            Ok(Err(e)) => {
                warn!("[PERSIST] autoload failed for {}: {}", persister.identity(), e);
                continue;
            }
            Err(e) => {
                warn!("[PERSIST] autoload task panicked: {e}");
                continue;
            }
        };

        let applied = {
            let mut store = store.lock().await;
            store.merge(&loaded)
        };
        if !applied.is_empty() {
            debug!(
                "[PERSIST] autoload picked up {} out-of-process writes for {}",
                applied.len(),
                persister.identity()
            );
            if let Some(tx) = &changes_tx {
                let _ = tx.send(applied);
            }
        }
    }
}
