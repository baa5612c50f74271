//! The client-side synchronizer: keeps one store converging with the relay.

use crate::protocol::SyncMessage;
use crate::transport::{SyncChannel, SyncConnector};
use crate::{SyncError, SyncResult};
use driftlist_store::MergeableStore;
use driftlist_types::Identity;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Commands that can be sent to the synchronizer.
#[derive(Debug)]
pub enum SyncCommand {
    /// Push pending local changes now instead of waiting for the debounce
    /// tick.
    Flush,
    /// Stop the synchronizer after a final flush.
    Shutdown,
}

/// Events emitted for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Connected,
    /// The connection dropped; reconnection with backoff is already
    /// underway.
    Disconnected,
    /// A remote merge changed local content and the UI should re-render.
    RemoteChange,
}

/// Configuration for the synchronizer.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Window within which rapid local edits are batched into one message.
    pub debounce: Duration,
    /// First reconnect delay; doubles up to `reconnect_max`.
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

/// Handle to send commands to a running synchronizer.
#[derive(Clone)]
pub struct SynchronizerHandle {
    command_tx: mpsc::Sender<SyncCommand>,
}

impl SynchronizerHandle {
    /// Pushes pending local changes immediately.
    pub async fn flush(&self) -> SyncResult<()> {
        self.command_tx
            .send(SyncCommand::Flush)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }

    /// Stops the synchronizer.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.command_tx
            .send(SyncCommand::Shutdown)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }
}

/// The replica-side synchronizer.
///
/// Owns no I/O configuration beyond the connector it is given; local UI
/// mutations hit the store directly and are picked up here on the debounce
/// tick, so a user edit never waits on the network.
pub struct Synchronizer {
    identity: Identity,
    store: Arc<Mutex<MergeableStore>>,
    connector: Arc<dyn SyncConnector>,
    config: SyncConfig,
    event_tx: mpsc::Sender<SyncEvent>,
}

enum SessionExit {
    Disconnected,
    Shutdown,
}

impl Synchronizer {
    /// Runs the connect/serve/backoff loop until shutdown.
    pub async fn run(self, mut command_rx: mpsc::Receiver<SyncCommand>) -> SyncResult<()> {
        let mut backoff = self.config.reconnect_initial;
        info!("[SYNC] synchronizer started for {}", self.identity);

        loop {
            let mut channel = match self.connector.connect(&self.identity).await {
                Ok(channel) => channel,
                Err(e) => {
                    debug!("[SYNC] connect failed for {}: {e}; retrying in {backoff:?}", self.identity);
                    // A disconnected replica just accumulates local deltas;
                    // the next successful bootstrap carries them all.
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        cmd = command_rx.recv() => {
                            if matches!(cmd, None | Some(SyncCommand::Shutdown)) {
                                return Ok(());
                            }
                        }
                    }
                    backoff = (backoff * 2).min(self.config.reconnect_max);
                    continue;
                }
            };

            backoff = self.config.reconnect_initial;
            info!("[SYNC] connected to relay for {}", self.identity);
            let _ = self.event_tx.send(SyncEvent::Connected).await;

            match self.serve(channel.as_mut(), &mut command_rx).await {
                SessionExit::Shutdown => {
                    info!("[SYNC] synchronizer shutting down for {}", self.identity);
                    return Ok(());
                }
                SessionExit::Disconnected => {
                    warn!("[SYNC] connection lost for {}; reconnecting", self.identity);
                    let _ = self.event_tx.send(SyncEvent::Disconnected).await;
                }
            }
        }
    }

    /// Serves one live connection until it drops or a shutdown arrives.
    async fn serve(
        &self,
        channel: &mut dyn SyncChannel,
        command_rx: &mut mpsc::Receiver<SyncCommand>,
    ) -> SessionExit {
        // Bootstrap: full snapshot outbound. The relay answers with its own.
        // Pending local deltas are folded into the snapshot, so anything
        // accumulated offline rides along.
        let snapshot = {
            let mut store = self.store.lock().await;
            store.take_pending();
            store.snapshot()
        };
        if channel.send(SyncMessage::Snapshot { delta: snapshot }).await.is_err() {
            return SessionExit::Disconnected;
        }

        let mut debounce = tokio::time::interval(self.config.debounce);
        debounce.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(SyncCommand::Flush) => {
                            if self.push_pending(channel).await.is_err() {
                                return SessionExit::Disconnected;
                            }
                        }
                        Some(SyncCommand::Shutdown) | None => {
                            let _ = self.push_pending(channel).await;
                            return SessionExit::Shutdown;
                        }
                    }
                }

                incoming = channel.recv() => {
                    let Some(message) = incoming else {
                        return SessionExit::Disconnected;
                    };
                    self.handle_incoming(message).await;
                }

                _ = debounce.tick() => {
                    if self.push_pending(channel).await.is_err() {
                        return SessionExit::Disconnected;
                    }
                }
            }
        }
    }

    /// Merges a remote message and notifies the UI if content changed.
    async fn handle_incoming(&self, message: SyncMessage) {
        let kind = match &message {
            SyncMessage::Snapshot { .. } => "snapshot",
            SyncMessage::Deltas { .. } => "deltas",
        };
        let applied = {
            let mut store = self.store.lock().await;
            store.merge(message.delta())
        };
        if applied.is_empty() {
            debug!("[SYNC] {kind} from relay was already known");
        } else {
            debug!("[SYNC] applied {} remote writes from {kind}", applied.len());
            let _ = self.event_tx.send(SyncEvent::RemoteChange).await;
        }
    }

    /// Drains pending local writes and sends them, if any.
    async fn push_pending(&self, channel: &mut dyn SyncChannel) -> SyncResult<()> {
        let pending = {
            let mut store = self.store.lock().await;
            store.take_pending()
        };
        if pending.is_empty() {
            return Ok(());
        }
        debug!("[SYNC] pushing {} local writes", pending.len());
        // A send failure is fine: the reconnect bootstrap re-sends the full
        // snapshot, which contains these writes.
        channel.send(SyncMessage::Deltas { delta: pending }).await
    }
}

/// Creates a synchronizer and the channels to drive it.
pub fn create_synchronizer(
    identity: Identity,
    store: Arc<Mutex<MergeableStore>>,
    connector: Arc<dyn SyncConnector>,
    config: SyncConfig,
) -> (
    SynchronizerHandle,
    mpsc::Receiver<SyncEvent>,
    mpsc::Receiver<SyncCommand>,
    Synchronizer,
) {
    let (command_tx, command_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::channel(64);

    let handle = SynchronizerHandle { command_tx };
    let synchronizer = Synchronizer {
        identity,
        store,
        connector,
        config,
        event_tx,
    };

    (handle, event_rx, command_rx, synchronizer)
}
