//! Per-identity rooms: lazy creation, shared stores, reference-counted
//! eviction.

use crate::RelayResult;
use driftlist_storage::{AutoPersister, AutoPersisterConfig, PersistenceHealth, StorePersister};
use driftlist_store::MergeableStore;
use driftlist_sync::SyncMessage;
use driftlist_types::{Identity, ReplicaId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{info, warn};

/// Sender id reserved for writes the relay discovered itself (autoload),
/// which must fan out to every connection.
const RELAY_SENDER: u64 = 0;

/// Capacity of each room's fan-out channel. A receiver that lags past this
/// gets a fresh snapshot instead of the missed deltas.
const BROADCAST_CAPACITY: usize = 256;

/// A message fanned out within one room: `(sender connection id, encoded
/// frame)`. Connections skip their own id.
pub type RoomMessage = (u64, Arc<String>);

/// One identity's presence on the relay.
///
/// All of the identity's connections share this store; merges serialize
/// through its mutex, so concurrent messages for one identity apply one at
/// a time while different identities proceed in parallel.
pub struct Room {
    identity: Identity,
    pub store: Arc<Mutex<MergeableStore>>,
    broadcast: broadcast::Sender<RoomMessage>,
    auto: Mutex<Option<AutoPersister>>,
    connections: AtomicUsize,
    next_conn_id: AtomicU64,
    last_access: std::sync::Mutex<Instant>,
    /// Forwards non-empty autoload merges into the fan-out channel.
    autoload_task: tokio::task::JoinHandle<()>,
}

impl Room {
    /// Merges an incoming delta into the room store and, when the merge
    /// applied anything, fans the applied subset out to the other
    /// connections. Returns how many writes were applied.
    pub async fn merge_and_forward(&self, from_conn: u64, message: &SyncMessage) -> usize {
        let applied = {
            let mut store = self.store.lock().await;
            store.merge(message.delta())
        };
        if applied.is_empty() {
            return 0;
        }
        let applied_len = applied.len();
        let frame = SyncMessage::Deltas { delta: applied }.encode();
        // Send errors just mean no other connection is listening right now.
        let _ = self.broadcast.send((from_conn, Arc::new(frame)));
        applied_len
    }

    /// The room's current full state, encoded for a bootstrap frame.
    pub async fn snapshot_frame(&self) -> String {
        let snapshot = self.store.lock().await.snapshot();
        SyncMessage::Snapshot { delta: snapshot }.encode()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomMessage> {
        self.broadcast.subscribe()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Time since the last connection joined this room.
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_access.lock().unwrap().elapsed()
    }

    pub async fn health(&self) -> Option<PersistenceHealth> {
        self.auto.lock().await.as_ref().map(|a| a.health())
    }

    fn touch(&self) -> u64 {
        *self.last_access.lock().unwrap() = Instant::now();
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Configuration for room persistence.
#[derive(Debug, Clone, Default)]
pub struct RoomManagerConfig {
    pub persist: AutoPersisterConfig,
}

/// Counters surfaced through the health endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoomStats {
    pub rooms: usize,
    pub connections: usize,
}

/// The identity → room map: lazy creation on first connection, eviction
/// (with a flush) once the last connection leaves. Eviction drops only the
/// in-memory room; durable state stays.
pub struct RoomManager {
    db_path: PathBuf,
    config: RoomManagerConfig,
    rooms: Mutex<HashMap<Identity, Arc<Room>>>,
}

impl RoomManager {
    pub fn new(db_path: PathBuf, config: RoomManagerConfig) -> Self {
        Self {
            db_path,
            config,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Joins a connection to its identity's room, creating the room from
    /// durable state if this is the identity's first connection. Returns
    /// the room, this connection's id, and its fan-out subscription.
    pub async fn join(
        &self,
        identity: &Identity,
    ) -> RelayResult<(Arc<Room>, u64, broadcast::Receiver<RoomMessage>)> {
        let mut rooms = self.rooms.lock().await;
        let room = match rooms.get(identity) {
            Some(room) => room.clone(),
            None => {
                let room = self.open_room(identity).await?;
                rooms.insert(identity.clone(), room.clone());
                info!("[RELAY] room opened for {identity}");
                room
            }
        };
        room.connections.fetch_add(1, Ordering::Relaxed);
        let conn_id = room.touch();
        let rx = room.subscribe();
        Ok((room, conn_id, rx))
    }

    /// Detaches a connection. The last one out evicts the room after a
    /// synchronous flush, so nothing pending is lost.
    pub async fn leave(&self, identity: &Identity) {
        let evicted = {
            let mut rooms = self.rooms.lock().await;
            let Some(room) = rooms.get(identity) else {
                return;
            };
            if room.connections.fetch_sub(1, Ordering::Relaxed) == 1 {
                rooms.remove(identity)
            } else {
                None
            }
        };

        if let Some(room) = evicted {
            room.autoload_task.abort();
            if let Some(auto) = room.auto.lock().await.take() {
                if let Err(e) = auto.shutdown().await {
                    warn!("[RELAY] flush on eviction failed for {identity}: {e}");
                }
            }
            info!("[RELAY] room evicted for {identity} (no connections)");
        }
    }

    /// Flushes every open room; used on relay shutdown.
    pub async fn flush_all(&self) {
        let rooms: Vec<Arc<Room>> = self.rooms.lock().await.values().cloned().collect();
        for room in rooms {
            if let Some(auto) = room.auto.lock().await.as_ref() {
                if let Err(e) = auto.flush().await {
                    warn!("[RELAY] shutdown flush failed for {}: {e}", room.identity);
                }
            }
        }
    }

    pub async fn stats(&self) -> RoomStats {
        let rooms = self.rooms.lock().await;
        RoomStats {
            rooms: rooms.len(),
            connections: rooms.values().map(|r| r.connections()).sum(),
        }
    }

    /// Whether any room's persistence is currently degraded.
    pub async fn any_degraded(&self) -> bool {
        let rooms: Vec<Arc<Room>> = self.rooms.lock().await.values().cloned().collect();
        for room in rooms {
            if let Some(health) = room.health().await {
                if health.degraded {
                    return true;
                }
            }
        }
        false
    }

    async fn open_room(&self, identity: &Identity) -> RelayResult<Arc<Room>> {
        let db_path = self.db_path.clone();
        let id = identity.clone();
        let (persister, loaded) = tokio::task::spawn_blocking(move || {
            let persister = StorePersister::open(&db_path, id)?;
            let loaded = persister.load()?;
            Ok::<_, driftlist_storage::StorageError>((persister, loaded))
        })
        .await
        .map_err(|e| {
            crate::RelayError::Storage(driftlist_storage::StorageError::Task(e.to_string()))
        })??;

        let mut store = MergeableStore::new(ReplicaId::generate());
        match loaded {
            Some(snapshot) => {
                store.merge(&snapshot);
                info!("[RELAY] loaded durable state for {identity}");
            }
            None => {
                info!("[RELAY] provisioning empty store for new identity {identity}");
            }
        }

        let store = Arc::new(Mutex::new(store));
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (changes_tx, mut changes_rx) = mpsc::unbounded_channel();

        let auto = AutoPersister::spawn(
            store.clone(),
            persister,
            self.config.persist.clone(),
            Some(changes_tx),
        );

        // Out-of-process writes picked up by autoload fan out like any merge.
        let fanout = broadcast_tx.clone();
        let autoload_task = tokio::spawn(async move {
            while let Some(delta) = changes_rx.recv().await {
                let frame = SyncMessage::Deltas { delta }.encode();
                let _ = fanout.send((RELAY_SENDER, Arc::new(frame)));
            }
        });

        Ok(Arc::new(Room {
            identity: identity.clone(),
            store,
            broadcast: broadcast_tx,
            auto: Mutex::new(Some(auto)),
            connections: AtomicUsize::new(0),
            next_conn_id: AtomicU64::new(1),
            last_access: std::sync::Mutex::new(Instant::now()),
            autoload_task,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftlist_store::Delta;

    fn identity(tag: &str) -> Identity {
        Identity::parse(&format!("{tag:0>16}")).unwrap()
    }

    fn manager(dir: &tempfile::TempDir) -> RoomManager {
        RoomManager::new(dir.path().join("relay.db"), RoomManagerConfig::default())
    }

    #[tokio::test]
    async fn rooms_are_created_lazily_and_shared() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        assert_eq!(mgr.stats().await.rooms, 0);

        let (room_a, conn_a, _rx_a) = mgr.join(&identity("aa")).await.unwrap();
        let (room_b, conn_b, _rx_b) = mgr.join(&identity("aa")).await.unwrap();
        assert_ne!(conn_a, conn_b);
        assert!(Arc::ptr_eq(&room_a, &room_b));
        assert_eq!(mgr.stats().await.rooms, 1);
        assert_eq!(mgr.stats().await.connections, 2);
    }

    #[tokio::test]
    async fn eviction_waits_for_the_last_connection() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        mgr.join(&identity("aa")).await.unwrap();
        mgr.join(&identity("aa")).await.unwrap();

        mgr.leave(&identity("aa")).await;
        assert_eq!(mgr.stats().await.rooms, 1);
        mgr.leave(&identity("aa")).await;
        assert_eq!(mgr.stats().await.rooms, 0);
    }

    #[tokio::test]
    async fn evicted_room_state_survives_in_durable_storage() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);

        let (room, conn, _rx) = mgr.join(&identity("aa")).await.unwrap();
        let mut writer = MergeableStore::new(ReplicaId::new("device"));
        writer.set_cell("lists", "l1", "title", "survives");
        room.merge_and_forward(conn, &SyncMessage::Deltas { delta: writer.take_pending() })
            .await;
        mgr.leave(&identity("aa")).await;
        assert_eq!(mgr.stats().await.rooms, 0);

        // A later join reloads the flushed state.
        let (room, _conn, _rx) = mgr.join(&identity("aa")).await.unwrap();
        let store = room.store.lock().await;
        assert!(store.has_row("lists", "l1"));
    }

    #[tokio::test]
    async fn distinct_identities_get_distinct_rooms() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);

        let (room_a, conn_a, _rx_a) = mgr.join(&identity("aa")).await.unwrap();
        let (room_b, _conn_b, mut rx_b) = mgr.join(&identity("bb")).await.unwrap();
        assert!(!Arc::ptr_eq(&room_a, &room_b));

        let mut writer = MergeableStore::new(ReplicaId::new("device"));
        writer.set_cell("lists", "l1", "title", "only for aa");
        room_a
            .merge_and_forward(conn_a, &SyncMessage::Deltas { delta: writer.take_pending() })
            .await;

        // Nothing crosses between rooms.
        assert!(rx_b.try_recv().is_err());
        assert!(!room_b.store.lock().await.has_row("lists", "l1"));
    }

    #[tokio::test]
    async fn merge_and_forward_reports_applied_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        let (room, conn, mut rx) = mgr.join(&identity("aa")).await.unwrap();

        let mut writer = MergeableStore::new(ReplicaId::new("device"));
        writer.set_cell("tasks", "t1", "title", "x");
        let delta = writer.take_pending();

        let applied = room
            .merge_and_forward(conn, &SyncMessage::Deltas { delta: delta.clone() })
            .await;
        assert!(applied > 0);

        // The same delta again is a strict ancestor: nothing applied,
        // nothing forwarded.
        let applied = room
            .merge_and_forward(conn, &SyncMessage::Deltas { delta })
            .await;
        assert_eq!(applied, 0);

        // Exactly one frame was fanned out, tagged with the sender.
        let (sender, frame) = rx.recv().await.unwrap();
        assert_eq!(sender, conn);
        assert!(matches!(
            SyncMessage::decode(&frame).unwrap(),
            SyncMessage::Deltas { .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_merge_forwards_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        let (room, conn, mut rx) = mgr.join(&identity("aa")).await.unwrap();
        let applied = room
            .merge_and_forward(conn, &SyncMessage::Snapshot { delta: Delta::default() })
            .await;
        assert_eq!(applied, 0);
        assert!(rx.try_recv().is_err());
    }
}
