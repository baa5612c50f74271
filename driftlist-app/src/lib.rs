//! The application context: one explicit object threading session,
//! store, persistence, and sync together for the presentation layer.
//!
//! Constructed once at startup and passed by reference — there is no
//! hidden module-level singleton. `authenticate` derives the identity
//! synchronously (a malformed passphrase fails immediately) and brings the
//! workspace up; network trouble only ever shows up later as background
//! retry, never as an authentication failure.

use driftlist_identity::{IdentityError, Session, SessionStore};
use driftlist_model::{self as model, CemeteryItem, List, ModelError, Task, TaskUpdate};
use driftlist_storage::{
    AutoPersister, AutoPersisterConfig, PersistenceHealth, SqliteSessionStore, StorageError,
    StorePersister,
};
use driftlist_store::MergeableStore;
use driftlist_sync::{
    create_synchronizer, SyncConfig, SyncError, SyncEvent, SynchronizerHandle, WsConnector,
};
use driftlist_types::{Identity, ReplicaId};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

pub use driftlist_identity::SessionState;
pub use driftlist_sync::SyncEvent as AppSyncEvent;

/// Result type for app-level operations.
pub type AppResult<T> = Result<T, AppError>;

/// Errors surfaced to the presentation layer.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("not authenticated")]
    NotAuthenticated,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Local database file (store data + session record).
    pub db_path: PathBuf,
    /// Relay base address, e.g. `ws://127.0.0.1:8787`.
    pub relay_url: String,
    pub sync: SyncConfig,
    pub persist: AutoPersisterConfig,
}

/// Everything that exists only while an identity is signed in.
struct Workspace {
    identity: Identity,
    store: Arc<Mutex<MergeableStore>>,
    auto: AutoPersister,
    sync_handle: SynchronizerHandle,
    sync_task: tokio::task::JoinHandle<driftlist_sync::SyncResult<()>>,
    sync_events: mpsc::Receiver<SyncEvent>,
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.sync_task.abort();
    }
}

/// The application context.
pub struct AppContext {
    config: AppConfig,
    session: Session,
    workspace: Option<Workspace>,
}

impl AppContext {
    /// Opens the context. No identity is active yet; call
    /// [`AppContext::restore_session`] or [`AppContext::authenticate`].
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let sessions = Arc::new(SqliteSessionStore::open(&config.db_path)?);
        Ok(Self {
            config,
            session: Session::new(sessions),
            workspace: None,
        })
    }

    /// Context over a caller-provided session store (tests, ephemeral use).
    pub fn with_session_store(config: AppConfig, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            config,
            session: Session::new(sessions),
            workspace: None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.session.identity()
    }

    pub fn session_state(&self) -> &SessionState {
        self.session.state()
    }

    /// Derives the identity from the passphrase and opens the workspace.
    ///
    /// A malformed passphrase fails here, synchronously, before anything
    /// else happens. Sync starts in the background and keeps retrying on
    /// its own; its failures never block authentication.
    pub async fn authenticate(&mut self, passphrase: &str) -> AppResult<Identity> {
        if self.workspace.is_some() {
            self.close_workspace().await;
            self.session.logout()?;
        }
        let identity = self.session.set_identity(passphrase)?;
        self.open_workspace(identity.clone()).await?;
        Ok(identity)
    }

    /// Re-enters the previous session (if one was persisted) and opens its
    /// workspace.
    pub async fn restore_session(&mut self) -> AppResult<Option<Identity>> {
        let Some(identity) = self.session.restore()? else {
            return Ok(None);
        };
        self.open_workspace(identity.clone()).await?;
        Ok(Some(identity))
    }

    /// Flushes, stops sync, and clears the session.
    pub async fn logout(&mut self) -> AppResult<()> {
        self.close_workspace().await;
        self.session.logout()?;
        Ok(())
    }

    /// Health of the background persistence, if a workspace is open.
    pub fn persistence_health(&self) -> Option<PersistenceHealth> {
        self.workspace.as_ref().map(|w| w.auto.health())
    }

    /// Next sync event for the UI (`Connected`, `Disconnected`,
    /// `RemoteChange`).
    pub async fn next_sync_event(&mut self) -> Option<SyncEvent> {
        match &mut self.workspace {
            Some(workspace) => workspace.sync_events.recv().await,
            None => None,
        }
    }

    /// Pushes pending local changes to the relay without waiting for the
    /// debounce window.
    pub async fn flush_sync(&self) -> AppResult<()> {
        let workspace = self.workspace()?;
        workspace.sync_handle.flush().await?;
        Ok(())
    }

    async fn open_workspace(&mut self, identity: Identity) -> AppResult<()> {
        let persister = StorePersister::open(&self.config.db_path, identity.clone())?;
        let mut store = MergeableStore::new(ReplicaId::generate());
        match persister.load()? {
            Some(snapshot) => {
                store.merge(&snapshot);
                info!("[APP] loaded persisted store for {identity}");
            }
            None => info!("[APP] fresh store for {identity}"),
        }
        let store = Arc::new(Mutex::new(store));

        let auto = AutoPersister::spawn(
            store.clone(),
            persister,
            self.config.persist.clone(),
            None,
        );

        let connector = Arc::new(WsConnector::new(self.config.relay_url.clone()));
        let (sync_handle, sync_events, command_rx, synchronizer) = create_synchronizer(
            identity.clone(),
            store.clone(),
            connector,
            self.config.sync.clone(),
        );
        let sync_task = tokio::spawn(synchronizer.run(command_rx));

        self.workspace = Some(Workspace {
            identity,
            store,
            auto,
            sync_handle,
            sync_task,
            sync_events,
        });
        Ok(())
    }

    async fn close_workspace(&mut self) {
        let Some(mut workspace) = self.workspace.take() else {
            return;
        };
        if workspace.sync_handle.shutdown().await.is_ok() {
            let _ = (&mut workspace.sync_task).await;
        } else {
            workspace.sync_task.abort();
        }
        if let Err(e) = workspace.auto.shutdown().await {
            warn!("[APP] final flush failed for {}: {e}", workspace.identity);
        }
    }

    fn workspace(&self) -> AppResult<&Workspace> {
        self.workspace.as_ref().ok_or(AppError::NotAuthenticated)
    }

    // ── Operation set exposed to the presentation layer ─────────────
    //
    // All synchronous local store mutations under the store lock; the
    // synchronizer and autosave pick the changes up in the background.

    pub async fn create_list(&self, title: &str, emoji: &str, color: &str) -> AppResult<String> {
        let store = &self.workspace()?.store;
        let mut store = store.lock().await;
        Ok(model::create_list(&mut store, title, emoji, color))
    }

    pub async fn set_list_title(&self, id: &str, title: &str) -> AppResult<()> {
        let mut store = self.workspace()?.store.lock().await;
        Ok(model::set_list_title(&mut store, id, title)?)
    }

    pub async fn set_list_emoji(&self, id: &str, emoji: &str) -> AppResult<()> {
        let mut store = self.workspace()?.store.lock().await;
        Ok(model::set_list_emoji(&mut store, id, emoji)?)
    }

    pub async fn set_list_color(&self, id: &str, color: &str) -> AppResult<()> {
        let mut store = self.workspace()?.store.lock().await;
        Ok(model::set_list_color(&mut store, id, color)?)
    }

    pub async fn delete_list(&self, id: &str) -> AppResult<()> {
        let mut store = self.workspace()?.store.lock().await;
        Ok(model::delete_list(&mut store, id)?)
    }

    pub async fn lists(&self) -> AppResult<Vec<List>> {
        let store = self.workspace()?.store.lock().await;
        Ok(model::lists(&store))
    }

    pub async fn create_task(
        &self,
        list_id: &str,
        title: &str,
        description: &str,
    ) -> AppResult<String> {
        let mut store = self.workspace()?.store.lock().await;
        Ok(model::create_task(&mut store, list_id, title, description)?)
    }

    pub async fn update_task(&self, id: &str, update: TaskUpdate<'_>) -> AppResult<()> {
        let mut store = self.workspace()?.store.lock().await;
        Ok(model::update_task(&mut store, id, update)?)
    }

    pub async fn toggle_task_completed(&self, id: &str) -> AppResult<()> {
        let mut store = self.workspace()?.store.lock().await;
        Ok(model::toggle_task_completed(&mut store, id)?)
    }

    pub async fn set_task_progress(&self, id: &str, progress: u8) -> AppResult<()> {
        let mut store = self.workspace()?.store.lock().await;
        Ok(model::set_task_progress(&mut store, id, progress)?)
    }

    pub async fn delete_task(&self, id: &str) -> AppResult<String> {
        let mut store = self.workspace()?.store.lock().await;
        Ok(model::delete_task(&mut store, id)?)
    }

    pub async fn tasks(&self) -> AppResult<Vec<Task>> {
        let store = self.workspace()?.store.lock().await;
        Ok(model::tasks(&store))
    }

    pub async fn tasks_in(&self, list_id: &str) -> AppResult<Vec<Task>> {
        let store = self.workspace()?.store.lock().await;
        Ok(model::tasks_in(&store, list_id))
    }

    pub async fn restore_from_cemetery(
        &self,
        cemetery_id: &str,
        target_list: &str,
    ) -> AppResult<String> {
        let mut store = self.workspace()?.store.lock().await;
        Ok(model::restore_from_cemetery(&mut store, cemetery_id, target_list)?)
    }

    pub async fn permanently_delete(&self, cemetery_id: &str) -> AppResult<()> {
        let mut store = self.workspace()?.store.lock().await;
        Ok(model::permanently_delete(&mut store, cemetery_id)?)
    }

    pub async fn clear_cemetery(&self) -> AppResult<()> {
        let mut store = self.workspace()?.store.lock().await;
        model::clear_cemetery(&mut store);
        Ok(())
    }

    pub async fn cemetery(&self) -> AppResult<Vec<CemeteryItem>> {
        let store = self.workspace()?.store.lock().await;
        Ok(model::cemetery(&store))
    }
}
