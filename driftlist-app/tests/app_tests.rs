//! App context integration tests: offline-first behavior, session restore,
//! and two devices converging through a live relay.

use driftlist_app::{AppConfig, AppContext, AppError};
use driftlist_identity::generate_passphrase;
use driftlist_relay::{RelayConfig, RelayServer, RoomManagerConfig};
use driftlist_storage::AutoPersisterConfig;
use driftlist_sync::SyncConfig;
use std::path::Path;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn config(dir: &Path, relay_url: &str) -> AppConfig {
    AppConfig {
        db_path: dir.join("driftlist.db"),
        relay_url: relay_url.to_string(),
        sync: SyncConfig {
            debounce: Duration::from_millis(20),
            reconnect_initial: Duration::from_millis(20),
            reconnect_max: Duration::from_millis(200),
        },
        persist: AutoPersisterConfig {
            autosave_interval: Duration::from_millis(50),
            autoload_interval: Duration::from_secs(3600),
        },
    }
}

async fn start_relay(dir: &Path) -> std::net::SocketAddr {
    let server = RelayServer::bind(RelayConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        db_path: dir.join("relay.db"),
        rooms: RoomManagerConfig {
            persist: AutoPersisterConfig {
                autosave_interval: Duration::from_millis(50),
                autoload_interval: Duration::from_millis(50),
            },
        },
    })
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_passphrases_fail_synchronously() {
    let dir = tempfile::tempdir().unwrap();
    // The relay address is never even resolved for a bad passphrase.
    let mut ctx = AppContext::new(config(dir.path(), "ws://127.0.0.1:1")).unwrap();

    assert!(matches!(
        ctx.authenticate("").await,
        Err(AppError::Identity(_))
    ));
    assert!(matches!(
        ctx.authenticate("not a real mnemonic at all").await,
        Err(AppError::Identity(_))
    ));
    assert!(ctx.identity().is_none());
    assert!(matches!(ctx.lists().await, Err(AppError::NotAuthenticated)));
}

#[tokio::test(flavor = "multi_thread")]
async fn works_fully_offline_and_restores_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    // Nothing listens here; sync just keeps retrying in the background.
    let cfg = config(dir.path(), "ws://127.0.0.1:1");
    let phrase = generate_passphrase().unwrap();

    let list_id = {
        let mut ctx = AppContext::new(cfg.clone()).unwrap();
        let identity = ctx.authenticate(&phrase).await.unwrap();
        assert_eq!(ctx.identity(), Some(&identity));

        let list_id = ctx.create_list("Errands", "🚗", "#0ea5e9").await.unwrap();
        let task_id = ctx.create_task(&list_id, "Oil change", "").await.unwrap();
        ctx.set_task_progress(&task_id, 30).await.unwrap();

        // Exit without logout (logout would clear the session record);
        // autosave has time to write the dirty store before the drop.
        tokio::time::sleep(Duration::from_millis(300)).await;
        list_id
    };

    // "Restart": a new context over the same database restores the session
    // without the passphrase and sees the persisted data.
    let mut restarted = AppContext::new(cfg).unwrap();
    let restored = restarted.restore_session().await.unwrap();
    assert!(restored.is_some());
    let lists = restarted.lists().await.unwrap();
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].id, list_id);
    let tasks = restarted.tasks_in(&list_id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].progress, 30);

    // Logout forgets the session for good.
    restarted.logout().await.unwrap();
    let mut third = AppContext::new(config(dir.path(), "ws://127.0.0.1:1")).unwrap();
    assert_eq!(third.restore_session().await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn two_devices_with_the_same_passphrase_converge() {
    let relay_dir = tempfile::tempdir().unwrap();
    let addr = start_relay(relay_dir.path()).await;
    let relay_url = format!("ws://{addr}");

    let phrase = generate_passphrase().unwrap();
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();

    let mut device_a = AppContext::new(config(dir_a.path(), &relay_url)).unwrap();
    let mut device_b = AppContext::new(config(dir_b.path(), &relay_url)).unwrap();
    let id_a = device_a.authenticate(&phrase).await.unwrap();
    let id_b = device_b.authenticate(&phrase).await.unwrap();
    assert_eq!(id_a, id_b, "same passphrase, same identity");

    let list_id = device_a.create_list("Shared", "🤝", "#f59e0b").await.unwrap();
    device_a.create_task(&list_id, "Visible everywhere", "").await.unwrap();
    device_a.flush_sync().await.unwrap();

    // Device B converges through the relay.
    timeout(WAIT, async {
        loop {
            let lists = device_b.lists().await.unwrap();
            if lists.len() == 1 && lists[0].title == "Shared" {
                let tasks = device_b.tasks_in(&lists[0].id).await.unwrap();
                if tasks.len() == 1 {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("device B never converged");

    // And edits flow the other way too.
    let tasks = device_b.tasks().await.unwrap();
    device_b.toggle_task_completed(&tasks[0].id).await.unwrap();
    device_b.flush_sync().await.unwrap();

    timeout(WAIT, async {
        loop {
            let tasks = device_a.tasks().await.unwrap();
            if tasks.len() == 1 && tasks[0].completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("device A never saw the completion");

    device_a.logout().await.unwrap();
    device_b.logout().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn distinct_passphrases_never_share_data() {
    let relay_dir = tempfile::tempdir().unwrap();
    let addr = start_relay(relay_dir.path()).await;
    let relay_url = format!("ws://{addr}");

    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let mut alice = AppContext::new(config(dir_a.path(), &relay_url)).unwrap();
    let mut bob = AppContext::new(config(dir_b.path(), &relay_url)).unwrap();

    let id_a = alice.authenticate(&generate_passphrase().unwrap()).await.unwrap();
    let id_b = bob.authenticate(&generate_passphrase().unwrap()).await.unwrap();
    assert_ne!(id_a, id_b);

    alice.create_list("Private", "🔒", "#dc2626").await.unwrap();
    alice.flush_sync().await.unwrap();

    // Give the relay ample time to (wrongly) leak; bob must stay empty.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(bob.lists().await.unwrap().is_empty());
}
