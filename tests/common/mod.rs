use std::sync::Arc;
use std::time::Duration;
use whatsapp_sessiond::creds::CredentialStore;
use whatsapp_sessiond::ingest::IngestionPipeline;
use whatsapp_sessiond::media::{InMemoryObjectStore, MediaTransfer};
use whatsapp_sessiond::session::{ReconnectPolicy, SessionManager};
use whatsapp_sessiond::store::InMemoryBackend;
use whatsapp_sessiond::sync::{ContactSync, SyncSettings};
use whatsapp_sessiond::transport::scripted::ScriptedTransportFactory;

pub struct Harness {
    pub manager: Arc<SessionManager>,
    pub factory: Arc<ScriptedTransportFactory>,
    pub backend: Arc<InMemoryBackend>,
    pub creds: Arc<CredentialStore>,
    #[allow(dead_code)]
    pub objects: Arc<InMemoryObjectStore>,
    // Held so the credential directory outlives the test.
    #[allow(dead_code)]
    pub dir: tempfile::TempDir,
}

pub fn harness() -> Harness {
    harness_with(ReconnectPolicy::default())
}

pub fn harness_with(policy: ReconnectPolicy) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(InMemoryBackend::new());
    let factory = Arc::new(ScriptedTransportFactory::new());
    let creds = Arc::new(CredentialStore::new(dir.path(), backend.clone()));
    let objects = Arc::new(InMemoryObjectStore::new());
    let pipeline = Arc::new(IngestionPipeline::new(
        backend.clone(),
        Arc::new(MediaTransfer::new(objects.clone())),
        90,
        100,
    ));
    let sync = Arc::new(ContactSync::new(backend.clone(), SyncSettings::default()));
    let manager = SessionManager::new(
        backend.clone(),
        factory.clone(),
        creds.clone(),
        pipeline,
        sync,
        policy,
        Duration::from_secs(30),
    );
    Harness {
        manager,
        factory,
        backend,
        creds,
        objects,
        dir,
    }
}

/// Polls a condition while yielding to the runtime. Works under paused time
/// because the sleeps auto-advance the clock.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within the polling budget");
}
