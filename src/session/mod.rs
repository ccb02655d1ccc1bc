mod events;
mod health;
mod reconnect;

pub use reconnect::ReconnectPolicy;

use crate::creds::CredentialStore;
use crate::ingest::IngestionPipeline;
use crate::store::{Backend, StoreError};
use crate::sync::ContactSync;
use crate::transport::{Transport, TransportFactory};
use crate::types::{Jid, SessionState};
use anyhow::anyhow;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{info, warn};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// All in-memory state for one account. Owned by the manager's registry;
/// short `std` mutexes guard fields that are never held across an await.
pub struct Session {
    pub staff_id: String,
    state: StdMutex<SessionState>,
    transport: StdMutex<Option<Arc<dyn Transport>>>,
    qr: StdMutex<Option<String>>,
    pairing_code: StdMutex<Option<String>>,
    phone_number: StdMutex<Option<String>>,
    pub(crate) reconnect_attempts: AtomicU32,
    reconnect_timer: StdMutex<Option<JoinHandle<()>>>,
    event_task: StdMutex<Option<JoinHandle<()>>>,
    /// Bumped on every initialize; event loops from an older generation stop
    /// mutating state.
    pub(crate) generation: AtomicU64,
    /// Guards transport construction; only one `initialize` per account may
    /// be in flight.
    init_lock: tokio::sync::Mutex<()>,
}

impl Session {
    fn new(staff_id: &str) -> Self {
        Self {
            staff_id: staff_id.to_string(),
            state: StdMutex::new(SessionState::Disconnected),
            transport: StdMutex::new(None),
            qr: StdMutex::new(None),
            pairing_code: StdMutex::new(None),
            phone_number: StdMutex::new(None),
            reconnect_attempts: AtomicU32::new(0),
            reconnect_timer: StdMutex::new(None),
            event_task: StdMutex::new(None),
            generation: AtomicU64::new(0),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.lock().unwrap().clone()
    }

    fn set_transport(&self, transport: Arc<dyn Transport>) {
        *self.transport.lock().unwrap() = Some(transport);
    }

    fn take_transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.lock().unwrap().take()
    }

    pub fn qr(&self) -> Option<String> {
        self.qr.lock().unwrap().clone()
    }

    pub(crate) fn set_qr(&self, code: String) {
        *self.qr.lock().unwrap() = Some(code);
        *self.pairing_code.lock().unwrap() = None;
    }

    pub fn pairing_code(&self) -> Option<String> {
        self.pairing_code.lock().unwrap().clone()
    }

    fn set_pairing_code(&self, code: String) {
        *self.pairing_code.lock().unwrap() = Some(code);
        *self.qr.lock().unwrap() = None;
    }

    pub fn phone_number(&self) -> Option<String> {
        self.phone_number.lock().unwrap().clone()
    }

    pub(crate) fn set_phone_number(&self, phone: String) {
        *self.phone_number.lock().unwrap() = Some(phone);
    }

    /// QR payloads and pairing codes are only valid inside their states.
    pub(crate) fn clear_auth_artifacts(&self) {
        *self.qr.lock().unwrap() = None;
        *self.pairing_code.lock().unwrap() = None;
    }

    pub(crate) fn cancel_reconnect_timer(&self) {
        if let Some(handle) = self.reconnect_timer.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub(crate) fn set_reconnect_timer(&self, handle: JoinHandle<()>) {
        if let Some(old) = self.reconnect_timer.lock().unwrap().replace(handle) {
            old.abort();
        }
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.reconnect_timer
            .lock()
            .unwrap()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    fn abort_event_task(&self) {
        if let Some(handle) = self.event_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// Orchestrator owning every account's session state machine. The HTTP
/// boundary talks only to this type.
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    pub(crate) backend: Arc<dyn Backend>,
    factory: Arc<dyn TransportFactory>,
    pub(crate) creds: Arc<CredentialStore>,
    pub(crate) pipeline: Arc<IngestionPipeline>,
    pub(crate) sync: Arc<ContactSync>,
    pub(crate) reconnect: ReconnectPolicy,
    pub(crate) health_interval: Duration,
    pub(crate) shutdown: Notify,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn Backend>,
        factory: Arc<dyn TransportFactory>,
        creds: Arc<CredentialStore>,
        pipeline: Arc<IngestionPipeline>,
        sync: Arc<ContactSync>,
        reconnect: ReconnectPolicy,
        health_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            backend,
            factory,
            creds,
            pipeline,
            sync,
            reconnect,
            health_interval,
            shutdown: Notify::new(),
        })
    }

    pub(crate) fn session(&self, staff_id: &str) -> Arc<Session> {
        self.sessions
            .entry(staff_id.to_string())
            .or_insert_with(|| Arc::new(Session::new(staff_id)))
            .clone()
    }

    pub fn session_snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    /// Current state for an account. When nothing is in memory but on-disk
    /// credentials exist, a background reconnect is started (exactly one,
    /// even for rapid repeated calls) and `Reconnecting` is reported.
    pub async fn get_status(self: &Arc<Self>, staff_id: &str) -> SessionState {
        if let Some(session) = self.sessions.get(staff_id) {
            return session.state();
        }
        if !self.creds.has_local(staff_id).await {
            return SessionState::Disconnected;
        }
        match self.sessions.entry(staff_id.to_string()) {
            Entry::Occupied(entry) => entry.get().state(),
            Entry::Vacant(entry) => {
                let session = Arc::new(Session::new(staff_id));
                session.set_state(SessionState::Reconnecting);
                entry.insert(session.clone());
                info!(target: "Session", "Auto-resuming {staff_id} from on-disk credentials");
                let manager = self.clone();
                let id = staff_id.to_string();
                tokio::spawn(async move {
                    if let Err(e) = manager.initialize(&id).await {
                        warn!(target: "Session", "Auto-resume of {id} failed: {e:?}");
                        manager.schedule_reconnect(&session);
                    }
                });
                SessionState::Reconnecting
            }
        }
    }

    pub fn get_qr(&self, staff_id: &str) -> Option<String> {
        self.sessions.get(staff_id).and_then(|s| s.qr())
    }

    pub fn get_pairing_code(&self, staff_id: &str) -> Option<String> {
        self.sessions.get(staff_id).and_then(|s| s.pairing_code())
    }

    pub fn phone_number(&self, staff_id: &str) -> Option<String> {
        self.sessions.get(staff_id).and_then(|s| s.phone_number())
    }

    /// Returns a live transport handle, lazily initializing when none exists
    /// or the existing one is no longer open. Safe to call concurrently for
    /// the same account.
    pub async fn get_client(self: &Arc<Self>, staff_id: &str) -> anyhow::Result<Arc<dyn Transport>> {
        if let Some(session) = self.sessions.get(staff_id) {
            if let Some(transport) = session.transport() {
                if transport.is_open() {
                    return Ok(transport);
                }
            }
        }
        self.initialize(staff_id).await
    }

    /// Tears down any stale handle for the account, loads credentials, and
    /// constructs a fresh transport with its event loop. Returns as soon as
    /// construction completes; it does not wait for `Connected`.
    pub async fn initialize(self: &Arc<Self>, staff_id: &str) -> anyhow::Result<Arc<dyn Transport>> {
        let session = self.session(staff_id);

        let guard = match session.init_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                // Someone else is constructing; wait for them to finish and
                // hand out whatever now exists instead of double-initializing.
                drop(session.init_lock.lock().await);
                return session.transport().ok_or_else(|| {
                    anyhow!("initialization already in flight for {staff_id} produced no handle")
                });
            }
        };

        // A manual or scheduled start supersedes any pending retry timer.
        session.cancel_reconnect_timer();

        // At most one live handle per account: release the old one first.
        session.abort_event_task();
        if let Some(old) = session.take_transport() {
            old.disconnect().await;
        }

        let creds = self.creds.load_or_create(staff_id).await?;
        let (transport, events) = self.factory.create_transport(creds).await?;

        // The account may have been disconnected while construction was in
        // flight; a handle built for a deregistered session must not survive.
        let still_registered = self
            .sessions
            .get(staff_id)
            .map(|entry| Arc::ptr_eq(entry.value(), &session))
            .unwrap_or(false);
        if !still_registered {
            transport.disconnect().await;
            return Err(anyhow!("{staff_id} was disconnected during initialization"));
        }

        let generation = session.generation.fetch_add(1, Ordering::SeqCst) + 1;

        session.set_transport(transport.clone());
        session.set_state(SessionState::Connecting);
        session.clear_auth_artifacts();
        self.persist_status(&session).await;

        let task = tokio::spawn(events::run_event_loop(
            self.clone(),
            session.clone(),
            generation,
            events,
        ));
        *session.event_task.lock().unwrap() = Some(task);

        info!(target: "Session", "Initialized transport for {staff_id} (generation {generation})");
        drop(guard);
        Ok(transport)
    }

    /// Requests a numeric pairing code from the protocol and mirrors it to
    /// the remote store with state `Pairing`.
    pub async fn request_pairing_code(
        self: &Arc<Self>,
        staff_id: &str,
        phone_number: &str,
    ) -> anyhow::Result<String> {
        let digits: String = phone_number.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(anyhow!("phone number '{phone_number}' contains no digits"));
        }
        let client = self.get_client(staff_id).await?;
        let code = client.request_pairing_code(&digits).await?;

        let session = self.session(staff_id);
        session.set_pairing_code(code.clone());
        session.set_state(SessionState::Pairing);
        self.persist_status(&session).await;
        Ok(code)
    }

    /// Releases every resource for the account: reconnect timer, event loop,
    /// transport handle, local credential files, and the remote session
    /// record. Idempotent.
    pub async fn disconnect(&self, staff_id: &str) -> Result<(), StoreError> {
        if let Some((_, session)) = self.sessions.remove(staff_id) {
            // An initialize may be mid-construction; wait it out so its
            // handle cannot outlive the teardown.
            let _init = session.init_lock.lock().await;
            session.cancel_reconnect_timer();
            session.abort_event_task();
            session.generation.fetch_add(1, Ordering::SeqCst);
            if let Some(transport) = session.take_transport() {
                transport.disconnect().await;
            }
            info!(target: "Session", "Disconnected {staff_id}");
        }
        self.creds.wipe(staff_id).await?;
        self.backend.delete_session(staff_id).await?;
        Ok(())
    }

    /// Sends a text to a recipient, normalizing the identifier to the
    /// protocol's addressing form first.
    pub async fn send_message(
        self: &Arc<Self>,
        staff_id: &str,
        to: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        let jid = Jid::normalize(to)?;
        let client = self.get_client(staff_id).await?;
        client.send_text(&jid, text).await?;
        Ok(())
    }

    /// Re-runs the contact/group/name sync passes for an already-connected
    /// account. Fire-and-forget; returns whether a live client was available.
    pub fn trigger_sync(self: &Arc<Self>, staff_id: &str) -> bool {
        let Some(session) = self.sessions.get(staff_id).map(|e| e.value().clone()) else {
            return false;
        };
        let Some(transport) = session.transport() else {
            return false;
        };
        if !transport.is_open() {
            return false;
        }
        let manager = self.clone();
        let id = staff_id.to_string();
        tokio::spawn(async move {
            manager.sync.run_all(&id, transport.as_ref()).await;
        });
        true
    }

    /// Startup auto-resume: every account with an on-disk credential
    /// directory gets a background reconnect.
    pub async fn auto_reconnect_all(self: &Arc<Self>) {
        let accounts = self.creds.local_accounts().await;
        if accounts.is_empty() {
            return;
        }
        info!(target: "Session", "Auto-resuming {} account(s) from disk", accounts.len());
        for staff_id in accounts {
            let _ = self.get_status(&staff_id).await;
        }
    }

    /// Cancels every timer and event loop and closes every handle. Local
    /// credentials are kept so the next process start can resume.
    pub async fn stop_all(&self) {
        self.shutdown.notify_waiters();
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.sessions.clear();
        for session in sessions {
            session.cancel_reconnect_timer();
            session.abort_event_task();
            session.generation.fetch_add(1, Ordering::SeqCst);
            if let Some(transport) = session.take_transport() {
                transport.disconnect().await;
            }
        }
        info!(target: "Session", "All sessions stopped");
    }

    pub(crate) async fn persist_status(&self, session: &Session) {
        let state = session.state();
        let qr = session.qr();
        let pairing = session.pairing_code();
        let phone = session.phone_number();
        if let Err(e) = self
            .backend
            .update_status(
                &session.staff_id,
                state,
                qr.as_deref(),
                pairing.as_deref(),
                phone.as_deref(),
            )
            .await
        {
            warn!(target: "Session", "Failed to persist status for {}: {e}", session.staff_id);
        }
    }
}
