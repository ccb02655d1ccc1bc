use super::{Session, SessionManager};
use crate::transport::{CloseCode, TransportEvent};
use crate::types::SessionState;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;

/// Sequential per-account event loop. One instance runs per transport
/// handle; events arrive in protocol order and are fully processed before
/// the next is taken.
pub(super) async fn run_event_loop(
    manager: Arc<SessionManager>,
    session: Arc<Session>,
    generation: u64,
    mut events: mpsc::Receiver<TransportEvent>,
) {
    let staff_id = session.staff_id.clone();
    while let Some(event) = events.recv().await {
        if session.generation.load(Ordering::SeqCst) != generation {
            debug!(target: "Session/Events", "Dropping stale event for {staff_id} (generation {generation})");
            break;
        }
        match event {
            TransportEvent::Qr { code } => {
                session.set_qr(code);
                session.set_state(SessionState::QrReady);
                manager.persist_status(&session).await;
            }
            TransportEvent::CredsUpdate(creds) => {
                if let Err(e) = manager.creds.save(&staff_id, &creds).await {
                    warn!(target: "Session/Events", "Credential save failed for {staff_id}: {e}");
                }
            }
            TransportEvent::Connected { phone_number } => {
                handle_connected(&manager, &session, phone_number).await;
            }
            TransportEvent::Closed { code } => {
                handle_closed(&manager, &session, code).await;
                break;
            }
            TransportEvent::Message(msg) => {
                if let Some(transport) = session.transport() {
                    manager
                        .pipeline
                        .ingest_live(&staff_id, transport.as_ref(), &msg)
                        .await;
                }
            }
            TransportEvent::HistorySync { messages } => {
                manager.pipeline.ingest_history(&staff_id, &messages).await;
            }
            TransportEvent::ContactsUpsert(updates) => {
                manager.sync.contacts_upsert(&staff_id, &updates).await;
            }
            TransportEvent::ContactUpdate(update) => {
                manager.sync.apply_update(&staff_id, &update).await;
            }
            TransportEvent::GroupUpdate(meta) => {
                manager.sync.apply_group_update(&staff_id, &meta).await;
            }
        }
    }
    debug!(target: "Session/Events", "Event loop for {staff_id} (generation {generation}) finished");
}

async fn handle_connected(
    manager: &Arc<SessionManager>,
    session: &Arc<Session>,
    phone_number: Option<String>,
) {
    info!(target: "Session/Events", "{} connected", session.staff_id);
    session.clear_auth_artifacts();
    session.reconnect_attempts.store(0, Ordering::SeqCst);
    session.cancel_reconnect_timer();
    session.set_state(SessionState::Connected);
    if let Some(phone) = phone_number {
        session.set_phone_number(phone);
    }
    manager.persist_status(session).await;

    // Post-connect sweep runs in the background so event handling is never
    // blocked behind throttled lookups.
    if let Some(transport) = session.transport() {
        let manager = manager.clone();
        let staff_id = session.staff_id.clone();
        tokio::spawn(async move {
            manager.sync.run_all(&staff_id, transport.as_ref()).await;
        });
    }
}

async fn handle_closed(manager: &Arc<SessionManager>, session: &Arc<Session>, code: CloseCode) {
    let staff_id = &session.staff_id;
    match code {
        CloseCode::LoggedOut => {
            info!(target: "Session/Events", "{staff_id} logged out; wiping credentials");
            session.clear_auth_artifacts();
            session.cancel_reconnect_timer();
            session.reconnect_attempts.store(0, Ordering::SeqCst);
            session.set_state(SessionState::Disconnected);
            if let Err(e) = manager.creds.wipe(staff_id).await {
                warn!(target: "Session/Events", "Credential wipe failed for {staff_id}: {e}");
            }
            if let Err(e) = manager.backend.delete_session(staff_id).await {
                warn!(target: "Session/Events", "Remote session delete failed for {staff_id}: {e}");
            }
        }
        CloseCode::Replaced => {
            // Another device owns the session now; retrying would fight it.
            warn!(target: "Session/Events", "{staff_id} taken over by another device; not retrying");
            session.clear_auth_artifacts();
            session.cancel_reconnect_timer();
            session.set_state(SessionState::Disconnected);
            manager.persist_status(session).await;
        }
        CloseCode::Other(raw) => {
            warn!(target: "Session/Events", "{staff_id} closed with transient code {raw}; scheduling reconnect");
            session.clear_auth_artifacts();
            session.set_state(SessionState::Reconnecting);
            manager.persist_status(session).await;
            manager.schedule_reconnect(session);
        }
    }
}
