use super::{Session, SessionManager};
use crate::types::SessionState;
use log::{debug, warn};
use std::sync::Arc;
use tokio::task::JoinHandle;

impl SessionManager {
    /// Spawns the periodic sweep that catches connections which died without
    /// the transport surfacing a close event.
    pub fn spawn_health_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(manager.health_interval) => {
                        manager.sweep_dead_connections().await;
                    }
                    _ = manager.shutdown.notified() => {
                        debug!(target: "Session/Health", "Shutdown signaled, exiting health monitor");
                        return;
                    }
                }
            }
        })
    }

    /// One pass over every account believed `Connected`: a closed socket
    /// with no disconnect event gets pushed onto the normal reconnect path.
    pub async fn sweep_dead_connections(self: &Arc<Self>) {
        let sessions: Vec<Arc<Session>> = self.session_snapshot();
        for session in sessions {
            if session.state() != SessionState::Connected {
                continue;
            }
            let open = session
                .transport()
                .map(|t| t.is_open())
                .unwrap_or(false);
            if open {
                continue;
            }
            warn!(
                target: "Session/Health",
                "Connection for {} is silently dead, forcing reconnect",
                session.staff_id
            );
            session.clear_auth_artifacts();
            session.set_state(SessionState::Reconnecting);
            self.persist_status(&session).await;
            self.schedule_reconnect(&session);
        }
    }
}
