use super::{Session, SessionManager};
use crate::types::SessionState;
use log::{info, warn};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Bounded exponential backoff policy for transient connection failures.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub growth_factor: f64,
    pub cap_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(3000),
            growth_factor: 1.5,
            cap_delay: Duration::from_millis(60_000),
            max_attempts: 15,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * growth^attempt, cap)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = self.base_delay.as_millis() as f64 * self.growth_factor.powi(attempt as i32);
        let capped = raw.min(self.cap_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl SessionManager {
    /// Schedules the next reconnect attempt for a session, or gives up once
    /// the attempt ceiling is reached. The stored counter is incremented
    /// when the timer fires, before `initialize` runs.
    pub(crate) fn schedule_reconnect(self: &Arc<Self>, session: &Arc<Session>) {
        let attempt = session.reconnect_attempts.load(Ordering::SeqCst);
        if attempt >= self.reconnect.max_attempts {
            warn!(
                target: "Session/Reconnect",
                "Giving up on {} after {attempt} attempts",
                session.staff_id
            );
            // Reset so a future manual reconnect starts fresh.
            session.reconnect_attempts.store(0, Ordering::SeqCst);
            session.set_state(SessionState::Disconnected);
            let manager = self.clone();
            let session = session.clone();
            tokio::spawn(async move {
                manager.persist_status(&session).await;
            });
            return;
        }

        let delay = self.reconnect.delay(attempt);
        info!(
            target: "Session/Reconnect",
            "Reconnecting {} in {}ms (attempt {})",
            session.staff_id,
            delay.as_millis(),
            attempt + 1
        );

        let manager = self.clone();
        let session_for_task = session.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The timer has fired; clear the slot so initialize's cancel
            // pass cannot abort the attempt now running.
            drop(session_for_task.reconnect_timer.lock().unwrap().take());
            session_for_task
                .reconnect_attempts
                .fetch_add(1, Ordering::SeqCst);
            match manager.initialize(&session_for_task.staff_id).await {
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        target: "Session/Reconnect",
                        "Reconnect of {} failed: {e:?}",
                        session_for_task.staff_id
                    );
                    manager.schedule_reconnect(&session_for_task);
                }
            }
        });
        session.set_reconnect_timer(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_monotonic_and_bounded() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(3000));
        assert_eq!(policy.delay(1), Duration::from_millis(4500));
        // 3000 * 1.5^5 = 22781.25
        assert_eq!(policy.delay(5), Duration::from_millis(22781));
        assert_eq!(policy.delay(20), Duration::from_millis(60_000));
        let mut prev = Duration::ZERO;
        for attempt in 0..30 {
            let d = policy.delay(attempt);
            assert!(d >= prev, "delay must be non-decreasing");
            assert!(d <= policy.cap_delay);
            prev = d;
        }
    }
}
