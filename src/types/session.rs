use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one account's connection.
///
/// `Disconnected` is both the initial and the terminal state; `QrReady` and
/// `Pairing` are the two out-of-band authentication states and are the only
/// states in which a QR payload or pairing code may be exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    QrReady,
    Pairing,
    Connected,
    Reconnecting,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::QrReady => "qr_ready",
            SessionState::Pairing => "pairing",
            SessionState::Connected => "connected",
            SessionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
