use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";
pub const BROADCAST_SERVER: &str = "broadcast";

#[derive(Debug, Error)]
pub enum JidError {
    #[error("empty user part in jid '{0}'")]
    EmptyUser(String),
    #[error("empty server part in jid '{0}'")]
    EmptyServer(String),
}

/// Address of a contact or group on the external network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jid {
    pub user: String,
    pub server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
        }
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    pub fn is_broadcast(&self) -> bool {
        self.server == BROADCAST_SERVER
    }

    /// Normalizes a recipient identifier to the protocol's addressing form.
    ///
    /// Accepts either a full jid (`1234@s.whatsapp.net`, `...@g.us`) or a bare
    /// phone number with optional `+`, spaces, or dashes, which becomes a user
    /// jid on the default server.
    pub fn normalize(input: &str) -> Result<Self, JidError> {
        let trimmed = input.trim();
        if trimmed.contains('@') {
            return trimmed.parse();
        }
        let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(JidError::EmptyUser(input.to_string()));
        }
        Ok(Self::new(digits, DEFAULT_USER_SERVER))
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((user, server)) => {
                if user.is_empty() {
                    Err(JidError::EmptyUser(s.to_string()))
                } else if server.is_empty() {
                    Err(JidError::EmptyServer(s.to_string()))
                } else {
                    Ok(Self::new(user, server))
                }
            }
            None => Err(JidError::EmptyServer(s.to_string())),
        }
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_bare_number() {
        let jid = Jid::normalize("+1 555-123-4567").unwrap();
        assert_eq!(jid.to_string(), "15551234567@s.whatsapp.net");
        assert!(!jid.is_group());
    }

    #[test]
    fn normalize_passes_through_full_jid() {
        let jid = Jid::normalize("120363021033254949@g.us").unwrap();
        assert_eq!(jid.user, "120363021033254949");
        assert!(jid.is_group());
    }

    #[test]
    fn normalize_rejects_garbage() {
        assert!(Jid::normalize("   ").is_err());
        assert!("@g.us".parse::<Jid>().is_err());
        assert!("1234@".parse::<Jid>().is_err());
    }
}
