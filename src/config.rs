use crate::session::ReconnectPolicy;
use crate::sync::SyncSettings;
use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP boundary binds to.
    pub bind: String,
    /// HMAC secret for bearer-token verification.
    pub auth_secret: String,
    /// Roles allowed through the boundary after the approval check.
    pub allowed_roles: Vec<String>,
    /// Root directory holding one credential directory per account.
    pub credentials_dir: PathBuf,
    pub store: StoreConfig,
    pub object_store: ObjectStoreConfig,
    pub reconnect: ReconnectConfig,
    pub health_interval_secs: u64,
    /// History replay retention window.
    pub retention_days: i64,
    pub ingest_batch_size: usize,
    pub group_lookup_interval_ms: u64,
    pub picture_lookup_interval_ms: u64,
    pub picture_batch_cap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            auth_secret: String::new(),
            allowed_roles: vec!["admin".to_string(), "superadmin".to_string()],
            credentials_dir: PathBuf::from("wa-credentials"),
            store: StoreConfig::Memory,
            object_store: ObjectStoreConfig::Memory,
            reconnect: ReconnectConfig::default(),
            health_interval_secs: 30,
            retention_days: 90,
            ingest_batch_size: 100,
            group_lookup_interval_ms: 300,
            picture_lookup_interval_ms: 200,
            picture_batch_cap: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-process store; state is lost on restart apart from credentials.
    Memory,
    Rest { base_url: String, api_key: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    Memory,
    Http {
        base_url: String,
        public_base_url: String,
        api_key: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub growth_factor: f64,
    pub cap_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 3000,
            growth_factor: 1.5,
            cap_delay_ms: 60_000,
            max_attempts: 15,
        }
    }
}

impl Config {
    /// Loads config from a JSON file, falling back to defaults when no path
    /// is given. `WA_SESSIOND_AUTH_SECRET` overrides the file's secret.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let data = std::fs::read(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_json::from_slice(&data)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Self::default(),
        };
        if let Ok(secret) = std::env::var("WA_SESSIOND_AUTH_SECRET") {
            config.auth_secret = secret;
        }
        Ok(config)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
            growth_factor: self.reconnect.growth_factor,
            cap_delay: Duration::from_millis(self.reconnect.cap_delay_ms),
            max_attempts: self.reconnect.max_attempts,
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            group_lookup_interval: Duration::from_millis(self.group_lookup_interval_ms),
            picture_lookup_interval: Duration::from_millis(self.picture_lookup_interval_ms),
            picture_batch_cap: self.picture_batch_cap,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy_constants() {
        let config = Config::default();
        let policy = config.reconnect_policy();
        assert_eq!(policy.base_delay, Duration::from_millis(3000));
        assert_eq!(policy.cap_delay, Duration::from_millis(60_000));
        assert_eq!(policy.max_attempts, 15);
        assert!(matches!(config.store, StoreConfig::Memory));
    }

    #[test]
    fn parses_partial_json() {
        let config: Config = serde_json::from_str(
            r#"{
                "bind": "0.0.0.0:9000",
                "store": { "kind": "rest", "base_url": "https://db.example.com/rest/v1", "api_key": "k" },
                "reconnect": { "max_attempts": 5 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.base_delay_ms, 3000);
        assert!(matches!(config.store, StoreConfig::Rest { .. }));
    }
}
