use crate::store::{Backend, StoreError};
use log::{info, warn};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;

/// Per-account authentication material, kept as one directory per account on
/// local disk with a mirrored copy in the remote session record. The local
/// directory's presence at startup is the signal to auto-resume a session.
pub struct CredentialStore {
    root: PathBuf,
    backend: Arc<dyn Backend>,
}

impl CredentialStore {
    pub fn new(root: impl Into<PathBuf>, backend: Arc<dyn Backend>) -> Self {
        Self {
            root: root.into(),
            backend,
        }
    }

    fn sanitize(staff_id: &str) -> String {
        staff_id.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-', "_")
    }

    fn dir(&self, staff_id: &str) -> PathBuf {
        self.root.join(Self::sanitize(staff_id))
    }

    fn creds_path(&self, staff_id: &str) -> PathBuf {
        self.dir(staff_id).join("creds.json")
    }

    pub async fn has_local(&self, staff_id: &str) -> bool {
        fs::try_exists(self.creds_path(staff_id))
            .await
            .unwrap_or(false)
    }

    /// Loads credentials for an account, preferring local disk, then the
    /// remote mirror (rehydrating the local copy), and finally a fresh empty
    /// blob for the transport library to populate.
    pub async fn load_or_create(&self, staff_id: &str) -> Result<serde_json::Value, StoreError> {
        match fs::read(self.creds_path(staff_id)).await {
            Ok(data) => {
                return serde_json::from_slice(&data)
                    .map_err(|e| StoreError::Serialization(e.to_string()));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Io(e)),
        }

        if let Some(remote) = self.backend.load_creds(staff_id).await? {
            info!(target: "Creds", "Restoring credentials for {staff_id} from remote mirror");
            self.write_local(staff_id, &remote).await?;
            return Ok(remote);
        }

        Ok(serde_json::json!({}))
    }

    /// Persists updated credentials locally and mirrors them to the remote
    /// store. The mirror write is best-effort; local disk is authoritative.
    pub async fn save(&self, staff_id: &str, creds: &serde_json::Value) -> Result<(), StoreError> {
        self.write_local(staff_id, creds).await?;
        if let Err(e) = self.backend.save_creds(staff_id, creds).await {
            warn!(target: "Creds", "Failed to mirror credentials for {staff_id}: {e}");
        }
        Ok(())
    }

    async fn write_local(&self, staff_id: &str, creds: &serde_json::Value) -> Result<(), StoreError> {
        let dir = self.dir(staff_id);
        fs::create_dir_all(&dir).await?;
        let data = serde_json::to_vec_pretty(creds)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        fs::write(self.creds_path(staff_id), data).await?;
        // The directory name is sanitized; the marker carries the exact id
        // back through auto-resume.
        fs::write(dir.join("account"), staff_id)
            .await
            .map_err(StoreError::Io)
    }

    /// Removes the account's credential directory. Idempotent.
    pub async fn wipe(&self, staff_id: &str) -> Result<(), StoreError> {
        match fs::remove_dir_all(self.dir(staff_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Accounts with an on-disk credential directory, used for startup
    /// auto-resume.
    pub async fn local_accounts(&self) -> Vec<String> {
        let mut accounts = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(_) => return accounts,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !fs::try_exists(path.join("creds.json")).await.unwrap_or(false) {
                continue;
            }
            match fs::read_to_string(path.join("account")).await {
                Ok(staff_id) => accounts.push(staff_id),
                // No marker: the directory predates it, use its name.
                Err(_) => {
                    if let Some(name) = entry.file_name().to_str() {
                        accounts.push(name.to_string());
                    }
                }
            }
        }
        accounts.sort();
        accounts
    }
}
