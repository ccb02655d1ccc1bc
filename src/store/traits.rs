use crate::types::{
    AccountRecord, ContactPatch, ContactRecord, MessageRecord, SessionRecord, SessionState,
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("remote store error: {0}")]
    Remote(String),
    #[error("duplicate key")]
    DuplicateKey,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Remote session records: one row per account, upserted field-by-field so a
/// status update never clobbers the credential blob.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_creds(&self, staff_id: &str, creds: &serde_json::Value) -> Result<()>;

    async fn load_creds(&self, staff_id: &str) -> Result<Option<serde_json::Value>>;

    async fn update_status(
        &self,
        staff_id: &str,
        status: SessionState,
        qr: Option<&str>,
        pairing_code: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<()>;

    async fn get_session(&self, staff_id: &str) -> Result<Option<SessionRecord>>;

    async fn delete_session(&self, staff_id: &str) -> Result<()>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Bulk idempotent write keyed on (`staff_id`, `chat_jid`, `timestamp`).
    async fn upsert_messages(&self, rows: &[MessageRecord]) -> Result<()>;

    /// Single-row insert; `StoreError::DuplicateKey` on a dedup-key conflict.
    async fn insert_message(&self, row: &MessageRecord) -> Result<()>;

    /// Distinct group chat jids ever seen in this account's messages.
    async fn group_chat_jids(&self, staff_id: &str) -> Result<Vec<String>>;

    /// Recent (`chat_jid`, `sender_name`) pairs from inbound direct messages,
    /// newest first, for the name-inference backfill.
    async fn recent_senders(&self, staff_id: &str, limit: usize) -> Result<Vec<(String, String)>>;
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Merge-upsert keyed on (`staff_id`, `jid`). `None` patch fields must
    /// never blank out a previously stored value.
    async fn merge_contact(&self, staff_id: &str, jid: &str, patch: &ContactPatch) -> Result<()>;

    async fn get_contact(&self, staff_id: &str, jid: &str) -> Result<Option<ContactRecord>>;

    async fn contacts_missing_picture(
        &self,
        staff_id: &str,
        limit: usize,
    ) -> Result<Vec<ContactRecord>>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, staff_id: &str) -> Result<Option<AccountRecord>>;
}

/// Everything the daemon needs from the remote store.
pub trait Backend: SessionStore + MessageStore + ContactStore + AccountStore {}

impl<T> Backend for T where T: SessionStore + MessageStore + ContactStore + AccountStore {}
