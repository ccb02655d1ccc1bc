use super::traits::{AccountStore, ContactStore, MessageStore, Result, SessionStore, StoreError};
use crate::types::{
    AccountRecord, ContactPatch, ContactRecord, MessageRecord, SessionRecord, SessionState,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

type MessageKey = (String, String, i64);

/// In-memory backend for tests and single-node deployments without a remote
/// store configured.
#[derive(Default)]
pub struct InMemoryBackend {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    messages: Mutex<HashMap<MessageKey, MessageRecord>>,
    contacts: Mutex<HashMap<(String, String), ContactRecord>>,
    accounts: Mutex<HashMap<String, AccountRecord>>,
    /// When set, the next `upsert_messages` call fails, exercising the
    /// per-row fallback path.
    pub fail_next_bulk: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_account(&self, record: AccountRecord) {
        self.accounts
            .lock()
            .unwrap()
            .insert(record.staff_id.clone(), record);
    }

    pub fn message_count(&self, staff_id: &str) -> usize {
        self.messages
            .lock()
            .unwrap()
            .keys()
            .filter(|(id, _, _)| id == staff_id)
            .count()
    }

    pub fn messages_for(&self, staff_id: &str) -> Vec<MessageRecord> {
        let mut rows: Vec<MessageRecord> = self
            .messages
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.staff_id == staff_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        rows
    }

    fn message_key(row: &MessageRecord) -> MessageKey {
        (
            row.staff_id.clone(),
            row.chat_jid.clone(),
            row.timestamp.timestamp_millis(),
        )
    }

    fn session_entry(&self, staff_id: &str) -> SessionRecord {
        SessionRecord {
            staff_id: staff_id.to_string(),
            creds: None,
            status: SessionState::Disconnected,
            qr: None,
            pairing_code: None,
            phone_number: None,
            updated_at: Utc::now(),
        }
    }
}

#[async_trait]
impl SessionStore for InMemoryBackend {
    async fn save_creds(&self, staff_id: &str, creds: &serde_json::Value) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions
            .entry(staff_id.to_string())
            .or_insert_with(|| self.session_entry(staff_id));
        entry.creds = Some(creds.clone());
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn load_creds(&self, staff_id: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .get(staff_id)
            .and_then(|s| s.creds.clone()))
    }

    async fn update_status(
        &self,
        staff_id: &str,
        status: SessionState,
        qr: Option<&str>,
        pairing_code: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions
            .entry(staff_id.to_string())
            .or_insert_with(|| self.session_entry(staff_id));
        entry.status = status;
        entry.qr = qr.map(str::to_string);
        entry.pairing_code = pairing_code.map(str::to_string);
        if let Some(phone) = phone_number {
            entry.phone_number = Some(phone.to_string());
        }
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn get_session(&self, staff_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.lock().unwrap().get(staff_id).cloned())
    }

    async fn delete_session(&self, staff_id: &str) -> Result<()> {
        self.sessions.lock().unwrap().remove(staff_id);
        Ok(())
    }
}

#[async_trait]
impl MessageStore for InMemoryBackend {
    async fn upsert_messages(&self, rows: &[MessageRecord]) -> Result<()> {
        if self.fail_next_bulk.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Remote("bulk upsert rejected".to_string()));
        }
        let mut messages = self.messages.lock().unwrap();
        for row in rows {
            messages.insert(Self::message_key(row), row.clone());
        }
        Ok(())
    }

    async fn insert_message(&self, row: &MessageRecord) -> Result<()> {
        let mut messages = self.messages.lock().unwrap();
        let key = Self::message_key(row);
        if messages.contains_key(&key) {
            return Err(StoreError::DuplicateKey);
        }
        messages.insert(key, row.clone());
        Ok(())
    }

    async fn group_chat_jids(&self, staff_id: &str) -> Result<Vec<String>> {
        let messages = self.messages.lock().unwrap();
        let mut jids: Vec<String> = messages
            .values()
            .filter(|r| r.staff_id == staff_id && r.chat_jid.ends_with("@g.us"))
            .map(|r| r.chat_jid.clone())
            .collect();
        jids.sort();
        jids.dedup();
        Ok(jids)
    }

    async fn recent_senders(&self, staff_id: &str, limit: usize) -> Result<Vec<(String, String)>> {
        let messages = self.messages.lock().unwrap();
        let mut rows: Vec<&MessageRecord> = messages
            .values()
            .filter(|r| {
                r.staff_id == staff_id
                    && !r.from_me
                    && r.sender_name.is_some()
                    && !r.chat_jid.ends_with("@g.us")
            })
            .collect();
        rows.sort_by_key(|r| std::cmp::Reverse(r.timestamp));
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|r| (r.chat_jid.clone(), r.sender_name.clone().unwrap_or_default()))
            .collect())
    }
}

#[async_trait]
impl ContactStore for InMemoryBackend {
    async fn merge_contact(&self, staff_id: &str, jid: &str, patch: &ContactPatch) -> Result<()> {
        let mut contacts = self.contacts.lock().unwrap();
        let entry = contacts
            .entry((staff_id.to_string(), jid.to_string()))
            .or_insert_with(|| ContactRecord {
                staff_id: staff_id.to_string(),
                jid: jid.to_string(),
                name: None,
                notify: None,
                picture_url: None,
            });
        if let Some(name) = &patch.name {
            entry.name = Some(name.clone());
        }
        if let Some(notify) = &patch.notify {
            entry.notify = Some(notify.clone());
        }
        if let Some(picture) = &patch.picture_url {
            entry.picture_url = Some(picture.clone());
        }
        Ok(())
    }

    async fn get_contact(&self, staff_id: &str, jid: &str) -> Result<Option<ContactRecord>> {
        Ok(self
            .contacts
            .lock()
            .unwrap()
            .get(&(staff_id.to_string(), jid.to_string()))
            .cloned())
    }

    async fn contacts_missing_picture(
        &self,
        staff_id: &str,
        limit: usize,
    ) -> Result<Vec<ContactRecord>> {
        let contacts = self.contacts.lock().unwrap();
        let mut rows: Vec<ContactRecord> = contacts
            .values()
            .filter(|c| c.staff_id == staff_id && c.picture_url.is_none())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.jid.cmp(&b.jid));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[async_trait]
impl AccountStore for InMemoryBackend {
    async fn get_account(&self, staff_id: &str) -> Result<Option<AccountRecord>> {
        Ok(self.accounts.lock().unwrap().get(staff_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageKind;

    fn row(staff_id: &str, chat: &str, millis: i64, text: &str) -> MessageRecord {
        MessageRecord {
            staff_id: staff_id.to_string(),
            chat_jid: chat.to_string(),
            from_me: false,
            sender_name: Some("Alice".to_string()),
            text: text.to_string(),
            kind: MessageKind::Text,
            media_url: None,
            timestamp: chrono::DateTime::from_timestamp_millis(millis).unwrap(),
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_key() {
        let backend = InMemoryBackend::new();
        let r = row("s1", "1@s.whatsapp.net", 1_000, "hi");
        backend.insert_message(&r).await.unwrap();
        assert!(matches!(
            backend.insert_message(&r).await,
            Err(StoreError::DuplicateKey)
        ));
        assert_eq!(backend.message_count("s1"), 1);
    }

    #[tokio::test]
    async fn merge_keeps_existing_fields() {
        let backend = InMemoryBackend::new();
        backend
            .merge_contact(
                "s1",
                "1@s.whatsapp.net",
                &ContactPatch {
                    name: Some("Alice".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        backend
            .merge_contact(
                "s1",
                "1@s.whatsapp.net",
                &ContactPatch {
                    notify: Some("ally".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let contact = backend
            .get_contact("s1", "1@s.whatsapp.net")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(contact.name.as_deref(), Some("Alice"));
        assert_eq!(contact.notify.as_deref(), Some("ally"));
    }

    #[tokio::test]
    async fn status_update_preserves_creds() {
        let backend = InMemoryBackend::new();
        backend
            .save_creds("s1", &serde_json::json!({"noise": "key"}))
            .await
            .unwrap();
        backend
            .update_status("s1", SessionState::Connected, None, None, Some("1555"))
            .await
            .unwrap();
        let session = backend.get_session("s1").await.unwrap().unwrap();
        assert!(session.creds.is_some());
        assert_eq!(session.status, SessionState::Connected);
        assert_eq!(session.phone_number.as_deref(), Some("1555"));
    }
}
