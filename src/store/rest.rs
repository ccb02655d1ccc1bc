use super::traits::{AccountStore, ContactStore, MessageStore, Result, SessionStore, StoreError};
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::types::{
    AccountRecord, ContactPatch, ContactRecord, MessageRecord, SessionRecord, SessionState,
};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Remote store speaking a PostgREST-style REST dialect: one resource per
/// table, `?column=eq.value` filters, `Prefer: resolution=merge-duplicates`
/// upserts.
pub struct RestBackend {
    http: Arc<dyn HttpClient>,
    base_url: String,
    api_key: String,
}

impl RestBackend {
    pub fn new(http: Arc<dyn HttpClient>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, table: &str, filters: &[(&str, String)]) -> String {
        let mut url = format!("{}/{}", self.base_url, table);
        let mut sep = '?';
        for (key, value) in filters {
            url.push(sep);
            url.push_str(key);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
            sep = '&';
        }
        url
    }

    fn authed(&self, request: HttpRequest) -> HttpRequest {
        request
            .with_header("apikey", &self.api_key)
            .with_header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = request.method.clone();
        let url = request.url.clone();
        let response = self
            .http
            .execute(self.authed(request))
            .await
            .map_err(|e| StoreError::Remote(e.to_string()))?;
        debug!(target: "Store/Rest", "{method} {url} -> {}", response.status_code);
        Ok(response)
    }

    async fn expect_success(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self.execute(request).await?;
        if response.status_code == 409 {
            return Err(StoreError::DuplicateKey);
        }
        if !response.is_success() {
            return Err(StoreError::Remote(format!(
                "status {}: {}",
                response.status_code,
                response.body_string().unwrap_or_default()
            )));
        }
        Ok(response)
    }

    async fn fetch_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let response = self
            .expect_success(HttpRequest::get(self.url(table, filters)))
            .await?;
        serde_json::from_slice(&response.body).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn upsert(&self, table: &str, body: &serde_json::Value) -> Result<()> {
        let request = HttpRequest::post(self.url(table, &[]))
            .with_header("Prefer", "resolution=merge-duplicates")
            .with_json(body)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.expect_success(request).await?;
        Ok(())
    }

    fn eq(key: &'static str, value: &str) -> (&'static str, String) {
        (key, format!("eq.{value}"))
    }
}

#[async_trait]
impl SessionStore for RestBackend {
    async fn save_creds(&self, staff_id: &str, creds: &serde_json::Value) -> Result<()> {
        self.upsert(
            "wa_sessions",
            &serde_json::json!({
                "staff_id": staff_id,
                "creds": creds,
                "updated_at": Utc::now(),
            }),
        )
        .await
    }

    async fn load_creds(&self, staff_id: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.get_session(staff_id).await?.and_then(|s| s.creds))
    }

    async fn update_status(
        &self,
        staff_id: &str,
        status: SessionState,
        qr: Option<&str>,
        pairing_code: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<()> {
        let mut body = serde_json::json!({
            "staff_id": staff_id,
            "status": status,
            "qr": qr,
            "pairing_code": pairing_code,
            "updated_at": Utc::now(),
        });
        // Leaving the key out entirely preserves the stored phone number,
        // while qr/pairing_code are always written so stale values clear.
        if let Some(phone) = phone_number {
            body["phone_number"] = serde_json::Value::String(phone.to_string());
        }
        self.upsert("wa_sessions", &body).await
    }

    async fn get_session(&self, staff_id: &str) -> Result<Option<SessionRecord>> {
        let rows: Vec<SessionRecord> = self
            .fetch_rows("wa_sessions", &[Self::eq("staff_id", staff_id)])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn delete_session(&self, staff_id: &str) -> Result<()> {
        self.expect_success(HttpRequest::delete(
            self.url("wa_sessions", &[Self::eq("staff_id", staff_id)]),
        ))
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for RestBackend {
    async fn upsert_messages(&self, rows: &[MessageRecord]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_value(rows).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.upsert("wa_messages", &body).await
    }

    async fn insert_message(&self, row: &MessageRecord) -> Result<()> {
        let request = HttpRequest::post(self.url("wa_messages", &[]))
            .with_json(row)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.expect_success(request).await?;
        Ok(())
    }

    async fn group_chat_jids(&self, staff_id: &str) -> Result<Vec<String>> {
        #[derive(serde::Deserialize)]
        struct Row {
            chat_jid: String,
        }
        let rows: Vec<Row> = self
            .fetch_rows(
                "wa_messages",
                &[
                    Self::eq("staff_id", staff_id),
                    ("chat_jid", "like.*@g.us".to_string()),
                    ("select", "chat_jid".to_string()),
                ],
            )
            .await?;
        let mut jids: Vec<String> = rows.into_iter().map(|r| r.chat_jid).collect();
        jids.sort();
        jids.dedup();
        Ok(jids)
    }

    async fn recent_senders(&self, staff_id: &str, limit: usize) -> Result<Vec<(String, String)>> {
        #[derive(serde::Deserialize)]
        struct Row {
            chat_jid: String,
            sender_name: Option<String>,
        }
        let rows: Vec<Row> = self
            .fetch_rows(
                "wa_messages",
                &[
                    Self::eq("staff_id", staff_id),
                    ("from_me", "is.false".to_string()),
                    ("sender_name", "not.is.null".to_string()),
                    ("chat_jid", "not.like.*@g.us".to_string()),
                    ("select", "chat_jid,sender_name".to_string()),
                    ("order", "timestamp.desc".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.sender_name.map(|name| (r.chat_jid, name)))
            .collect())
    }
}

#[async_trait]
impl ContactStore for RestBackend {
    async fn merge_contact(&self, staff_id: &str, jid: &str, patch: &ContactPatch) -> Result<()> {
        // Read-modify-write keeps the merge-not-overwrite invariant without
        // relying on partial-column upsert support server-side.
        let existing = self.get_contact(staff_id, jid).await?;
        let merged = ContactRecord {
            staff_id: staff_id.to_string(),
            jid: jid.to_string(),
            name: patch
                .name
                .clone()
                .or_else(|| existing.as_ref().and_then(|c| c.name.clone())),
            notify: patch
                .notify
                .clone()
                .or_else(|| existing.as_ref().and_then(|c| c.notify.clone())),
            picture_url: patch
                .picture_url
                .clone()
                .or_else(|| existing.as_ref().and_then(|c| c.picture_url.clone())),
        };
        let body =
            serde_json::to_value(&merged).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.upsert("wa_contacts", &body).await
    }

    async fn get_contact(&self, staff_id: &str, jid: &str) -> Result<Option<ContactRecord>> {
        let rows: Vec<ContactRecord> = self
            .fetch_rows(
                "wa_contacts",
                &[Self::eq("staff_id", staff_id), Self::eq("jid", jid)],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn contacts_missing_picture(
        &self,
        staff_id: &str,
        limit: usize,
    ) -> Result<Vec<ContactRecord>> {
        self.fetch_rows(
            "wa_contacts",
            &[
                Self::eq("staff_id", staff_id),
                ("picture_url", "is.null".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }
}

#[async_trait]
impl AccountStore for RestBackend {
    async fn get_account(&self, staff_id: &str) -> Result<Option<AccountRecord>> {
        let rows: Vec<AccountRecord> = self
            .fetch_rows("accounts", &[Self::eq("staff_id", staff_id)])
            .await?;
        Ok(rows.into_iter().next())
    }
}
