use crate::http::{HttpClient, HttpRequest};
use crate::transport::Transport;
use crate::types::{MediaRef, MessageKind};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use log::warn;
use std::sync::Arc;

/// Remote object store for message attachments.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `data` at `path` and returns a publicly resolvable URL.
    async fn put(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<String>;
}

/// Object store speaking plain `PUT {base}/{path}` with bearer auth; public
/// URLs are served from a separate read-only base.
pub struct HttpObjectStore {
    http: Arc<dyn HttpClient>,
    base_url: String,
    public_base_url: String,
    api_key: String,
}

impl HttpObjectStore {
    pub fn new(
        http: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        public_base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<String> {
        let request = HttpRequest::put(format!("{}/{}", self.base_url, path))
            .with_header("Authorization", format!("Bearer {}", self.api_key))
            .with_header("Content-Type", content_type)
            .with_body(data);
        let response = self.http.execute(request).await?;
        if !response.is_success() {
            return Err(anyhow!(
                "object store upload failed with status {}",
                response.status_code
            ));
        }
        Ok(format!("{}/{}", self.public_base_url, path))
    }
}

/// In-process object store for tests and loopback runs.
#[derive(Default)]
pub struct InMemoryObjectStore {
    pub objects: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, path: &str, data: Vec<u8>, _content_type: &str) -> Result<String> {
        if data.is_empty() {
            return Err(anyhow!("refusing to store empty object at {path}"));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), data);
        Ok(format!("memory://{path}"))
    }
}

/// Moves an attachment from the transport into the object store. Every
/// failure is logged and collapses to `None`; a missing attachment must never
/// block persisting the message itself.
pub struct MediaTransfer {
    store: Arc<dyn ObjectStore>,
}

impl MediaTransfer {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn stage(
        &self,
        transport: &dyn Transport,
        staff_id: &str,
        message_id: &str,
        kind: MessageKind,
        media: &MediaRef,
    ) -> Option<String> {
        let data = match transport.download_media(media).await {
            Ok(data) => data,
            Err(e) => {
                warn!(target: "Media", "Download failed for {staff_id}/{message_id}: {e}");
                return None;
            }
        };
        if data.is_empty() {
            warn!(target: "Media", "Empty media buffer for {staff_id}/{message_id}, skipping upload");
            return None;
        }
        let path = format!("media/{staff_id}/{message_id}.{}", kind.extension());
        match self.store.put(&path, data, kind.mime_type()).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(target: "Media", "Upload failed for {path}: {e:?}");
                None
            }
        }
    }
}
