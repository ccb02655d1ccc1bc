use crate::media::MediaTransfer;
use crate::store::{Backend, StoreError};
use crate::transport::Transport;
use crate::types::{ContactPatch, InboundMessage, MessageRecord};
use chrono::{Duration, Utc};
use log::{debug, info, warn};
use std::sync::Arc;

/// Converts raw inbound protocol events into durable message rows, exactly
/// once per logical event.
pub struct IngestionPipeline {
    backend: Arc<dyn Backend>,
    media: Arc<MediaTransfer>,
    retention_days: i64,
    batch_size: usize,
}

impl IngestionPipeline {
    pub fn new(
        backend: Arc<dyn Backend>,
        media: Arc<MediaTransfer>,
        retention_days: i64,
        batch_size: usize,
    ) -> Self {
        Self {
            backend,
            media,
            retention_days,
            batch_size,
        }
    }

    fn build_record(
        staff_id: &str,
        msg: &InboundMessage,
        media_url: Option<String>,
    ) -> Option<MessageRecord> {
        let text = msg.extract_text()?;
        Some(MessageRecord {
            staff_id: staff_id.to_string(),
            chat_jid: msg.chat.to_string(),
            from_me: msg.from_me,
            sender_name: msg.sender_name.clone(),
            text,
            kind: msg.kind(),
            media_url,
            timestamp: msg.timestamp,
        })
    }

    /// Handles one live message event: media hand-off, normalization, an
    /// idempotent write, and sender-name inference for direct chats.
    pub async fn ingest_live(
        &self,
        staff_id: &str,
        transport: &dyn Transport,
        msg: &InboundMessage,
    ) {
        let media_url = match msg.media_ref() {
            Some(media) => {
                self.media
                    .stage(transport, staff_id, &msg.id, msg.kind(), media)
                    .await
            }
            None => None,
        };

        let Some(record) = Self::build_record(staff_id, msg, media_url) else {
            debug!(target: "Ingest", "Dropping event {} with no extractable text", msg.id);
            return;
        };
        self.write_batch(staff_id, &[record]).await;

        if !msg.from_me && !msg.chat.is_group() {
            if let Some(name) = msg.sender_name.as_deref() {
                self.fill_name_if_missing(staff_id, &msg.chat.to_string(), name)
                    .await;
            }
        }
    }

    /// Handles a bulk history replay: retention window, fixed-size batches,
    /// and the same per-row fallback as live writes.
    pub async fn ingest_history(&self, staff_id: &str, messages: &[InboundMessage]) {
        let cutoff = Utc::now() - Duration::days(self.retention_days);
        let rows: Vec<MessageRecord> = messages
            .iter()
            .filter(|m| m.timestamp >= cutoff)
            .filter_map(|m| Self::build_record(staff_id, m, None))
            .collect();
        if rows.is_empty() {
            return;
        }
        info!(
            target: "Ingest",
            "History replay for {staff_id}: {} of {} events within retention",
            rows.len(),
            messages.len()
        );
        for chunk in rows.chunks(self.batch_size) {
            self.write_batch(staff_id, chunk).await;
        }
    }

    /// Bulk upsert with a per-row fallback so one bad row cannot block the
    /// rest of a batch. Duplicate-key conflicts are expected on redelivery
    /// and ignored.
    async fn write_batch(&self, staff_id: &str, rows: &[MessageRecord]) {
        match self.backend.upsert_messages(rows).await {
            Ok(()) => {}
            Err(e) => {
                warn!(
                    target: "Ingest",
                    "Bulk upsert of {} rows failed for {staff_id}: {e}; retrying row-by-row",
                    rows.len()
                );
                for row in rows {
                    match self.backend.insert_message(row).await {
                        Ok(()) | Err(StoreError::DuplicateKey) => {}
                        Err(e) => {
                            warn!(
                                target: "Ingest",
                                "Dropping row ({staff_id}, {}, {}): {e}",
                                row.chat_jid, row.timestamp
                            );
                        }
                    }
                }
            }
        }
    }

    /// Fills a contact's name from a message sender only when the contact has
    /// neither a name nor a notify value on record.
    async fn fill_name_if_missing(&self, staff_id: &str, jid: &str, name: &str) {
        let existing = match self.backend.get_contact(staff_id, jid).await {
            Ok(contact) => contact,
            Err(e) => {
                warn!(target: "Ingest", "Contact lookup failed for {staff_id}/{jid}: {e}");
                return;
            }
        };
        let vacant = existing
            .map(|c| c.name.is_none() && c.notify.is_none())
            .unwrap_or(true);
        if !vacant {
            return;
        }
        let patch = ContactPatch {
            name: Some(name.to_string()),
            ..Default::default()
        };
        if let Err(e) = self.backend.merge_contact(staff_id, jid, &patch).await {
            warn!(target: "Ingest", "Name inference write failed for {staff_id}/{jid}: {e}");
        }
    }
}
