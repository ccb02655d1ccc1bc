use crate::store::Backend;
use crate::transport::Transport;
use crate::types::{ContactPatch, ContactUpdate, GroupMetadata};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Throttle and cap settings for the backfill passes.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub group_lookup_interval: Duration,
    pub picture_lookup_interval: Duration,
    pub picture_batch_cap: usize,
    pub name_scan_limit: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            group_lookup_interval: Duration::from_millis(300),
            picture_lookup_interval: Duration::from_millis(200),
            picture_batch_cap: 200,
            name_scan_limit: 500,
        }
    }
}

/// Feeds the contact table from every independent source, always merging and
/// never overwriting a known value with null.
pub struct ContactSync {
    backend: Arc<dyn Backend>,
    settings: SyncSettings,
}

impl ContactSync {
    pub fn new(backend: Arc<dyn Backend>, settings: SyncSettings) -> Self {
        Self { backend, settings }
    }

    /// Bulk contact snapshot fired by the transport on protocol milestones.
    pub async fn contacts_upsert(&self, staff_id: &str, updates: &[ContactUpdate]) {
        for update in updates {
            self.apply_update(staff_id, update).await;
        }
        debug!(target: "Sync/Contacts", "Applied {} bulk contact updates for {staff_id}", updates.len());
    }

    /// Incremental single-contact update event.
    pub async fn apply_update(&self, staff_id: &str, update: &ContactUpdate) {
        let patch = ContactPatch {
            name: update.name.clone(),
            notify: update.notify.clone(),
            picture_url: None,
        };
        if patch == ContactPatch::default() {
            return;
        }
        if let Err(e) = self
            .backend
            .merge_contact(staff_id, &update.jid.to_string(), &patch)
            .await
        {
            warn!(target: "Sync/Contacts", "Contact merge failed for {staff_id}/{}: {e}", update.jid);
        }
    }

    /// Group creation or metadata change; the subject is stored as the
    /// contact's display name.
    pub async fn apply_group_update(&self, staff_id: &str, meta: &GroupMetadata) {
        let patch = ContactPatch {
            name: Some(meta.subject.clone()),
            ..Default::default()
        };
        if let Err(e) = self
            .backend
            .merge_contact(staff_id, &meta.jid.to_string(), &patch)
            .await
        {
            warn!(target: "Sync/Groups", "Group merge failed for {staff_id}/{}: {e}", meta.jid);
        }
    }

    /// Deferred pass over every group jid seen in stored messages, fetching
    /// metadata at a throttled rate to respect protocol rate limits.
    pub async fn group_backfill(&self, staff_id: &str, transport: &dyn Transport) {
        let jids = match self.backend.group_chat_jids(staff_id).await {
            Ok(jids) => jids,
            Err(e) => {
                warn!(target: "Sync/Groups", "Group allowlist lookup failed for {staff_id}: {e}");
                return;
            }
        };
        if jids.is_empty() {
            return;
        }
        info!(target: "Sync/Groups", "Backfilling metadata for {} groups ({staff_id})", jids.len());
        for jid_str in jids {
            let jid = match jid_str.parse() {
                Ok(jid) => jid,
                Err(_) => continue,
            };
            match transport.group_metadata(&jid).await {
                Ok(meta) => self.apply_group_update(staff_id, &meta).await,
                Err(e) => {
                    debug!(target: "Sync/Groups", "Metadata fetch failed for {jid_str}: {e}");
                }
            }
            sleep(self.settings.group_lookup_interval).await;
        }
    }

    /// Throttled profile-picture pass, only for contacts with no picture on
    /// record, capped per run.
    pub async fn picture_backfill(&self, staff_id: &str, transport: &dyn Transport) {
        let contacts = match self
            .backend
            .contacts_missing_picture(staff_id, self.settings.picture_batch_cap)
            .await
        {
            Ok(contacts) => contacts,
            Err(e) => {
                warn!(target: "Sync/Pictures", "Missing-picture lookup failed for {staff_id}: {e}");
                return;
            }
        };
        if contacts.is_empty() {
            return;
        }
        info!(target: "Sync/Pictures", "Fetching pictures for {} contacts ({staff_id})", contacts.len());
        for contact in contacts {
            let jid = match contact.jid.parse() {
                Ok(jid) => jid,
                Err(_) => continue,
            };
            match transport.fetch_profile_picture(&jid).await {
                Ok(Some(url)) => {
                    let patch = ContactPatch {
                        picture_url: Some(url),
                        ..Default::default()
                    };
                    if let Err(e) = self
                        .backend
                        .merge_contact(staff_id, &contact.jid, &patch)
                        .await
                    {
                        warn!(target: "Sync/Pictures", "Picture merge failed for {}: {e}", contact.jid);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(target: "Sync/Pictures", "Picture fetch failed for {}: {e}", contact.jid);
                }
            }
            sleep(self.settings.picture_lookup_interval).await;
        }
    }

    /// Name-inference pass over historical messages: each inbound direct
    /// message's sender name fills a contact that has neither a name nor a
    /// notify value. Existing values are never overwritten.
    pub async fn name_backfill(&self, staff_id: &str) {
        let senders = match self
            .backend
            .recent_senders(staff_id, self.settings.name_scan_limit)
            .await
        {
            Ok(senders) => senders,
            Err(e) => {
                warn!(target: "Sync/Names", "Sender scan failed for {staff_id}: {e}");
                return;
            }
        };
        let mut filled = 0usize;
        for (jid, name) in senders {
            let vacant = match self.backend.get_contact(staff_id, &jid).await {
                Ok(contact) => contact
                    .map(|c| c.name.is_none() && c.notify.is_none())
                    .unwrap_or(true),
                Err(_) => false,
            };
            if !vacant {
                continue;
            }
            let patch = ContactPatch {
                name: Some(name),
                ..Default::default()
            };
            if self
                .backend
                .merge_contact(staff_id, &jid, &patch)
                .await
                .is_ok()
            {
                filled += 1;
            }
        }
        if filled > 0 {
            info!(target: "Sync/Names", "Name inference filled {filled} contacts for {staff_id}");
        }
    }

    /// The full post-connect sweep: group metadata, then names, then the
    /// picture backfill for anything still missing one.
    pub async fn run_all(&self, staff_id: &str, transport: &dyn Transport) {
        self.group_backfill(staff_id, transport).await;
        self.name_backfill(staff_id).await;
        self.picture_backfill(staff_id, transport).await;
    }
}
