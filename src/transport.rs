use crate::types::{ContactUpdate, GroupMetadata, InboundMessage, Jid, MediaRef};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Reason attached to a connection-close event.
///
/// The concrete numeric close codes belong to the transport library; an
/// adapter maps its library's disconnect reasons onto this enum (for the
/// reference protocol, 401 is a logout and 440 a connection takeover).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Explicit logout; credentials are no longer valid.
    LoggedOut,
    /// Another device took over the session; retrying would fight the owner.
    Replaced,
    /// Anything else, treated as transient.
    Other(u16),
}

/// Lifecycle and content events emitted by one transport instance, delivered
/// in arrival order for the owning account.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A fresh QR payload to display for out-of-band authentication.
    Qr { code: String },
    /// Authenticated and online.
    Connected { phone_number: Option<String> },
    /// The connection ended; `code` drives retry classification.
    Closed { code: CloseCode },
    /// Updated credential material that must be persisted.
    CredsUpdate(serde_json::Value),
    Message(Box<InboundMessage>),
    /// One-time bulk delivery of past messages after authentication.
    HistorySync { messages: Vec<InboundMessage> },
    /// Bulk contact snapshot fired on protocol milestones.
    ContactsUpsert(Vec<ContactUpdate>),
    ContactUpdate(ContactUpdate),
    /// Group created or its metadata changed.
    GroupUpdate(GroupMetadata),
}

/// One live connection to the external network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, to: &Jid, text: &str) -> Result<(), TransportError>;

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, TransportError>;

    /// Resolves a contact's profile picture URL, if one is set.
    async fn fetch_profile_picture(&self, jid: &Jid) -> Result<Option<String>, TransportError>;

    async fn group_metadata(&self, jid: &Jid) -> Result<GroupMetadata, TransportError>;

    async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>, TransportError>;

    /// Whether the underlying socket is actually open right now.
    fn is_open(&self) -> bool;

    async fn disconnect(&self);
}

/// Constructs transport instances bound to an account's credential blob.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create_transport(
        &self,
        creds: serde_json::Value,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

/// Scriptable in-process transport, used by the integration tests and by the
/// binary's loopback mode. Events are injected through the handle returned by
/// the factory.
pub mod scripted {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    pub struct ScriptedTransport {
        open: AtomicBool,
        pub sent: Mutex<Vec<(Jid, String)>>,
        pub pairing_code: String,
        pub pictures: Mutex<HashMap<String, String>>,
        pub groups: Mutex<HashMap<String, String>>,
        pub media: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl ScriptedTransport {
        fn new() -> Self {
            Self {
                open: AtomicBool::new(true),
                sent: Mutex::new(Vec::new()),
                pairing_code: "ABCD-1234".to_string(),
                pictures: Mutex::new(HashMap::new()),
                groups: Mutex::new(HashMap::new()),
                media: Mutex::new(HashMap::new()),
            }
        }

        /// Simulates the socket dying without a close event being emitted.
        pub fn kill_silently(&self) {
            self.open.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send_text(&self, to: &Jid, text: &str) -> Result<(), TransportError> {
            if !self.is_open() {
                return Err(TransportError::NotConnected);
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.clone(), text.to_string()));
            Ok(())
        }

        async fn request_pairing_code(
            &self,
            _phone_number: &str,
        ) -> Result<String, TransportError> {
            if !self.is_open() {
                return Err(TransportError::NotConnected);
            }
            Ok(self.pairing_code.clone())
        }

        async fn fetch_profile_picture(
            &self,
            jid: &Jid,
        ) -> Result<Option<String>, TransportError> {
            Ok(self.pictures.lock().unwrap().get(&jid.to_string()).cloned())
        }

        async fn group_metadata(&self, jid: &Jid) -> Result<GroupMetadata, TransportError> {
            let subject = self
                .groups
                .lock()
                .unwrap()
                .get(&jid.to_string())
                .cloned()
                .ok_or_else(|| TransportError::Protocol(format!("unknown group {jid}")))?;
            Ok(GroupMetadata {
                jid: jid.clone(),
                subject,
            })
        }

        async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>, TransportError> {
            self.media
                .lock()
                .unwrap()
                .get(&media.handle)
                .cloned()
                .ok_or_else(|| TransportError::Protocol(format!("no media for {}", media.handle)))
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn disconnect(&self) {
            self.open.store(false, Ordering::SeqCst);
        }
    }

    /// Handle to one created transport, kept by the factory so a test can
    /// drive events into the session's inbox.
    pub struct ScriptedHandle {
        pub transport: Arc<ScriptedTransport>,
        pub events: mpsc::Sender<TransportEvent>,
        pub creds: serde_json::Value,
    }

    #[derive(Default)]
    pub struct ScriptedTransportFactory {
        pub created: Mutex<Vec<Arc<ScriptedHandle>>>,
        pub create_count: AtomicUsize,
        pub fail_next: AtomicBool,
        pub fail_all: AtomicBool,
        gate: Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
        parked: AtomicBool,
    }

    impl ScriptedTransportFactory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn create_count(&self) -> usize {
            self.create_count.load(Ordering::SeqCst)
        }

        /// Parks the next construction until the returned sender fires.
        pub fn hold_next(&self) -> tokio::sync::oneshot::Sender<()> {
            let (tx, rx) = tokio::sync::oneshot::channel();
            *self.gate.lock().unwrap() = Some(rx);
            tx
        }

        /// Whether a construction is currently parked on the gate.
        pub fn is_parked(&self) -> bool {
            self.parked.load(Ordering::SeqCst)
        }

        /// Handle for the most recently constructed transport.
        pub fn last(&self) -> Arc<ScriptedHandle> {
            self.created
                .lock()
                .unwrap()
                .last()
                .cloned()
                .expect("no transport created yet")
        }
    }

    #[async_trait]
    impl TransportFactory for ScriptedTransportFactory {
        async fn create_transport(
            &self,
            creds: serde_json::Value,
        ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
            let gate = self.gate.lock().unwrap().take();
            if let Some(rx) = gate {
                self.parked.store(true, Ordering::SeqCst);
                let _ = rx.await;
                self.parked.store(false, Ordering::SeqCst);
            }
            if self.fail_all.load(Ordering::SeqCst) || self.fail_next.swap(false, Ordering::SeqCst)
            {
                anyhow::bail!("scripted transport construction failure");
            }
            self.create_count.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(64);
            let transport = Arc::new(ScriptedTransport::new());
            self.created.lock().unwrap().push(Arc::new(ScriptedHandle {
                transport: transport.clone(),
                events: tx,
                creds,
            }));
            Ok((transport, rx))
        }
    }
}
