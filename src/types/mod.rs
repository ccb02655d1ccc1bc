pub mod jid;
pub mod message;
pub mod session;

pub use jid::Jid;
pub use message::{
    AccountRecord, ContactPatch, ContactRecord, ContactUpdate, GroupMetadata, InboundMessage,
    MediaRef, MessageContent, MessageKind, MessageRecord, SessionRecord,
};
pub use session::SessionState;
