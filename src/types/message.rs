use crate::types::jid::Jid;
use crate::types::session::SessionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broad classification of a message's payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Contact,
    Location,
    Other,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Audio => "audio",
            MessageKind::Document => "document",
            MessageKind::Sticker => "sticker",
            MessageKind::Contact => "contact",
            MessageKind::Location => "location",
            MessageKind::Other => "other",
        }
    }

    /// Bracketed placeholder used when a media message carries no caption.
    pub fn label(&self) -> Option<&'static str> {
        match self {
            MessageKind::Image => Some("[Image]"),
            MessageKind::Video => Some("[Video]"),
            MessageKind::Audio => Some("[Audio]"),
            MessageKind::Document => Some("[Document]"),
            MessageKind::Sticker => Some("[Sticker]"),
            MessageKind::Contact => Some("[Contact]"),
            MessageKind::Location => Some("[Location]"),
            MessageKind::Text | MessageKind::Other => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            MessageKind::Image => "jpg",
            MessageKind::Video => "mp4",
            MessageKind::Audio => "ogg",
            MessageKind::Sticker => "webp",
            MessageKind::Document => "pdf",
            _ => "bin",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            MessageKind::Image => "image/jpeg",
            MessageKind::Video => "video/mp4",
            MessageKind::Audio => "audio/ogg",
            MessageKind::Sticker => "image/webp",
            MessageKind::Document => "application/pdf",
            _ => "application/octet-stream",
        }
    }
}

/// Opaque locator for downloadable media; only the transport library can
/// interpret it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub handle: String,
}

/// Payload of an inbound protocol message event.
#[derive(Debug, Clone)]
pub enum MessageContent {
    Text(String),
    Media {
        kind: MessageKind,
        caption: Option<String>,
        media: Option<MediaRef>,
    },
    ContactCard,
    Location,
    Other,
}

/// One raw inbound message event as delivered by the transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub chat: Jid,
    pub from_me: bool,
    pub sender_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub content: MessageContent,
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        match &self.content {
            MessageContent::Text(_) => MessageKind::Text,
            MessageContent::Media { kind, .. } => *kind,
            MessageContent::ContactCard => MessageKind::Contact,
            MessageContent::Location => MessageKind::Location,
            MessageContent::Other => MessageKind::Other,
        }
    }

    /// Normalized text representation, or `None` when the event has nothing
    /// extractable and must be dropped.
    pub fn extract_text(&self) -> Option<String> {
        match &self.content {
            MessageContent::Text(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            MessageContent::Media { kind, caption, .. } => match caption {
                Some(c) if !c.trim().is_empty() => Some(c.trim().to_string()),
                _ => kind.label().map(str::to_string),
            },
            MessageContent::ContactCard => Some("[Contact]".to_string()),
            MessageContent::Location => Some("[Location]".to_string()),
            MessageContent::Other => None,
        }
    }

    pub fn media_ref(&self) -> Option<&MediaRef> {
        match &self.content {
            MessageContent::Media { media, .. } => media.as_ref(),
            _ => None,
        }
    }
}

/// Durable message row. The tuple (`staff_id`, `chat_jid`, `timestamp`) is
/// the natural dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub staff_id: String,
    pub chat_jid: String,
    pub from_me: bool,
    pub sender_name: Option<String>,
    pub text: String,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Durable contact row, upserted with merge semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub staff_id: String,
    pub jid: String,
    pub name: Option<String>,
    pub notify: Option<String>,
    pub picture_url: Option<String>,
}

/// Partial contact write; `None` fields leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactPatch {
    pub name: Option<String>,
    pub notify: Option<String>,
    pub picture_url: Option<String>,
}

/// Remote session record mirroring one account's connection state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub staff_id: String,
    pub creds: Option<serde_json::Value>,
    pub status: SessionState,
    pub qr: Option<String>,
    pub pairing_code: Option<String>,
    pub phone_number: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Caller account record backing the HTTP boundary's approval gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub staff_id: String,
    pub approved: bool,
    pub role: String,
}

/// Metadata for a group conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMetadata {
    pub jid: Jid,
    pub subject: String,
}

/// Incremental contact information pushed by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactUpdate {
    pub jid: Jid,
    pub name: Option<String>,
    pub notify: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with(content: MessageContent) -> InboundMessage {
        InboundMessage {
            id: "MSG1".to_string(),
            chat: "15551234567@s.whatsapp.net".parse().unwrap(),
            from_me: false,
            sender_name: Some("Alice".to_string()),
            timestamp: Utc::now(),
            content,
        }
    }

    #[test]
    fn plain_text_is_trimmed() {
        let msg = message_with(MessageContent::Text("  hello  ".to_string()));
        assert_eq!(msg.extract_text().as_deref(), Some("hello"));
        assert_eq!(msg.kind(), MessageKind::Text);
    }

    #[test]
    fn caption_wins_over_label() {
        let msg = message_with(MessageContent::Media {
            kind: MessageKind::Image,
            caption: Some("holiday".to_string()),
            media: None,
        });
        assert_eq!(msg.extract_text().as_deref(), Some("holiday"));
    }

    #[test]
    fn captionless_media_gets_bracketed_label() {
        let msg = message_with(MessageContent::Media {
            kind: MessageKind::Video,
            caption: Some("   ".to_string()),
            media: None,
        });
        assert_eq!(msg.extract_text().as_deref(), Some("[Video]"));
    }

    #[test]
    fn unextractable_events_yield_nothing() {
        assert!(message_with(MessageContent::Other).extract_text().is_none());
        assert!(
            message_with(MessageContent::Text("   ".to_string()))
                .extract_text()
                .is_none()
        );
    }

    #[test]
    fn media_type_tables() {
        assert_eq!(MessageKind::Sticker.extension(), "webp");
        assert_eq!(MessageKind::Audio.mime_type(), "audio/ogg");
        assert_eq!(MessageKind::Other.extension(), "bin");
    }
}
