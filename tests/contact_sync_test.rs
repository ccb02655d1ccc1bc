use chrono::Utc;
use std::sync::Arc;
use whatsapp_sessiond::store::{ContactStore, InMemoryBackend, MessageStore};
use whatsapp_sessiond::sync::{ContactSync, SyncSettings};
use whatsapp_sessiond::transport::scripted::ScriptedTransportFactory;
use whatsapp_sessiond::transport::{Transport, TransportFactory};
use whatsapp_sessiond::types::{
    ContactPatch, ContactUpdate, GroupMetadata, MessageKind, MessageRecord,
};

fn fast_settings() -> SyncSettings {
    SyncSettings {
        group_lookup_interval: std::time::Duration::from_millis(1),
        picture_lookup_interval: std::time::Duration::from_millis(1),
        picture_batch_cap: 200,
        name_scan_limit: 500,
    }
}

async fn scripted_transport(
    factory: &ScriptedTransportFactory,
) -> Arc<dyn Transport> {
    let (transport, _rx) = factory
        .create_transport(serde_json::json!({}))
        .await
        .unwrap();
    transport
}

fn message_row(staff_id: &str, chat_jid: &str, sender_name: Option<&str>) -> MessageRecord {
    MessageRecord {
        staff_id: staff_id.to_string(),
        chat_jid: chat_jid.to_string(),
        from_me: false,
        sender_name: sender_name.map(str::to_string),
        text: "hello".to_string(),
        kind: MessageKind::Text,
        media_url: None,
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn merge_never_blanks_a_stored_value() {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = Arc::new(InMemoryBackend::new());
    let sync = ContactSync::new(backend.clone(), fast_settings());

    sync.apply_update(
        "staff-1",
        &ContactUpdate {
            jid: "15550001111@s.whatsapp.net".parse().unwrap(),
            name: Some("Alice".to_string()),
            notify: Some("alice".to_string()),
        },
    )
    .await;

    // A later update that only carries notify must leave the name alone.
    sync.apply_update(
        "staff-1",
        &ContactUpdate {
            jid: "15550001111@s.whatsapp.net".parse().unwrap(),
            name: None,
            notify: Some("alice-2".to_string()),
        },
    )
    .await;

    let contact = backend
        .get_contact("staff-1", "15550001111@s.whatsapp.net")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(contact.name.as_deref(), Some("Alice"));
    assert_eq!(contact.notify.as_deref(), Some("alice-2"));
}

#[tokio::test]
async fn all_none_update_is_a_no_op() {
    let backend = Arc::new(InMemoryBackend::new());
    let sync = ContactSync::new(backend.clone(), fast_settings());

    sync.apply_update(
        "staff-1",
        &ContactUpdate {
            jid: "15550001111@s.whatsapp.net".parse().unwrap(),
            name: None,
            notify: None,
        },
    )
    .await;
    assert!(
        backend
            .get_contact("staff-1", "15550001111@s.whatsapp.net")
            .await
            .unwrap()
            .is_none(),
        "an empty patch must not create a row"
    );
}

#[tokio::test]
async fn group_update_stores_subject_as_name() {
    let backend = Arc::new(InMemoryBackend::new());
    let sync = ContactSync::new(backend.clone(), fast_settings());

    sync.apply_group_update(
        "staff-1",
        &GroupMetadata {
            jid: "12036300000000@g.us".parse().unwrap(),
            subject: "Night Shift".to_string(),
        },
    )
    .await;

    let contact = backend
        .get_contact("staff-1", "12036300000000@g.us")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(contact.name.as_deref(), Some("Night Shift"));
}

#[tokio::test(start_paused = true)]
async fn group_backfill_covers_every_group_seen_in_messages() {
    let backend = Arc::new(InMemoryBackend::new());
    let sync = ContactSync::new(backend.clone(), fast_settings());
    let factory = ScriptedTransportFactory::new();
    let transport = scripted_transport(&factory).await;

    backend
        .upsert_messages(&[
            message_row("staff-1", "12036300000001@g.us", None),
            message_row("staff-1", "12036300000002@g.us", None),
            message_row("staff-1", "15550001111@s.whatsapp.net", Some("Alice")),
        ])
        .await
        .unwrap();
    {
        let handle = factory.last();
        let mut groups = handle.transport.groups.lock().unwrap();
        groups.insert("12036300000001@g.us".to_string(), "Dispatch".to_string());
        groups.insert("12036300000002@g.us".to_string(), "Returns".to_string());
    }

    sync.group_backfill("staff-1", transport.as_ref()).await;

    let first = backend
        .get_contact("staff-1", "12036300000001@g.us")
        .await
        .unwrap()
        .unwrap();
    let second = backend
        .get_contact("staff-1", "12036300000002@g.us")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.name.as_deref(), Some("Dispatch"));
    assert_eq!(second.name.as_deref(), Some("Returns"));
    assert!(
        backend
            .get_contact("staff-1", "15550001111@s.whatsapp.net")
            .await
            .unwrap()
            .is_none(),
        "direct chats are not group-backfilled"
    );
}

#[tokio::test(start_paused = true)]
async fn picture_backfill_fills_only_missing_pictures() {
    let backend = Arc::new(InMemoryBackend::new());
    let sync = ContactSync::new(backend.clone(), fast_settings());
    let factory = ScriptedTransportFactory::new();
    let transport = scripted_transport(&factory).await;

    backend
        .merge_contact(
            "staff-1",
            "15550001111@s.whatsapp.net",
            &ContactPatch {
                name: Some("Alice".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    backend
        .merge_contact(
            "staff-1",
            "15550002222@s.whatsapp.net",
            &ContactPatch {
                name: Some("Bob".to_string()),
                picture_url: Some("https://cdn.example/bob.jpg".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    {
        let handle = factory.last();
        let mut pictures = handle.transport.pictures.lock().unwrap();
        pictures.insert(
            "15550001111@s.whatsapp.net".to_string(),
            "https://cdn.example/alice.jpg".to_string(),
        );
        pictures.insert(
            "15550002222@s.whatsapp.net".to_string(),
            "https://cdn.example/bob-v2.jpg".to_string(),
        );
    }

    sync.picture_backfill("staff-1", transport.as_ref()).await;

    let alice = backend
        .get_contact("staff-1", "15550001111@s.whatsapp.net")
        .await
        .unwrap()
        .unwrap();
    let bob = backend
        .get_contact("staff-1", "15550002222@s.whatsapp.net")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        alice.picture_url.as_deref(),
        Some("https://cdn.example/alice.jpg")
    );
    assert_eq!(
        bob.picture_url.as_deref(),
        Some("https://cdn.example/bob.jpg"),
        "contacts that already have a picture are skipped"
    );
}

#[tokio::test]
async fn name_backfill_fills_only_vacant_contacts() {
    let backend = Arc::new(InMemoryBackend::new());
    let sync = ContactSync::new(backend.clone(), fast_settings());

    backend
        .upsert_messages(&[
            message_row("staff-1", "15550001111@s.whatsapp.net", Some("Alice")),
            message_row("staff-1", "15550002222@s.whatsapp.net", Some("Impostor")),
        ])
        .await
        .unwrap();
    backend
        .merge_contact(
            "staff-1",
            "15550002222@s.whatsapp.net",
            &ContactPatch {
                name: Some("Bob".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    sync.name_backfill("staff-1").await;

    let alice = backend
        .get_contact("staff-1", "15550001111@s.whatsapp.net")
        .await
        .unwrap()
        .unwrap();
    let bob = backend
        .get_contact("staff-1", "15550002222@s.whatsapp.net")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alice.name.as_deref(), Some("Alice"), "vacant contact filled");
    assert_eq!(bob.name.as_deref(), Some("Bob"), "known name untouched");
}
