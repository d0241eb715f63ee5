use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use huddle_db::{BlobStore, Database, LogStore, MessageRow, MessageStore};
use huddle_gateway::coordinator::{ChatConfig, Coordinator, Submission};
use huddle_gateway::dispatcher::Dispatcher;
use huddle_gateway::retention::Sweeper;
use huddle_types::events::ServerEvent;
use huddle_types::models::Attachment;

const TTL: Duration = Duration::from_secs(3 * 24 * 60 * 60);

fn row(id: &str, created_at: i64, attachment: Option<&Attachment>) -> MessageRow {
    MessageRow {
        id: id.to_string(),
        name: "Ann".into(),
        group_name: String::new(),
        avatar: r#"{"initials":"A","colorToken":"hsl(65 60% 45%)"}"#.into(),
        text: "old news".into(),
        attachment: attachment.map(|a| serde_json::to_string(a).unwrap()),
        reactions: "{}".into(),
        created_at,
    }
}

struct Harness {
    coordinator: Coordinator,
    store: Arc<dyn MessageStore>,
    blobs: Arc<BlobStore>,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn MessageStore> = Arc::new(Database::open_in_memory().unwrap());
    let blobs = Arc::new(BlobStore::new(dir.path().join("uploads")).await.unwrap());
    let coordinator = Coordinator::new(Dispatcher::new(), store.clone(), ChatConfig::default());
    Harness {
        coordinator,
        store,
        blobs,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_sweep_respects_ttl_boundary() {
    let h = harness().await;
    let sweeper = Sweeper::new(h.coordinator.clone(), h.blobs.clone(), TTL);

    let now = Utc::now();
    let cutoff = now.timestamp_millis() - TTL.as_millis() as i64;
    h.store.insert_message(&row("expired", cutoff - 1, None)).unwrap();
    h.store.insert_message(&row("at-cutoff", cutoff, None)).unwrap();
    h.store.insert_message(&row("fresh", cutoff + 1, None)).unwrap();

    let mut rx = h.coordinator.dispatcher().subscribe();
    let deleted = sweeper.sweep_at(now).await.unwrap();
    assert_eq!(deleted, vec!["expired".to_string()]);

    let remaining: Vec<_> = h
        .store
        .recent_messages(10)
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(remaining, vec!["at-cutoff".to_string(), "fresh".to_string()]);

    let out = rx.try_recv().unwrap();
    let event: ServerEvent = serde_json::from_str(&out.json).unwrap();
    assert_eq!(
        event,
        ServerEvent::MessageDelete {
            ids: vec!["expired".into()]
        }
    );
}

#[tokio::test]
async fn test_sweep_with_nothing_expired_is_silent() {
    let h = harness().await;
    let sweeper = Sweeper::new(h.coordinator.clone(), h.blobs.clone(), TTL);
    h.store
        .insert_message(&row("fresh", Utc::now().timestamp_millis(), None))
        .unwrap();

    let mut rx = h.coordinator.dispatcher().subscribe();
    assert!(sweeper.sweep_at(Utc::now()).await.unwrap().is_empty());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_sweep_removes_local_blobs_only() {
    let h = harness().await;
    let sweeper = Sweeper::new(h.coordinator.clone(), h.blobs.clone(), TTL);

    let url = h.blobs.store(Some("png"), b"not really a png").await.unwrap();
    let path = h.blobs.local_path(&url).unwrap();
    assert!(path.exists());

    let local = Attachment {
        url: url.clone(),
        mime_type: "image/png".into(),
        original_name: "cat.png".into(),
    };
    let remote = Attachment {
        url: "https://example.com/cat.png".into(),
        mime_type: "image/png".into(),
        original_name: "cat.png".into(),
    };
    let missing = Attachment {
        url: "/uploads/0-gone000.png".into(),
        mime_type: "image/png".into(),
        original_name: "gone.png".into(),
    };

    let old = Utc::now().timestamp_millis() - TTL.as_millis() as i64 - 60_000;
    h.store.insert_message(&row("local", old, Some(&local))).unwrap();
    h.store.insert_message(&row("remote", old + 1, Some(&remote))).unwrap();
    h.store.insert_message(&row("missing", old + 2, Some(&missing))).unwrap();

    let deleted = sweeper.sweep_at(Utc::now()).await.unwrap();
    assert_eq!(deleted.len(), 3);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_sweep_purges_live_state() {
    let h = harness().await;
    let a = Uuid::new_v4();
    let id = h
        .coordinator
        .submit(
            a,
            huddle_gateway::coordinator::Submission {
                text: "soon gone".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.coordinator.toggle_reaction(a, Some(&id), Some("👍")).await;

    // A zero TTL expires everything created before now
    let sweeper = Sweeper::new(h.coordinator.clone(), h.blobs.clone(), Duration::ZERO);
    let later = Utc::now() + chrono::Duration::seconds(1);
    assert_eq!(sweeper.sweep_at(later).await.unwrap(), vec![id.clone()]);

    // The id is gone from memory and from the store
    assert!(h.coordinator.mark_seen(a, Some(&id)).await.is_none());
    assert!(h.coordinator.toggle_reaction(a, Some(&id), Some("👍")).await.is_none());
    assert!(h.coordinator.message(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sweep_cleans_up_after_store_eviction() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn MessageStore> =
        Arc::new(LogStore::open(&dir.path().join("messages.jsonl"), 2).unwrap());
    let blobs = Arc::new(BlobStore::new(dir.path().join("uploads")).await.unwrap());
    let coordinator = Coordinator::new(Dispatcher::new(), store.clone(), ChatConfig::default());
    let sweeper = Sweeper::new(coordinator.clone(), blobs.clone(), TTL);

    let a = Uuid::new_v4();
    let mut ids = Vec::new();
    let mut paths = Vec::new();
    for n in 0..3 {
        let url = blobs.store(Some("png"), b"pixels").await.unwrap();
        paths.push(blobs.local_path(&url).unwrap());
        let submission = Submission {
            attachment: Some(Attachment {
                url,
                mime_type: "image/png".into(),
                original_name: format!("{n}.png"),
            }),
            ..Default::default()
        };
        ids.push(coordinator.submit(a, submission).await.unwrap());
    }

    // Nothing is past the TTL, but the oldest record fell off the log
    let mut rx = coordinator.dispatcher().subscribe();
    assert_eq!(sweeper.sweep_at(Utc::now()).await.unwrap(), vec![ids[0].clone()]);
    assert!(!paths[0].exists());
    assert!(paths[1].exists() && paths[2].exists());

    let event: ServerEvent = serde_json::from_str(&rx.try_recv().unwrap().json).unwrap();
    assert_eq!(
        event,
        ServerEvent::MessageDelete {
            ids: vec![ids[0].clone()]
        }
    );
    assert!(coordinator.mark_seen(a, Some(&ids[0])).await.is_none());
    assert!(coordinator.mark_seen(a, Some(&ids[1])).await.is_some());
}
