//! End-to-end delivery tests with a fake chat and a mocked media CDN.


use std::sync::Arc;
use std::time::Duration;

use fixtures::{
    RecordingChat, RoutedSource, StaticSource, can_bind_localhost, file_count, orchestrator, quick,
};
use tempfile::TempDir;
use tokdrop_core::cache::{Cache, MemoryCache};
use tokdrop_core::chat::{ChatClient, MessageEvent, MessageRef, Reaction};
use tokdrop_core::error::{DownloadError, HandlerError, PipelineError};
use tokdrop_core::handler::handle_message_event;
use tokdrop_core::metadata::{MediaInfo, METADATA_TTL, metadata_key};
use tokdrop_core::pipeline::DeliveryOutcome;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE_URL: &str = "https://www.tiktok.com/@someone/video/7301";
const VIDEO_BYTES: &[u8] = b"\x00\x00\x00\x18ftypmp42 not really a video";

fn target() -> MessageRef {
    MessageRef::new(-100_123, 42)
}

fn pending() -> Option<Reaction> {
    Some(Reaction::Emoji("👀".to_string()))
}

async fn mount_video(server: &MockServer, route: &str, expected: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(VIDEO_BYTES))
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_delivers_video_and_removes_scratch_file() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    mount_video(&server, "/video/7301.mp4", 1).await;
    let scratch = TempDir::new().unwrap();
    let source = StaticSource::video("7301", &format!("{}/video/7301.mp4", server.uri()));
    let pipeline = orchestrator(source.clone(), scratch.path(), quick(10), quick(10));
    let chat = RecordingChat::new();

    let outcome = pipeline.run(PAGE_URL, target(), chat.clone()).await;

    assert!(outcome.is_delivered(), "unexpected outcome: {outcome:?}");
    let videos = chat.videos();
    assert_eq!(videos.len(), 1);
    assert!(matches!(
        &videos[0],
        fixtures::ChatCall::Video { chat_id: -100_123, reply_to: Some(42), bytes } if bytes == VIDEO_BYTES
    ));
    assert_eq!(
        chat.reactions(),
        vec![pending(), Some(Reaction::Emoji("👌".to_string()))]
    );
    assert_eq!(source.calls(), 1);
    assert_eq!(file_count(scratch.path()), 0);
}

#[tokio::test]
async fn test_slideshow_is_neutral_and_writes_nothing() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let scratch = TempDir::new().unwrap();
    let pipeline = orchestrator(
        StaticSource::slideshow("7302"),
        scratch.path(),
        quick(10),
        quick(10),
    );
    let chat = RecordingChat::new();

    let outcome = pipeline.run(PAGE_URL, target(), chat.clone()).await;

    assert!(matches!(outcome, DeliveryOutcome::NoVideo));
    assert!(chat.videos().is_empty());
    assert_eq!(chat.reactions(), vec![pending(), None]);
    assert_eq!(file_count(scratch.path()), 0);
}

#[tokio::test]
async fn test_persistent_download_failure_marks_failed() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video/7303.mp4"))
        .respond_with(ResponseTemplate::new(500))
        .expect(20)
        .mount(&server)
        .await;
    let scratch = TempDir::new().unwrap();
    let source = StaticSource::video("7303", &format!("{}/video/7303.mp4", server.uri()));
    let pipeline = orchestrator(source.clone(), scratch.path(), quick(2), quick(10));
    let chat = RecordingChat::new();

    let outcome = pipeline.run(PAGE_URL, target(), chat.clone()).await;

    match outcome {
        DeliveryOutcome::Failed { attempts, error } => {
            assert_eq!(attempts, 2);
            assert!(matches!(
                error,
                PipelineError::Download(DownloadError::Status { status: 500, .. })
            ));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(chat.videos().is_empty());
    assert_eq!(
        chat.reactions().last().cloned().flatten(),
        Some(Reaction::Emoji("😢".to_string()))
    );
    assert_eq!(source.calls(), 20);
    assert_eq!(file_count(scratch.path()), 0);
}

#[tokio::test]
async fn test_failed_send_redownloads_before_retrying() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    mount_video(&server, "/video/7304.mp4", 2).await;
    let scratch = TempDir::new().unwrap();
    let source = StaticSource::video("7304", &format!("{}/video/7304.mp4", server.uri()));
    let pipeline = orchestrator(source, scratch.path(), quick(10), quick(10));
    let chat = RecordingChat::failing_sends(1);

    let outcome = pipeline.run(PAGE_URL, target(), chat.clone()).await;

    assert!(outcome.is_delivered());
    assert_eq!(chat.videos().len(), 2);
    assert_eq!(file_count(scratch.path()), 0);
}

#[tokio::test]
async fn test_download_retry_bypasses_stale_cached_metadata() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/expired/7305.mp4"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;
    mount_video(&server, "/fresh/7305.mp4", 1).await;

    let cache = Cache::new(Arc::new(MemoryCache::new()));
    let stale = MediaInfo {
        id: Some("7305".to_string()),
        play_url: Some(format!("{}/expired/7305.mp4", server.uri())),
        images: Vec::new(),
    };
    cache
        .set(
            &metadata_key(PAGE_URL),
            &serde_json::to_string(&stale).unwrap(),
            METADATA_TTL,
        )
        .await;

    let scratch = TempDir::new().unwrap();
    let source = StaticSource::video("7305", &format!("{}/fresh/7305.mp4", server.uri()));
    let pipeline = fixtures::orchestrator_with_cache(
        source.clone(),
        scratch.path(),
        cache,
        quick(1),
        quick(10),
    );
    let chat = RecordingChat::new();

    let outcome = pipeline.run(PAGE_URL, target(), chat.clone()).await;

    assert!(outcome.is_delivered(), "unexpected outcome: {outcome:?}");
    assert_eq!(source.calls(), 1);
    assert_eq!(chat.videos().len(), 1);
}

#[tokio::test]
async fn test_concurrent_deliveries_of_same_video_do_not_collide() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video/7306.mp4"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(VIDEO_BYTES)
                .set_delay(Duration::from_millis(50)),
        )
        .expect(2)
        .mount(&server)
        .await;
    let scratch = TempDir::new().unwrap();
    let source = StaticSource::video("7306", &format!("{}/video/7306.mp4", server.uri()));
    let pipeline = orchestrator(source, scratch.path(), quick(10), quick(10));
    let chat = RecordingChat::new();

    let (first, second) = tokio::join!(
        pipeline.run(PAGE_URL, MessageRef::new(1, 10), chat.clone()),
        pipeline.run(PAGE_URL, MessageRef::new(2, 20), chat.clone()),
    );

    assert!(first.is_delivered());
    assert!(second.is_delivered());
    let videos = chat.videos();
    assert_eq!(videos.len(), 2);
    for video in videos {
        assert!(matches!(video, fixtures::ChatCall::Video { bytes, .. } if bytes == VIDEO_BYTES));
    }
    assert_eq!(file_count(scratch.path()), 0);
}

#[tokio::test]
async fn test_duplicate_links_in_message_run_once() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    mount_video(&server, "/video/7307.mp4", 1).await;
    mount_video(&server, "/video/7308.mp4", 0).await;
    let scratch = TempDir::new().unwrap();
    let source = StaticSource::video("7307", &format!("{}/video/7307.mp4", server.uri()));
    let pipeline = orchestrator(source.clone(), scratch.path(), quick(10), quick(10));
    let chat = RecordingChat::new();
    let client: Arc<dyn ChatClient> = chat.clone();

    let event = MessageEvent {
        text: Some(format!("look {PAGE_URL} and again {PAGE_URL}")),
        chat_id: Some(7),
        message_id: 70,
        client: Some(client),
    };
    let outcomes = handle_message_event(event, &pipeline).await.unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_delivered());
    assert_eq!(source.calls(), 1);
    assert_eq!(chat.videos().len(), 1);
}

#[tokio::test]
async fn test_slideshow_link_keeps_sibling_failure_reaction() {
    const SLIDESHOW_URL: &str = "https://www.tiktok.com/@someone/photo/7309";
    let scratch = TempDir::new().unwrap();
    let source = Arc::new(RoutedSource::new().slideshow(SLIDESHOW_URL, "7309"));
    let pipeline = orchestrator(source, scratch.path(), quick(1), quick(1));
    let chat = RecordingChat::new();
    let client: Arc<dyn ChatClient> = chat.clone();

    let event = MessageEvent {
        text: Some(format!("{PAGE_URL} and {SLIDESHOW_URL}")),
        chat_id: Some(7),
        message_id: 73,
        client: Some(client),
    };
    let outcomes = handle_message_event(event, &pipeline).await.unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(matches!(outcomes[0], DeliveryOutcome::Failed { .. }));
    assert!(matches!(outcomes[1], DeliveryOutcome::NoVideo));
    assert_eq!(
        chat.reactions().last().cloned().flatten(),
        Some(Reaction::Emoji("😢".to_string()))
    );
    assert!(!chat.reactions().contains(&None));
}

#[tokio::test]
async fn test_event_without_client_is_rejected() {
    let scratch = TempDir::new().unwrap();
    let pipeline = orchestrator(
        StaticSource::video("1", "http://127.0.0.1:9/never"),
        scratch.path(),
        quick(1),
        quick(1),
    );
    let event = MessageEvent {
        text: Some(PAGE_URL.to_string()),
        chat_id: Some(7),
        message_id: 71,
        client: None,
    };

    let err = handle_message_event(event, &pipeline).await.unwrap_err();
    assert!(matches!(err, HandlerError::MissingClient));
}

#[tokio::test]
async fn test_event_without_text_is_ignored() {
    let scratch = TempDir::new().unwrap();
    let source = StaticSource::video("1", "http://127.0.0.1:9/never");
    let pipeline = orchestrator(source.clone(), scratch.path(), quick(1), quick(1));
    let chat = RecordingChat::new();
    let client: Arc<dyn ChatClient> = chat.clone();

    let event = MessageEvent {
        text: None,
        chat_id: Some(7),
        message_id: 72,
        client: Some(client),
    };

    let outcomes = handle_message_event(event, &pipeline).await.unwrap();
    assert!(outcomes.is_empty());
    assert!(chat.calls().is_empty());
    assert_eq!(source.calls(), 0);
}
