use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use tidings_core::{
    FanOutSettings, InMemoryEventBus, InMemoryFeedStore, InMemoryFollowGraph,
    InMemoryTimelineCache, Post, PostCreatedEvent, PostId, TimelineEntry, TimelineSettings,
    UserId, FANOUT_CONSUMER_GROUP, POST_CREATED_TOPIC,
};
use tidings_server::{create_router, AppState, Backends};

struct MemoryBackends;

impl Backends for MemoryBackends {
    type Cache = InMemoryTimelineCache;
    type Graph = InMemoryFollowGraph;
    type Feed = InMemoryFeedStore;
    type Bus = InMemoryEventBus;
}

struct TestApp {
    cache: Arc<InMemoryTimelineCache>,
    feed: Arc<InMemoryFeedStore>,
    bus: Arc<InMemoryEventBus>,
    router: axum::Router,
}

impl TestApp {
    fn new() -> Self {
        Self::with_settings(TimelineSettings::default())
    }

    fn with_settings(timeline: TimelineSettings) -> Self {
        let cache = Arc::new(InMemoryTimelineCache::new());
        let feed = Arc::new(InMemoryFeedStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let state = AppState::<MemoryBackends>::new(
            cache.clone(),
            Arc::new(InMemoryFollowGraph::new()),
            feed.clone(),
            bus.clone(),
            FanOutSettings::default(),
            timeline,
        )
        .unwrap();

        Self {
            cache,
            feed,
            bus,
            router: create_router(state),
        }
    }

    /// Warm a reader's cache with posts whose scores are their ids.
    fn seed(&self, reader: &str, ids: &[u64]) {
        let entries: Vec<_> = ids.iter().map(|id| TimelineEntry::for_post(PostId(*id))).collect();
        self.cache.warm(&UserId::from(reader), &entries);
        for id in ids {
            let post_id = PostId(*id);
            self.feed.insert(Post::new(
                post_id,
                UserId::from("author"),
                format!("post {id}"),
                post_id.created_at(),
            ));
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }
}

fn item_ids(body: &Value) -> Vec<String> {
    body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_str().unwrap().to_string())
        .collect()
}

// ============================================================================
// Health endpoint tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::new();

    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = app.get("/ready").await;
    assert_eq!(status, StatusCode::OK);
}

// ============================================================================
// Timeline endpoint tests
// ============================================================================

#[tokio::test]
async fn test_timeline_pagination() {
    let app = TestApp::new();
    app.seed("ada", &[10, 9, 8, 7, 6]);

    let (status, first) = app.get("/timeline/ada?size=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item_ids(&first), vec!["10", "9"]);
    assert_eq!(first["size"], 2);
    assert_eq!(first["has_next"], true);
    assert_eq!(first["items"][0]["content"], "post 10");

    let cursor = first["next_cursor"].as_str().unwrap();
    let (_, second) = app.get(&format!("/timeline/ada?size=2&cursor={cursor}")).await;
    assert_eq!(item_ids(&second), vec!["8", "7"]);
    assert_eq!(second["has_next"], true);

    let cursor = second["next_cursor"].as_str().unwrap();
    let (_, third) = app.get(&format!("/timeline/ada?size=2&cursor={cursor}")).await;
    assert_eq!(item_ids(&third), vec!["6"]);
    assert_eq!(third["has_next"], false);
}

#[tokio::test]
async fn test_timeline_default_page_size() {
    let app = TestApp::with_settings(TimelineSettings {
        default_page_size: 3,
        ..TimelineSettings::default()
    });
    app.seed("ada", &[1, 2, 3, 4, 5]);

    let (status, body) = app.get("/timeline/ada").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item_ids(&body), vec!["5", "4", "3"]);
}

#[tokio::test]
async fn test_empty_timeline() {
    let app = TestApp::new();

    let (status, body) = app.get("/timeline/nobody").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["size"], 0);
    assert_eq!(body["has_next"], false);
    assert!(body["next_cursor"].is_null());
}

#[tokio::test]
async fn test_timeline_rejects_bad_input() {
    let app = TestApp::new();

    let (status, body) = app.get("/timeline/ada?cursor=!!!").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_cursor");

    let (status, body) = app.get("/timeline/ada?size=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_page_size");
}

// ============================================================================
// Event and admin endpoint tests
// ============================================================================

#[tokio::test]
async fn test_fan_out_consumer_is_subscribed() {
    let app = TestApp::new();

    assert!(app
        .bus
        .subscriptions()
        .contains(&(POST_CREATED_TOPIC.to_string(), FANOUT_CONSUMER_GROUP.to_string())));
}

#[tokio::test]
async fn test_post_created_is_published() {
    let app = TestApp::new();
    let event = PostCreatedEvent::new(UserId::from("author"), PostId(42), Utc::now());

    let (status, _) = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/events/post-created")
                .header("content-type", "application/json")
                .body(Body::from(event.to_json().unwrap()))
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let published = app.bus.published(POST_CREATED_TOPIC);
    assert_eq!(published.len(), 1);
    assert_eq!(PostCreatedEvent::from_json(&published[0]).unwrap(), event);
}

#[tokio::test]
async fn test_post_created_bus_outage() {
    let app = TestApp::new();
    app.bus.set_failing(true);
    let event = PostCreatedEvent::new(UserId::from("author"), PostId(42), Utc::now());

    let (status, _) = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/events/post-created")
                .header("content-type", "application/json")
                .body(Body::from(event.to_json().unwrap()))
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_admin_trim() {
    let app = TestApp::with_settings(TimelineSettings {
        max_items: 3,
        ..TimelineSettings::default()
    });
    app.seed("ada", &[1, 2, 3, 4, 5]);
    app.seed("bob", &[1, 2]);

    let (status, body) = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/admin/trim")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["readers_scanned"], 2);
    assert_eq!(body["readers_trimmed"], 1);
    assert_eq!(body["entries_removed"], 2);
    assert_eq!(body["failures"], 0);
    assert_eq!(app.cache.entries(&UserId::from("ada")).len(), 3);
}
