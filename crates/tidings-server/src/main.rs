use std::sync::Arc;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tidings_core::{EventBus, DEAD_LETTER_CONSUMER_GROUP};
use tidings_db::{init_database, RedbDeadLetterLog, RedbTimelineCache};
use tidings_engine::{HttpFeedStore, HttpFollowGraph, LocalEventBus};
use tidings_server::{create_router, AppState, Config, DeadLetterRecorder, Production};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            eprintln!("Required: TIDINGS_FOLLOW_GRAPH_URL, TIDINGS_FEED_STORE_URL");
            eprintln!("Optional: TIDINGS_LISTEN_ADDR, TIDINGS_DB_PATH, TIDINGS_MAX_ITEMS, ...");
            std::process::exit(1);
        }
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        db_path = %config.db_path.display(),
        follow_graph = %config.follow_graph_url,
        feed_store = %config.feed_store_url,
        "starting tidings server"
    );

    let db = match init_database(&config.db_path) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Database error: {}", e);
            std::process::exit(1);
        }
    };

    let client = match reqwest::Client::builder()
        .timeout(config.fan_out.call_timeout)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            eprintln!("HTTP client error: {}", e);
            std::process::exit(1);
        }
    };

    let cache = Arc::new(RedbTimelineCache::new(db.clone()));
    let graph = match HttpFollowGraph::new(client.clone(), &config.follow_graph_url) {
        Ok(graph) => Arc::new(graph),
        Err(e) => {
            eprintln!("Follow graph client error: {}", e);
            std::process::exit(1);
        }
    };
    let feed = match HttpFeedStore::new(client, &config.feed_store_url) {
        Ok(feed) => Arc::new(feed),
        Err(e) => {
            eprintln!("Feed store client error: {}", e);
            std::process::exit(1);
        }
    };
    let bus = Arc::new(LocalEventBus::new(config.delivery.clone()));

    let state = match AppState::<Production>::new(
        cache,
        graph,
        feed,
        bus.clone(),
        config.fan_out.clone(),
        config.timeline.clone(),
    ) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Event bus error: {}", e);
            std::process::exit(1);
        }
    };

    let recorder = Arc::new(DeadLetterRecorder::new(Arc::new(RedbDeadLetterLog::new(db))));
    if let Err(e) = bus.subscribe(
        &config.fan_out.dead_letter_topic,
        DEAD_LETTER_CONSUMER_GROUP,
        recorder,
    ) {
        eprintln!("Event bus error: {}", e);
        std::process::exit(1);
    }

    let trimmer = state.trimmer.clone();
    let interval = config.trim_interval;
    tokio::spawn(async move {
        trimmer.run(interval).await;
    });

    let app = create_router(state);

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", config.listen_addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server running at http://{}", config.listen_addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
