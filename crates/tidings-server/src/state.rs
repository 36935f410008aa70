use std::sync::Arc;

use tidings_core::{
    ClientError, EventBus, FanOutSettings, FeedStore, FollowGraph, TimelineCache,
    TimelineSettings, FANOUT_CONSUMER_GROUP, POST_CREATED_TOPIC,
};
use tidings_db::RedbTimelineCache;
use tidings_engine::{
    CacheTrimmer, FanOutCoordinator, HttpFeedStore, HttpFollowGraph, LocalEventBus,
    PostCreatedHandler, TimelineAssembler,
};

/// The concrete collaborators a server instance runs against.
pub trait Backends: Send + Sync + 'static {
    type Cache: TimelineCache + 'static;
    type Graph: FollowGraph + 'static;
    type Feed: FeedStore + 'static;
    type Bus: EventBus + 'static;
}

/// redb cache, HTTP services and the in-process bus.
pub struct Production;

impl Backends for Production {
    type Cache = RedbTimelineCache;
    type Graph = HttpFollowGraph;
    type Feed = HttpFeedStore;
    type Bus = LocalEventBus;
}

/// Application state shared across handlers.
pub struct AppState<B: Backends> {
    pub assembler: Arc<TimelineAssembler<B::Cache, B::Graph, B::Feed>>,
    pub trimmer: Arc<CacheTrimmer<B::Cache>>,
    pub bus: Arc<B::Bus>,
}

impl<B: Backends> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            assembler: self.assembler.clone(),
            trimmer: self.trimmer.clone(),
            bus: self.bus.clone(),
        }
    }
}

impl<B: Backends> AppState<B> {
    /// Wire the engine components and subscribe fan-out to post-created
    /// events.
    pub fn new(
        cache: Arc<B::Cache>,
        graph: Arc<B::Graph>,
        feed: Arc<B::Feed>,
        bus: Arc<B::Bus>,
        fan_out: FanOutSettings,
        timeline: TimelineSettings,
    ) -> Result<Self, ClientError> {
        let coordinator = Arc::new(FanOutCoordinator::new(
            cache.clone(),
            graph.clone(),
            bus.clone(),
            fan_out,
        ));
        bus.subscribe(
            POST_CREATED_TOPIC,
            FANOUT_CONSUMER_GROUP,
            Arc::new(PostCreatedHandler::new(coordinator)),
        )?;

        let trimmer = Arc::new(CacheTrimmer::new(cache.clone(), timeline.max_items));
        let assembler = Arc::new(TimelineAssembler::new(cache, graph, feed, timeline));

        Ok(Self {
            assembler,
            trimmer,
            bus,
        })
    }
}
