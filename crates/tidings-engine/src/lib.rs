//! Tidings Engine - fan-out, timeline assembly, backfill and trimming.

pub mod assembler;
pub mod backfill;
pub mod bus;
pub mod coordinator;
pub mod http;
pub mod retry;
pub mod trimmer;

pub use assembler::{TimelineAssembler, TimelineError};
pub use backfill::{BackfillEngine, BackfillError, BackfillReport};
pub use bus::{DeliveryPolicy, LocalEventBus};
pub use coordinator::{
    FanOutCoordinator, FanOutError, FanOutPolicy, FanOutReport, PostCreatedHandler,
};
pub use http::{HttpFeedStore, HttpFollowGraph};
pub use retry::{retry, with_timeout};
pub use trimmer::{CacheTrimmer, TrimStats};
