use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch at which the snowflake clock starts
/// (2023-01-01T00:00:00Z).
pub const SNOWFLAKE_EPOCH_MS: i64 = 1_672_531_200_000;

/// Bits below the timestamp in a snowflake: 10 node bits + 12 sequence bits.
const SNOWFLAKE_TIME_SHIFT: u32 = 22;

/// Identity of a user, whether acting as author, follower or reader.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Snowflake identifier of a post.
///
/// Layout: `(millis - SNOWFLAKE_EPOCH_MS) << 22 | node << 12 | sequence`, so
/// identifiers are strictly increasing with creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub u64);

impl PostId {
    /// Build an identifier from its parts. Mostly useful for fixtures.
    pub fn compose(created_at: DateTime<Utc>, node: u16, sequence: u16) -> Self {
        let millis = (created_at.timestamp_millis() - SNOWFLAKE_EPOCH_MS).max(0) as u64;
        Self(
            (millis << SNOWFLAKE_TIME_SHIFT)
                | (u64::from(node & 0x3ff) << 12)
                | u64::from(sequence & 0xfff),
        )
    }

    /// Creation time embedded in the identifier.
    pub fn created_at(&self) -> DateTime<Utc> {
        let millis = (self.0 >> SNOWFLAKE_TIME_SHIFT) as i64 + SNOWFLAKE_EPOCH_MS;
        Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
    }
}

impl std::fmt::Display for PostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
