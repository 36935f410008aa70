use redb::TableDefinition;

use tidings_core::{PostId, Score, StorageError, TimelineEntry, UserId};

/// Timeline membership, one row per (reader, post).
/// Key: reader prefix + post id
/// Value: score
pub const TIMELINE_MEMBERS: TableDefinition<&[u8], u64> = TableDefinition::new("timeline_members");

/// Timeline ordering index, one row per (reader, score, post).
/// Key: reader prefix + score + post id
pub const TIMELINE_ORDER: TableDefinition<&[u8], ()> = TableDefinition::new("timeline_order");

/// Entry count per reader. A reader's cache exists iff it has a row here.
pub const TIMELINE_SIZES: TableDefinition<&str, u64> = TableDefinition::new("timeline_sizes");

/// Dead-letter records, append-only.
/// Key: record idempotency key
/// Value: serialized DeadLetterRecord
pub const DEAD_LETTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("dead_letters");

pub(crate) fn db_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::Database(e.to_string())
}

/// Length-prefixed reader id. Every key of one reader starts with this.
pub fn reader_prefix(reader: &UserId) -> Vec<u8> {
    let bytes = reader.as_str().as_bytes();
    let mut key = Vec::with_capacity(4 + bytes.len() + 16);
    key.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    key.extend_from_slice(bytes);
    key
}

/// Encode a membership key (reader, post).
pub fn encode_member_key(reader: &UserId, post_id: PostId) -> Vec<u8> {
    let mut key = reader_prefix(reader);
    key.extend_from_slice(&post_id.0.to_be_bytes());
    key
}

/// Encode an ordering key (reader, score, post). Big-endian so byte order
/// matches entry order within a reader.
pub fn encode_order_key(reader: &UserId, entry: TimelineEntry) -> Vec<u8> {
    let mut key = reader_prefix(reader);
    key.extend_from_slice(&entry.score.0.to_be_bytes());
    key.extend_from_slice(&entry.post_id.0.to_be_bytes());
    key
}

/// Smallest and largest ordering keys a reader can have.
pub fn order_key_bounds(reader: &UserId) -> (Vec<u8>, Vec<u8>) {
    let prefix = reader_prefix(reader);
    let mut low = prefix.clone();
    low.extend_from_slice(&[0u8; 16]);
    let mut high = prefix;
    high.extend_from_slice(&[0xffu8; 16]);
    (low, high)
}

/// Decode the entry from an ordering key.
pub fn decode_order_key(bytes: &[u8]) -> Result<TimelineEntry, StorageError> {
    if bytes.len() < 20 {
        return Err(StorageError::Corrupt(format!(
            "order key of {} bytes",
            bytes.len()
        )));
    }
    let tail = &bytes[bytes.len() - 16..];
    let score = u64::from_be_bytes(tail[..8].try_into().map_err(db_err)?);
    let post_id = u64::from_be_bytes(tail[8..].try_into().map_err(db_err)?);
    Ok(TimelineEntry::new(PostId(post_id), Score(score)))
}
