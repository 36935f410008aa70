//! Tidings DB - redb implementation of the timeline cache and dead-letter log.

pub mod dead_letter_log;
pub mod tables;
pub mod timeline_cache;

pub use dead_letter_log::RedbDeadLetterLog;
pub use timeline_cache::RedbTimelineCache;

use std::path::Path;
use std::sync::Arc;

use redb::Database;

use tidings_core::StorageError;

/// Initialize a database with all required tables.
pub fn init_database(path: impl AsRef<Path>) -> Result<Arc<Database>, StorageError> {
    let db = Database::create(path).map_err(|e| StorageError::Database(e.to_string()))?;

    RedbTimelineCache::init_tables(&db)?;
    RedbDeadLetterLog::init_tables(&db)?;

    Ok(Arc::new(db))
}
