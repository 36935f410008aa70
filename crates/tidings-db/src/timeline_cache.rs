use std::ops::Bound;
use std::sync::Arc;

use redb::{Database, ReadableTable};

use tidings_core::{Score, StorageError, TimelineCache, TimelineEntry, UserId};

use crate::tables::{
    db_err, decode_order_key, encode_member_key, encode_order_key, order_key_bounds,
    TIMELINE_MEMBERS, TIMELINE_ORDER, TIMELINE_SIZES,
};

/// redb implementation of TimelineCache.
///
/// Each write runs in a single transaction, so a batch of entries lands
/// atomically for its reader. Transactions run on the blocking pool, so
/// callers can put a deadline on them.
pub struct RedbTimelineCache {
    db: Arc<Database>,
}

impl RedbTimelineCache {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Initialize the database tables.
    pub fn init_tables(db: &Database) -> Result<(), StorageError> {
        let write_txn = db.begin_write().map_err(db_err)?;
        {
            // Create tables if they don't exist
            let _ = write_txn.open_table(TIMELINE_MEMBERS).map_err(db_err)?;
            let _ = write_txn.open_table(TIMELINE_ORDER).map_err(db_err)?;
            let _ = write_txn.open_table(TIMELINE_SIZES).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        Ok(())
    }

    /// Insert entries for a reader. When `only_if_exists` is set and the
    /// reader has no cache, nothing is written and None is returned.
    /// Otherwise returns the number of new entries.
    fn insert_entries(
        db: &Database,
        reader: &UserId,
        entries: &[TimelineEntry],
        only_if_exists: bool,
    ) -> Result<Option<usize>, StorageError> {
        let write_txn = db.begin_write().map_err(db_err)?;

        let added = {
            let mut sizes = write_txn.open_table(TIMELINE_SIZES).map_err(db_err)?;
            let current = sizes
                .get(reader.as_str())
                .map_err(db_err)?
                .map(|v| v.value());

            if current.is_none() && (only_if_exists || entries.is_empty()) {
                None
            } else {
                let mut members = write_txn.open_table(TIMELINE_MEMBERS).map_err(db_err)?;
                let mut order = write_txn.open_table(TIMELINE_ORDER).map_err(db_err)?;

                let mut added = 0u64;
                for entry in entries {
                    let member_key = encode_member_key(reader, entry.post_id);
                    let previous = members
                        .insert(member_key.as_slice(), entry.score.0)
                        .map_err(db_err)?
                        .map(|v| v.value());

                    match previous {
                        Some(score) if score == entry.score.0 => continue,
                        Some(score) => {
                            // Rescored: move the ordering row
                            let stale = TimelineEntry::new(entry.post_id, Score(score));
                            order
                                .remove(encode_order_key(reader, stale).as_slice())
                                .map_err(db_err)?;
                        }
                        None => added += 1,
                    }
                    order
                        .insert(encode_order_key(reader, *entry).as_slice(), ())
                        .map_err(db_err)?;
                }

                sizes
                    .insert(reader.as_str(), current.unwrap_or(0) + added)
                    .map_err(db_err)?;
                Some(added as usize)
            }
        };

        match added {
            Some(_) => write_txn.commit().map_err(db_err)?,
            None => write_txn.abort().map_err(db_err)?,
        }
        Ok(added)
    }

    fn read_range(
        db: &Database,
        reader: &UserId,
        before: Option<TimelineEntry>,
        limit: usize,
    ) -> Result<Vec<TimelineEntry>, StorageError> {
        let read_txn = db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(TIMELINE_ORDER).map_err(db_err)?;

        let (low, high) = order_key_bounds(reader);
        let before_key = before.map(|entry| encode_order_key(reader, entry));
        let upper = match &before_key {
            Some(key) => Bound::Excluded(key.as_slice()),
            None => Bound::Included(high.as_slice()),
        };

        let mut entries = Vec::with_capacity(limit);
        let range = table
            .range::<&[u8]>((Bound::Included(low.as_slice()), upper))
            .map_err(db_err)?;

        for item in range.rev().take(limit) {
            let (key, _) = item.map_err(db_err)?;
            entries.push(decode_order_key(key.value())?);
        }

        Ok(entries)
    }

    fn read_size(db: &Database, reader: &UserId) -> Result<usize, StorageError> {
        let read_txn = db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(TIMELINE_SIZES).map_err(db_err)?;

        let size = table
            .get(reader.as_str())
            .map_err(db_err)?
            .map(|v| v.value())
            .unwrap_or(0);
        Ok(size as usize)
    }

    fn trim_to(db: &Database, reader: &UserId, max_items: usize) -> Result<usize, StorageError> {
        let write_txn = db.begin_write().map_err(db_err)?;

        let removed = {
            let mut sizes = write_txn.open_table(TIMELINE_SIZES).map_err(db_err)?;
            let size = sizes
                .get(reader.as_str())
                .map_err(db_err)?
                .map(|v| v.value() as usize)
                .unwrap_or(0);

            if size <= max_items {
                0
            } else {
                let excess = size - max_items;
                let mut members = write_txn.open_table(TIMELINE_MEMBERS).map_err(db_err)?;
                let mut order = write_txn.open_table(TIMELINE_ORDER).map_err(db_err)?;

                // Lowest scores first
                let (low, high) = order_key_bounds(reader);
                let mut oldest = Vec::with_capacity(excess);
                for item in order
                    .range::<&[u8]>(low.as_slice()..=high.as_slice())
                    .map_err(db_err)?
                    .take(excess)
                {
                    let (key, _) = item.map_err(db_err)?;
                    oldest.push(decode_order_key(key.value())?);
                }

                for entry in &oldest {
                    order
                        .remove(encode_order_key(reader, *entry).as_slice())
                        .map_err(db_err)?;
                    members
                        .remove(encode_member_key(reader, entry.post_id).as_slice())
                        .map_err(db_err)?;
                }

                let remaining = size - oldest.len();
                if remaining == 0 {
                    sizes.remove(reader.as_str()).map_err(db_err)?;
                } else {
                    sizes
                        .insert(reader.as_str(), remaining as u64)
                        .map_err(db_err)?;
                }
                oldest.len()
            }
        };

        write_txn.commit().map_err(db_err)?;
        Ok(removed)
    }

    fn list_readers(db: &Database) -> Result<Vec<UserId>, StorageError> {
        let read_txn = db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(TIMELINE_SIZES).map_err(db_err)?;

        let mut readers = Vec::new();
        for item in table.iter().map_err(db_err)? {
            let (key, _) = item.map_err(db_err)?;
            readers.push(UserId::new(key.value()));
        }
        Ok(readers)
    }

    /// Run a storage call on the blocking pool.
    async fn blocking<T, F>(&self, call: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || call(&db))
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?
    }
}

impl TimelineCache for RedbTimelineCache {
    async fn add_if_exists(
        &self,
        reader: &UserId,
        entry: TimelineEntry,
    ) -> Result<bool, StorageError> {
        let reader = reader.clone();
        let added = self
            .blocking(move |db| Self::insert_entries(db, &reader, &[entry], true))
            .await?;
        Ok(added.is_some())
    }

    async fn add(&self, reader: &UserId, entries: &[TimelineEntry]) -> Result<usize, StorageError> {
        let reader = reader.clone();
        let entries = entries.to_vec();
        let added = self
            .blocking(move |db| Self::insert_entries(db, &reader, &entries, false))
            .await?;
        Ok(added.unwrap_or(0))
    }

    async fn range_reverse(
        &self,
        reader: &UserId,
        before: Option<TimelineEntry>,
        limit: usize,
    ) -> Result<Vec<TimelineEntry>, StorageError> {
        let reader = reader.clone();
        self.blocking(move |db| Self::read_range(db, &reader, before, limit))
            .await
    }

    async fn size(&self, reader: &UserId) -> Result<usize, StorageError> {
        let reader = reader.clone();
        self.blocking(move |db| Self::read_size(db, &reader)).await
    }

    async fn trim(&self, reader: &UserId, max_items: usize) -> Result<usize, StorageError> {
        let owned = reader.clone();
        let removed = self
            .blocking(move |db| Self::trim_to(db, &owned, max_items))
            .await?;
        if removed > 0 {
            tracing::debug!(reader = %reader, removed, "trimmed timeline cache");
        }
        Ok(removed)
    }

    async fn readers(&self) -> Result<Vec<UserId>, StorageError> {
        self.blocking(Self::list_readers).await
    }
}
