use std::sync::Arc;

use redb::{Database, ReadableTable, ReadableTableMetadata};

use tidings_core::{DeadLetterRecord, StorageError};

use crate::tables::{db_err, DEAD_LETTERS};

/// Durable log of dead-letter records, keyed by idempotency key.
pub struct RedbDeadLetterLog {
    db: Arc<Database>,
}

impl RedbDeadLetterLog {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn init_tables(db: &Database) -> Result<(), StorageError> {
        let write_txn = db.begin_write().map_err(db_err)?;
        {
            let _ = write_txn.open_table(DEAD_LETTERS).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        Ok(())
    }

    /// Append a record. Returns false if a record with the same
    /// idempotency key is already stored.
    pub fn append(&self, record: &DeadLetterRecord) -> Result<bool, StorageError> {
        let key = record.idempotency_key();
        let payload = record
            .to_json()
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;

        let write_txn = self.db.begin_write().map_err(db_err)?;
        let inserted = {
            let mut table = write_txn.open_table(DEAD_LETTERS).map_err(db_err)?;
            if table.get(key.as_str()).map_err(db_err)?.is_some() {
                false
            } else {
                table
                    .insert(key.as_str(), payload.as_slice())
                    .map_err(db_err)?;
                true
            }
        };
        write_txn.commit().map_err(db_err)?;

        Ok(inserted)
    }

    /// Look up a record by idempotency key.
    #[cfg(test)]
    fn get(&self, key: &str) -> Result<Option<DeadLetterRecord>, StorageError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(DEAD_LETTERS).map_err(db_err)?;

        match table.get(key).map_err(db_err)? {
            Some(bytes) => {
                let record = DeadLetterRecord::from_json(bytes.value())
                    .map_err(|e| StorageError::Corrupt(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn len(&self) -> Result<u64, StorageError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(DEAD_LETTERS).map_err(db_err)?;
        table.len().map_err(db_err)
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}
