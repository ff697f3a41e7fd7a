//! The in-memory integrity database: a path -> [`Record`] map with the
//! two-phase mark/sweep protocol that drives deletion detection.
//!
//! Rebuilt from scratch on every process start; nothing here is persisted,
//! matching the fingerprint database's explicit non-goal of surviving a
//! restart.

use crate::model::{FlagsTag, Record};
use std::collections::HashMap;

/// Pre-sized to the same initial bucket count the original hash table used
/// (`OSHash_setSize(syscheck.fp, 2048)`), so early scans don't pay for
/// repeated rehashing while the table grows to its steady-state size.
const INITIAL_CAPACITY: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("path already present in database: {0}")]
    AlreadyPresent(String),
    #[error("path not present in database: {0}")]
    NotPresent(String),
}

pub struct Database {
    records: HashMap<String, Record>,
}

impl Default for Database {
    fn default() -> Self {
        Database::new()
    }
}

impl Database {
    pub fn new() -> Self {
        Database {
            records: HashMap::with_capacity(INITIAL_CAPACITY),
        }
    }

    pub fn lookup(&self, path: &str) -> Option<&Record> {
        self.records.get(path)
    }

    pub fn insert(&mut self, path: String, flags_tag: FlagsTag, fingerprint: String) -> Result<(), DatabaseError> {
        if self.records.contains_key(&path) {
            return Err(DatabaseError::AlreadyPresent(path));
        }
        self.records.insert(path, Record::new(flags_tag, fingerprint));
        Ok(())
    }

    /// Explicit single-path removal, used when a stat failure during the
    /// walk proves a path is gone right now rather than waiting for the
    /// end-of-cycle sweep to notice it was never touched.
    pub fn remove(&mut self, path: &str) -> Option<Record> {
        self.records.remove(path)
    }

    pub fn mark_scanned(&mut self, path: &str) -> Result<(), DatabaseError> {
        let record = self
            .records
            .get_mut(path)
            .ok_or_else(|| DatabaseError::NotPresent(path.to_string()))?;
        record.scanned = true;
        Ok(())
    }

    pub fn update_fingerprint(&mut self, path: &str, fingerprint: String) -> Result<(), DatabaseError> {
        let record = self
            .records
            .get_mut(path)
            .ok_or_else(|| DatabaseError::NotPresent(path.to_string()))?;
        record.last_fingerprint = fingerprint;
        record.scanned = true;
        Ok(())
    }

    /// Removes and returns every record not touched since the last sweep,
    /// then clears `scanned` on every survivor so the next cycle starts
    /// clean. One pass does both jobs, avoiding the extra full traversal a
    /// separate reset would cost.
    pub fn sweep_deleted(&mut self) -> Vec<String> {
        let mut deleted = Vec::new();
        self.records.retain(|path, record| {
            if record.scanned {
                record.scanned = false;
                true
            } else {
                deleted.push(path.clone());
                false
            }
        });
        deleted.sort();
        deleted
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
