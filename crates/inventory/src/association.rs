//! Many-to-many associations between disks and the things attached to them.

use serde::{Deserialize, Serialize};

use capplan_core::{DiskId, QueryId, RamId, ValueObject};

/// A memory module attached to a disk. The pair is the whole identity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DiskRam {
    pub disk_id: DiskId,
    pub ram_id: RamId,
}

impl DiskRam {
    pub fn new(disk_id: DiskId, ram_id: RamId) -> Self {
        Self { disk_id, ram_id }
    }
}

/// Query fields captured at association time.
///
/// Deliberately stale: editing the query afterwards does not touch snapshots
/// already recorded, and cost/size analytics read this copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySnapshot {
    purpose: String,
    size: i64,
}

impl QuerySnapshot {
    pub fn new(purpose: impl Into<String>, size: i64) -> Self {
        Self {
            purpose: purpose.into(),
            size,
        }
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    pub fn size(&self) -> i64 {
        self.size
    }
}

impl ValueObject for QuerySnapshot {}

/// A query running on a disk, with the query snapshot taken when it was attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskQuery {
    pub disk_id: DiskId,
    pub query_id: QueryId,
    pub snapshot: QuerySnapshot,
}

impl DiskQuery {
    pub fn new(disk_id: DiskId, query_id: QueryId, snapshot: QuerySnapshot) -> Self {
        Self {
            disk_id,
            query_id,
            snapshot,
        }
    }

    /// Primary key of the association.
    pub fn key(&self) -> (DiskId, QueryId) {
        (self.disk_id, self.query_id)
    }
}
