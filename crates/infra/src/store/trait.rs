use std::sync::Arc;

use thiserror::Error;

use capplan_core::{DiskId, QueryId, RamId};
use capplan_inventory::{Disk, DiskQuery, DiskRam, Query, Ram};

/// Store operation error.
///
/// These are **infrastructure errors**. Constraint failures are classified so the
/// repository can map them onto its outcome kinds; anything the store cannot
/// classify is `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    #[error("check constraint violated: {0}")]
    CheckViolation(String),

    #[error("not-null constraint violated: {0}")]
    NotNullViolation(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store error: {0}")]
    Other(String),
}

/// A write against the inventory schema.
///
/// Free-space arithmetic is expressed as a relative adjustment so each store can
/// apply it as a single atomic statement instead of a read-modify-write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    InsertQuery(Query),
    InsertDisk(Disk),
    InsertRam(Ram),
    InsertDiskRam(DiskRam),
    InsertDiskQuery(DiskQuery),

    /// Delete a query; cascades its disk associations.
    DeleteQuery(QueryId),
    /// Delete a disk; cascades both association kinds.
    DeleteDisk(DiskId),
    /// Delete a memory module; cascades its disk associations.
    DeleteRam(RamId),
    DeleteDiskRam(DiskRam),
    DeleteDiskQuery { disk_id: DiskId, query_id: QueryId },

    /// `free_space += delta` on one disk.
    AdjustFreeSpace { disk_id: DiskId, delta: i64 },
    /// `free_space += delta` on every disk currently hosting `query_id`.
    AdjustFreeSpaceOfHosts { query_id: QueryId, delta: i64 },
    /// `free_space += delta` on `disk_id`, only while it hosts `query_id`.
    AdjustFreeSpaceIfHosting {
        disk_id: DiskId,
        query_id: QueryId,
        delta: i64,
    },
}

/// One open transaction against the store.
///
/// Dropping a transaction without committing discards its writes. Reads observe
/// the transaction's own uncommitted writes.
pub trait StoreTx {
    /// Execute a write, returning the number of affected rows.
    fn execute(&mut self, statement: Statement) -> Result<u64, StoreError>;

    fn query(&mut self, query_id: QueryId) -> Result<Option<Query>, StoreError>;
    fn disk(&mut self, disk_id: DiskId) -> Result<Option<Disk>, StoreError>;
    fn ram(&mut self, ram_id: RamId) -> Result<Option<Ram>, StoreError>;

    /// All queries, ascending by id.
    fn queries(&mut self) -> Result<Vec<Query>, StoreError>;
    /// All disks, ascending by id.
    fn disks(&mut self) -> Result<Vec<Disk>, StoreError>;
    /// All memory modules, ascending by id.
    fn rams(&mut self) -> Result<Vec<Ram>, StoreError>;
    /// All disk/RAM associations, ascending by `(disk_id, ram_id)`.
    fn disk_rams(&mut self) -> Result<Vec<DiskRam>, StoreError>;
    /// All disk/query associations, ascending by `(disk_id, query_id)`.
    fn disk_queries(&mut self) -> Result<Vec<DiskQuery>, StoreError>;

    /// Queries with `size <= max_size`, ascending by id.
    fn queries_within(&mut self, max_size: i64) -> Result<Vec<Query>, StoreError>;
    /// Memory modules attached to `disk_id`, ascending by id.
    fn rams_on(&mut self, disk_id: DiskId) -> Result<Vec<Ram>, StoreError>;
    /// Query associations of `disk_id`, ascending by query id.
    fn disk_queries_on(&mut self, disk_id: DiskId) -> Result<Vec<DiskQuery>, StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;
    fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Transactional relational store holding the inventory schema.
///
/// Implementations must:
/// - enforce identity uniqueness, foreign keys (with cascading deletes) and the
///   schema check constraints, surfacing each as its own `StoreError` kind
/// - apply all writes of a transaction atomically on commit, or none of them
pub trait Store: Send + Sync {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError>;

    /// Open a read-only transaction in which every read observes the same
    /// snapshot. Writes through it fail.
    fn begin_read(&self) -> Result<Box<dyn StoreTx + '_>, StoreError>;
}

impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        (**self).begin()
    }

    fn begin_read(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        (**self).begin_read()
    }
}
