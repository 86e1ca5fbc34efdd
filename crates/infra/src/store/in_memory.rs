use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use capplan_core::{DiskId, DomainError, Entity, QueryId, RamId};
use capplan_inventory::{schema, Disk, DiskQuery, DiskRam, Query, Ram};

use super::r#trait::{Statement, Store, StoreError, StoreTx};

#[derive(Debug, Clone, Default)]
struct Tables {
    queries: BTreeMap<QueryId, Query>,
    disks: BTreeMap<DiskId, Disk>,
    rams: BTreeMap<RamId, Ram>,
    disk_rams: BTreeSet<DiskRam>,
    disk_queries: BTreeMap<(DiskId, QueryId), DiskQuery>,
}

/// In-memory relational store.
///
/// Intended for tests/dev. Not optimized for performance: every transaction works
/// on a full copy of the tables and holds the store lock until it ends, so
/// transactions are fully serialized.
#[derive(Debug)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate losing (or regaining) the connection to the store. While
    /// unavailable, `begin` fails with `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for InMemoryStore {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        self.open(false)
    }

    fn begin_read(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        // Transactions are serialized, so every transaction already reads one snapshot.
        self.open(true)
    }
}

impl InMemoryStore {
    fn open(&self, read_only: bool) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store is offline".to_string()));
        }

        let guard = self
            .tables
            .lock()
            .map_err(|_| StoreError::Other("lock poisoned".to_string()))?;
        let working = guard.clone();

        Ok(Box::new(InMemoryTx {
            guard,
            working,
            read_only,
        }))
    }
}

struct InMemoryTx<'a> {
    guard: MutexGuard<'a, Tables>,
    working: Tables,
    read_only: bool,
}

impl StoreTx for InMemoryTx<'_> {
    fn execute(&mut self, statement: Statement) -> Result<u64, StoreError> {
        if self.read_only {
            return Err(StoreError::Other(
                "cannot execute a write in a read-only transaction".to_string(),
            ));
        }
        self.working.apply(statement)
    }

    fn query(&mut self, query_id: QueryId) -> Result<Option<Query>, StoreError> {
        Ok(self.working.queries.get(&query_id).cloned())
    }

    fn disk(&mut self, disk_id: DiskId) -> Result<Option<Disk>, StoreError> {
        Ok(self.working.disks.get(&disk_id).cloned())
    }

    fn ram(&mut self, ram_id: RamId) -> Result<Option<Ram>, StoreError> {
        Ok(self.working.rams.get(&ram_id).cloned())
    }

    fn queries(&mut self) -> Result<Vec<Query>, StoreError> {
        Ok(self.working.queries.values().cloned().collect())
    }

    fn disks(&mut self) -> Result<Vec<Disk>, StoreError> {
        Ok(self.working.disks.values().cloned().collect())
    }

    fn rams(&mut self) -> Result<Vec<Ram>, StoreError> {
        Ok(self.working.rams.values().cloned().collect())
    }

    fn disk_rams(&mut self) -> Result<Vec<DiskRam>, StoreError> {
        Ok(self.working.disk_rams.iter().copied().collect())
    }

    fn disk_queries(&mut self) -> Result<Vec<DiskQuery>, StoreError> {
        Ok(self.working.disk_queries.values().cloned().collect())
    }

    fn queries_within(&mut self, max_size: i64) -> Result<Vec<Query>, StoreError> {
        Ok(self
            .working
            .queries
            .values()
            .filter(|q| q.fits_in(max_size))
            .cloned()
            .collect())
    }

    fn rams_on(&mut self, disk_id: DiskId) -> Result<Vec<Ram>, StoreError> {
        let tables = &self.working;
        Ok(tables
            .disk_rams
            .range(DiskRam::new(disk_id, RamId::new(i64::MIN))..)
            .take_while(|link| link.disk_id == disk_id)
            .filter_map(|link| tables.rams.get(&link.ram_id).cloned())
            .collect())
    }

    fn disk_queries_on(&mut self, disk_id: DiskId) -> Result<Vec<DiskQuery>, StoreError> {
        Ok(self
            .working
            .disk_queries
            .range((disk_id, QueryId::new(i64::MIN))..)
            .take_while(|((d, _), _)| *d == disk_id)
            .map(|(_, link)| link.clone())
            .collect())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTx { mut guard, working, .. } = *self;
        *guard = working;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        // Working copy is discarded with the guard.
        Ok(())
    }
}

fn check_violation(err: DomainError) -> StoreError {
    StoreError::CheckViolation(err.to_string())
}

fn insert_unique<E: Entity>(
    table: &mut BTreeMap<E::Id, E>,
    row: E,
    kind: &str,
) -> Result<u64, StoreError> {
    let id = row.id();
    if table.contains_key(&id) {
        return Err(StoreError::UniqueViolation(format!("{kind} {id} already exists")));
    }
    table.insert(id, row);
    Ok(1)
}

impl Tables {
    fn apply(&mut self, statement: Statement) -> Result<u64, StoreError> {
        match statement {
            Statement::InsertQuery(query) => {
                schema::check_query(&query).map_err(check_violation)?;
                insert_unique(&mut self.queries, query, "query")
            }
            Statement::InsertDisk(disk) => {
                schema::check_disk(&disk).map_err(check_violation)?;
                insert_unique(&mut self.disks, disk, "disk")
            }
            Statement::InsertRam(ram) => {
                schema::check_ram(&ram).map_err(check_violation)?;
                insert_unique(&mut self.rams, ram, "ram")
            }
            Statement::InsertDiskRam(link) => {
                self.require_disk(link.disk_id)?;
                if !self.rams.contains_key(&link.ram_id) {
                    return Err(StoreError::ForeignKeyViolation(format!(
                        "ram {} does not exist",
                        link.ram_id
                    )));
                }
                if !self.disk_rams.insert(link) {
                    return Err(StoreError::UniqueViolation(format!(
                        "ram {} already attached to disk {}",
                        link.ram_id, link.disk_id
                    )));
                }
                Ok(1)
            }
            Statement::InsertDiskQuery(link) => {
                self.require_disk(link.disk_id)?;
                if !self.queries.contains_key(&link.query_id) {
                    return Err(StoreError::ForeignKeyViolation(format!(
                        "query {} does not exist",
                        link.query_id
                    )));
                }
                if self.disk_queries.contains_key(&link.key()) {
                    return Err(StoreError::UniqueViolation(format!(
                        "query {} already attached to disk {}",
                        link.query_id, link.disk_id
                    )));
                }
                self.disk_queries.insert(link.key(), link);
                Ok(1)
            }
            Statement::DeleteQuery(query_id) => {
                if self.queries.remove(&query_id).is_none() {
                    return Ok(0);
                }
                self.disk_queries.retain(|(_, q), _| *q != query_id);
                Ok(1)
            }
            Statement::DeleteDisk(disk_id) => {
                if self.disks.remove(&disk_id).is_none() {
                    return Ok(0);
                }
                self.disk_rams.retain(|link| link.disk_id != disk_id);
                self.disk_queries.retain(|(d, _), _| *d != disk_id);
                Ok(1)
            }
            Statement::DeleteRam(ram_id) => {
                if self.rams.remove(&ram_id).is_none() {
                    return Ok(0);
                }
                self.disk_rams.retain(|link| link.ram_id != ram_id);
                Ok(1)
            }
            Statement::DeleteDiskRam(link) => Ok(u64::from(self.disk_rams.remove(&link))),
            Statement::DeleteDiskQuery { disk_id, query_id } => {
                Ok(u64::from(self.disk_queries.remove(&(disk_id, query_id)).is_some()))
            }
            Statement::AdjustFreeSpace { disk_id, delta } => {
                self.adjust_free_space(std::iter::once(disk_id), delta)
            }
            Statement::AdjustFreeSpaceOfHosts { query_id, delta } => {
                let hosts: Vec<DiskId> = self
                    .disk_queries
                    .keys()
                    .filter(|(_, q)| *q == query_id)
                    .map(|(d, _)| *d)
                    .collect();
                self.adjust_free_space(hosts, delta)
            }
            Statement::AdjustFreeSpaceIfHosting {
                disk_id,
                query_id,
                delta,
            } => {
                if !self.disk_queries.contains_key(&(disk_id, query_id)) {
                    return Ok(0);
                }
                self.adjust_free_space(std::iter::once(disk_id), delta)
            }
        }
    }

    fn require_disk(&self, disk_id: DiskId) -> Result<(), StoreError> {
        if self.disks.contains_key(&disk_id) {
            Ok(())
        } else {
            Err(StoreError::ForeignKeyViolation(format!(
                "disk {disk_id} does not exist"
            )))
        }
    }

    /// Adjust every listed disk that exists, or none of them if any result would
    /// break the free-space check.
    fn adjust_free_space(
        &mut self,
        disk_ids: impl IntoIterator<Item = DiskId>,
        delta: i64,
    ) -> Result<u64, StoreError> {
        let mut updates = Vec::new();
        for disk_id in disk_ids {
            let Some(disk) = self.disks.get(&disk_id) else {
                continue;
            };
            let next = disk.free_space.checked_add(delta).ok_or_else(|| {
                StoreError::Other(format!("free space of disk {disk_id} out of range"))
            })?;
            schema::check_free_space(next).map_err(check_violation)?;
            updates.push((disk_id, next));
        }

        for (disk_id, next) in &updates {
            if let Some(disk) = self.disks.get_mut(disk_id) {
                disk.free_space = *next;
            }
        }
        Ok(updates.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capplan_inventory::QuerySnapshot;

    fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        let mut tx = store.begin().unwrap();
        tx.execute(Statement::InsertDisk(Disk::new(1, "HP", 10, 100, 3))).unwrap();
        tx.execute(Statement::InsertDisk(Disk::new(2, "Dell", 5, 50, 2))).unwrap();
        tx.execute(Statement::InsertQuery(Query::new(1, "etl", 30))).unwrap();
        tx.execute(Statement::InsertRam(Ram::new(1, "HP", 8))).unwrap();
        tx.commit().unwrap();
        store
    }

    fn link(disk: i64, query: i64, size: i64) -> Statement {
        Statement::InsertDiskQuery(DiskQuery::new(
            DiskId::new(disk),
            QueryId::new(query),
            QuerySnapshot::new("etl", size),
        ))
    }

    #[test]
    fn committed_writes_are_visible_to_later_transactions() {
        let store = seeded();
        let mut tx = store.begin().unwrap();
        assert_eq!(tx.disks().unwrap().len(), 2);
        assert_eq!(tx.query(QueryId::new(1)).unwrap().unwrap().size, 30);
    }

    #[test]
    fn rollback_discards_writes() {
        let store = seeded();
        let mut tx = store.begin().unwrap();
        tx.execute(Statement::DeleteDisk(DiskId::new(1))).unwrap();
        assert!(tx.disk(DiskId::new(1)).unwrap().is_none());
        tx.rollback().unwrap();

        let mut tx = store.begin().unwrap();
        assert!(tx.disk(DiskId::new(1)).unwrap().is_some());
    }

    #[test]
    fn dropping_an_uncommitted_transaction_discards_writes() {
        let store = seeded();
        {
            let mut tx = store.begin().unwrap();
            tx.execute(Statement::InsertQuery(Query::new(9, "adhoc", 1))).unwrap();
        }
        let mut tx = store.begin().unwrap();
        assert!(tx.query(QueryId::new(9)).unwrap().is_none());
    }

    #[test]
    fn duplicate_identity_is_a_unique_violation() {
        let store = seeded();
        let mut tx = store.begin().unwrap();
        let err = tx
            .execute(Statement::InsertDisk(Disk::new(1, "Other", 1, 1, 1)))
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[test]
    fn check_constraints_run_before_uniqueness() {
        let store = seeded();
        let mut tx = store.begin().unwrap();
        let err = tx
            .execute(Statement::InsertQuery(Query::new(1, "etl", -1)))
            .unwrap_err();
        assert!(matches!(err, StoreError::CheckViolation(_)));
    }

    #[test]
    fn associations_require_both_endpoints() {
        let store = seeded();
        let mut tx = store.begin().unwrap();
        assert!(matches!(
            tx.execute(link(9, 1, 30)).unwrap_err(),
            StoreError::ForeignKeyViolation(_)
        ));
        assert!(matches!(
            tx.execute(link(1, 9, 30)).unwrap_err(),
            StoreError::ForeignKeyViolation(_)
        ));
        assert!(matches!(
            tx.execute(Statement::InsertDiskRam(DiskRam::new(DiskId::new(1), RamId::new(9))))
                .unwrap_err(),
            StoreError::ForeignKeyViolation(_)
        ));
    }

    #[test]
    fn duplicate_association_is_a_unique_violation() {
        let store = seeded();
        let mut tx = store.begin().unwrap();
        tx.execute(link(1, 1, 30)).unwrap();
        assert!(matches!(
            tx.execute(link(1, 1, 30)).unwrap_err(),
            StoreError::UniqueViolation(_)
        ));
    }

    #[test]
    fn deleting_an_endpoint_cascades_associations() {
        let store = seeded();
        let mut tx = store.begin().unwrap();
        tx.execute(link(1, 1, 30)).unwrap();
        tx.execute(link(2, 1, 30)).unwrap();
        tx.execute(Statement::InsertDiskRam(DiskRam::new(DiskId::new(1), RamId::new(1))))
            .unwrap();

        assert_eq!(tx.execute(Statement::DeleteDisk(DiskId::new(1))).unwrap(), 1);
        assert!(tx.disk_rams().unwrap().is_empty());
        assert_eq!(tx.disk_queries().unwrap().len(), 1);

        assert_eq!(tx.execute(Statement::DeleteQuery(QueryId::new(1))).unwrap(), 1);
        assert!(tx.disk_queries().unwrap().is_empty());
        assert_eq!(tx.execute(Statement::DeleteQuery(QueryId::new(1))).unwrap(), 0);
    }

    #[test]
    fn free_space_adjustment_respects_the_check() {
        let store = seeded();
        let mut tx = store.begin().unwrap();
        let disk_id = DiskId::new(2);
        assert_eq!(
            tx.execute(Statement::AdjustFreeSpace { disk_id, delta: -50 }).unwrap(),
            1
        );
        let err = tx
            .execute(Statement::AdjustFreeSpace { disk_id, delta: -1 })
            .unwrap_err();
        assert!(matches!(err, StoreError::CheckViolation(_)));
        assert_eq!(tx.disk(disk_id).unwrap().unwrap().free_space, 0);
    }

    #[test]
    fn adjusting_a_missing_disk_touches_nothing() {
        let store = seeded();
        let mut tx = store.begin().unwrap();
        let affected = tx
            .execute(Statement::AdjustFreeSpace {
                disk_id: DiskId::new(42),
                delta: 10,
            })
            .unwrap();
        assert_eq!(affected, 0);
    }

    #[test]
    fn host_adjustment_reaches_every_hosting_disk() {
        let store = seeded();
        let mut tx = store.begin().unwrap();
        tx.execute(link(1, 1, 30)).unwrap();
        tx.execute(link(2, 1, 30)).unwrap();

        let affected = tx
            .execute(Statement::AdjustFreeSpaceOfHosts {
                query_id: QueryId::new(1),
                delta: 5,
            })
            .unwrap();
        assert_eq!(affected, 2);
        assert_eq!(tx.disk(DiskId::new(1)).unwrap().unwrap().free_space, 105);
        assert_eq!(tx.disk(DiskId::new(2)).unwrap().unwrap().free_space, 55);
    }

    #[test]
    fn guarded_adjustment_requires_the_association() {
        let store = seeded();
        let mut tx = store.begin().unwrap();
        let stmt = Statement::AdjustFreeSpaceIfHosting {
            disk_id: DiskId::new(1),
            query_id: QueryId::new(1),
            delta: 30,
        };
        assert_eq!(tx.execute(stmt.clone()).unwrap(), 0);
        tx.execute(link(1, 1, 30)).unwrap();
        assert_eq!(tx.execute(stmt).unwrap(), 1);
        assert_eq!(tx.disk(DiskId::new(1)).unwrap().unwrap().free_space, 130);
    }

    #[test]
    fn offline_store_refuses_transactions() {
        let store = seeded();
        store.set_available(false);
        assert!(matches!(store.begin().err(), Some(StoreError::Unavailable(_))));
        store.set_available(true);
        assert!(store.begin().is_ok());
        store.set_available(false);
        assert!(matches!(store.begin_read().err(), Some(StoreError::Unavailable(_))));
    }

    #[test]
    fn read_transactions_refuse_writes() {
        let store = seeded();
        let mut tx = store.begin_read().unwrap();
        assert!(matches!(
            tx.execute(Statement::DeleteDisk(DiskId::new(1))),
            Err(StoreError::Other(_))
        ));
        assert_eq!(tx.disks().unwrap().len(), 2);
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        assert_eq!(tx.disks().unwrap().len(), 2);
    }

    #[test]
    fn filtered_reads_stay_on_one_disk() {
        let store = seeded();
        let mut tx = store.begin().unwrap();
        tx.execute(Statement::InsertRam(Ram::new(2, "HP", 16))).unwrap();
        tx.execute(Statement::InsertDiskRam(DiskRam::new(DiskId::new(2), RamId::new(2))))
            .unwrap();
        tx.execute(Statement::InsertDiskRam(DiskRam::new(DiskId::new(1), RamId::new(1))))
            .unwrap();
        tx.execute(Statement::InsertQuery(Query::new(2, "etl", 60))).unwrap();
        tx.execute(link(2, 1, 30)).unwrap();

        let rams: Vec<RamId> = tx.rams_on(DiskId::new(2)).unwrap().iter().map(|r| r.ram_id).collect();
        assert_eq!(rams, vec![RamId::new(2)]);
        assert!(tx.rams_on(DiskId::new(3)).unwrap().is_empty());

        assert!(tx.disk_queries_on(DiskId::new(1)).unwrap().is_empty());
        let hosted: Vec<QueryId> = tx
            .disk_queries_on(DiskId::new(2))
            .unwrap()
            .iter()
            .map(|l| l.query_id)
            .collect();
        assert_eq!(hosted, vec![QueryId::new(1)]);

        let within: Vec<QueryId> = tx.queries_within(30).unwrap().iter().map(|q| q.query_id).collect();
        assert_eq!(within, vec![QueryId::new(1)]);
        assert_eq!(tx.queries_within(60).unwrap().len(), 2);
        assert!(tx.queries_within(29).unwrap().is_empty());
    }
}
