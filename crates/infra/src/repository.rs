//! Inventory repository: CRUD over disks, memory modules, queries and their
//! associations.
//!
//! Every operation runs in its own store transaction and either commits all of
//! its writes or rolls back before reporting the failure. The repository owns the
//! free-space invariant: attaching a query to a disk debits the disk by the query's
//! size, detaching (or deleting the query) credits it back, each as a single
//! relative `Statement` alongside the association write.

use tracing::{debug, instrument, warn};

use capplan_core::{DiskId, QueryId, RamId};
use capplan_inventory::{Disk, DiskQuery, DiskRam, Query, Ram};

use crate::error::{InventoryError, InventoryResult};
use crate::store::{Statement, Store, StoreError, StoreTx};

/// Repository over a `Store` handle.
///
/// Holds no state besides the store; clones of an `Arc`-wrapped store can back
/// several repositories.
#[derive(Debug, Clone)]
pub struct InventoryRepository<S> {
    store: S,
}

impl<S> InventoryRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: Store> InventoryRepository<S> {
    /// Run `op` inside one transaction: commit on `Ok`, roll back on `Err`.
    fn transact<T, F>(&self, op: F) -> InventoryResult<T>
    where
        F: for<'t> FnOnce(&mut (dyn StoreTx + 't)) -> InventoryResult<T>,
    {
        let mut tx = self.store.begin()?;
        match op(&mut *tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    // Queries

    #[instrument(skip(self, query), fields(query_id = %query.query_id), err)]
    pub fn add_query(&self, query: &Query) -> InventoryResult<()> {
        self.transact(|tx| {
            tx.execute(Statement::InsertQuery(query.clone()))?;
            Ok(())
        })?;
        debug!("query added");
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub fn get_query_profile(&self, query_id: QueryId) -> InventoryResult<Option<Query>> {
        self.transact(|tx| Ok(tx.query(query_id)?))
    }

    /// Sentinel-style lookup: [`Query::bad`] when absent *or* on store failure.
    pub fn query_profile_or_bad(&self, query_id: QueryId) -> Query {
        self.get_query_profile(query_id)
            .ok()
            .flatten()
            .unwrap_or_else(Query::bad)
    }

    /// Delete a query, first crediting `query.size` back to every disk hosting it.
    ///
    /// Deleting an unknown query succeeds. Any failure reports as a store error.
    #[instrument(skip(self, query), fields(query_id = %query.query_id), err)]
    pub fn delete_query(&self, query: &Query) -> InventoryResult<()> {
        let query_id = query.query_id;
        let size = query.size;
        let removed = self
            .transact(|tx| {
                let credited = tx.execute(Statement::AdjustFreeSpaceOfHosts {
                    query_id,
                    delta: size,
                })?;
                let removed = tx.execute(Statement::DeleteQuery(query_id))?;
                debug!(credited_disks = credited, "free space restored");
                Ok(removed)
            })
            .map_err(into_store_failure)?;

        debug!(removed, "query deleted");
        Ok(())
    }

    // Disks

    #[instrument(skip(self, disk), fields(disk_id = %disk.disk_id), err)]
    pub fn add_disk(&self, disk: &Disk) -> InventoryResult<()> {
        self.transact(|tx| {
            tx.execute(Statement::InsertDisk(disk.clone()))?;
            Ok(())
        })?;
        debug!("disk added");
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub fn get_disk_profile(&self, disk_id: DiskId) -> InventoryResult<Option<Disk>> {
        self.transact(|tx| Ok(tx.disk(disk_id)?))
    }

    /// Sentinel-style lookup: [`Disk::bad`] when absent *or* on store failure.
    pub fn disk_profile_or_bad(&self, disk_id: DiskId) -> Disk {
        self.get_disk_profile(disk_id)
            .ok()
            .flatten()
            .unwrap_or_else(Disk::bad)
    }

    /// Delete a disk and, by cascade, its associations. Hosted queries are not
    /// credited anywhere: the disk row disappears with its free space.
    #[instrument(skip(self), err)]
    pub fn delete_disk(&self, disk_id: DiskId) -> InventoryResult<()> {
        self.transact(|tx| {
            let removed = tx.execute(Statement::DeleteDisk(disk_id))?;
            if removed == 0 {
                return Err(InventoryError::NotExists(format!("disk {disk_id}")));
            }
            Ok(())
        })?;
        debug!("disk deleted");
        Ok(())
    }

    // Memory modules

    #[instrument(skip(self, ram), fields(ram_id = %ram.ram_id), err)]
    pub fn add_ram(&self, ram: &Ram) -> InventoryResult<()> {
        self.transact(|tx| {
            tx.execute(Statement::InsertRam(ram.clone()))?;
            Ok(())
        })?;
        debug!("ram added");
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub fn get_ram_profile(&self, ram_id: RamId) -> InventoryResult<Option<Ram>> {
        self.transact(|tx| Ok(tx.ram(ram_id)?))
    }

    /// Sentinel-style lookup: [`Ram::bad`] when absent *or* on store failure.
    pub fn ram_profile_or_bad(&self, ram_id: RamId) -> Ram {
        self.get_ram_profile(ram_id)
            .ok()
            .flatten()
            .unwrap_or_else(Ram::bad)
    }

    #[instrument(skip(self), err)]
    pub fn delete_ram(&self, ram_id: RamId) -> InventoryResult<()> {
        self.transact(|tx| {
            let removed = tx.execute(Statement::DeleteRam(ram_id))?;
            if removed == 0 {
                return Err(InventoryError::NotExists(format!("ram {ram_id}")));
            }
            Ok(())
        })?;
        debug!("ram deleted");
        Ok(())
    }

    // Combined and association writes

    /// Create a disk and a query together; neither is stored if either fails.
    #[instrument(
        skip(self, disk, query),
        fields(disk_id = %disk.disk_id, query_id = %query.query_id),
        err
    )]
    pub fn add_disk_and_query(&self, disk: &Disk, query: &Query) -> InventoryResult<()> {
        self.transact(|tx| {
            tx.execute(Statement::InsertDisk(disk.clone()))?;
            tx.execute(Statement::InsertQuery(query.clone()))?;
            Ok(())
        })?;
        debug!("disk and query added");
        Ok(())
    }

    /// Attach `query` to a disk, recording a snapshot of its purpose and size and
    /// debiting the disk's free space by the size.
    ///
    /// No capacity check is made here; the only guard is the store's at-rest
    /// non-negativity check on free space, which surfaces as `BadParams`.
    #[instrument(
        skip(self, query),
        fields(query_id = %query.query_id, size = query.size),
        err
    )]
    pub fn add_query_to_disk(&self, query: &Query, disk_id: DiskId) -> InventoryResult<()> {
        let debit = query
            .size
            .checked_neg()
            .ok_or_else(|| InventoryError::BadParams("query size out of range".to_string()))?;

        self.transact(|tx| {
            tx.execute(Statement::InsertDiskQuery(DiskQuery::new(
                disk_id,
                query.query_id,
                query.snapshot(),
            )))?;
            tx.execute(Statement::AdjustFreeSpace {
                disk_id,
                delta: debit,
            })?;
            Ok(())
        })?;
        debug!("query attached to disk");
        Ok(())
    }

    /// Detach `query` from a disk, crediting `query.size` back only if it was
    /// attached. Detaching an unattached query succeeds without effect.
    #[instrument(
        skip(self, query),
        fields(query_id = %query.query_id, size = query.size),
        err
    )]
    pub fn remove_query_from_disk(&self, query: &Query, disk_id: DiskId) -> InventoryResult<()> {
        let query_id = query.query_id;
        let removed = self.transact(|tx| {
            tx.execute(Statement::AdjustFreeSpaceIfHosting {
                disk_id,
                query_id,
                delta: query.size,
            })?;
            Ok(tx.execute(Statement::DeleteDiskQuery { disk_id, query_id })?)
        })?;
        debug!(removed, "query detached from disk");
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub fn add_ram_to_disk(&self, ram_id: RamId, disk_id: DiskId) -> InventoryResult<()> {
        self.transact(|tx| {
            tx.execute(Statement::InsertDiskRam(DiskRam::new(disk_id, ram_id)))?;
            Ok(())
        })?;
        debug!("ram attached to disk");
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub fn remove_ram_from_disk(&self, ram_id: RamId, disk_id: DiskId) -> InventoryResult<()> {
        self.transact(|tx| {
            let removed = tx.execute(Statement::DeleteDiskRam(DiskRam::new(disk_id, ram_id)))?;
            if removed == 0 {
                return Err(InventoryError::NotExists(format!(
                    "ram {ram_id} is not attached to disk {disk_id}"
                )));
            }
            Ok(())
        })?;
        debug!("ram detached from disk");
        Ok(())
    }
}

fn into_store_failure(err: InventoryError) -> InventoryError {
    match err {
        InventoryError::Store(_) => err,
        other => InventoryError::Store(StoreError::Other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Outcome;
    use crate::store::InMemoryStore;
    use proptest::prelude::*;

    fn repo() -> InventoryRepository<InMemoryStore> {
        InventoryRepository::new(InMemoryStore::new())
    }

    fn free_space(repo: &InventoryRepository<InMemoryStore>, disk: i64) -> i64 {
        repo.get_disk_profile(DiskId::new(disk))
            .unwrap()
            .expect("disk exists")
            .free_space
    }

    #[test]
    fn add_reports_each_outcome_kind() {
        let repo = repo();
        assert_eq!(Outcome::of(&repo.add_query(&Query::new(1, "etl", 10))), Outcome::Ok);
        assert_eq!(
            Outcome::of(&repo.add_query(&Query::new(1, "other", 5))),
            Outcome::AlreadyExists
        );
        assert_eq!(
            Outcome::of(&repo.add_query(&Query::new(2, "etl", -1))),
            Outcome::BadParams
        );
        assert_eq!(
            Outcome::of(&repo.add_disk(&Disk::new(0, "HP", 1, 1, 1))),
            Outcome::BadParams
        );
        assert_eq!(
            Outcome::of(&repo.add_ram(&Ram::new(1, "HP", 0))),
            Outcome::BadParams
        );

        repo.store().set_available(false);
        assert_eq!(
            Outcome::of(&repo.add_disk(&Disk::new(1, "HP", 1, 1, 1))),
            Outcome::Error
        );
    }

    #[test]
    fn profiles_distinguish_absent_from_failure() {
        let repo = repo();
        repo.add_ram(&Ram::new(4, "Kingston", 16)).unwrap();

        assert_eq!(
            repo.get_ram_profile(RamId::new(4)).unwrap(),
            Some(Ram::new(4, "Kingston", 16))
        );
        assert_eq!(repo.get_ram_profile(RamId::new(5)).unwrap(), None);

        repo.store().set_available(false);
        assert_eq!(
            Outcome::of(&repo.get_ram_profile(RamId::new(4))),
            Outcome::Error
        );
    }

    #[test]
    fn sentinel_lookups_conflate_absent_and_failure() {
        let repo = repo();
        repo.add_query(&Query::new(1, "etl", 10)).unwrap();
        repo.add_disk(&Disk::new(1, "HP", 1, 10, 1)).unwrap();

        assert_eq!(repo.query_profile_or_bad(QueryId::new(1)).size, 10);
        assert!(repo.query_profile_or_bad(QueryId::new(2)).is_bad());
        assert!(repo.ram_profile_or_bad(RamId::new(1)).is_bad());

        repo.store().set_available(false);
        assert!(repo.disk_profile_or_bad(DiskId::new(1)).is_bad());
    }

    #[test]
    fn delete_disk_and_ram_report_missing_rows() {
        let repo = repo();
        repo.add_disk(&Disk::new(1, "HP", 1, 10, 1)).unwrap();
        repo.add_ram(&Ram::new(1, "HP", 4)).unwrap();

        assert_eq!(Outcome::of(&repo.delete_disk(DiskId::new(1))), Outcome::Ok);
        assert_eq!(Outcome::of(&repo.delete_disk(DiskId::new(1))), Outcome::NotExists);
        assert_eq!(Outcome::of(&repo.delete_ram(RamId::new(1))), Outcome::Ok);
        assert_eq!(Outcome::of(&repo.delete_ram(RamId::new(1))), Outcome::NotExists);
    }

    #[test]
    fn deleting_an_unknown_query_succeeds() {
        let repo = repo();
        assert_eq!(
            Outcome::of(&repo.delete_query(&Query::new(99, "ghost", 5))),
            Outcome::Ok
        );
    }

    #[test]
    fn delete_query_failures_report_as_error() {
        let repo = repo();
        repo.store().set_available(false);
        assert_eq!(
            Outcome::of(&repo.delete_query(&Query::new(1, "etl", 5))),
            Outcome::Error
        );
    }

    #[test]
    fn add_disk_and_query_is_all_or_nothing() {
        let repo = repo();
        repo.add_query(&Query::new(1, "etl", 10)).unwrap();

        let result = repo.add_disk_and_query(&Disk::new(1, "HP", 1, 10, 1), &Query::new(1, "etl", 10));
        assert_eq!(Outcome::of(&result), Outcome::AlreadyExists);
        assert_eq!(repo.get_disk_profile(DiskId::new(1)).unwrap(), None);

        repo.add_disk_and_query(&Disk::new(1, "HP", 1, 10, 1), &Query::new(2, "etl", 3))
            .unwrap();
        assert!(repo.get_disk_profile(DiskId::new(1)).unwrap().is_some());
        assert!(repo.get_query_profile(QueryId::new(2)).unwrap().is_some());
    }

    #[test]
    fn add_disk_and_query_rolls_back_the_query_on_a_disk_collision() {
        let repo = repo();
        repo.add_disk(&Disk::new(1, "HP", 1, 10, 1)).unwrap();

        let result = repo.add_disk_and_query(&Disk::new(1, "Dell", 2, 20, 2), &Query::new(7, "etl", 3));
        assert_eq!(Outcome::of(&result), Outcome::AlreadyExists);
        assert_eq!(repo.get_query_profile(QueryId::new(7)).unwrap(), None);
        assert_eq!(repo.disk_profile_or_bad(DiskId::new(1)).company, "HP");
    }

    #[test]
    fn attaching_a_query_debits_free_space() {
        let repo = repo();
        let query = Query::new(1, "etl", 30);
        repo.add_disk(&Disk::new(1, "HP", 1, 100, 1)).unwrap();
        repo.add_query(&query).unwrap();

        repo.add_query_to_disk(&query, DiskId::new(1)).unwrap();
        assert_eq!(free_space(&repo, 1), 70);

        assert_eq!(
            Outcome::of(&repo.add_query_to_disk(&query, DiskId::new(1))),
            Outcome::AlreadyExists
        );
        assert_eq!(free_space(&repo, 1), 70);
    }

    #[test]
    fn attaching_to_missing_rows_is_not_exists() {
        let repo = repo();
        let query = Query::new(1, "etl", 30);
        repo.add_disk(&Disk::new(1, "HP", 1, 100, 1)).unwrap();

        assert_eq!(
            Outcome::of(&repo.add_query_to_disk(&query, DiskId::new(1))),
            Outcome::NotExists
        );
        repo.add_query(&query).unwrap();
        assert_eq!(
            Outcome::of(&repo.add_query_to_disk(&query, DiskId::new(2))),
            Outcome::NotExists
        );
        assert_eq!(free_space(&repo, 1), 100);
    }

    #[test]
    fn overcommitting_a_disk_rolls_back_the_association() {
        let repo = repo();
        let query = Query::new(1, "etl", 150);
        repo.add_disk(&Disk::new(1, "HP", 1, 100, 1)).unwrap();
        repo.add_query(&query).unwrap();

        assert_eq!(
            Outcome::of(&repo.add_query_to_disk(&query, DiskId::new(1))),
            Outcome::BadParams
        );
        assert_eq!(free_space(&repo, 1), 100);

        let mut tx = repo.store().begin().unwrap();
        assert!(tx.disk_queries().unwrap().is_empty());
    }

    #[test]
    fn snapshot_is_taken_from_the_caller_query() {
        let repo = repo();
        repo.add_disk(&Disk::new(1, "HP", 1, 100, 1)).unwrap();
        repo.add_query(&Query::new(1, "etl", 30)).unwrap();

        repo.add_query_to_disk(&Query::new(1, "renamed", 20), DiskId::new(1))
            .unwrap();

        let mut tx = repo.store().begin().unwrap();
        let links = tx.disk_queries().unwrap();
        assert_eq!(links[0].snapshot.purpose(), "renamed");
        assert_eq!(links[0].snapshot.size(), 20);
    }

    #[test]
    fn detaching_an_unattached_query_is_a_no_op() {
        let repo = repo();
        let query = Query::new(1, "etl", 30);
        repo.add_disk(&Disk::new(1, "HP", 1, 100, 1)).unwrap();
        repo.add_query(&query).unwrap();

        assert_eq!(
            Outcome::of(&repo.remove_query_from_disk(&query, DiskId::new(1))),
            Outcome::Ok
        );
        assert_eq!(free_space(&repo, 1), 100);
    }

    #[test]
    fn ram_association_outcomes() {
        let repo = repo();
        repo.add_disk(&Disk::new(1, "HP", 1, 100, 1)).unwrap();
        repo.add_ram(&Ram::new(1, "HP", 8)).unwrap();

        assert_eq!(
            Outcome::of(&repo.add_ram_to_disk(RamId::new(2), DiskId::new(1))),
            Outcome::NotExists
        );
        assert_eq!(
            Outcome::of(&repo.add_ram_to_disk(RamId::new(1), DiskId::new(2))),
            Outcome::NotExists
        );
        assert_eq!(
            Outcome::of(&repo.add_ram_to_disk(RamId::new(1), DiskId::new(1))),
            Outcome::Ok
        );
        assert_eq!(
            Outcome::of(&repo.add_ram_to_disk(RamId::new(1), DiskId::new(1))),
            Outcome::AlreadyExists
        );
        assert_eq!(
            Outcome::of(&repo.remove_ram_from_disk(RamId::new(1), DiskId::new(1))),
            Outcome::Ok
        );
        assert_eq!(
            Outcome::of(&repo.remove_ram_from_disk(RamId::new(1), DiskId::new(1))),
            Outcome::NotExists
        );
    }

    #[test]
    fn deleting_a_disk_leaves_other_hosts_untouched() {
        let repo = repo();
        let query = Query::new(1, "etl", 10);
        repo.add_disk(&Disk::new(1, "HP", 1, 100, 1)).unwrap();
        repo.add_disk(&Disk::new(2, "HP", 1, 100, 1)).unwrap();
        repo.add_query(&query).unwrap();
        repo.add_query_to_disk(&query, DiskId::new(1)).unwrap();
        repo.add_query_to_disk(&query, DiskId::new(2)).unwrap();

        repo.delete_disk(DiskId::new(1)).unwrap();
        assert_eq!(free_space(&repo, 2), 90);

        repo.delete_query(&query).unwrap();
        assert_eq!(free_space(&repo, 2), 100);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Attaching then detaching a query leaves free space where it started.
        #[test]
        fn attach_detach_round_trip(
            initial in 0i64..10_000,
            size in 0i64..10_000,
        ) {
            prop_assume!(size <= initial);
            let repo = repo();
            let query = Query::new(1, "etl", size);
            repo.add_disk(&Disk::new(1, "HP", 1, initial, 1)).unwrap();
            repo.add_query(&query).unwrap();

            repo.add_query_to_disk(&query, DiskId::new(1)).unwrap();
            prop_assert_eq!(free_space(&repo, 1), initial - size);
            repo.remove_query_from_disk(&query, DiskId::new(1)).unwrap();
            prop_assert_eq!(free_space(&repo, 1), initial);
        }

        /// Deleting a query restores free space on every disk that hosted it.
        #[test]
        fn delete_query_restores_every_host(
            initials in prop::collection::vec(0i64..1_000, 1..6),
            size in 0i64..1_000,
        ) {
            let repo = repo();
            let query = Query::new(1, "etl", size);
            repo.add_query(&query).unwrap();

            for (idx, initial) in initials.iter().enumerate() {
                let disk_id = idx as i64 + 1;
                repo.add_disk(&Disk::new(disk_id, "HP", 1, *initial, 1)).unwrap();
                if size <= *initial {
                    repo.add_query_to_disk(&query, DiskId::new(disk_id)).unwrap();
                }
            }

            repo.delete_query(&query).unwrap();

            for (idx, initial) in initials.iter().enumerate() {
                prop_assert_eq!(free_space(&repo, idx as i64 + 1), *initial);
            }
            let mut tx = repo.store().begin().unwrap();
            prop_assert!(tx.disk_queries().unwrap().is_empty());
        }
    }
}
