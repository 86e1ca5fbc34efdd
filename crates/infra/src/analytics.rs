//! Read-only analytics over the inventory.
//!
//! Each report reads the rows it needs inside one read-only store transaction
//! ([`Store::begin_read`], a single snapshot), then computes its answer in memory.
//! Per-disk reports read only that disk's rows.
//! An empty answer (zero, `false`, no ids) is a normal result; only store failures
//! come back as `Err`.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{instrument, warn};

use capplan_core::{DiskId, QueryId};
use capplan_inventory::{Disk, DiskQuery, Query, Ram};

use crate::error::InventoryResult;
use crate::store::{Store, StoreError, StoreTx};

/// Maximum number of ids returned by the fit reports.
pub const FIT_LIMIT: usize = 5;
/// Maximum number of disks returned by [`InventoryAnalytics::most_available_disks`].
pub const RANKING_LIMIT: usize = 5;
/// Maximum number of ids returned by [`InventoryAnalytics::close_queries`].
pub const CLOSE_QUERIES_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct InventoryAnalytics<S> {
    store: S,
}

impl<S> InventoryAnalytics<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: Store> InventoryAnalytics<S> {
    /// Run `read` in a read-only snapshot transaction, then release it.
    fn read<T, F>(&self, read: F) -> InventoryResult<T>
    where
        F: for<'t> FnOnce(&mut (dyn StoreTx + 't)) -> Result<T, StoreError>,
    {
        let mut tx = self.store.begin_read()?;
        let result = read(&mut *tx);
        if let Err(err) = tx.rollback() {
            warn!(error = %err, "failed to release read transaction");
        }
        Ok(result?)
    }

    /// Mean snapshot size of the queries attached to a disk; `0.0` when none are.
    #[instrument(skip(self), err)]
    pub fn average_query_size_on_disk(&self, disk_id: DiskId) -> InventoryResult<f64> {
        let links = self.read(|tx| tx.disk_queries_on(disk_id))?;
        if links.is_empty() {
            return Ok(0.0);
        }

        let total: i128 = links.iter().map(|l| i128::from(l.snapshot.size())).sum();
        Ok(total as f64 / links.len() as f64)
    }

    /// Total size of the memory modules attached to a disk; `0` when none are.
    #[instrument(skip(self), err)]
    pub fn disk_total_ram(&self, disk_id: DiskId) -> InventoryResult<i64> {
        let rams = self.read(|tx| tx.rams_on(disk_id))?;
        Ok(ram_total(&rams, disk_id)?.unwrap_or(0))
    }

    /// Σ `disk.cost * snapshot.size` over associations whose snapshot purpose is
    /// `purpose`.
    #[instrument(skip(self), err)]
    pub fn cost_for_purpose(&self, purpose: &str) -> InventoryResult<i64> {
        let (disks, links) = self.read(|tx| Ok((tx.disks()?, tx.disk_queries()?)))?;
        let cost_by_disk: BTreeMap<DiskId, i64> =
            disks.iter().map(|d| (d.disk_id, d.cost)).collect();

        let mut total: i64 = 0;
        for link in links.iter().filter(|l| l.snapshot.purpose() == purpose) {
            let cost = cost_by_disk.get(&link.disk_id).ok_or_else(|| {
                StoreError::Other(format!("association references missing disk {}", link.disk_id))
            })?;
            total = cost
                .checked_mul(link.snapshot.size())
                .and_then(|c| total.checked_add(c))
                .ok_or_else(|| {
                    StoreError::Other(format!("cost for purpose '{purpose}' out of range"))
                })?;
        }
        Ok(total)
    }

    /// Up to five queries that fit the disk's free space, highest id first.
    #[instrument(skip(self), err)]
    pub fn queries_fitting_disk(&self, disk_id: DiskId) -> InventoryResult<Vec<QueryId>> {
        let queries = self.read(|tx| match tx.disk(disk_id)? {
            Some(disk) => tx.queries_within(disk.free_space),
            None => Ok(vec![]),
        })?;

        let mut fitting: Vec<QueryId> = queries.iter().map(|q| q.query_id).collect();
        fitting.sort_unstable_by(|a, b| b.cmp(a));
        fitting.truncate(FIT_LIMIT);
        Ok(fitting)
    }

    /// Up to five queries that fit both the disk's free space and its total
    /// attached RAM, lowest id first.
    ///
    /// A disk without attached RAM has no RAM total at all (rather than a total
    /// of zero), so nothing fits it, not even zero-sized queries.
    #[instrument(skip(self), err)]
    pub fn queries_fitting_disk_and_ram(&self, disk_id: DiskId) -> InventoryResult<Vec<QueryId>> {
        let queries = self.read(|tx| {
            let Some(disk) = tx.disk(disk_id)? else {
                return Ok(vec![]);
            };
            let Some(total) = ram_total(&tx.rams_on(disk_id)?, disk_id)? else {
                return Ok(vec![]);
            };
            tx.queries_within(disk.free_space.min(total))
        })?;

        let mut fitting: Vec<QueryId> = queries.iter().map(|q| q.query_id).collect();
        fitting.sort_unstable();
        fitting.truncate(FIT_LIMIT);
        Ok(fitting)
    }

    /// Whether every memory module attached to the disk comes from the disk's
    /// company. `false` for an unknown disk; `true` for a disk with no RAM.
    #[instrument(skip(self), err)]
    pub fn is_company_exclusive(&self, disk_id: DiskId) -> InventoryResult<bool> {
        let (disk, attached) = self.read(|tx| Ok((tx.disk(disk_id)?, tx.rams_on(disk_id)?)))?;
        let Some(disk) = disk else {
            return Ok(false);
        };

        if attached.is_empty() {
            return Ok(true);
        }
        Ok(attached.iter().all(|ram| ram.company == disk.company))
    }

    /// Disks sharing at least one query with some other disk, ascending.
    #[instrument(skip(self), err)]
    pub fn conflicting_disks(&self) -> InventoryResult<Vec<DiskId>> {
        let links = self.read(|tx| tx.disk_queries())?;

        let conflicting: BTreeSet<DiskId> = hosts_by_query(&links)
            .into_values()
            .filter(|hosts| hosts.len() > 1)
            .flatten()
            .collect();
        Ok(conflicting.into_iter().collect())
    }

    /// Top five disks by number of fitting queries, then speed (desc), then id.
    #[instrument(skip(self), err)]
    pub fn most_available_disks(&self) -> InventoryResult<Vec<DiskId>> {
        let (disks, queries) = self.read(|tx| Ok((tx.disks()?, tx.queries()?)))?;
        Ok(rank_by_availability(&disks, &queries))
    }

    /// Queries "close" to `query_id`, ascending, at most ten:
    ///
    /// - every other query sharing at least half of `query_id`'s disks (at
    ///   least one shared disk is always required), and
    /// - every other query that is attached to no disk.
    #[instrument(skip(self), err)]
    pub fn close_queries(&self, query_id: QueryId) -> InventoryResult<Vec<QueryId>> {
        let (queries, links) = self.read(|tx| Ok((tx.queries()?, tx.disk_queries()?)))?;
        Ok(close_to(query_id, &queries, &links))
    }
}

/// Sum of attached RAM sizes, or `None` when nothing is attached.
fn ram_total(rams: &[Ram], disk_id: DiskId) -> Result<Option<i64>, StoreError> {
    if rams.is_empty() {
        return Ok(None);
    }
    rams.iter()
        .try_fold(0i64, |acc, ram| acc.checked_add(ram.size))
        .map(Some)
        .ok_or_else(|| StoreError::Other(format!("total RAM of disk {disk_id} out of range")))
}

fn hosts_by_query(links: &[DiskQuery]) -> BTreeMap<QueryId, BTreeSet<DiskId>> {
    let mut hosts: BTreeMap<QueryId, BTreeSet<DiskId>> = BTreeMap::new();
    for link in links {
        hosts.entry(link.query_id).or_default().insert(link.disk_id);
    }
    hosts
}

fn rank_by_availability(disks: &[Disk], queries: &[Query]) -> Vec<DiskId> {
    let mut ranked: Vec<(usize, i64, DiskId)> = disks
        .iter()
        .map(|disk| {
            let fitting = queries.iter().filter(|q| q.fits_in(disk.free_space)).count();
            (fitting, disk.speed, disk.disk_id)
        })
        .collect();

    ranked.sort_by_key(|(fitting, speed, disk_id)| (Reverse(*fitting), Reverse(*speed), *disk_id));
    ranked
        .into_iter()
        .take(RANKING_LIMIT)
        .map(|(_, _, disk_id)| disk_id)
        .collect()
}

fn close_to(query_id: QueryId, queries: &[Query], links: &[DiskQuery]) -> Vec<QueryId> {
    let hosts = hosts_by_query(links);
    let mut close = BTreeSet::new();

    // Shared-disk similarity. With no disks of its own, nothing can share one.
    if let Some(own) = hosts.get(&query_id).filter(|own| !own.is_empty()) {
        for (other, other_hosts) in &hosts {
            if *other == query_id {
                continue;
            }
            let shared = own.intersection(other_hosts).count();
            // shared >= |own| / 2, kept in integers
            if shared > 0 && 2 * shared >= own.len() {
                close.insert(*other);
            }
        }
    }

    // Queries attached to no disk at all.
    for query in queries {
        if query.query_id != query_id && !hosts.contains_key(&query.query_id) {
            close.insert(query.query_id);
        }
    }

    close.into_iter().take(CLOSE_QUERIES_LIMIT).collect()
}
