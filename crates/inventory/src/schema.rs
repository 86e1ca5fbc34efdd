//! Row-level check constraints.
//!
//! These mirror the `CHECK` clauses of the relational schema. A store that cannot
//! express check constraints natively (the in-memory store) runs them on every
//! write; the Postgres schema declares the same rules in DDL.

use capplan_core::{DomainError, DomainResult};

use crate::{Disk, Query, Ram};

pub fn check_query(query: &Query) -> DomainResult<()> {
    if !query.query_id.is_positive() {
        return Err(DomainError::validation("query id must be positive"));
    }
    if query.size < 0 {
        return Err(DomainError::validation("query size cannot be negative"));
    }
    Ok(())
}

pub fn check_disk(disk: &Disk) -> DomainResult<()> {
    if !disk.disk_id.is_positive() {
        return Err(DomainError::validation("disk id must be positive"));
    }
    if disk.speed <= 0 {
        return Err(DomainError::validation("disk speed must be positive"));
    }
    if disk.cost <= 0 {
        return Err(DomainError::validation("disk cost must be positive"));
    }
    check_free_space(disk.free_space)
}

pub fn check_ram(ram: &Ram) -> DomainResult<()> {
    if !ram.ram_id.is_positive() {
        return Err(DomainError::validation("ram id must be positive"));
    }
    if ram.size <= 0 {
        return Err(DomainError::validation("ram size must be positive"));
    }
    Ok(())
}

/// Free space is non-negative at rest; this runs after every adjustment too.
pub fn check_free_space(free_space: i64) -> DomainResult<()> {
    if free_space < 0 {
        return Err(DomainError::validation("disk free space cannot be negative"));
    }
    Ok(())
}
