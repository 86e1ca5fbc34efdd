//! Inventory domain module.
//!
//! Disks, memory modules and queries, the two associations linking them, and the
//! schema checks every stored row must satisfy. Pure data and rules (no IO, no
//! storage).

pub mod association;
pub mod disk;
pub mod query;
pub mod ram;
pub mod schema;

pub use association::{DiskQuery, DiskRam, QuerySnapshot};
pub use disk::Disk;
pub use query::Query;
pub use ram::Ram;
