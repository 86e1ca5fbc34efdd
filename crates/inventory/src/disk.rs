use serde::{Deserialize, Serialize};

use capplan_core::{DiskId, Entity};

/// A storage disk.
///
/// `free_space` is derived-but-stored: it starts at the caller-supplied value and
/// moves only when a query is attached to or detached from the disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub disk_id: DiskId,
    pub company: String,
    pub speed: i64,
    pub free_space: i64,
    pub cost: i64,
}

impl Disk {
    pub fn new(
        disk_id: impl Into<DiskId>,
        company: impl Into<String>,
        speed: i64,
        free_space: i64,
        cost: i64,
    ) -> Self {
        Self {
            disk_id: disk_id.into(),
            company: company.into(),
            speed,
            free_space,
            cost,
        }
    }

    /// The "not found" placeholder returned by sentinel-style lookups.
    pub fn bad() -> Self {
        Self {
            disk_id: DiskId::new(-1),
            company: String::new(),
            speed: -1,
            free_space: -1,
            cost: -1,
        }
    }

    pub fn is_bad(&self) -> bool {
        *self == Self::bad()
    }
}

impl Entity for Disk {
    type Id = DiskId;

    fn id(&self) -> DiskId {
        self.disk_id
    }
}
