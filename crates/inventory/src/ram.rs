use serde::{Deserialize, Serialize};

use capplan_core::{Entity, RamId};

/// A memory module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ram {
    pub ram_id: RamId,
    pub company: String,
    pub size: i64,
}

impl Ram {
    pub fn new(ram_id: impl Into<RamId>, company: impl Into<String>, size: i64) -> Self {
        Self {
            ram_id: ram_id.into(),
            company: company.into(),
            size,
        }
    }

    /// The "not found" placeholder returned by sentinel-style lookups.
    pub fn bad() -> Self {
        Self {
            ram_id: RamId::new(-1),
            company: String::new(),
            size: -1,
        }
    }

    pub fn is_bad(&self) -> bool {
        *self == Self::bad()
    }
}

impl Entity for Ram {
    type Id = RamId;

    fn id(&self) -> RamId {
        self.ram_id
    }
}
