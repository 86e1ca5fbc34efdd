use serde::{Deserialize, Serialize};

use capplan_core::{Entity, QueryId};

use crate::association::QuerySnapshot;

/// A unit of work with a resource footprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub query_id: QueryId,
    pub purpose: String,
    pub size: i64,
}

impl Query {
    pub fn new(query_id: impl Into<QueryId>, purpose: impl Into<String>, size: i64) -> Self {
        Self {
            query_id: query_id.into(),
            purpose: purpose.into(),
            size,
        }
    }

    /// The "not found" placeholder returned by sentinel-style lookups.
    pub fn bad() -> Self {
        Self {
            query_id: QueryId::new(-1),
            purpose: String::new(),
            size: -1,
        }
    }

    pub fn is_bad(&self) -> bool {
        *self == Self::bad()
    }

    /// Copy of the fields recorded when this query is attached to a disk.
    pub fn snapshot(&self) -> QuerySnapshot {
        QuerySnapshot::new(self.purpose.clone(), self.size)
    }

    /// Fit predicate: the query's size does not exceed `free_space`.
    pub fn fits_in(&self, free_space: i64) -> bool {
        self.size <= free_space
    }
}

impl Entity for Query {
    type Id = QueryId;

    fn id(&self) -> QueryId {
        self.query_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_query_is_recognised() {
        assert!(Query::bad().is_bad());
        assert!(!Query::new(1, "etl", 10).is_bad());
    }

    #[test]
    fn fit_predicate_is_inclusive() {
        let q = Query::new(1, "etl", 10);
        assert!(q.fits_in(10));
        assert!(q.fits_in(11));
        assert!(!q.fits_in(9));
    }

    #[test]
    fn snapshot_copies_purpose_and_size() {
        let q = Query::new(3, "reporting", 42);
        let snap = q.snapshot();
        assert_eq!(snap.purpose(), "reporting");
        assert_eq!(snap.size(), 42);
    }
}
