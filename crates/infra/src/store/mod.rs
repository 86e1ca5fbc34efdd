//! Relational store boundary.
//!
//! The repository and analytics only ever talk to a `Store`: open a transaction,
//! execute statements, read rows, commit. Two adapters ship here: an in-memory
//! store for tests/dev and a Postgres store.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use r#trait::{Statement, Store, StoreError, StoreTx};
