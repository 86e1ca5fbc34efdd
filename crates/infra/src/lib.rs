//! Infrastructure layer: stores, repository, analytics, config.

pub mod analytics;
pub mod config;
pub mod error;
pub mod repository;
pub mod store;


pub use analytics::InventoryAnalytics;
pub use config::{build_store, Backend, ConfigError, StoreConfig};
pub use error::{InventoryError, InventoryResult, Outcome};
pub use repository::InventoryRepository;
