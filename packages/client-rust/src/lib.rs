//! `RunLens` client: latest-wins query slots, the paginated table
//! controller, the cross-source aggregation orchestrator and record stores.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod slot;
pub mod store;
pub mod table;

pub use aggregate::{
    AggregatedRun, AggregationOrchestrator, AggregationState, CacheStatus, DateRange, RangeError,
    ReferenceCache, ReferenceSnapshot, TimedRecord,
};
pub use config::{AggregationConfig, ClientConfig, ConfigError, ReferenceConfig, StoreConfig};
pub use error::{FetchError, FetchFailure};
pub use slot::{QuerySlot, Ticket};
pub use store::{HttpRecordStore, MemoryRecordStore};
pub use table::{TableController, TableView};
