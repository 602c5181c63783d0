//! [`RecordStore`](runlens_core::RecordStore) implementations.

pub mod http;
pub mod memory;

pub use http::HttpRecordStore;
pub use memory::MemoryRecordStore;
