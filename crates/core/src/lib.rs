//! FlowTest client core types and utilities

pub mod config;
pub mod error;
pub mod storage;

pub use config::ClientSettings;
pub use error::{CoreError, CoreResult};
pub use storage::{FileStorage, MemoryStorage, Storage};
