pub mod schema;

pub use schema::{CleanupConfig, Config, RetryConfig, RuntimeConfig, StoreConfig};
