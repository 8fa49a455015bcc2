pub mod clean;
pub mod config;
pub mod domain;
pub mod error;
pub mod idempotency;
pub mod logging;
pub mod manufacturer;
pub mod pipeline;
pub mod reconcile;
pub mod series;
pub mod sources;
pub mod storage;
pub mod taxonomy;
pub mod validate;
