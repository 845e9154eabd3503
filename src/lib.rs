pub mod allocator;
pub mod compactor;
pub mod config;
pub mod decision;
pub mod limits;
pub mod model;
pub mod observability;
pub mod simulation;
pub mod snapshot;
pub mod store;
pub mod wal;
