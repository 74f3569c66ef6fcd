pub mod cache;
pub mod config;
pub mod registry;
pub mod replication;
pub mod router;
pub mod server;
pub mod shadow;
pub mod write_tracker;
