pub mod client;
pub mod config;
pub mod naming;
pub mod peer;
pub mod server;
pub mod state;
pub mod structure;
