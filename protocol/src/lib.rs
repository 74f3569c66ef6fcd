pub mod ack;
pub mod backup;
pub mod command;
pub mod data;
pub mod node_chain;
pub mod registration;
pub mod reply;
