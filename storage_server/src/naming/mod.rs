//! The storage server's side of the naming server channel.

pub mod handler;
pub mod service;
