//! Requests arriving on the client listener: client data operations and the
//! receiving side of a peer COPY.

pub mod handler;
pub mod writer;
