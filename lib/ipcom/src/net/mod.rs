//! Wire-level building blocks: the receive window, the frame codec, the
//! command builders, the session handshake and the inbound demultiplexer.

pub mod buffer;
pub mod command;
pub mod frame;
pub mod parser;
pub mod session;
