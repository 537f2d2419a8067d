//! Client library for the IPCom home-automation bus gateway.
//!
//! The gateway speaks a framed binary protocol over a single TCP stream:
//! a stateful XOR cipher with a key-exchange handshake, raw encrypted
//! state snapshots intermixed with `0x23`-framed replies, and full-row
//! write commands addressed to output modules. The [`engine`] module ties
//! the pieces together into a persistent session with four cooperating
//! loops; [`cover`] layers safe dual-relay shutter control on top.

#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod config;
pub mod cover;
pub mod devicemap;
pub mod engine;
pub mod error;
pub mod net;
pub mod observer;
pub mod shadow;
pub mod snapshot;
