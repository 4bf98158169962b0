//! Region lock daemon for world editors working on the same spaces at once.
//!
//! Each workstation holds its own [`registry::LockRegistry`]; the [`LockDaemon`]
//! refuses locks that overlap another workstation's and pushes every change to the
//! other sessions in the same space. [`Network`] drives it from a single-threaded
//! `polling` loop.

mod collections;
pub mod config;
pub mod daemon;
pub mod error;
pub mod history;
pub mod network;
pub mod registry;
pub mod store;
pub mod types;

pub use daemon::LockDaemon;
pub use network::Network;

mod prelude {
    pub(crate) use crate::collections::*;
    pub(crate) use crate::types::*;
    pub(crate) use std::{io, time};
    pub(crate) use std::net::TcpStream;
}
