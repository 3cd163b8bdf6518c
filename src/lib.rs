//! ptyhub - a relay between browser terminal viewers and local shells.
//!
//! Each viewer WebSocket is bound to a [`session::Session`]: one shell
//! process on a pseudo-terminal that outlives the connection and can be
//! reattached by id until it exits or sits idle past its timeout.

pub mod api;
pub mod config;
pub mod protocol;
pub mod pty;
pub mod session;
pub mod shutdown;
