//! Readiness plumbing for the webserv event loop.
//!
//! Wraps a mio `Poll` in a descriptor-keyed [`Multiplexer`], and provides the passive
//! [`net::ListeningEndpoint`] sockets that produce client connections.

mod multiplexer;
pub mod net;
mod shutdown;

use std::os::fd::RawFd;

pub use mio::Interest;

pub use self::{
    multiplexer::{Multiplexer, MultiplexError, Readiness},
    shutdown::Shutdown,
};

/// Raw OS descriptor, used as the key for every table in the event loop.
pub type Descriptor = RawFd;
