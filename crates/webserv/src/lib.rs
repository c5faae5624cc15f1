//! A single-process HTTP/1.1 server.
//!
//! One [`Dispatcher`] multiplexes every listening endpoint and client connection of the
//! configured servers on a single thread. Requests are handed to a [`RequestProcessor`],
//! normally the [`processor::SiteProcessor`], which serves static files, directory listings,
//! uploads, deletes and CGI scripts, and keeps per-browser [`session`] state.

mod connections;
mod dispatcher;
pub mod processor;
pub mod session;

pub use self::{
    connections::{Client, ConnectionTable, TableError},
    dispatcher::{Dispatcher, RequestProcessor, DEFAULT_POLL_TIMEOUT, SESSION_SWEEP_INTERVAL},
};
