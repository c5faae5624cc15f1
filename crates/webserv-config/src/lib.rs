//! Virtual server configuration for webserv.
//!
//! Configuration files use a small nginx-like grammar of `server { ... }` blocks holding
//! directives and `location <path> { ... }` blocks. Parsed configuration is validated up front
//! and shared read-only while serving.

mod error;
mod method;
mod parser;
mod server;

pub use self::{
    error::ConfigError,
    method::Method,
    parser::{parse_file, parse_str},
    server::{CgiMapping, LocationConfig, Redirect, ServerConfig, MAX_BODY_SIZE_LIMIT},
};
