//! HTTP/1.1 message framing and codec for webserv.
//!
//! [`Connection`] buffers one client's bytes until a full request has been framed, either by
//! its declared `Content-Length` or by chunked transfer encoding. [`HttpRequest`] and
//! [`HttpResponse`] convert between those bytes and structured messages.

mod connection;
pub mod framing;
mod request;
mod response;

pub use self::{
    connection::{Connection, ReadOutcome, WriteOutcome, READ_CHUNK_SIZE},
    request::{HttpRequest, ParseError},
    response::{reason_phrase, HttpResponse},
};
