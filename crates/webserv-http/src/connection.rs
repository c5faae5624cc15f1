use std::io::{Error, ErrorKind, Read, Write};

use tracing::{event, Level};

use crate::framing::{self, ChunkedBody};

/// Upper bound of bytes taken from the stream by a single [`Connection::read`].
pub const READ_CHUNK_SIZE: usize = 4096;

/// Result of a single read step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were appended to the inbound buffer.
    Received(usize),
    /// Nothing available right now, state unchanged.
    WouldBlock,
    /// The peer closed its side, the connection should be torn down.
    Closed,
}

/// Result of a single write step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Part of the response went out, more remains.
    Written(usize),
    /// The full response has been written.
    Sent,
    /// The stream can't take more right now, or there's no response yet.
    WouldBlock,
}

/// Per-connection buffers and framing state.
///
/// A connection serves exactly one request. Bytes are buffered until the request is framed,
/// the response is set once, and after it has been fully written the connection is done.
/// Dropping the connection drops the stream, closing its descriptor exactly once.
pub struct Connection<S> {
    stream: S,
    remote_addr: String,

    inbound: Vec<u8>,
    header_length: usize,
    body_length: usize,
    length_determined: bool,
    chunked: bool,
    malformed: bool,
    request_complete: bool,

    outbound: Vec<u8>,
    write_offset: usize,
    response_ready: bool,
    response_sent: bool,
}

impl<S> Connection<S>
where
    S: Read + Write,
{
    pub fn new(stream: S, remote_addr: impl Into<String>) -> Self {
        Self {
            stream,
            remote_addr: remote_addr.into(),

            inbound: Vec::new(),
            header_length: 0,
            body_length: 0,
            length_determined: false,
            chunked: false,
            malformed: false,
            request_complete: false,

            outbound: Vec::new(),
            write_offset: 0,
            response_ready: false,
            response_sent: false,
        }
    }

    /// Perform one bounded read from the stream, then advance framing.
    ///
    /// Errors other than "would block" are transport errors, the caller should tear down the
    /// connection just like on [`ReadOutcome::Closed`].
    pub fn read(&mut self) -> Result<ReadOutcome, Error> {
        let mut buffer = [0; READ_CHUNK_SIZE];

        let len = loop {
            match self.stream.read(&mut buffer) {
                Ok(len) => break len,
                Err(error) => match error.kind() {
                    ErrorKind::Interrupted => continue,
                    ErrorKind::WouldBlock => return Ok(ReadOutcome::WouldBlock),
                    _ => return Err(error),
                },
            }
        };

        // Read of zero means the stream has been closed
        if len == 0 {
            return Ok(ReadOutcome::Closed);
        }

        event!(Level::TRACE, count = len, "received data");
        self.inbound.extend_from_slice(&buffer[..len]);
        self.frame();

        Ok(ReadOutcome::Received(len))
    }

    /// Check if the buffered bytes form a complete request.
    ///
    /// Idempotent, and a no-op once the request is complete.
    fn frame(&mut self) {
        if self.request_complete {
            return;
        }

        let Some(header_length) = framing::header_length(&self.inbound) else {
            return;
        };

        // Lengths are determined only once, on first sight of the full header block
        if !self.length_determined {
            let headers = &self.inbound[..header_length];

            self.header_length = header_length;
            self.chunked = framing::is_chunked(headers);
            if !self.chunked {
                self.body_length = framing::content_length(headers);
            }
            self.length_determined = true;

            event!(
                Level::TRACE,
                header_length,
                chunked = self.chunked,
                body_length = self.body_length,
                "header block received"
            );
        }

        if self.chunked {
            let body = &self.inbound[self.header_length..];
            match framing::chunked_length(body) {
                ChunkedBody::Partial => return,
                ChunkedBody::Complete(_) => {}
                ChunkedBody::Malformed => {
                    event!(Level::DEBUG, "malformed chunked body");
                    self.malformed = true;
                    self.request_complete = true;
                    return;
                }
            }

            let decoded = framing::decode_chunked(body);
            self.inbound.truncate(self.header_length);
            self.inbound.extend_from_slice(&decoded);
            self.body_length = decoded.len();
            self.request_complete = true;
        } else {
            let expected = self.header_length.saturating_add(self.body_length);
            self.request_complete = self.inbound.len() >= expected;
        }

        if self.request_complete {
            event!(Level::TRACE, body_length = self.body_length, "request complete");
        }
    }

    /// Store the serialized response, to be written by [`Connection::write`].
    pub fn set_response(&mut self, response: Vec<u8>) {
        self.outbound = response;
        self.write_offset = 0;
        self.response_ready = true;
    }

    /// Attempt one write of the unsent part of the response.
    pub fn write(&mut self) -> Result<WriteOutcome, Error> {
        if self.response_sent {
            return Ok(WriteOutcome::Sent);
        }

        if !self.response_ready {
            return Ok(WriteOutcome::WouldBlock);
        }

        loop {
            let remaining = &self.outbound[self.write_offset..];
            if remaining.is_empty() {
                self.response_sent = true;
                return Ok(WriteOutcome::Sent);
            }

            match self.stream.write(remaining) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(len) => {
                    event!(Level::TRACE, count = len, "sent data");
                    self.write_offset += len;

                    if self.write_offset == self.outbound.len() {
                        self.response_sent = true;
                        return Ok(WriteOutcome::Sent);
                    }

                    return Ok(WriteOutcome::Written(len));
                }
                Err(error) => match error.kind() {
                    ErrorKind::Interrupted => continue,
                    ErrorKind::WouldBlock => return Ok(WriteOutcome::WouldBlock),
                    _ => return Err(error),
                },
            }
        }
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn is_request_complete(&self) -> bool {
        self.request_complete
    }

    pub fn has_response(&self) -> bool {
        self.response_ready
    }

    pub fn is_response_sent(&self) -> bool {
        self.response_sent
    }

    pub fn write_offset(&self) -> usize {
        self.write_offset
    }

    /// Everything buffered so far, including bytes past the framed request.
    pub fn inbound(&self) -> &[u8] {
        &self.inbound
    }

    /// The framing of the request was broken, so it's complete without any request bytes.
    pub fn is_malformed(&self) -> bool {
        self.malformed
    }

    /// The framed request, header block plus its (decoded) body.
    ///
    /// Empty until the request is complete, and for a malformed request, which no request
    /// parser accepts. Bytes past the request are not part of it.
    pub fn request_bytes(&self) -> &[u8] {
        if !self.request_complete || self.malformed {
            return &[];
        }

        let end = self
            .header_length
            .saturating_add(self.body_length)
            .min(self.inbound.len());
        &self.inbound[..end]
    }
}
