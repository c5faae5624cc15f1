use std::{
    collections::VecDeque,
    io::{ErrorKind, Read, Write},
};

use anyhow::Error;
use webserv_http::{Connection, HttpRequest, ReadOutcome, WriteOutcome};

/// Socket stand-in, handing out reads in the given pieces.
pub struct PipeStream {
    pub reads: VecDeque<Vec<u8>>,
    pub write_limit: usize,
    pub written: Vec<u8>,
}

impl Read for PipeStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let Some(mut next) = self.reads.pop_front() else {
            return Err(ErrorKind::WouldBlock.into());
        };

        let len = next.len().min(buf.len());
        buf[..len].copy_from_slice(&next[..len]);
        if len < next.len() {
            self.reads.push_front(next.split_off(len));
        }

        Ok(len)
    }
}

impl Write for PipeStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let len = buf.len().min(self.write_limit);
        self.written.extend_from_slice(&buf[..len]);
        Ok(len)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn given_connection(pieces: &[&[u8]], write_limit: usize) -> Connection<PipeStream> {
    let stream = PipeStream {
        reads: pieces.iter().map(|piece| piece.to_vec()).collect(),
        write_limit,
        written: Vec::new(),
    };

    Connection::new(stream, "192.0.2.10")
}

/// Read until the stream runs dry, then parse what was framed.
pub fn when_request_read(connection: &mut Connection<PipeStream>) -> Result<HttpRequest, Error> {
    while let ReadOutcome::Received(_) = connection.read()? {}

    let request = HttpRequest::parse(connection.request_bytes(), connection.remote_addr())?;
    Ok(request)
}

/// Write until the full response is out, returning the number of write steps.
pub fn when_response_written(connection: &mut Connection<PipeStream>) -> Result<usize, Error> {
    let mut steps = 0;

    loop {
        steps += 1;
        match connection.write()? {
            WriteOutcome::Sent => return Ok(steps),
            WriteOutcome::Written(_) => continue,
            WriteOutcome::WouldBlock => anyhow::bail!("stream unexpectedly blocked"),
        }
    }
}
