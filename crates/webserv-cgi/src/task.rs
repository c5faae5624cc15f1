use std::{
    io::{ErrorKind, Read, Write},
    os::fd::{AsRawFd, RawFd},
    process::Child,
    time::{Duration, Instant},
};

use mio::unix::pipe::{Receiver, Sender};
use tracing::{event, Level};

use crate::{CgiError, CgiOutput};

/// Wall-clock limit for a CGI script, measured from spawning it.
pub const DEFAULT_CGI_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep between empty reads while [`CgiTask::wait`] busy-polls the script's output.
pub const POLL_BACKOFF: Duration = Duration::from_millis(50);

/// Result of a single [`CgiTask::poll`] step.
#[derive(Debug)]
pub enum CgiPoll {
    /// The script is still running and has no more output available right now.
    Pending,
    /// The script closed its output and has been reaped.
    Ready(CgiOutput),
}

/// How a task ended, so polling it again repeats the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finished {
    Completed,
    TimedOut,
    Failed,
}

/// A running CGI script.
///
/// Input and output both go through non-blocking pipes, so the task can be stepped from an
/// event loop by watching [`CgiTask::stdout_fd`]. A task dropped before completion kills and
/// reaps its subprocess.
pub struct CgiTask {
    child: Child,
    stdin: Option<Sender>,
    input: Vec<u8>,
    written: usize,
    stdout: Receiver,
    output: Vec<u8>,
    started: Instant,
    timeout: Duration,
    finished: Option<Finished>,
}

impl CgiTask {
    /// Take over a spawned script, feeding it `input` and timing it from `started`.
    pub(crate) fn new(
        mut child: Child,
        input: Vec<u8>,
        started: Instant,
        timeout: Duration,
    ) -> Result<Self, CgiError> {
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            kill_and_reap(&mut child);
            let source = std::io::Error::other("stdio not captured");
            return Err(CgiError::Pipe { source });
        };

        let stdin = Sender::from(stdin);
        let stdout = Receiver::from(stdout);
        let nonblocking = stdin
            .set_nonblocking(true)
            .and_then(|_| stdout.set_nonblocking(true));
        if let Err(source) = nonblocking {
            kill_and_reap(&mut child);
            return Err(CgiError::Pipe { source });
        }

        // Nothing to send, close stdin right away so the script sees end of input
        let stdin = (!input.is_empty()).then_some(stdin);

        let value = Self {
            child,
            stdin,
            input,
            written: 0,
            stdout,
            output: Vec::new(),
            started,
            timeout,
            finished: None,
        };
        Ok(value)
    }

    /// Process id of the script.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Read end of the script's stdout, for readiness registration.
    pub fn stdout_fd(&self) -> RawFd {
        self.stdout.as_raw_fd()
    }

    /// Feed pending input and read whatever output is available, without blocking.
    ///
    /// Once the timeout has passed the script is killed and reaped, and its partial output is
    /// discarded. Polling a finished task repeats a timeout, other finished states report
    /// [`CgiError::Finished`].
    pub fn poll(&mut self) -> Result<CgiPoll, CgiError> {
        match self.finished {
            Some(Finished::TimedOut) => {
                return Err(CgiError::Timeout {
                    timeout: self.timeout,
                })
            }
            Some(_) => return Err(CgiError::Finished),
            None => {}
        }

        if self.started.elapsed() > self.timeout {
            event!(Level::WARN, pid = self.child.id(), "cgi script timed out, killing");
            self.finish(Finished::TimedOut);
            self.output.clear();

            return Err(CgiError::Timeout {
                timeout: self.timeout,
            });
        }

        self.feed_input();

        let mut buffer = [0; 4096];
        loop {
            match self.stdout.read(&mut buffer) {
                Ok(0) => break,
                Ok(len) => self.output.extend_from_slice(&buffer[..len]),
                Err(error) => match error.kind() {
                    ErrorKind::WouldBlock => return Ok(CgiPoll::Pending),
                    ErrorKind::Interrupted => continue,
                    _ => {
                        self.finish(Finished::Failed);
                        return Err(CgiError::Read { source: error });
                    }
                },
            }
        }

        // End of output, the script exit status doesn't affect the result
        self.stdin = None;
        let status = self.child.wait();
        self.finished = Some(Finished::Completed);
        event!(
            Level::DEBUG,
            ?status,
            bytes = self.output.len(),
            "cgi script finished"
        );

        let output = std::mem::take(&mut self.output);
        Ok(CgiPoll::Ready(CgiOutput::parse(&output)))
    }

    /// Write as much of the remaining input as the pipe takes.
    fn feed_input(&mut self) {
        let Some(stdin) = self.stdin.as_mut() else {
            return;
        };

        while self.written < self.input.len() {
            match stdin.write(&self.input[self.written..]) {
                Ok(len) => self.written += len,
                Err(error) => match error.kind() {
                    ErrorKind::WouldBlock => return,
                    ErrorKind::Interrupted => continue,
                    // The script is free to exit without reading its input
                    ErrorKind::BrokenPipe => break,
                    _ => {
                        event!(Level::WARN, ?error, "failed to write cgi input");
                        break;
                    }
                },
            }
        }

        event!(Level::TRACE, bytes = self.written, "cgi input done");
        self.stdin = None;
    }

    fn finish(&mut self, finished: Finished) {
        self.stdin = None;
        kill_and_reap(&mut self.child);
        self.finished = Some(finished);
    }

    /// Drive the task to completion, sleeping briefly whenever no output is available.
    pub fn wait(mut self) -> Result<CgiOutput, CgiError> {
        loop {
            match self.poll()? {
                CgiPoll::Ready(output) => return Ok(output),
                CgiPoll::Pending => std::thread::sleep(POLL_BACKOFF),
            }
        }
    }
}

impl Drop for CgiTask {
    fn drop(&mut self) {
        if self.finished.is_none() {
            event!(Level::DEBUG, pid = self.child.id(), "abandoning cgi script");
            kill_and_reap(&mut self.child);
        }
    }
}

fn kill_and_reap(child: &mut Child) {
    // Killing fails if the process has already exited, which is fine as long as it's reaped
    let _ = child.kill();

    if let Err(error) = child.wait() {
        event!(Level::WARN, ?error, "failed to reap cgi script");
    }
}
