//! CGI script execution for webserv.
//!
//! A [`CgiInvocation`] snapshots what a script needs from a request. Spawning it gives a
//! [`CgiTask`], which can be stepped without blocking through [`CgiTask::poll`], or driven to
//! completion with [`CgiTask::wait`].

mod invocation;
mod output;
mod task;

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

pub use self::{
    invocation::CgiInvocation,
    output::CgiOutput,
    task::{CgiPoll, CgiTask, DEFAULT_CGI_TIMEOUT, POLL_BACKOFF},
};

/// Failure to run a CGI script to completion.
#[derive(Error, Debug)]
pub enum CgiError {
    #[error("failed to spawn cgi script {script}")]
    Spawn {
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to set up cgi pipes")]
    Pipe {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read cgi output")]
    Read {
        #[source]
        source: std::io::Error,
    },
    #[error("cgi script did not finish within {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("cgi task already finished")]
    Finished,
}

impl CgiError {
    /// HTTP status this failure should be answered with.
    pub fn status(&self) -> u16 {
        match self {
            CgiError::Timeout { .. } => 504,
            _ => 500,
        }
    }
}
