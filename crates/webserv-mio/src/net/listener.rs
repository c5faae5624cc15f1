use std::{
    net::{IpAddr, SocketAddr},
    os::fd::{AsRawFd, RawFd},
};

use mio::net::{TcpListener, TcpStream};
use thiserror::Error;
use tracing::{event, instrument, Level};

use crate::net::check_io;

/// A bound, listening socket for one virtual server.
///
/// Purely passive, it only produces accepted connections. The socket is closed when the
/// endpoint is dropped.
pub struct ListeningEndpoint {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ListeningEndpoint {
    /// Bind and listen on `host:port`, port 0 picking a free one.
    ///
    /// The error carries the OS error text, so it can be shown as is at startup.
    #[instrument("ListeningEndpoint::bind", skip_all, fields(host = %host, port = port))]
    pub fn bind(host: IpAddr, port: u16) -> Result<Self, StartupError> {
        event!(Level::DEBUG, "binding");

        // std sets SO_REUSEADDR on unix, so a just-closed port can be reused right away
        let addr = SocketAddr::new(host, port);
        let listener = std::net::TcpListener::bind(addr).map_err(|source| StartupError::Bind {
            addr,
            source,
        })?;

        listener
            .set_nonblocking(true)
            .map_err(|source| StartupError::NonBlocking { addr, source })?;

        let local_addr = listener
            .local_addr()
            .map_err(|source| StartupError::Socket { source })?;
        let listener = TcpListener::from_std(listener);

        let value = Self {
            listener,
            local_addr,
        };
        Ok(value)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept one pending connection, `None` if there's nothing pending right now.
    ///
    /// Accepted streams are already in non-blocking mode.
    pub fn accept(&self) -> Result<Option<(TcpStream, SocketAddr)>, std::io::Error> {
        let accepted = check_io(self.listener.accept())?;

        if let Some((_, remote_addr)) = &accepted {
            event!(Level::DEBUG, %remote_addr, local_addr = %self.local_addr, "stream accepted");
        }

        Ok(accepted)
    }
}

impl AsRawFd for ListeningEndpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

/// Fatal error while bringing up a listening endpoint.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("socket() failed ({source})")]
    Socket {
        #[source]
        source: std::io::Error,
    },
    #[error("bind() to {addr} failed ({source})")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("setting {addr} non-blocking failed ({source})")]
    NonBlocking {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}
