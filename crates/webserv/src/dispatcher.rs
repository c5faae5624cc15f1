use std::{
    collections::HashMap,
    io::ErrorKind,
    net::{IpAddr, SocketAddr},
    os::fd::AsRawFd,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context as _, Error};
use mio::net::TcpStream;
use tracing::{event, instrument, Level};
use webserv_config::ServerConfig;
use webserv_http::{ReadOutcome, WriteOutcome};
use webserv_mio::{net::ListeningEndpoint, Descriptor, Interest, Multiplexer, Readiness, Shutdown};

use crate::{session::SessionStore, ConnectionTable};

/// How often expired sessions are swept out.
pub const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Default upper bound on a single poll, so idle servers still sweep sessions.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Turns one framed request into the bytes of its response.
pub trait RequestProcessor {
    fn process(
        &mut self,
        raw: &[u8],
        server: &ServerConfig,
        remote_addr: &str,
        sessions: &mut SessionStore,
    ) -> Vec<u8>;
}

impl<F> RequestProcessor for F
where
    F: FnMut(&[u8], &ServerConfig, &str, &mut SessionStore) -> Vec<u8>,
{
    fn process(
        &mut self,
        raw: &[u8],
        server: &ServerConfig,
        remote_addr: &str,
        sessions: &mut SessionStore,
    ) -> Vec<u8> {
        self(raw, server, remote_addr, sessions)
    }
}

struct Listener {
    endpoint: ListeningEndpoint,
    server: Arc<ServerConfig>,
}

/// Single-threaded readiness loop serving every configured server.
///
/// Owns all listening endpoints, client connections and sessions. Each ready descriptor is
/// drained until it would block, clients are served one request each and closed after their
/// response is written.
pub struct Dispatcher<P> {
    multiplexer: Multiplexer,
    listeners: HashMap<Descriptor, Listener>,
    clients: ConnectionTable<TcpStream>,
    sessions: SessionStore,
    processor: P,
    shutdown: Shutdown,
    poll_timeout: Option<Duration>,
    sweep_interval: Duration,
    last_sweep: Instant,
}

impl<P> Dispatcher<P>
where
    P: RequestProcessor,
{
    /// Bind a listening endpoint for every server.
    ///
    /// Fails on the first endpoint that can't be bound.
    #[instrument("Dispatcher::bind", skip_all)]
    pub fn bind(servers: Vec<ServerConfig>, processor: P) -> Result<Self, Error> {
        let mut multiplexer = Multiplexer::new()?;
        let shutdown = multiplexer.shutdown_handle()?;

        let mut listeners = HashMap::new();
        for server in servers {
            let endpoint = ListeningEndpoint::bind(IpAddr::V4(server.host), server.listen)?;
            let descriptor = endpoint.as_raw_fd();
            multiplexer.add(descriptor, Interest::READABLE)?;

            event!(
                Level::INFO,
                addr = %endpoint.local_addr(),
                server_name = %server.server_name,
                "listening"
            );

            let listener = Listener {
                endpoint,
                server: Arc::new(server),
            };
            listeners.insert(descriptor, listener);
        }

        let value = Self {
            multiplexer,
            listeners,
            clients: ConnectionTable::default(),
            sessions: SessionStore::default(),
            processor,
            shutdown,
            poll_timeout: Some(DEFAULT_POLL_TIMEOUT),
            sweep_interval: SESSION_SWEEP_INTERVAL,
            last_sweep: Instant::now(),
        };
        Ok(value)
    }

    /// Set the upper bound on a single poll, `None` to wait indefinitely.
    pub fn with_poll_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_sessions(mut self, sessions: SessionStore) -> Self {
        self.sessions = sessions;
        self
    }

    /// Addresses of the listening endpoints, in no particular order.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .values()
            .map(|listener| listener.endpoint.local_addr())
            .collect()
    }

    /// Handle for stopping the loop, from any thread.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    /// Run until shutdown is requested, then close every connection and endpoint.
    ///
    /// Errors are only returned for failures of the loop itself, problems with individual
    /// clients just close that client.
    #[instrument("Dispatcher::run", skip_all)]
    pub fn run(&mut self) -> Result<(), Error> {
        event!(Level::DEBUG, "starting event loop");

        let result = self.run_loop();
        self.close_all();

        result
    }

    fn run_loop(&mut self) -> Result<(), Error> {
        while !self.shutdown.is_requested() {
            let ready = self.multiplexer.poll(self.poll_timeout)?;

            for readiness in ready {
                if self.listeners.contains_key(&readiness.descriptor) {
                    self.accept_all(readiness.descriptor)?;
                } else {
                    self.serve_client(readiness)?;
                }
            }

            if self.last_sweep.elapsed() >= self.sweep_interval {
                let removed = self.sessions.sweep_expired();
                event!(Level::DEBUG, removed, remaining = self.sessions.len(), "swept sessions");
                self.last_sweep = Instant::now();
            }
        }

        event!(Level::INFO, "shutdown requested");
        Ok(())
    }

    fn accept_all(&mut self, descriptor: Descriptor) -> Result<(), Error> {
        let listener = self
            .listeners
            .get(&descriptor)
            .context("ready descriptor has no listener")?;

        loop {
            let (stream, remote_addr) = match listener.endpoint.accept() {
                Ok(Some(accepted)) => accepted,
                Ok(None) => return Ok(()),
                Err(error)
                    if matches!(
                        error.kind(),
                        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset
                    ) =>
                {
                    continue
                }
                Err(error) => return Err(error).context("accept() failed"),
            };

            let client = stream.as_raw_fd();
            if let Err(error) = self
                .multiplexer
                .add(client, Interest::READABLE | Interest::WRITABLE)
            {
                // Dropping the stream closes it
                event!(Level::WARN, %error, "failed to register client, dropping");
                continue;
            }

            self.clients.add(
                client,
                stream,
                remote_addr.ip().to_string(),
                listener.server.clone(),
            )?;
        }
    }

    fn serve_client(&mut self, readiness: Readiness) -> Result<(), Error> {
        let descriptor = readiness.descriptor;
        let client = self.clients.get_mut(descriptor)?;
        let connection = &mut client.connection;

        let mut done = false;

        if readiness.readable || readiness.closed {
            while !connection.is_request_complete() {
                match connection.read() {
                    Ok(ReadOutcome::Received(_)) => {}
                    Ok(ReadOutcome::WouldBlock) => break,
                    Ok(ReadOutcome::Closed) => {
                        done = true;
                        break;
                    }
                    Err(error) => {
                        event!(Level::DEBUG, %error, "read failed");
                        done = true;
                        break;
                    }
                }
            }
        }

        if !done && connection.is_request_complete() && !connection.has_response() {
            let response = self.processor.process(
                connection.request_bytes(),
                &client.server,
                connection.remote_addr(),
                &mut self.sessions,
            );
            connection.set_response(response);
        }

        if !done && connection.has_response() {
            loop {
                match connection.write() {
                    Ok(WriteOutcome::Written(_)) => {}
                    Ok(WriteOutcome::WouldBlock) => break,
                    Ok(WriteOutcome::Sent) => {
                        done = true;
                        break;
                    }
                    Err(error) => {
                        event!(Level::WARN, %error, "write failed, closing connection");
                        done = true;
                        break;
                    }
                }
            }
        }

        if done {
            self.close_client(descriptor);
        }

        Ok(())
    }

    /// Deregister first, the descriptor number may be reused as soon as it's closed.
    fn close_client(&mut self, descriptor: Descriptor) {
        self.multiplexer.remove(descriptor);

        if let Some(client) = self.clients.remove(descriptor) {
            event!(
                Level::DEBUG,
                remote_addr = client.connection.remote_addr(),
                "connection closed"
            );
        }
    }

    fn close_all(&mut self) {
        for descriptor in self.clients.descriptors() {
            self.close_client(descriptor);
        }

        for descriptor in self.listeners.keys() {
            self.multiplexer.remove(*descriptor);
        }
        self.listeners.clear();

        event!(Level::INFO, "closed all connections");
    }
}
