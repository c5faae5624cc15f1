#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    io::{Read, Write},
    net::{Ipv4Addr, SocketAddr, TcpStream},
    thread::JoinHandle,
    time::Duration,
};

use anyhow::{Context as _, Error};
use devutils::Site;
use webserv::{
    processor::{process_request, SiteProcessor},
    session::SessionStore,
    Dispatcher, RequestProcessor,
};
use webserv_config::{LocationConfig, ServerConfig};
use webserv_mio::Shutdown;

/// Response as seen by a client.
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub reason: String,
    pub headers: BTreeMap<String, String>,
    pub cookies: Vec<String>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn parse(raw: &[u8]) -> Result<Self, Error> {
        let split = raw
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .context("response has no header terminator")?;
        let head = std::str::from_utf8(&raw[..split])?;
        let body = raw[split + 4..].to_vec();

        let mut lines = head.split("\r\n");
        let status_line = lines.next().context("empty response")?;
        let mut parts = status_line.splitn(3, ' ');
        let _version = parts.next();
        let status = parts.next().context("no status code")?.parse()?;
        let reason = parts.next().unwrap_or_default().to_string();

        let mut headers = BTreeMap::new();
        let mut cookies = Vec::new();
        for line in lines {
            let (key, value) = line.split_once(": ").context("malformed header line")?;
            if key == "Set-Cookie" {
                cookies.push(value.to_string());
            } else {
                headers.insert(key.to_string(), value.to_string());
            }
        }

        Ok(Self {
            status,
            reason,
            headers,
            cookies,
            body,
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Id from a `WEBSERV_SESSION=<id>` cookie that isn't an expiry.
    pub fn session_id(&self) -> Option<String> {
        self.cookies
            .iter()
            .filter(|cookie| !cookie.contains("Max-Age=0"))
            .find_map(|cookie| cookie.strip_prefix("WEBSERV_SESSION="))
            .and_then(|rest| rest.split(';').next())
            .map(str::to_string)
    }
}

/// A server rooted in `site`, with a catch-all location.
pub fn given_server(site: &Site) -> ServerConfig {
    let mut server = ServerConfig {
        host: Ipv4Addr::LOCALHOST,
        listen: 0,
        root: site.root(),
        ..ServerConfig::default()
    };
    server
        .locations
        .push(LocationConfig::new("/", server.client_max_body_size));
    server
}

/// Add a location, returning it for further setup.
pub fn given_location<'a>(server: &'a mut ServerConfig, path: &str) -> &'a mut LocationConfig {
    let location = LocationConfig::new(path, server.client_max_body_size);
    server.locations.push(location);
    server.locations.last_mut().expect("just pushed")
}

pub fn when_processed(
    server: &ServerConfig,
    sessions: &mut SessionStore,
    raw: &[u8],
) -> Result<Reply, Error> {
    when_processed_from(server, sessions, "127.0.0.1", raw)
}

pub fn when_processed_from(
    server: &ServerConfig,
    sessions: &mut SessionStore,
    remote_addr: &str,
    raw: &[u8],
) -> Result<Reply, Error> {
    let response = process_request(raw, server, remote_addr, sessions);
    Reply::parse(&response)
}

/// A dispatcher running on its own thread.
pub struct Running<P> {
    pub addrs: Vec<SocketAddr>,
    pub shutdown: Shutdown,
    pub thread: JoinHandle<(Dispatcher<P>, Result<(), Error>)>,
}

impl<P> Running<P> {
    pub fn addr(&self) -> SocketAddr {
        self.addrs[0]
    }

    /// Stop the loop and wait for it to finish, handing back the dispatcher.
    pub fn stop(self) -> Result<Dispatcher<P>, Error> {
        self.shutdown.request();

        let (dispatcher, result) = self
            .thread
            .join()
            .map_err(|_| anyhow::anyhow!("dispatcher thread panicked"))?;
        result?;

        Ok(dispatcher)
    }
}

pub fn given_running(servers: Vec<ServerConfig>) -> Result<Running<SiteProcessor>, Error> {
    let dispatcher = Dispatcher::bind(servers, SiteProcessor::default())?;
    Ok(given_running_dispatcher(dispatcher))
}

pub fn given_running_dispatcher<P>(mut dispatcher: Dispatcher<P>) -> Running<P>
where
    P: RequestProcessor + Send + 'static,
{
    let addrs = dispatcher.local_addrs();
    let shutdown = dispatcher.shutdown_handle();
    let thread = std::thread::spawn(move || {
        let result = dispatcher.run();
        (dispatcher, result)
    });

    Running {
        addrs,
        shutdown,
        thread,
    }
}

/// Send raw bytes and read until the server closes the connection.
pub fn when_exchanged(addr: SocketAddr, pieces: &[&[u8]]) -> Result<Reply, Error> {
    let raw = when_exchanged_raw(addr, pieces)?;
    Reply::parse(&raw)
}

pub fn when_exchanged_raw(addr: SocketAddr, pieces: &[&[u8]]) -> Result<Vec<u8>, Error> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;

    for piece in pieces {
        stream.write_all(piece)?;
        stream.flush()?;
        std::thread::sleep(Duration::from_millis(20));
    }

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw)?;
    Ok(raw)
}
