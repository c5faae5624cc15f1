use std::{collections::HashMap, sync::Arc};

use thiserror::Error;
use webserv_config::ServerConfig;
use webserv_http::Connection;
use webserv_mio::Descriptor;

/// One accepted client, and the virtual server it connected to.
pub struct Client<S> {
    pub connection: Connection<S>,
    pub server: Arc<ServerConfig>,
}

/// Live client connections, keyed by descriptor.
///
/// The OS reuses descriptor numbers, so an entry must be removed before its socket is closed.
pub struct ConnectionTable<S> {
    clients: HashMap<Descriptor, Client<S>>,
}

impl<S> Default for ConnectionTable<S> {
    fn default() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }
}

impl<S> ConnectionTable<S>
where
    S: std::io::Read + std::io::Write,
{
    /// Start tracking a freshly accepted stream.
    pub fn add(
        &mut self,
        descriptor: Descriptor,
        stream: S,
        remote_addr: impl Into<String>,
        server: Arc<ServerConfig>,
    ) -> Result<(), TableError> {
        if self.clients.contains_key(&descriptor) {
            return Err(TableError::Occupied(descriptor));
        }

        let client = Client {
            connection: Connection::new(stream, remote_addr),
            server,
        };
        self.clients.insert(descriptor, client);

        Ok(())
    }
}

impl<S> ConnectionTable<S> {
    pub fn get_mut(&mut self, descriptor: Descriptor) -> Result<&mut Client<S>, TableError> {
        self.clients
            .get_mut(&descriptor)
            .ok_or(TableError::NotFound(descriptor))
    }

    /// Stop tracking a client, handing back its state. Absent descriptors are ignored.
    pub fn remove(&mut self, descriptor: Descriptor) -> Option<Client<S>> {
        self.clients.remove(&descriptor)
    }

    pub fn contains(&self, descriptor: Descriptor) -> bool {
        self.clients.contains_key(&descriptor)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn descriptors(&self) -> Vec<Descriptor> {
        self.clients.keys().copied().collect()
    }

    /// Drop every client, closing their streams.
    pub fn clear(&mut self) {
        self.clients.clear();
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TableError {
    #[error("no connection for descriptor {0}")]
    NotFound(Descriptor),
    #[error("descriptor {0} already has a connection")]
    Occupied(Descriptor),
}
