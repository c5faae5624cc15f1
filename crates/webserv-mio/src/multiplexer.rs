use std::{
    collections::HashMap,
    io::ErrorKind,
    sync::Arc,
    time::Duration,
};

use mio::{unix::SourceFd, Events, Interest, Poll, Token, Waker};
use thiserror::Error;
use tracing::{event, Level};

use crate::{Descriptor, Shutdown};

/// Token reserved for the shutdown waker, never handed out to a descriptor.
const WAKE_TOKEN: Token = Token(usize::MAX);

/// Descriptor-keyed readiness multiplexer.
///
/// Registering a descriptor switches it to non-blocking mode. Entries remember their
/// registration order, and ready descriptors are always reported in that order.
pub struct Multiplexer {
    poll: Poll,
    events: Events,
    entries: HashMap<Descriptor, Entry>,
    next_order: u64,
    shutdown: Option<Shutdown>,
}

struct Entry {
    order: u64,
    interest: Interest,
}

/// Returned event mask of one ready descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub descriptor: Descriptor,
    pub readable: bool,
    pub writable: bool,
    /// The peer closed its side, or the descriptor is in an error state.
    pub closed: bool,
}

impl Multiplexer {
    pub fn new() -> Result<Self, MultiplexError> {
        let poll = Poll::new().map_err(MultiplexError::Create)?;

        let value = Self {
            poll,
            events: Events::with_capacity(1024),
            entries: HashMap::new(),
            next_order: 0,
            shutdown: None,
        };
        Ok(value)
    }

    /// Put `descriptor` in non-blocking mode and register it for readiness notification.
    ///
    /// A descriptor that can't be made non-blocking is not registered.
    pub fn add(&mut self, descriptor: Descriptor, interest: Interest) -> Result<(), MultiplexError> {
        if self.entries.contains_key(&descriptor) {
            return Err(MultiplexError::AlreadyRegistered(descriptor));
        }

        set_nonblocking(descriptor)
            .map_err(|source| MultiplexError::NonBlocking { descriptor, source })?;

        self.poll
            .registry()
            .register(&mut SourceFd(&descriptor), token(descriptor), interest)
            .map_err(|source| MultiplexError::Register { descriptor, source })?;

        let entry = Entry {
            order: self.next_order,
            interest,
        };
        self.next_order += 1;
        self.entries.insert(descriptor, entry);

        event!(Level::TRACE, descriptor, "registered descriptor");

        Ok(())
    }

    /// Stop watching `descriptor`. Does nothing if it isn't registered.
    pub fn remove(&mut self, descriptor: Descriptor) {
        if self.entries.remove(&descriptor).is_none() {
            return;
        }

        // The descriptor may already be closed, in which case the kernel dropped it for us
        let result = self
            .poll
            .registry()
            .deregister(&mut SourceFd(&descriptor));
        if let Err(error) = result {
            event!(Level::TRACE, descriptor, ?error, "deregister failed");
        }
    }

    /// Replace the watched event set of a registered descriptor.
    pub fn set_interest(
        &mut self,
        descriptor: Descriptor,
        interest: Interest,
    ) -> Result<(), MultiplexError> {
        let entry = self
            .entries
            .get_mut(&descriptor)
            .ok_or(MultiplexError::NotRegistered(descriptor))?;

        self.poll
            .registry()
            .reregister(&mut SourceFd(&descriptor), token(descriptor), interest)
            .map_err(|source| MultiplexError::Register { descriptor, source })?;
        entry.interest = interest;

        Ok(())
    }

    pub fn contains(&self, descriptor: Descriptor) -> bool {
        self.entries.contains_key(&descriptor)
    }

    pub fn interest(&self, descriptor: Descriptor) -> Option<Interest> {
        self.entries.get(&descriptor).map(|entry| entry.interest)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Descriptors currently registered, in registration order.
    pub fn descriptors(&self) -> Vec<Descriptor> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.order);
        entries.into_iter().map(|(descriptor, _)| *descriptor).collect()
    }

    /// Get the shutdown handle of this multiplexer, creating its waker on first use.
    pub fn shutdown_handle(&mut self) -> Result<Shutdown, MultiplexError> {
        if let Some(shutdown) = &self.shutdown {
            return Ok(shutdown.clone());
        }

        let waker = Waker::new(self.poll.registry(), WAKE_TOKEN).map_err(MultiplexError::Waker)?;
        let shutdown = Shutdown::new(Arc::new(waker));
        self.shutdown = Some(shutdown.clone());

        Ok(shutdown)
    }

    /// Block until at least one descriptor is ready, the timeout expires, or the poll gets
    /// interrupted.
    ///
    /// Interruption by a signal or a shutdown wake is not an error, it returns an empty list.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<Readiness>, MultiplexError> {
        if let Err(error) = self.poll.poll(&mut self.events, timeout) {
            if error.kind() == ErrorKind::Interrupted {
                event!(Level::TRACE, "poll interrupted");
                return Ok(Vec::new());
            }

            return Err(MultiplexError::Poll(error));
        }

        let mut ready = Vec::new();
        for event in self.events.iter() {
            if event.token() == WAKE_TOKEN {
                event!(Level::TRACE, "woken");
                continue;
            }

            let descriptor = event.token().0 as Descriptor;

            // Events for a descriptor removed earlier in the same batch are stale
            let Some(entry) = self.entries.get(&descriptor) else {
                continue;
            };

            let readiness = Readiness {
                descriptor,
                readable: event.is_readable(),
                writable: event.is_writable(),
                closed: event.is_read_closed() || event.is_error(),
            };
            ready.push((entry.order, readiness));
        }

        ready.sort_by_key(|(order, _)| *order);
        Ok(ready.into_iter().map(|(_, readiness)| readiness).collect())
    }
}

fn token(descriptor: Descriptor) -> Token {
    Token(descriptor as usize)
}

fn set_nonblocking(descriptor: Descriptor) -> Result<(), std::io::Error> {
    // SAFETY: fcntl only inspects and updates the descriptor's status flags
    unsafe {
        let flags = libc::fcntl(descriptor, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }

        if flags & libc::O_NONBLOCK == 0
            && libc::fcntl(descriptor, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0
        {
            return Err(std::io::Error::last_os_error());
        }
    }

    Ok(())
}

#[derive(Error, Debug)]
pub enum MultiplexError {
    #[error("poll creation failed ({0})")]
    Create(#[source] std::io::Error),
    #[error("poll() failed ({0})")]
    Poll(#[source] std::io::Error),
    #[error("registering descriptor {descriptor} failed ({source})")]
    Register {
        descriptor: Descriptor,
        #[source]
        source: std::io::Error,
    },
    #[error("setting descriptor {descriptor} non-blocking failed ({source})")]
    NonBlocking {
        descriptor: Descriptor,
        #[source]
        source: std::io::Error,
    },
    #[error("descriptor {0} is already registered")]
    AlreadyRegistered(Descriptor),
    #[error("descriptor {0} is not registered")]
    NotRegistered(Descriptor),
    #[error("waker creation failed ({0})")]
    Waker(#[source] std::io::Error),
}
