use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use mio::Waker;
use tracing::{event, Level};

/// Process-wide run state of an event loop.
///
/// Cloned handles share the same flag. Requesting shutdown is safe from any thread, including
/// a signal handler thread, and wakes the multiplexer out of a blocking poll.
#[derive(Clone)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Shutdown {
    pub(crate) fn new(waker: Arc<Waker>) -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            waker,
        }
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);

        if let Err(error) = self.waker.wake() {
            event!(Level::WARN, ?error, "failed to wake event loop");
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}
