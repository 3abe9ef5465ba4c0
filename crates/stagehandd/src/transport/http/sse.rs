//! Server-sent event subscribers.

use std::io::{self, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use super::response::SSE_PREAMBLE;
use crate::events::{EventSink, ServerEvent};
use crate::transport::TRANSPORT_TARGET;

const KEEPALIVE_FRAME: &[u8] = b": keepalive\n\n";
/// A subscriber that cannot take a frame within this long is dropped.
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

struct Subscriber {
    id: u64,
    stream: TcpStream,
}

impl Subscriber {
    fn send(&mut self, frame: &[u8]) -> bool {
        match self.stream.write_all(frame).and_then(|()| self.stream.flush()) {
            Ok(()) => true,
            Err(error) => {
                debug!(target: TRANSPORT_TARGET, subscriber = self.id, %error, "dropping event subscriber");
                false
            }
        }
    }

    /// Probes the socket without blocking: a zero-length peek means the
    /// peer hung up.
    fn is_alive(&self) -> bool {
        if self.stream.set_nonblocking(true).is_err() {
            return false;
        }
        let mut peeked = [0_u8; 1];
        let alive = match self.stream.peek(&mut peeked) {
            Ok(0) => false,
            Ok(_) => true,
            Err(error) => error.kind() == io::ErrorKind::WouldBlock,
        };
        self.stream.set_nonblocking(false).is_ok() && alive
    }
}

/// Connected event-stream subscribers.
#[derive(Default)]
pub struct SseHub {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl SseHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends the stream preamble and an initial keepalive, then registers
    /// the connection. Returns the subscriber id.
    pub fn subscribe(&self, mut stream: TcpStream) -> io::Result<u64> {
        stream.set_read_timeout(None)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        stream.write_all(SSE_PREAMBLE.as_bytes())?;
        stream.write_all(KEEPALIVE_FRAME)?;
        stream.flush()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push(Subscriber { id, stream });
        debug!(target: TRANSPORT_TARGET, subscriber = id, "event subscriber registered");
        Ok(id)
    }

    /// Sends a named event to every subscriber, dropping those that fail.
    /// Returns how many received it.
    pub fn broadcast(&self, event: &str, data: &str) -> usize {
        let frame = format!("event: {event}\ndata: {data}\n\n");
        let mut subscribers = self.lock();
        subscribers.retain_mut(|subscriber| subscriber.send(frame.as_bytes()));
        subscribers.len()
    }

    pub fn keepalive(&self) {
        self.lock()
            .retain_mut(|subscriber| subscriber.send(KEEPALIVE_FRAME));
    }

    /// Drops subscribers whose peer has gone. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(Subscriber::is_alive);
        before - subscribers.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for SseHub {
    fn publish(&self, event: &ServerEvent) {
        let delivered = self.broadcast(&event.name, &event.payload.to_string());
        debug!(target: TRANSPORT_TARGET, event = %event.name, delivered, "event broadcast");
    }
}
