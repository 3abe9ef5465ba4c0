//! Newline-delimited transport over standard input and output.
//!
//! Every non-empty input line is one message. Responses and event
//! notifications share a single output lock so lines never interleave.

use std::io::{self, BufRead, BufReader, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{TRANSPORT_TARGET, TransportError, TransportHandle};
use crate::dispatch::{Dispatcher, notification_line};
use crate::events::{EventSink, ServerEvent};

/// How long a read waits before the loop re-checks its stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What a source produced within one wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Raw bytes of one line. Decoding is left to the dispatcher.
    Line(Vec<u8>),
    /// Nothing arrived in time.
    Idle,
    /// The input reached end of file.
    Closed,
}

/// A line-oriented input that can be waited on with a timeout.
pub trait LineSource: Send {
    fn next_line(&mut self, wait: Duration) -> io::Result<LineEvent>;
}

/// Standard input, polled so the reader thread can observe shutdown.
pub struct StdinSource {
    reader: BufReader<io::Stdin>,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(io::stdin()),
        }
    }

    #[cfg(unix)]
    fn readable(&self, wait: Duration) -> bool {
        use std::os::fd::AsFd;

        if !self.reader.buffer().is_empty() {
            return true;
        }
        let stdin = io::stdin();
        super::poll::wait_fd_readable(stdin.as_fd(), wait)
    }

    #[cfg(not(unix))]
    fn readable(&self, _wait: Duration) -> bool {
        true
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LineSource for StdinSource {
    fn next_line(&mut self, wait: Duration) -> io::Result<LineEvent> {
        if !self.readable(wait) {
            return Ok(LineEvent::Idle);
        }
        read_line(&mut self.reader)
    }
}

/// Any buffered reader; always ready. Used for pipes and tests.
pub struct ReaderSource<R> {
    reader: R,
}

impl<R: BufRead + Send> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead + Send> LineSource for ReaderSource<R> {
    fn next_line(&mut self, _wait: Duration) -> io::Result<LineEvent> {
        read_line(&mut self.reader)
    }
}

fn read_line(reader: &mut impl BufRead) -> io::Result<LineEvent> {
    let mut line = Vec::new();
    match reader.read_until(b'\n', &mut line)? {
        0 => Ok(LineEvent::Closed),
        _ => Ok(LineEvent::Line(line)),
    }
}

/// Output shared by responses and event notifications.
#[derive(Clone)]
pub struct SharedOutput {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl SharedOutput {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Writes `line` plus a newline and flushes, under the output lock.
    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

impl EventSink for SharedOutput {
    fn publish(&self, event: &ServerEvent) {
        if let Err(error) = self.write_line(&notification_line(event)) {
            debug!(target: TRANSPORT_TARGET, event = %event.name, %error, "notification not written");
        }
    }
}

/// Starts line transports.
pub struct LineTransport;

impl LineTransport {
    /// Spawns the reader thread.
    pub fn start(
        source: Box<dyn LineSource>,
        dispatcher: Dispatcher,
        output: SharedOutput,
    ) -> Result<TransportHandle, TransportError> {
        TransportHandle::spawn("stagehand-stdio", move |shutdown| {
            run_line_loop(source, &dispatcher, &output, &shutdown);
        })
    }
}

fn run_line_loop(
    mut source: Box<dyn LineSource>,
    dispatcher: &Dispatcher,
    output: &SharedOutput,
    shutdown: &AtomicBool,
) {
    info!(target: TRANSPORT_TARGET, "line transport active");
    while !shutdown.load(Ordering::SeqCst) {
        match source.next_line(POLL_INTERVAL) {
            Ok(LineEvent::Line(line)) => {
                let message = line.trim_ascii();
                if message.is_empty() {
                    continue;
                }
                let Some(response) = dispatcher.handle(message) else {
                    continue;
                };
                if let Err(error) = output.write_line(&response) {
                    warn!(target: TRANSPORT_TARGET, %error, "cannot write response; stopping");
                    break;
                }
            }
            Ok(LineEvent::Idle) => {}
            Ok(LineEvent::Closed) => {
                info!(target: TRANSPORT_TARGET, "input closed");
                break;
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => {
                warn!(target: TRANSPORT_TARGET, %error, "input read failed; stopping");
                break;
            }
        }
    }
}
