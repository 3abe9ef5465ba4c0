//! Accept loop for the HTTP transport.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::HttpRouter;
use crate::transport::{TRANSPORT_TARGET, TransportError, TransportHandle};

const ACCEPT_TICK: Duration = Duration::from_millis(10);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// A bound, not yet accepting, HTTP listener.
#[derive(Debug)]
pub struct HttpListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl HttpListener {
    /// Binds to the first address `host:port` resolves to. Only loopback
    /// addresses are accepted.
    pub fn bind(host: &str, port: u16) -> Result<Self, TransportError> {
        let mut addrs = (host, port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Resolve {
                host: host.to_owned(),
                port,
                source,
            })?;
        let addr = addrs.next().ok_or_else(|| TransportError::ResolveEmpty {
            host: host.to_owned(),
            port,
        })?;
        if !addr.ip().is_loopback() {
            return Err(TransportError::NotLoopback { addr });
        }
        let listener =
            TcpListener::bind(addr).map_err(|source| TransportError::BindTcp { addr, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| TransportError::BindTcp { addr, source })?;
        Ok(Self { listener, addr })
    }

    /// Address actually bound, including an OS-chosen port.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Starts the accept loop. Each connection is served on its own thread.
    pub fn start(self, router: Arc<HttpRouter>) -> Result<TransportHandle, TransportError> {
        self.listener
            .set_nonblocking(true)
            .map_err(|source| TransportError::NonBlocking { source })?;
        TransportHandle::spawn("stagehand-http", move |shutdown| {
            run_accept_loop(&self, &shutdown, &router);
        })
    }
}

fn run_accept_loop(listener: &HttpListener, shutdown: &AtomicBool, router: &Arc<HttpRouter>) {
    info!(target: TRANSPORT_TARGET, addr = %listener.addr, "http listener active");
    let mut last_error = None::<io::ErrorKind>;
    let mut last_keepalive = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        match accept(&listener.listener) {
            Ok(Some(stream)) => {
                last_error = None;
                serve_on_thread(stream, router);
            }
            Ok(None) => thread::sleep(ACCEPT_TICK),
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(target: TRANSPORT_TARGET, %error, "http accept error");
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }

        router.hub().prune();
        if last_keepalive.elapsed() >= KEEPALIVE_INTERVAL {
            router.hub().keepalive();
            last_keepalive = Instant::now();
        }
    }
    info!(target: TRANSPORT_TARGET, "http listener stopped");
}

fn accept(listener: &TcpListener) -> io::Result<Option<TcpStream>> {
    match listener.accept() {
        Ok((stream, _)) => {
            stream.set_nonblocking(false)?;
            Ok(Some(stream))
        }
        Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(error) => Err(error),
    }
}

fn serve_on_thread(stream: TcpStream, router: &Arc<HttpRouter>) {
    let router = Arc::clone(router);
    let spawned = thread::Builder::new()
        .name("stagehand-http-conn".into())
        .spawn(move || router.serve(stream));
    if let Err(error) = spawned {
        warn!(target: TRANSPORT_TARGET, %error, "cannot spawn connection thread; dropping connection");
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("127.0.0.1")]
    #[case("localhost")]
    fn binds_loopback_hosts(#[case] host: &str) {
        let listener = HttpListener::bind(host, 0).expect("loopback bind");
        assert!(listener.local_addr().ip().is_loopback());
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[rstest]
    #[case("0.0.0.0")]
    #[case("192.0.2.10")]
    fn refuses_non_loopback_hosts(#[case] host: &str) {
        let error = HttpListener::bind(host, 0).expect_err("non-loopback must be refused");
        assert!(matches!(error, TransportError::NotLoopback { addr } if !addr.ip().is_loopback()));
    }
}
