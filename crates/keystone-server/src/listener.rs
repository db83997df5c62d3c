//! Listeners, accept loops and connection serving.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

use crate::service::RequestService;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Pause after running out of file descriptors before accepting again.
const EXHAUSTED_BACKOFF: Duration = Duration::from_millis(100);

/// A bound listener.
#[derive(Debug)]
pub(crate) enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
    /// Fails every accept with the given kind.
    #[cfg(test)]
    Failing(io::ErrorKind),
}

enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Listener {
    pub(crate) async fn bind_tcp(addr: SocketAddr) -> io::Result<Self> {
        TcpListener::bind(addr).await.map(Self::Tcp)
    }

    #[cfg(unix)]
    pub(crate) fn bind_local(path: &Path) -> io::Result<Self> {
        UnixListener::bind(path).map(Self::Unix)
    }

    #[cfg(not(unix))]
    pub(crate) fn bind_local(_path: &Path) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "local socket listeners require a Unix platform",
        ))
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Self::Unix(_) => None,
            #[cfg(test)]
            Self::Failing(_) => None,
        }
    }

    pub(crate) const fn kind(&self) -> &'static str {
        match self {
            Self::Tcp(_) => "tcp",
            #[cfg(unix)]
            Self::Unix(_) => "unix",
            #[cfg(test)]
            Self::Failing(_) => "failing",
        }
    }

    async fn accept(&self) -> io::Result<(Connection, String)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((Connection::Tcp(stream), peer.to_string()))
            }
            #[cfg(unix)]
            Self::Unix(listener) => {
                let (stream, peer) = listener.accept().await?;
                let peer = peer
                    .as_pathname()
                    .map_or_else(|| "unnamed".to_string(), |p| p.display().to_string());
                Ok((Connection::Unix(stream), peer))
            }
            #[cfg(test)]
            Self::Failing(kind) => Err(io::Error::from(*kind)),
        }
    }
}

/// What to do after a failed `accept`.
enum AcceptFailure {
    /// The peer went away during the handshake.
    Skip,
    /// Out of file descriptors; retry after a pause.
    Backoff,
    /// The listener itself is broken.
    Fatal,
}

fn classify(err: &io::Error) -> AcceptFailure {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut => AcceptFailure::Skip,
        // ENFILE and EMFILE
        _ if matches!(err.raw_os_error(), Some(23 | 24)) => AcceptFailure::Backoff,
        _ => AcceptFailure::Fatal,
    }
}

/// Accepts connections until shutdown or a fatal accept error.
pub(crate) async fn accept_loop(
    listener: Listener,
    service: Arc<RequestService>,
    keep_alive: bool,
    shutdown: ShutdownSignal,
    tracker: ConnectionTracker,
) -> io::Result<()> {
    let kind = listener.kind();
    let stop = shutdown.recv();
    tokio::pin!(stop);

    loop {
        let accepted = tokio::select! {
            biased;
            () = &mut stop => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((connection, peer)) => {
                let token = tracker.acquire();
                let service = Arc::clone(&service);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    connection.serve(service, keep_alive, shutdown, &peer).await;
                    drop(token);
                });
            }
            Err(e) => match classify(&e) {
                AcceptFailure::Skip => {
                    tracing::debug!(listener = kind, error = %e, "Connection dropped during accept");
                }
                AcceptFailure::Backoff => {
                    tracing::warn!(listener = kind, error = %e, "Out of file descriptors, pausing accept");
                    tokio::time::sleep(EXHAUSTED_BACKOFF).await;
                }
                AcceptFailure::Fatal => {
                    tracing::error!(listener = kind, error = %e, "Accept failed");
                    return Err(e);
                }
            },
        }
    }

    tracing::debug!(listener = kind, "Stopped accepting connections");
    Ok(())
}

impl Connection {
    async fn serve(
        self,
        service: Arc<RequestService>,
        keep_alive: bool,
        shutdown: ShutdownSignal,
        peer: &str,
    ) {
        match self {
            Self::Tcp(stream) => serve_io(stream, service, keep_alive, shutdown, peer).await,
            #[cfg(unix)]
            Self::Unix(stream) => serve_io(stream, service, keep_alive, shutdown, peer).await,
        }
    }
}

/// Serves HTTP/1 on one connection. On shutdown the connection finishes
/// the request in flight and then closes.
async fn serve_io<I>(
    io: I,
    service: Arc<RequestService>,
    keep_alive: bool,
    shutdown: ShutdownSignal,
    peer: &str,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let handler = service_fn(move |request| {
        let service = Arc::clone(&service);
        async move { Ok::<_, Infallible>(service.handle(request).await) }
    });

    let conn = http1::Builder::new()
        .keep_alive(keep_alive)
        .serve_connection(TokioIo::new(io), handler);
    tokio::pin!(conn);

    let stop = shutdown.recv();
    tokio::pin!(stop);
    let mut draining = false;

    let result = loop {
        tokio::select! {
            result = conn.as_mut() => break result,
            () = &mut stop, if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    };

    if let Err(e) = result {
        tracing::debug!(peer = %peer, error = %e, "Connection closed with error");
    }
}
