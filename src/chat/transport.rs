/// Non-blocking transport seam for the event loop.
///
/// The loop never awaits a single peer. It asks each peer for whatever is
/// ready right now and treats `WouldBlock` as "nothing this tick". Peers are
/// non-blocking std sockets registered with the runtime through [`AsyncFd`]:
/// reads and writes are plain syscalls, and the reactor is only consulted
/// when the loop waits between ticks.
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::task::{Context, Poll};

use futures::future::{self, FutureExt};
use futures::task::noop_waker_ref;
use tokio::io::unix::AsyncFd;
use tokio::net::{TcpListener, TcpStream};

/// A connected peer that can be read and written without blocking.
pub trait Peer {
    /// Read what is available. `Ok(0)` means the peer closed its side.
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write as much of `buf` as fits right now.
    fn try_send(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// A listening endpoint polled once per tick.
pub trait Acceptor {
    type Peer: Peer;

    /// Accept one pending connection, or `None` if nothing is waiting.
    fn try_accept(&mut self) -> io::Result<Option<(Self::Peer, SocketAddr)>>;
}

/// An accepted TCP connection.
///
/// Holds the socket outside tokio's stream types so every read and write
/// hits the kernel. A freshly accepted socket is writable at once, with no
/// reactor turn in between.
#[derive(Debug)]
pub struct TcpPeer {
    fd: AsyncFd<std::net::TcpStream>,
}

impl TcpPeer {
    /// Take over a tokio stream. Must run inside the runtime.
    pub fn from_tokio(stream: TcpStream) -> io::Result<Self> {
        let stream = stream.into_std()?;
        stream.set_nonblocking(true)?;
        Ok(Self {
            fd: AsyncFd::new(stream)?,
        })
    }
}

impl Peer for TcpPeer {
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.fd.get_mut().read(buf)
    }

    fn try_send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.fd.get_mut().write(buf)
    }
}

/// Errors that end a connection. Everything else is retried next tick.
pub fn is_fatal(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
            | io::ErrorKind::InvalidData
    )
}

/// Tokio listener adapted to per-tick polling.
///
/// Connections accepted while the loop waits for readiness are parked in
/// `backlog` and handed out by the next accept phase.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    backlog: VecDeque<(TcpStream, SocketAddr)>,
}

impl TcpAcceptor {
    pub async fn bind(addr: &str) -> io::Result<Self> {
        Ok(Self::new(TcpListener::bind(addr).await?))
    }

    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            backlog: VecDeque::new(),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Wait until a connection is pending and park it in the backlog.
    ///
    /// Cancel-safe: dropping the future before it completes loses nothing.
    pub async fn ready(&mut self) -> io::Result<()> {
        let pair = self.listener.accept().await?;
        self.backlog.push_back(pair);
        Ok(())
    }

    fn next_pending(&mut self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        if let Some(pair) = self.backlog.pop_front() {
            return Ok(Some(pair));
        }
        let mut cx = Context::from_waker(noop_waker_ref());
        match self.listener.poll_accept(&mut cx) {
            Poll::Ready(Ok(pair)) => Ok(Some(pair)),
            Poll::Ready(Err(e)) => Err(e),
            Poll::Pending => Ok(None),
        }
    }
}

impl Acceptor for TcpAcceptor {
    type Peer = TcpPeer;

    fn try_accept(&mut self) -> io::Result<Option<(TcpPeer, SocketAddr)>> {
        match self.next_pending()? {
            Some((stream, addr)) => Ok(Some((TcpPeer::from_tokio(stream)?, addr))),
            None => Ok(None),
        }
    }
}

/// Resolve once any of `peers` becomes readable.
///
/// The winner's readiness is cleared before returning; the tick that follows
/// reads its socket directly, and the next edge from the reactor re-arms it.
/// Never resolves for an empty set; callers bound the wait with a timer.
pub async fn any_readable<'a, I>(peers: I)
where
    I: IntoIterator<Item = &'a TcpPeer>,
{
    let waits: Vec<_> = peers.into_iter().map(|p| p.fd.readable().boxed()).collect();
    if waits.is_empty() {
        future::pending::<()>().await;
    } else if let (Ok(mut guard), _, _) = future::select_all(waits).await {
        guard.clear_ready();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn pair() -> (TcpStream, TcpPeer) {
        let mut acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
        let addr = acceptor.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        acceptor.ready().await.unwrap();
        let (peer, _) = acceptor.try_accept().unwrap().unwrap();
        (client, peer)
    }

    #[test]
    fn fatal_error_kinds() {
        assert!(is_fatal(&io::ErrorKind::ConnectionReset.into()));
        assert!(is_fatal(&io::ErrorKind::BrokenPipe.into()));
        assert!(!is_fatal(&io::ErrorKind::WouldBlock.into()));
        assert!(!is_fatal(&io::ErrorKind::Interrupted.into()));
    }

    #[tokio::test]
    async fn accept_is_non_blocking() {
        let mut acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
        assert!(acceptor.try_accept().unwrap().is_none());

        let addr = acceptor.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        acceptor.ready().await.unwrap();
        let (_peer, from) = acceptor.try_accept().unwrap().unwrap();
        assert_eq!(from.ip(), addr.ip());
        assert!(acceptor.try_accept().unwrap().is_none());
    }

    #[tokio::test]
    async fn fresh_peer_is_writable_immediately() {
        let (mut client, mut peer) = pair().await;
        assert_eq!(peer.try_send(b"alice connected").unwrap(), 15);

        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"alice connected");
    }

    #[tokio::test]
    async fn peer_reads_what_is_available() {
        let (mut client, mut peer) = pair().await;

        let mut buf = [0u8; 64];
        let err = peer.try_recv(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        client.write_all(b"login alice pw1").await.unwrap();
        let n = loop {
            any_readable([&peer]).await;
            match peer.try_recv(&mut buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => panic!("read failed: {e}"),
            }
        };
        assert_eq!(&buf[..n], b"login alice pw1");
    }

    #[tokio::test]
    async fn closed_client_reads_as_eof() {
        let (client, mut peer) = pair().await;
        drop(client);

        let mut buf = [0u8; 16];
        let n = loop {
            any_readable([&peer]).await;
            match peer.try_recv(&mut buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => panic!("read failed: {e}"),
            }
        };
        assert_eq!(n, 0);
    }
}
