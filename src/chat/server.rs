/// Chat server core — the single-threaded tick loop.
///
/// One [`EventLoop`] owns every connection, both message queues and the
/// disconnect set. Each tick runs the same phases in the same order:
///
///   accept → receive → dispatch → send → reap
///
/// No phase waits on an individual peer. Reads and writes that would block
/// are skipped for this tick; a write that cannot finish is dropped, never
/// retried. The only blocking call is the credential check inside dispatch.
use std::io;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn};

use super::codec::ChunkCodec;
use super::config::ServerConfig;
use super::credentials::{CredentialStore, SqliteCredentialStore};
use super::dispatch::Dispatcher;
use super::metrics::{self as chat_metrics, CONNECTIONS_ACCEPTED, CONNECTIONS_REAPED, WRITES_DROPPED};
use super::protocol::Notice;
use super::router::Router;
use super::table::{ConnId, ConnectionTable, DisconnectSet};
use super::transport::{self, is_fatal, Acceptor, Peer, TcpAcceptor};

/// Bytes requested per read call.
const RECV_CHUNK: usize = 8192;

/// Most bytes taken from one connection in one tick. Anything beyond waits
/// in the socket for the next tick.
const RECV_BUDGET: usize = 8 * RECV_CHUNK;

/// How a batch write ended.
#[derive(Debug, PartialEq, Eq)]
enum WriteOutcome {
    Complete,
    /// The socket stopped accepting data; this many bytes were dropped.
    Truncated(usize),
}

/// Owns all chat state and drives it one tick at a time.
pub struct EventLoop<A: Acceptor, S> {
    acceptor: A,
    table: ConnectionTable<A::Peer>,
    router: Router,
    disconnected: DisconnectSet,
    store: S,
    /// Some connection hit its read budget last tick and has input left.
    backlogged: bool,
}

impl<A, S> EventLoop<A, S>
where
    A: Acceptor,
    S: CredentialStore,
{
    pub fn new(acceptor: A, store: S) -> Self {
        Self {
            acceptor,
            table: ConnectionTable::new(),
            router: Router::new(),
            disconnected: DisconnectSet::new(),
            store,
            backlogged: false,
        }
    }

    pub fn table(&self) -> &ConnectionTable<A::Peer> {
        &self.table
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn acceptor_mut(&mut self) -> &mut A {
        &mut self.acceptor
    }

    /// Run one full cycle of all phases.
    pub fn tick(&mut self) {
        self.accept();
        let inbound = self.receive();
        self.dispatch(inbound);
        self.send();
        self.reap();
    }

    /// Register every pending connection as unauthenticated.
    fn accept(&mut self) {
        loop {
            match self.acceptor.try_accept() {
                Ok(Some((peer, addr))) => {
                    let id = self.table.insert(peer, addr);
                    info!(conn = %id, %addr, "new connection");
                    counter!(CONNECTIONS_ACCEPTED).increment(1);
                }
                Ok(None) => break,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept failed: {e}");
                    break;
                }
            }
        }
    }

    /// Read what is available from every connection, up to
    /// [`RECV_BUDGET`] bytes each.
    ///
    /// Returns one decoded chunk per connection that sent anything. A chunk
    /// read before a fatal error is still returned.
    fn receive(&mut self) -> Vec<(ConnId, String)> {
        let mut inbound = Vec::new();
        let mut buf = vec![0u8; RECV_CHUNK];
        self.backlogged = false;

        for (id, conn) in self.table.iter_mut() {
            if conn.read_closed {
                continue;
            }

            let mut taken = 0;
            loop {
                if taken >= RECV_BUDGET {
                    debug!(conn = %id, taken, "read budget spent, rest waits for next tick");
                    self.backlogged = true;
                    break;
                }
                let want = RECV_CHUNK.min(RECV_BUDGET - taken);
                match conn.peer.try_recv(&mut buf[..want]) {
                    Ok(0) => {
                        debug!(conn = %id, "peer closed its write side");
                        conn.read_closed = true;
                        break;
                    }
                    Ok(n) => {
                        conn.inbound.extend_from_slice(&buf[..n]);
                        taken += n;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) if is_fatal(&e) => {
                        debug!(conn = %id, "read failed: {e}");
                        self.disconnected.insert(id);
                        break;
                    }
                    Err(e) => {
                        warn!(conn = %id, "read error: {e}");
                        break;
                    }
                }
            }

            match ChunkCodec.decode(&mut conn.inbound) {
                Ok(Some(text)) => inbound.push((id, text)),
                Ok(None) => {}
                Err(e) => {
                    warn!(conn = %id, "dropping connection: {e}");
                    conn.inbound.clear();
                    self.disconnected.insert(id);
                }
            }
        }

        inbound
    }

    fn dispatch(&mut self, inbound: Vec<(ConnId, String)>) {
        let mut dispatcher = Dispatcher {
            table: &mut self.table,
            router: &mut self.router,
            disconnected: &mut self.disconnected,
            store: &mut self.store,
        };
        for (id, text) in inbound {
            dispatcher.received(id, &text);
        }
    }

    /// Flush broadcasts to every connection, then directed batches.
    fn send(&mut self) {
        if let Some(batch) = self.router.broadcast_batch() {
            for (id, conn) in self.table.iter_mut() {
                deliver(id, &mut conn.peer, &batch, &mut self.disconnected);
            }
        }

        for (to, batch) in self.router.direct_batches() {
            // Gone since the line was queued: nothing to do.
            if let Some(conn) = self.table.get_mut(to) {
                deliver(to, &mut conn.peer, &batch, &mut self.disconnected);
            }
        }
    }

    /// Remove dead connections and queue departure notices for next tick.
    fn reap(&mut self) {
        self.router.clear();

        for id in std::mem::take(&mut self.disconnected) {
            let Some(conn) = self.table.remove(id) else {
                continue;
            };
            counter!(CONNECTIONS_REAPED).increment(1);
            match conn.nickname() {
                Some(nickname) => {
                    info!(conn = %id, nickname, "disconnected");
                    self.router.broadcast(Notice::Left(nickname).to_wire());
                }
                None => info!(conn = %id, addr = %conn.addr, "disconnected"),
            }
        }

        chat_metrics::connection_gauges(self.table.len(), self.table.authenticated_count());
    }
}

/// Write one batch to one peer, recording fatal failures.
fn deliver<P: Peer>(id: ConnId, peer: &mut P, batch: &Bytes, disconnected: &mut DisconnectSet) {
    match write_batch(peer, batch) {
        Ok(WriteOutcome::Complete) => {}
        Ok(WriteOutcome::Truncated(dropped)) => {
            debug!(conn = %id, dropped, "socket not writable, dropping output");
            counter!(WRITES_DROPPED).increment(1);
        }
        Err(e) if is_fatal(&e) => {
            debug!(conn = %id, "write failed: {e}");
            disconnected.insert(id);
        }
        Err(e) => warn!(conn = %id, "write error: {e}"),
    }
}

fn write_batch<P: Peer>(peer: &mut P, batch: &[u8]) -> io::Result<WriteOutcome> {
    let mut rest = batch;
    while !rest.is_empty() {
        match peer.try_send(rest) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => rest = &rest[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Ok(WriteOutcome::Truncated(rest.len()));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(WriteOutcome::Complete)
}

impl<S: CredentialStore> EventLoop<TcpAcceptor, S> {
    /// Tick forever, sleeping between ticks until something is ready.
    pub async fn run(mut self, idle: Duration) {
        loop {
            self.tick();
            if self.router.is_empty() && !self.backlogged {
                self.wait(idle).await;
            } else {
                tokio::task::yield_now().await;
            }
        }
    }

    /// Wait for a pending connection, a readable peer, or `idle` to pass.
    async fn wait(&mut self, idle: Duration) {
        let readable = self
            .table
            .iter()
            .filter(|(_, conn)| !conn.read_closed)
            .map(|(_, conn)| &conn.peer);

        tokio::select! {
            accepted = self.acceptor.ready() => {
                if let Err(e) = accepted {
                    warn!("accept failed: {e}");
                    tokio::time::sleep(idle).await;
                }
            }
            _ = transport::any_readable(readable), if !self.table.is_empty() => {}
            _ = tokio::time::sleep(idle) => {}
        }
    }
}

/// Open the credential store, bind the listener, and serve forever.
pub async fn run(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if let Some(addr) = config.metrics_addr {
        chat_metrics::install_exporter(addr)?;
        info!("metrics exporter listening on {addr}");
    }

    let store = SqliteCredentialStore::open(&config.database, config.hash_params())?;
    info!(database = %config.database.display(), "credential store ready");

    let acceptor = TcpAcceptor::bind(&config.bind).await?;
    info!("murmur listening on {}", acceptor.local_addr()?);

    EventLoop::new(acceptor, store).run(config.tick_interval()).await;
    Ok(())
}
