/// Connection table — every live connection and its authentication state.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::SocketAddr;

use bytes::BytesMut;

/// Opaque connection identity.
///
/// Assigned from a per-table counter and never reused, so a client that
/// reconnects from the same address gets a fresh identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connections found dead during the current tick, removed at reap.
pub type DisconnectSet = BTreeSet<ConnId>;

/// One accepted connection.
#[derive(Debug)]
pub struct Connection<P> {
    pub peer: P,
    pub addr: SocketAddr,
    /// Bytes received but not yet decodable (a split UTF-8 sequence).
    pub inbound: BytesMut,
    /// The peer has closed its write side; stop reading from it.
    pub read_closed: bool,
    /// Bound on successful login. A connection is authenticated exactly
    /// when this is set.
    nickname: Option<String>,
}

impl<P> Connection<P> {
    fn new(peer: P, addr: SocketAddr) -> Self {
        Self {
            peer,
            addr,
            inbound: BytesMut::new(),
            read_closed: false,
            nickname: None,
        }
    }

    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.nickname.is_some()
    }
}

/// All live connections, keyed by identity in accept order.
#[derive(Debug)]
pub struct ConnectionTable<P> {
    connections: BTreeMap<ConnId, Connection<P>>,
    next_id: u64,
}

impl<P> Default for ConnectionTable<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> ConnectionTable<P> {
    pub fn new() -> Self {
        Self {
            connections: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Register a freshly accepted, unauthenticated connection.
    pub fn insert(&mut self, peer: P, addr: SocketAddr) -> ConnId {
        let id = ConnId(self.next_id);
        self.next_id += 1;
        self.connections.insert(id, Connection::new(peer, addr));
        id
    }

    pub fn get(&self, id: ConnId) -> Option<&Connection<P>> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection<P>> {
        self.connections.get_mut(&id)
    }

    pub fn remove(&mut self, id: ConnId) -> Option<Connection<P>> {
        self.connections.remove(&id)
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Connections currently bound to `nickname`.
    ///
    /// Normally zero or one; a holder evicted earlier in the same tick stays
    /// bound until reap.
    pub fn holders_of(&self, nickname: &str) -> Vec<ConnId> {
        self.connections
            .iter()
            .filter(|(_, conn)| conn.nickname() == Some(nickname))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Authenticate `id` under `nickname`. Returns `false` if `id` is gone.
    ///
    /// Uniqueness of nicknames is the caller's job: it evicts the previous
    /// holder before binding.
    pub fn bind(&mut self, id: ConnId, nickname: &str) -> bool {
        match self.connections.get_mut(&id) {
            Some(conn) => {
                conn.nickname = Some(nickname.to_owned());
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConnId, &Connection<P>)> {
        self.connections.iter().map(|(id, conn)| (*id, conn))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ConnId, &mut Connection<P>)> {
        self.connections.iter_mut().map(|(id, conn)| (*id, conn))
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn authenticated_count(&self) -> usize {
        self.connections.values().filter(|c| c.is_authenticated()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        ([127, 0, 0, 1], port).into()
    }

    #[test]
    fn ids_are_never_reused() {
        let mut table = ConnectionTable::new();
        let a = table.insert((), addr(1000));
        table.remove(a);
        let b = table.insert((), addr(1000));
        assert_ne!(a, b);
        assert!(!table.contains(a));
        assert!(table.contains(b));
    }

    #[test]
    fn new_connection_is_unauthenticated() {
        let mut table = ConnectionTable::new();
        let id = table.insert((), addr(1));
        let conn = table.get(id).unwrap();
        assert!(!conn.is_authenticated());
        assert_eq!(conn.nickname(), None);
        assert!(!conn.read_closed);
    }

    #[test]
    fn bind_authenticates() {
        let mut table = ConnectionTable::new();
        let id = table.insert((), addr(1));
        assert!(table.bind(id, "alice"));
        let conn = table.get(id).unwrap();
        assert!(conn.is_authenticated());
        assert_eq!(conn.nickname(), Some("alice"));
        assert_eq!(table.authenticated_count(), 1);
    }

    #[test]
    fn bind_unknown_id_fails() {
        let mut table: ConnectionTable<()> = ConnectionTable::new();
        let id = table.insert((), addr(1));
        table.remove(id);
        assert!(!table.bind(id, "alice"));
    }

    #[test]
    fn holders_of_finds_bound_connections() {
        let mut table = ConnectionTable::new();
        let a = table.insert((), addr(1));
        let b = table.insert((), addr(2));
        table.bind(b, "bob");
        assert_eq!(table.holders_of("bob"), vec![b]);
        assert!(table.holders_of("alice").is_empty());
        table.bind(a, "bob");
        assert_eq!(table.holders_of("bob"), vec![a, b]);
    }

    #[test]
    fn iteration_follows_accept_order() {
        let mut table = ConnectionTable::new();
        let ids: Vec<_> = (0..5).map(|i| table.insert(i, addr(i))).collect();
        assert_eq!(table.iter().map(|(id, _)| id).collect::<Vec<_>>(), ids);
        let peers: Vec<_> = table.iter().map(|(_, c)| c.peer).collect();
        assert_eq!(peers, vec![0, 1, 2, 3, 4]);
    }
}
