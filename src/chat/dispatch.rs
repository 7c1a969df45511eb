/// Command interpreter — decides what a received chunk means.
///
/// Authenticated connections only ever chat. Unauthenticated connections
/// may only `login` or `register`; anything else is ignored without a reply.
use tracing::{debug, info, warn};

use super::credentials::{CredentialStore, StoreError};
use super::metrics;
use super::protocol::{Notice, Reply, Request};
use super::router::Router;
use super::table::{ConnId, ConnectionTable, DisconnectSet};

/// Exclusive access to the loop state that dispatch may change.
pub struct Dispatcher<'a, P, S> {
    pub table: &'a mut ConnectionTable<P>,
    pub router: &'a mut Router,
    pub disconnected: &'a mut DisconnectSet,
    pub store: &'a mut S,
}

impl<P, S: CredentialStore> Dispatcher<'_, P, S> {
    /// Handle everything `from` sent this tick.
    pub fn received(&mut self, from: ConnId, text: &str) {
        let Some(conn) = self.table.get(from) else {
            return;
        };

        if let Some(nickname) = conn.nickname() {
            if !text.is_empty() {
                let line = Notice::Chat { nickname, text }.to_wire();
                self.router.broadcast(line);
                metrics::chat_line();
            }
            return;
        }

        match Request::parse(text) {
            Some(Request::Login { login, password }) => self.login(from, &login, &password),
            Some(Request::Register { login, password }) => {
                self.register(from, &login, &password)
            }
            None => debug!(conn = %from, "ignoring input from unauthenticated connection"),
        }
    }

    /// Check credentials and bind the nickname on success.
    ///
    /// Any other connection holding the same nickname is evicted: it goes
    /// into the disconnect set and is reaped at the end of this tick.
    pub fn login(&mut self, from: ConnId, login: &str, password: &str) {
        let record = match self.store.find(login) {
            Ok(record) => record,
            Err(e) => {
                warn!(conn = %from, login, "credential lookup failed: {e}");
                return;
            }
        };

        let record = match record {
            Some(record) if self.store.verify(&record, password) => record,
            _ => {
                info!(conn = %from, login, "login rejected");
                metrics::auth_outcome("invalid");
                self.router.direct(from, Reply::InvalidCredentials.as_str(), self.table);
                return;
            }
        };

        for holder in self.table.holders_of(&record.login) {
            if holder != from {
                info!(conn = %holder, nickname = %record.login, "evicting previous session");
                self.disconnected.insert(holder);
            }
        }

        if !self.table.bind(from, &record.login) {
            return;
        }

        if let Err(e) = self.store.touch_last_seen(record.id) {
            warn!(conn = %from, login, "failed to record last seen: {e}");
        }

        info!(conn = %from, nickname = %record.login, "logged in");
        metrics::auth_outcome("login");
        self.router.direct(from, Reply::LoggedIn.as_str(), self.table);
        self.router.broadcast(Notice::Joined(&record.login).to_wire());
    }

    /// Create a credential record, then log in with it.
    pub fn register(&mut self, from: ConnId, login: &str, password: &str) {
        let taken = match self.store.find(login) {
            Ok(existing) => existing.is_some(),
            Err(e) => {
                warn!(conn = %from, login, "credential lookup failed: {e}");
                return;
            }
        };

        if !taken {
            match self.store.create(login, password) {
                Ok(_) => {
                    info!(conn = %from, login, "registered");
                    metrics::auth_outcome("register");
                    self.router.direct(from, Reply::Registered.as_str(), self.table);
                    self.login(from, login, password);
                    return;
                }
                Err(StoreError::Duplicate(_)) => {}
                Err(e) => {
                    warn!(conn = %from, login, "failed to create credentials: {e}");
                    return;
                }
            }
        }

        info!(conn = %from, login, "registration rejected: login taken");
        metrics::auth_outcome("taken");
        self.router.direct(from, Reply::LoginTaken.as_str(), self.table);
    }
}
