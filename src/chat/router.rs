/// Message router — per-tick staging of broadcast and directed lines.
///
/// Nothing here touches a socket. Dispatch fills the queues during a tick;
/// the send phase drains them into one batch per destination.
use bytes::Bytes;

use super::codec::encode_batch;
use super::table::{ConnId, ConnectionTable};

#[derive(Debug, Default)]
pub struct Router {
    broadcast: Vec<String>,
    direct: Vec<(ConnId, String)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a line for every connection. Empty text is dropped.
    pub fn broadcast(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.broadcast.push(text);
        }
    }

    /// Queue a line for one connection.
    ///
    /// Dropped if the text is empty or `to` is not in the table right now.
    pub fn direct<P>(&mut self, to: ConnId, text: impl Into<String>, table: &ConnectionTable<P>) {
        let text = text.into();
        if !text.is_empty() && table.contains(to) {
            self.direct.push((to, text));
        }
    }

    /// The broadcast batch for this tick, or `None` if nothing is queued.
    pub fn broadcast_batch(&self) -> Option<Bytes> {
        if self.broadcast.is_empty() {
            None
        } else {
            Some(encode_batch(&self.broadcast))
        }
    }

    /// Directed batches for this tick, one per recipient, in order of each
    /// recipient's first queued line.
    pub fn direct_batches(&self) -> Vec<(ConnId, Bytes)> {
        let mut recipients: Vec<ConnId> = Vec::new();
        for (to, _) in &self.direct {
            if !recipients.contains(to) {
                recipients.push(*to);
            }
        }

        recipients
            .into_iter()
            .map(|to| {
                let lines: Vec<&str> = self
                    .direct
                    .iter()
                    .filter(|(id, _)| *id == to)
                    .map(|(_, text)| text.as_str())
                    .collect();
                (to, encode_batch(&lines))
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn pending_broadcasts(&self) -> &[String] {
        &self.broadcast
    }

    #[cfg(test)]
    pub(crate) fn pending_directs(&self) -> &[(ConnId, String)] {
        &self.direct
    }

    pub fn is_empty(&self) -> bool {
        self.broadcast.is_empty() && self.direct.is_empty()
    }

    /// Drop everything queued. Undelivered lines are never retried.
    pub fn clear(&mut self) {
        self.broadcast.clear();
        self.direct.clear();
    }
}
