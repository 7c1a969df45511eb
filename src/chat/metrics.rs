/// Metrics for the chat server.
///
/// Call sites use these constants rather than raw strings. Values go through
/// the `metrics` facade and are served in Prometheus text format once
/// [`install_exporter`] has run; before that every call is a no-op.
use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Current number of open connections (gauge).
pub const CLIENTS_CONNECTED: &str = "murmur_clients_connected";
/// Current number of connections bound to a nickname (gauge).
pub const CLIENTS_AUTHENTICATED: &str = "murmur_clients_authenticated";
/// Total accepted connections (counter).
pub const CONNECTIONS_ACCEPTED: &str = "murmur_connections_accepted_total";
/// Total connections reaped after an I/O failure or eviction (counter).
pub const CONNECTIONS_REAPED: &str = "murmur_connections_reaped_total";
/// Total chat lines broadcast (counter).
pub const CHAT_LINES: &str = "murmur_chat_lines_total";
/// Login and registration outcomes, labelled by `outcome` (counter).
pub const AUTH_ATTEMPTS: &str = "murmur_auth_attempts_total";
/// Writes abandoned because the socket was not writable (counter).
pub const WRITES_DROPPED: &str = "murmur_writes_dropped_total";

/// Install the global Prometheus recorder with an HTTP listener on `addr`.
///
/// Must be called from inside the tokio runtime, at most once per process.
pub fn install_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    describe_gauge!(CLIENTS_CONNECTED, "Open connections");
    describe_gauge!(CLIENTS_AUTHENTICATED, "Connections bound to a nickname");
    describe_counter!(CONNECTIONS_ACCEPTED, "Accepted connections");
    describe_counter!(CONNECTIONS_REAPED, "Connections removed after a failure or eviction");
    describe_counter!(CHAT_LINES, "Chat lines broadcast");
    describe_counter!(AUTH_ATTEMPTS, "Login and registration outcomes");
    describe_counter!(WRITES_DROPPED, "Writes abandoned on a full socket");
    Ok(())
}

pub fn chat_line() {
    counter!(CHAT_LINES).increment(1);
}

pub fn auth_outcome(outcome: &'static str) {
    counter!(AUTH_ATTEMPTS, "outcome" => outcome).increment(1);
}

/// Refresh connection gauges after a tick changed the table.
pub fn connection_gauges(connected: usize, authenticated: usize) {
    gauge!(CLIENTS_CONNECTED).set(connected as f64);
    gauge!(CLIENTS_AUTHENTICATED).set(authenticated as f64);
}
