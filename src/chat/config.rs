/// Command-line and environment configuration.
///
/// Every flag can also be set through a `MURMUR_*` environment variable, so
/// container deployments need no arguments at all.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use super::credentials::HashParams;

/// Chat server settings.
#[derive(Debug, Clone, Parser)]
#[command(name = "murmur", version, about = "Multi-client text chat server")]
pub struct ServerConfig {
    /// Address to listen on.
    #[arg(long, env = "MURMUR_BIND", default_value = "0.0.0.0:6780")]
    pub bind: String,

    /// SQLite database holding user credentials.
    #[arg(long, env = "MURMUR_DATABASE", default_value = "db.sqlite3")]
    pub database: PathBuf,

    /// Longest idle wait between ticks, in milliseconds.
    #[arg(long, env = "MURMUR_TICK_MS", default_value_t = 50)]
    pub tick_ms: u64,

    /// PBKDF2 rounds for newly hashed passwords. Changing this breaks
    /// logins for existing records.
    #[arg(long, env = "MURMUR_HASH_ITERATIONS", default_value_t = 100_000)]
    pub hash_iterations: u32,

    /// Serve Prometheus metrics on this address. Off when unset.
    #[arg(long, env = "MURMUR_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

impl ServerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn hash_params(&self) -> HashParams {
        HashParams {
            iterations: self.hash_iterations,
            ..HashParams::default()
        }
    }
}

/// Interactive client settings.
#[derive(Debug, Clone, Parser)]
#[command(name = "murmur-client", version, about = "Interactive murmur chat client")]
pub struct ClientConfig {
    /// Server address.
    #[arg(long, env = "MURMUR_SERVER", default_value = "localhost:6780")]
    pub server: String,
}
