pub mod codec;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod metrics;
pub mod protocol;
pub mod router;
pub mod server;
pub mod table;
pub mod transport;
