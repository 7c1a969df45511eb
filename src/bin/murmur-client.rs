/// murmur-client — interactive terminal client for the chat server.
///
/// Typed lines go to the server as-is (no terminator); whatever the server
/// sends back is printed to stdout, one received chunk per line.
use clap::Parser;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, warn};

use murmur::chat::codec::ChunkCodec;
use murmur::chat::config::ClientConfig;
use murmur::chat::protocol::BANNER;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let config = ClientConfig::parse();
    let stream = TcpStream::connect(&config.server).await?;
    debug!(server = %config.server, "connected");
    println!("{BANNER}");

    let (reader, mut writer) = stream.into_split();
    let mut incoming = FramedRead::new(reader, ChunkCodec);

    tokio::select! {
        result = forward_stdin(&mut writer) => {
            if let Err(e) = result {
                warn!("send failed: {e}");
            }
        }
        _ = async {
            while let Some(chunk) = incoming.next().await {
                match chunk {
                    Ok(text) => println!("{text}"),
                    Err(e) => {
                        warn!("receive failed: {e}");
                        break;
                    }
                }
            }
        } => {
            debug!("server closed the connection");
        }
    }

    // A pending stdin read cannot be cancelled and would hold up runtime
    // shutdown until the user presses enter.
    std::process::exit(0)
}

/// Copy stdin lines to the server until stdin ends.
async fn forward_stdin<W>(writer: &mut W) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    W: AsyncWrite + Unpin,
{
    let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    while let Some(line) = lines.next().await {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        writer.write_all(line.as_bytes()).await?;
    }
    Ok(())
}
