//! NRTM v3 queries over a plain whois TCP connection.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::domain::ports::{NrtmStreamError, NrtmStreamSource};

/// [`NrtmStreamSource`] speaking to a whois server over TCP.
///
/// The query is sent as a single line; the response is everything the
/// server writes until it closes the connection. The whole exchange is
/// bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct WhoisNrtmClient {
    timeout: Duration,
}

impl WhoisNrtmClient {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

async fn exchange(host: &str, port: u16, query: &str) -> Result<String, NrtmStreamError> {
    let target = format!("{host}:{port}");
    let mut stream = TcpStream::connect((host, port))
        .await
        .map_err(|err| NrtmStreamError::connect(&target, err.to_string()))?;
    stream
        .write_all(format!("{}\n", query.trim_end()).as_bytes())
        .await
        .map_err(|err| NrtmStreamError::read(&target, err.to_string()))?;

    let mut received = Vec::new();
    stream
        .read_to_end(&mut received)
        .await
        .map_err(|err| NrtmStreamError::read(&target, err.to_string()))?;
    debug!(host = %target, query, bytes = received.len(), "NRTM query finished");
    Ok(String::from_utf8_lossy(&received).into_owned())
}

#[async_trait]
impl NrtmStreamSource for WhoisNrtmClient {
    async fn query(&self, host: &str, port: u16, query: &str) -> Result<String, NrtmStreamError> {
        tokio::time::timeout(self.timeout, exchange(host, port, query))
            .await
            .map_err(|_| NrtmStreamError::timeout(format!("{host}:{port}")))?
    }
}
