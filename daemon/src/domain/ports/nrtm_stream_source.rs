//! Driven port for NRTM v3 queries against a whois server.

use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    /// Errors surfaced while querying an NRTM v3 server.
    pub enum NrtmStreamError {
        /// The server could not be reached.
        Connect { host: String, message: String } => "cannot connect to {host}: {message}",
        /// The stream broke before the server closed it.
        Read { host: String, message: String } => "reading from {host} failed: {message}",
        /// The server did not finish in time.
        Timeout { host: String } => "timed out waiting for {host}",
    }
}

/// Port for running one NRTM v3 query.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NrtmStreamSource: Send + Sync {
    /// Send `query` and return everything the server sends until it closes
    /// the connection.
    async fn query(&self, host: &str, port: u16, query: &str) -> Result<String, NrtmStreamError>;
}
