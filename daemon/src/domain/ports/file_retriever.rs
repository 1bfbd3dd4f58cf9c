//! Driven port for fetching remote files by URL.
//!
//! Adapters decide which schemes they support (`http`, `https`, `ftp`,
//! `file`). Small files come back in memory; large ones land in a local
//! file the caller can stream from.

use std::io::{self, Read};

use async_trait::async_trait;
use url::Url;

use super::define_port_error;

define_port_error! {
    /// Errors surfaced while retrieving a file.
    pub enum RetrievalError {
        /// The URL scheme is not supported by the adapter.
        UnsupportedScheme { url: String } => "unsupported URL scheme: {url}",
        /// The transfer failed.
        Transport { url: String, message: String } => "failed to retrieve {url}: {message}",
        /// The remote answered with an error status.
        Status { url: String, status: u16 } => "retrieving {url} returned status {status}",
        /// The transfer did not finish in time.
        Timeout { url: String } => "timed out retrieving {url}",
        /// The file could not be stored or decompressed locally.
        Local { url: String, message: String } => "failed to store {url} locally: {message}",
    }
}

/// A retrieved file held on local storage until dropped.
pub trait LocalFile: Send + Sync {
    /// Open the file from the beginning.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be opened.
    fn open(&self) -> io::Result<Box<dyn Read + Send>>;
}

/// Port for fetching files.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileRetriever: Send + Sync {
    /// Fetch the whole file into memory.
    async fn retrieve_bytes(&self, url: &Url) -> Result<Vec<u8>, RetrievalError>;

    /// Fetch the file to local storage, gunzipping it when `decompress` is
    /// set and the URL path ends in `.gz`.
    async fn retrieve_to_file(
        &self,
        url: &Url,
        decompress: bool,
    ) -> Result<Box<dyn LocalFile>, RetrievalError>;
}

/// In-memory [`LocalFile`].
#[derive(Debug, Clone, Default)]
pub struct BufferedFile(pub Vec<u8>);

impl LocalFile for BufferedFile {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(io::Cursor::new(self.0.clone())))
    }
}
