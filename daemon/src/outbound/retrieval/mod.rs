//! File retrieval over `http(s)`, `ftp` and `file` URLs.
//!
//! Small files are fetched into memory. Dumps and data files are spooled into
//! a temporary file that is deleted when the returned handle is dropped;
//! gzip-compressed files are inflated into a second temporary file when the
//! caller asks for decompression.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::domain::ports::{FileRetriever, LocalFile, RetrievalError};

mod ftp;
mod http;
mod spool;

use spool::{ExistingFile, Spool};

const DEFAULT_USER_AGENT: &str = concat!("irrd-mirror/", env!("CARGO_PKG_VERSION"));

/// [`FileRetriever`] dispatching on the URL scheme.
#[derive(Clone)]
pub struct RemoteFileRetriever {
    client: Client,
    timeout: Duration,
    temp_dir: Option<PathBuf>,
}

impl RemoteFileRetriever {
    /// Build a retriever whose transfers give up after `timeout`.
    ///
    /// Spooled files are created in `temp_dir`, or the system default when
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(timeout: Duration, temp_dir: Option<PathBuf>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            timeout,
            temp_dir,
        })
    }

    fn spool(&self, url: &Url) -> Result<Spool, RetrievalError> {
        Spool::create(self.temp_dir.as_deref())
            .map_err(|err| RetrievalError::local(url.as_str(), err.to_string()))
    }
}

fn local_path(url: &Url) -> Result<PathBuf, RetrievalError> {
    url.to_file_path()
        .map_err(|()| RetrievalError::unsupported_scheme(url.as_str()))
}

fn wants_gunzip(url: &Url, decompress: bool) -> bool {
    decompress && url.path().ends_with(".gz")
}

fn map_local_error(url: &Url, path: &Path, err: &io::Error) -> RetrievalError {
    if err.kind() == io::ErrorKind::NotFound {
        RetrievalError::status(url.as_str(), 404_u16)
    } else {
        RetrievalError::local(url.as_str(), format!("{}: {err}", path.display()))
    }
}

#[async_trait]
impl FileRetriever for RemoteFileRetriever {
    async fn retrieve_bytes(&self, url: &Url) -> Result<Vec<u8>, RetrievalError> {
        match url.scheme() {
            "http" | "https" => http::fetch_bytes(&self.client, url).await,
            "ftp" => ftp::fetch_bytes(url.clone(), self.timeout).await,
            "file" => {
                let path = local_path(url)?;
                tokio::fs::read(&path)
                    .await
                    .map_err(|err| map_local_error(url, &path, &err))
            }
            _ => Err(RetrievalError::unsupported_scheme(url.as_str())),
        }
    }

    async fn retrieve_to_file(
        &self,
        url: &Url,
        decompress: bool,
    ) -> Result<Box<dyn LocalFile>, RetrievalError> {
        let spool = match url.scheme() {
            "http" | "https" => {
                let mut spool = self.spool(url)?;
                http::fetch_to(&self.client, url, &mut spool).await?;
                spool
            }
            "ftp" => {
                let spool = self.spool(url)?;
                ftp::fetch_to(url.clone(), self.timeout, spool).await?
            }
            "file" => {
                let path = local_path(url)?;
                if let Err(err) = tokio::fs::metadata(&path).await {
                    return Err(map_local_error(url, &path, &err));
                }
                if !wants_gunzip(url, decompress) {
                    return Ok(Box::new(ExistingFile::new(path)));
                }
                let temp_dir = self.temp_dir.clone();
                let target = url.clone();
                return tokio::task::spawn_blocking(move || {
                    spool::gunzip_path(&path, temp_dir.as_deref())
                })
                .await
                .map_err(|err| RetrievalError::local(target.as_str(), err.to_string()))?
                .map(|spool| Box::new(spool) as Box<dyn LocalFile>)
                .map_err(|err| RetrievalError::local(target.as_str(), err.to_string()));
            }
            _ => return Err(RetrievalError::unsupported_scheme(url.as_str())),
        };

        if !wants_gunzip(url, decompress) {
            return Ok(Box::new(spool));
        }
        let temp_dir = self.temp_dir.clone();
        tokio::task::spawn_blocking(move || spool.gunzip(temp_dir.as_deref()))
            .await
            .map_err(|err| RetrievalError::local(url.as_str(), err.to_string()))?
            .map(|spool| Box::new(spool) as Box<dyn LocalFile>)
            .map_err(|err| RetrievalError::local(url.as_str(), format!("gunzip failed: {err}")))
    }
}
