//! FTP transfers.
//!
//! `suppaftp` is blocking, so each transfer runs on the blocking pool and is
//! bounded by the retriever's timeout as a whole.

use std::io::{self, Cursor};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use url::Url;

use crate::domain::ports::RetrievalError;

use super::spool::Spool;

const ANONYMOUS: &str = "anonymous";

pub(super) async fn fetch_bytes(url: Url, timeout: Duration) -> Result<Vec<u8>, RetrievalError> {
    run_blocking(url, timeout, |url, timeout| {
        let (mut stream, path) = connect(url, timeout)?;
        let buffer: Cursor<Vec<u8>> = stream
            .retr_as_buffer(&path)
            .map_err(|err| ftp_error(url, &err))?;
        let _ = stream.quit();
        Ok(buffer.into_inner())
    })
    .await
}

pub(super) async fn fetch_to(
    url: Url,
    timeout: Duration,
    mut spool: Spool,
) -> Result<Spool, RetrievalError> {
    run_blocking(url, timeout, move |url, timeout| {
        let (mut stream, path) = connect(url, timeout)?;
        stream
            .retr(&path, |reader| {
                io::copy(reader, spool.as_file_mut()).map_err(FtpError::ConnectionError)
            })
            .map_err(|err| ftp_error(url, &err))?;
        let _ = stream.quit();
        spool
            .finish()
            .map_err(|err| RetrievalError::local(url.as_str(), err.to_string()))?;
        Ok(spool)
    })
    .await
}

async fn run_blocking<T, F>(url: Url, timeout: Duration, transfer: F) -> Result<T, RetrievalError>
where
    T: Send + 'static,
    F: FnOnce(&Url, Duration) -> Result<T, RetrievalError> + Send + 'static,
{
    let target = url.clone();
    let task = tokio::task::spawn_blocking(move || transfer(&url, timeout));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(RetrievalError::transport(target.as_str(), join.to_string())),
        Err(_) => Err(RetrievalError::timeout(target.as_str())),
    }
}

fn connect(url: &Url, timeout: Duration) -> Result<(FtpStream, String), RetrievalError> {
    let address = resolve(url)?;
    let mut stream =
        FtpStream::connect_timeout(address, timeout).map_err(|err| ftp_error(url, &err))?;
    let user = if url.username().is_empty() {
        ANONYMOUS
    } else {
        url.username()
    };
    let password = url.password().unwrap_or(ANONYMOUS);
    stream
        .login(user, password)
        .map_err(|err| ftp_error(url, &err))?;
    stream
        .transfer_type(FileType::Binary)
        .map_err(|err| ftp_error(url, &err))?;
    Ok((stream, url.path().to_owned()))
}

fn resolve(url: &Url) -> Result<SocketAddr, RetrievalError> {
    let host = url
        .host_str()
        .ok_or_else(|| RetrievalError::transport(url.as_str(), "URL has no host"))?;
    let port = url.port().unwrap_or(21);
    (host, port)
        .to_socket_addrs()
        .map_err(|err| RetrievalError::transport(url.as_str(), err.to_string()))?
        .next()
        .ok_or_else(|| RetrievalError::transport(url.as_str(), "host did not resolve"))
}

fn ftp_error(url: &Url, error: &FtpError) -> RetrievalError {
    match error {
        FtpError::UnexpectedResponse(response) if response.status.code() == 550 => {
            RetrievalError::status(url.as_str(), 404_u16)
        }
        FtpError::ConnectionError(io) if io.kind() == io::ErrorKind::TimedOut => {
            RetrievalError::timeout(url.as_str())
        }
        other => RetrievalError::transport(url.as_str(), other.to_string()),
    }
}
