//! HTTP(S) transfers.

use reqwest::{Client, Response, StatusCode};
use tracing::debug;
use url::Url;

use crate::domain::ports::RetrievalError;

use super::spool::Spool;

pub(super) async fn fetch_bytes(client: &Client, url: &Url) -> Result<Vec<u8>, RetrievalError> {
    let response = send(client, url).await?;
    let body = response
        .bytes()
        .await
        .map_err(|err| map_transport_error(url, &err))?;
    Ok(body.to_vec())
}

pub(super) async fn fetch_to(
    client: &Client,
    url: &Url,
    spool: &mut Spool,
) -> Result<u64, RetrievalError> {
    let mut response = send(client, url).await?;
    let mut written = 0_u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|err| map_transport_error(url, &err))?
    {
        spool
            .write_chunk(&chunk)
            .map_err(|err| RetrievalError::local(url.as_str(), err.to_string()))?;
        written += chunk.len() as u64;
    }
    spool
        .finish()
        .map_err(|err| RetrievalError::local(url.as_str(), err.to_string()))?;
    debug!(%url, bytes = written, "spooled remote file");
    Ok(written)
}

async fn send(client: &Client, url: &Url) -> Result<Response, RetrievalError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|err| map_transport_error(url, &err))?;
    let status = response.status();
    if !status.is_success() {
        return Err(map_status_error(url, status));
    }
    Ok(response)
}

pub(super) fn map_transport_error(url: &Url, error: &reqwest::Error) -> RetrievalError {
    if error.is_timeout() {
        RetrievalError::timeout(url.as_str())
    } else {
        RetrievalError::transport(url.as_str(), error.to_string())
    }
}

pub(super) fn map_status_error(url: &Url, status: StatusCode) -> RetrievalError {
    RetrievalError::status(url.as_str(), status.as_u16())
}
