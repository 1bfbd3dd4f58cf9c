//! Operator controls behind `irrd-mirrorctl`.
//!
//! Each operation works on committed state only and touches one source.

use thiserror::Error;
use zeroize::Zeroizing;

use crate::domain::ports::{DatabaseHandler, DatabaseHandlerError};
use crate::domain::signature::{
    SignatureError, generate_signing_key, public_key_to_pem, signing_key_to_pem,
};
use crate::domain::{MirrorError, SourceConfig};
use crate::jobs::load_signing_key;

/// Errors raised by operator controls.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The source is not an NRTM v4 server.
    #[error("source {source_name} is not configured as an NRTM v4 server")]
    NotAServer { source_name: String },
    /// The source is not an NRTM v4 client.
    #[error("source {source_name} is not configured as an NRTM v4 client")]
    NotAClient { source_name: String },
    #[error(transparent)]
    Database(#[from] DatabaseHandlerError),
    #[error(transparent)]
    Mirror(#[from] MirrorError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
}

/// PEM encoded public keys a server source signs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPublicKeys {
    pub current: String,
    pub next: Option<String>,
}

/// Request a full reload of `source` on its next import or publication.
///
/// # Errors
///
/// Returns [`ControlError::Database`] when the flag cannot be stored.
pub async fn force_reload(
    database: &dyn DatabaseHandler,
    source: &str,
) -> Result<(), ControlError> {
    let mut txn = database.begin().await?;
    txn.set_force_reload(source, true).await?;
    txn.commit().await?;
    Ok(())
}

/// Forget the signing keys a client source learned, so the configured
/// initial key is trusted again.
///
/// Returns `false` when the source has no client state yet.
///
/// # Errors
///
/// Returns [`ControlError::NotAClient`] for sources without a client role and
/// [`ControlError::Database`] when the status cannot be updated.
pub async fn client_clear_known_keys(
    database: &dyn DatabaseHandler,
    source: &SourceConfig,
) -> Result<bool, ControlError> {
    if source.nrtm4_client.is_none() {
        return Err(ControlError::NotAClient {
            source_name: source.name.clone(),
        });
    }
    let mut txn = database.begin().await?;
    let Some(mut client) = txn
        .status_for(&source.name)
        .await?
        .and_then(|status| status.nrtm4_client)
    else {
        txn.rollback().await?;
        return Ok(false);
    };
    client.current_key = None;
    client.next_key = None;
    txn.update_client_status(&source.name, Some(&client)).await?;
    txn.commit().await?;
    Ok(true)
}

/// Public keys matching the private key files of a server source.
///
/// # Errors
///
/// Returns [`ControlError::NotAServer`] for sources without a server role and
/// [`ControlError::Mirror`] when a key file cannot be loaded.
pub fn server_public_keys(source: &SourceConfig) -> Result<ServerPublicKeys, ControlError> {
    let Some(config) = source.nrtm4_server.as_ref() else {
        return Err(ControlError::NotAServer {
            source_name: source.name.clone(),
        });
    };
    let current = load_signing_key(&config.private_key_path)?;
    let next = config
        .next_private_key_path
        .as_deref()
        .map(load_signing_key)
        .transpose()?;
    Ok(ServerPublicKeys {
        current: public_key_to_pem(&current.verifying_key())?,
        next: next
            .map(|key| public_key_to_pem(&key.verifying_key()))
            .transpose()?,
    })
}

/// A freshly generated Ed25519 private key as PKCS#8 PEM.
///
/// # Errors
///
/// Returns [`ControlError::Signature`] when encoding fails.
pub fn generate_private_key_pem() -> Result<Zeroizing<String>, ControlError> {
    Ok(signing_key_to_pem(&generate_signing_key())?)
}
