//! Compact JWS signing of the Update Notification File.
//!
//! The notification file is a JWS compact serialisation
//! (`header.payload.signature`, each part base64url without padding) signed
//! with Ed25519. Keys are exchanged as PEM: PKCS#8 for private keys and SPKI
//! for public keys.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

/// Only algorithm accepted and produced.
pub const JWS_ALGORITHM: &str = "EdDSA";

/// Errors from key handling and JWS processing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// A PEM key could not be decoded.
    #[error("invalid {kind} key: {message}")]
    InvalidKey {
        /// `public` or `private`.
        kind: &'static str,
        /// Decoder diagnostic.
        message: String,
    },
    /// A key could not be encoded.
    #[error("cannot encode key: {message}")]
    Encode {
        /// Encoder diagnostic.
        message: String,
    },
    /// The JWS is not a well-formed compact serialisation.
    #[error("malformed JWS: {message}")]
    Malformed {
        /// What was wrong.
        message: String,
    },
    /// The JWS header names an algorithm other than EdDSA.
    #[error("unsupported JWS algorithm `{algorithm}`")]
    UnsupportedAlgorithm {
        /// Algorithm named by the header.
        algorithm: String,
    },
    /// The signature does not verify under the given key.
    #[error("JWS signature does not verify")]
    BadSignature,
}

#[derive(Debug, Serialize, Deserialize)]
struct JwsHeader {
    alg: String,
}

/// Generate a fresh signing key.
#[must_use]
pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Decode a PKCS#8 PEM private key.
///
/// # Errors
///
/// Returns [`SignatureError::InvalidKey`] when the PEM is not an Ed25519 key.
pub fn signing_key_from_pem(pem: &str) -> Result<SigningKey, SignatureError> {
    SigningKey::from_pkcs8_pem(pem.trim()).map_err(|err| SignatureError::InvalidKey {
        kind: "private",
        message: err.to_string(),
    })
}

/// Encode a private key as PKCS#8 PEM.
///
/// # Errors
///
/// Returns [`SignatureError::Encode`] when encoding fails.
pub fn signing_key_to_pem(key: &SigningKey) -> Result<Zeroizing<String>, SignatureError> {
    key.to_pkcs8_pem(LineEnding::LF)
        .map_err(|err| SignatureError::Encode {
            message: err.to_string(),
        })
}

/// Decode an SPKI PEM public key.
///
/// # Errors
///
/// Returns [`SignatureError::InvalidKey`] when the PEM is not an Ed25519 key.
pub fn public_key_from_pem(pem: &str) -> Result<VerifyingKey, SignatureError> {
    VerifyingKey::from_public_key_pem(pem.trim()).map_err(|err| SignatureError::InvalidKey {
        kind: "public",
        message: err.to_string(),
    })
}

/// Encode a public key as SPKI PEM.
///
/// # Errors
///
/// Returns [`SignatureError::Encode`] when encoding fails.
pub fn public_key_to_pem(key: &VerifyingKey) -> Result<String, SignatureError> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|err| SignatureError::Encode {
            message: err.to_string(),
        })
}

/// Whether two PEM public keys denote the same key.
#[must_use]
pub fn same_public_key(a: &str, b: &str) -> bool {
    match (public_key_from_pem(a), public_key_from_pem(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.trim() == b.trim(),
    }
}

/// Sign `payload`, returning the compact serialisation.
///
/// # Errors
///
/// Returns [`SignatureError::Encode`] if the header cannot be serialised.
pub fn sign_compact(payload: &[u8], key: &SigningKey) -> Result<String, SignatureError> {
    let header = serde_json::to_vec(&JwsHeader {
        alg: JWS_ALGORITHM.to_owned(),
    })
    .map_err(|err| SignatureError::Encode {
        message: err.to_string(),
    })?;
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    );
    let signature = key.sign(signing_input.as_bytes());
    Ok(format!(
        "{signing_input}.{}",
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    ))
}

fn malformed(message: impl Into<String>) -> SignatureError {
    SignatureError::Malformed {
        message: message.into(),
    }
}

/// Verify a compact serialisation under `key` and return its payload.
///
/// # Errors
///
/// Returns [`SignatureError::Malformed`] or
/// [`SignatureError::UnsupportedAlgorithm`] for structural problems and
/// [`SignatureError::BadSignature`] when `key` did not sign it.
pub fn verify_compact(jws: &str, key: &VerifyingKey) -> Result<Vec<u8>, SignatureError> {
    let jws = jws.trim();
    let mut parts = jws.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed("expected three dot-separated parts"));
    };

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|err| malformed(format!("header: {err}")))?;
    let jws_header: JwsHeader = serde_json::from_slice(&header_bytes)
        .map_err(|err| malformed(format!("header: {err}")))?;
    if jws_header.alg != JWS_ALGORITHM {
        return Err(SignatureError::UnsupportedAlgorithm {
            algorithm: jws_header.alg,
        });
    }

    let signature_bytes = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|err| malformed(format!("signature: {err}")))?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|err| malformed(format!("signature: {err}")))?;
    let signing_input_len = header.len() + 1 + payload.len();
    let signing_input = jws
        .get(..signing_input_len)
        .ok_or_else(|| malformed("truncated signing input"))?;
    key.verify(signing_input.as_bytes(), &signature)
        .map_err(|_| SignatureError::BadSignature)?;

    URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|err| malformed(format!("payload: {err}")))
}
