//! Error type for JSON text sequence encoding and decoding.

use std::io;

use thiserror::Error;

/// Errors raised while reading or writing a JSON text sequence.
///
/// Decoding does not attempt recovery: the first malformed record ends the
/// sequence with [`JsonSeqError::MalformedRecord`].
#[derive(Debug, Error)]
pub enum JsonSeqError {
    /// The underlying reader or writer failed.
    #[error("json-seq I/O failed: {source}")]
    Io {
        /// Underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// A record was not valid JSON or did not match the requested type.
    #[error("malformed json-seq record {index}: {message}")]
    MalformedRecord {
        /// Zero-based position of the record in the sequence.
        index: u64,
        /// Parser diagnostic.
        message: String,
    },

    /// A value could not be serialised.
    #[error("failed to serialise json-seq record {index}: {message}")]
    Serialise {
        /// Zero-based position of the record in the sequence.
        index: u64,
        /// Serialiser diagnostic.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_record_formats_index_and_message() {
        let err = JsonSeqError::MalformedRecord {
            index: 3,
            message: "expected value".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "malformed json-seq record 3: expected value"
        );
    }

    #[test]
    fn io_errors_convert() {
        let err: JsonSeqError = io::Error::other("disk gone").into();
        assert!(err.to_string().contains("disk gone"));
    }
}
