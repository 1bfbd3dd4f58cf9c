//! Streaming JSON text sequences (RFC 7464).
//!
//! A JSON text sequence is a series of JSON texts, each introduced by the
//! ASCII record separator (`0x1E`) and terminated by a line feed. NRTM v4
//! snapshot and delta files use this framing so that arbitrarily large files
//! can be produced and consumed one record at a time.
//!
//! Both directions work incrementally: the reader buffers at most one record
//! and the writer never holds more than the record being serialised.
//!
//! # Example
//!
//! ```
//! use json_seq::{JsonSeqReader, JsonSeqWriter};
//! use serde_json::json;
//!
//! let mut writer = JsonSeqWriter::new(Vec::new());
//! writer.write_record(&json!({"type": "snapshot"})).expect("write header");
//! writer.write_record(&json!({"object": "route: 192.0.2.0/24"})).expect("write body");
//! let encoded = writer.into_inner();
//!
//! let records = JsonSeqReader::new(encoded.as_slice())
//!     .collect::<Result<Vec<serde_json::Value>, _>>()
//!     .expect("decode");
//! assert_eq!(records.len(), 2);
//! assert_eq!(records.first(), Some(&json!({"type": "snapshot"})));
//! ```

mod error;
mod reader;
mod writer;

pub use error::JsonSeqError;
pub use reader::{JsonSeqReader, decode};
pub use writer::{JsonSeqWriter, encode};

/// The ASCII record separator introducing every record.
pub const RECORD_SEPARATOR: u8 = 0x1e;
