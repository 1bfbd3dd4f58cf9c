//! Incremental JSON text sequence encoder.

use std::io::Write;

use serde::Serialize;

use crate::RECORD_SEPARATOR;
use crate::error::JsonSeqError;

/// Writes records as `RS <compact JSON> LF`.
#[derive(Debug)]
pub struct JsonSeqWriter<W> {
    writer: W,
    records: u64,
}

impl<W: Write> JsonSeqWriter<W> {
    /// Wrap a writer.
    pub const fn new(writer: W) -> Self {
        Self { writer, records: 0 }
    }

    /// Serialise one record.
    ///
    /// # Errors
    ///
    /// Returns [`JsonSeqError`] when serialisation or the underlying write
    /// fails.
    pub fn write_record<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), JsonSeqError> {
        let index = self.records;
        self.writer.write_all(&[RECORD_SEPARATOR])?;
        serde_json::to_writer(&mut self.writer, value).map_err(|err| {
            if err.is_io() {
                JsonSeqError::Io { source: err.into() }
            } else {
                JsonSeqError::Serialise {
                    index,
                    message: err.to_string(),
                }
            }
        })?;
        self.writer.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    /// Number of records written so far.
    #[must_use]
    pub const fn records_written(&self) -> u64 {
        self.records
    }

    /// Flush and return the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns [`JsonSeqError::Io`] when the flush fails.
    pub fn finish(mut self) -> Result<W, JsonSeqError> {
        self.writer.flush()?;
        Ok(self.writer)
    }

    /// Return the underlying writer without flushing.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Encode every item of `items` into `writer`, returning the record count.
///
/// # Errors
///
/// Returns [`JsonSeqError`] on the first failing record.
pub fn encode<W, I, T>(writer: W, items: I) -> Result<u64, JsonSeqError>
where
    W: Write,
    I: IntoIterator<Item = T>,
    T: Serialize,
{
    let mut seq = JsonSeqWriter::new(writer);
    for item in items {
        seq.write_record(&item)?;
    }
    let records = seq.records_written();
    seq.finish()?;
    Ok(records)
}
