//! Incremental JSON text sequence decoder.

use std::io::BufRead;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::RECORD_SEPARATOR;
use crate::error::JsonSeqError;

/// Lazily decodes records from a buffered byte stream.
///
/// The reader is a finite, non-restartable iterator. Records are split on the
/// record separator; a trailing record without a separator is still decoded.
/// Empty or whitespace-only records are skipped. After the first error the
/// iterator is fused and yields `None`.
#[derive(Debug)]
pub struct JsonSeqReader<R, T = Value> {
    reader: R,
    buffer: Vec<u8>,
    index: u64,
    finished: bool,
    _record: PhantomData<fn() -> T>,
}

impl<R, T> JsonSeqReader<R, T>
where
    R: BufRead,
    T: DeserializeOwned,
{
    /// Wrap a buffered reader.
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            index: 0,
            finished: false,
            _record: PhantomData,
        }
    }

    /// Number of records decoded so far.
    #[must_use]
    pub const fn records_read(&self) -> u64 {
        self.index
    }

    fn next_record(&mut self) -> Result<Option<T>, JsonSeqError> {
        loop {
            self.buffer.clear();
            let read = self.reader.read_until(RECORD_SEPARATOR, &mut self.buffer)?;
            if read == 0 {
                return Ok(None);
            }
            if self.buffer.last() == Some(&RECORD_SEPARATOR) {
                self.buffer.pop();
            }
            if self.buffer.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let index = self.index;
            let record = serde_json::from_slice(&self.buffer).map_err(|err| {
                JsonSeqError::MalformedRecord {
                    index,
                    message: err.to_string(),
                }
            })?;
            self.index += 1;
            return Ok(Some(record));
        }
    }
}

impl<R, T> Iterator for JsonSeqReader<R, T>
where
    R: BufRead,
    T: DeserializeOwned,
{
    type Item = Result<T, JsonSeqError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

/// Decode a stream into untyped JSON values.
pub const fn decode<R: BufRead>(reader: R) -> JsonSeqReader<R, Value> {
    JsonSeqReader::new(reader)
}
