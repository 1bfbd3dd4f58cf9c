//! Snapshot and delta files: gzip-compressed JSON sequences.

use std::io::{BufReader, Read, Write};

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use json_seq::{JsonSeqError, JsonSeqReader, JsonSeqWriter};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::MirrorError;
use crate::domain::hashing::HashingWriter;

use super::types::{DataFileHeader, NrtmFileType};

/// Fixed name of the signed notification file.
pub const UNF_FILENAME: &str = "update-notification-file.jose";
const SNAPSHOT_PREFIX: &str = "nrtm-snapshot.";
const DELTA_PREFIX: &str = "nrtm-delta.";
const DATA_SUFFIX: &str = ".json.gz";

/// Fresh, unguessable file name for a data file of `version`.
#[must_use]
pub fn data_file_name(file_type: NrtmFileType, version: u64) -> String {
    let prefix = match file_type {
        NrtmFileType::Snapshot => SNAPSHOT_PREFIX,
        NrtmFileType::Delta | NrtmFileType::Notification => DELTA_PREFIX,
    };
    format!("{prefix}{version}.{}{DATA_SUFFIX}", Uuid::new_v4().simple())
}

/// Whether `name` looks like a snapshot or delta file.
#[must_use]
pub fn is_data_file_name(name: &str) -> bool {
    (name.starts_with(SNAPSHOT_PREFIX) || name.starts_with(DELTA_PREFIX))
        && name.ends_with(DATA_SUFFIX)
}

fn decode_error(err: JsonSeqError) -> MirrorError {
    MirrorError::protocol(format!("cannot decode data file: {err}"))
}

/// Streaming reader over a data file.
pub struct DataFileReader<R: Read> {
    records: JsonSeqReader<BufReader<MultiGzDecoder<R>>, Value>,
    header: DataFileHeader,
}

impl<R: Read> DataFileReader<R> {
    /// Start reading a compressed data file and decode its header.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Protocol`] when the file is not gzip, is not a
    /// JSON sequence, or has no valid header.
    pub fn open(reader: R) -> Result<Self, MirrorError> {
        let mut records = JsonSeqReader::new(BufReader::new(MultiGzDecoder::new(reader)));
        let header = records
            .next()
            .ok_or_else(|| MirrorError::protocol("data file has no header record"))?
            .map_err(decode_error)?;
        let header = serde_json::from_value(header)
            .map_err(|err| MirrorError::protocol(format!("invalid data file header: {err}")))?;
        Ok(Self { records, header })
    }

    /// The decoded header.
    #[must_use]
    pub const fn header(&self) -> &DataFileHeader {
        &self.header
    }

    /// Decode the next body record.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Protocol`] when the record is malformed.
    pub fn next_record<T: DeserializeOwned>(&mut self) -> Result<Option<T>, MirrorError> {
        let index = self.records.records_read();
        let Some(record) = self.records.next() else {
            return Ok(None);
        };
        let value = record.map_err(decode_error)?;
        serde_json::from_value(value)
            .map(Some)
            .map_err(|err| MirrorError::protocol(format!("invalid data file record {index}: {err}")))
    }
}

/// Write a compressed data file into `writer`.
///
/// Returns the writer, the hex SHA-256 of the compressed bytes, and the
/// number of body records.
///
/// # Errors
///
/// Returns [`MirrorError::Storage`] when writing fails.
pub fn write_data_file<W, I, T>(
    writer: W,
    header: &DataFileHeader,
    records: I,
) -> Result<(W, String, u64), MirrorError>
where
    W: Write,
    I: IntoIterator<Item = T>,
    T: Serialize,
{
    let storage = |err: &dyn std::fmt::Display| MirrorError::storage(format!("cannot write data file: {err}"));
    let mut seq = JsonSeqWriter::new(GzEncoder::new(HashingWriter::new(writer), Compression::default()));
    seq.write_record(header).map_err(|err| storage(&err))?;
    for record in records {
        seq.write_record(&record).map_err(|err| storage(&err))?;
    }
    let count = seq.records_written() - 1;
    let encoder = seq.finish().map_err(|err| storage(&err))?;
    let hashing = encoder.finish().map_err(|err| storage(&err))?;
    let (writer, hash) = hashing.finish();
    Ok((writer, hash, count))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::hashing::sha256_hex;
    use crate::domain::nrtm4::types::{DeltaChange, SnapshotObject};

    fn header(file_type: NrtmFileType) -> DataFileHeader {
        DataFileHeader {
            nrtm_version: 4,
            file_type,
            source: "TEST".to_owned(),
            session_id: Uuid::nil(),
            version: 3,
        }
    }

    #[test]
    fn written_file_reads_back_with_matching_hash() {
        let records = vec![
            DeltaChange::AddModify {
                object: "mntner: A\nsource: TEST\n".to_owned(),
            },
            DeltaChange::Delete {
                object_class: "route".to_owned(),
                primary_key: "192.0.2.0/24AS1".to_owned(),
            },
        ];
        let (bytes, hash, count) =
            write_data_file(Vec::new(), &header(NrtmFileType::Delta), &records).expect("write");
        assert_eq!(count, 2);
        assert_eq!(hash, sha256_hex(&bytes));

        let mut reader = DataFileReader::open(bytes.as_slice()).expect("open");
        assert_eq!(reader.header(), &header(NrtmFileType::Delta));
        let mut decoded = Vec::new();
        while let Some(record) = reader.next_record::<DeltaChange>().expect("record") {
            decoded.push(record);
        }
        assert_eq!(decoded, records);
    }

    #[test]
    fn wrong_record_shape_is_a_protocol_error() {
        let (bytes, _, _) = write_data_file(
            Vec::new(),
            &header(NrtmFileType::Snapshot),
            [json!({"unexpected": true})],
        )
        .expect("write");
        let mut reader = DataFileReader::open(bytes.as_slice()).expect("open");
        let err = reader
            .next_record::<SnapshotObject>()
            .expect_err("wrong shape");
        assert!(err.to_string().contains("record 1"), "{err}");
    }

    #[test]
    fn non_gzip_input_is_rejected() {
        let err = DataFileReader::open(&b"plain text"[..])
            .err()
            .expect("must fail");
        assert_eq!(err.kind(), crate::domain::MirrorErrorKind::Protocol);
    }

    #[test]
    fn file_names_follow_convention() {
        let name = data_file_name(NrtmFileType::Snapshot, 12);
        assert!(name.starts_with("nrtm-snapshot.12."));
        assert!(is_data_file_name(&name));
        assert!(is_data_file_name(&data_file_name(NrtmFileType::Delta, 1)));
        assert!(!is_data_file_name(UNF_FILENAME));
    }
}
