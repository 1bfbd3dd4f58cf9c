//! Flat-file export of a source.
//!
//! Writes `<source>.db.gz` with every object (auth hashes removed, one blank
//! line between objects) and `<SOURCE>.CURRENTSERIAL` holding the newest
//! journal serial the dump reflects. Both files are committed through the
//! publication directory, so readers never see a partial file.

use std::io::Write;
use std::sync::Arc;

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::info;

use crate::domain::ports::{DatabaseHandler, PublicationDirectory};
use crate::domain::rpsl::remove_auth_hashes;
use crate::domain::{MirrorError, SourceConfig};

/// Port bundle required by the exporter.
#[derive(Clone)]
pub struct FlatFileExportPorts {
    /// Object store.
    pub database: Arc<dyn DatabaseHandler>,
    /// Destination directory.
    pub directory: Arc<dyn PublicationDirectory>,
}

/// What an export run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlatFileExportOutcome {
    /// Both files were written.
    Exported {
        /// Objects in the dump.
        objects: u64,
        /// Serial written to the serial file.
        serial: u64,
    },
    /// The source has no journal yet.
    NoSerial,
}

/// Name of the compressed dump for `source`.
#[must_use]
pub fn dump_file_name(source: &str) -> String {
    format!("{}.db.gz", source.to_ascii_lowercase())
}

/// Name of the serial file for `source`.
#[must_use]
pub fn serial_file_name(source: &str) -> String {
    format!("{}.CURRENTSERIAL", source.to_ascii_uppercase())
}

/// Exports one source as flat files.
pub struct FlatFileExporter {
    source: Arc<SourceConfig>,
    ports: FlatFileExportPorts,
}

impl FlatFileExporter {
    #[must_use]
    pub const fn new(source: Arc<SourceConfig>, ports: FlatFileExportPorts) -> Self {
        Self { source, ports }
    }

    /// Run one export.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Storage`] when reading the database or writing
    /// either file fails.
    pub async fn run(&self) -> Result<FlatFileExportOutcome, MirrorError> {
        let name = &self.source.name;
        let mut txn = self.ports.database.begin().await?;
        let status = txn.status_for(name).await?;
        let Some(serial) = status.and_then(|status| status.serial_newest_journal) else {
            txn.rollback().await?;
            info!(source = %name, "no journal serial yet; skipping export");
            return Ok(FlatFileExportOutcome::NoSerial);
        };
        let objects = txn.objects_for_source(name).await?;
        txn.rollback().await?;

        let dump_name = dump_file_name(name);
        let write_error = |err: std::io::Error| {
            MirrorError::storage(format!("cannot write {dump_name}: {err}"))
        };
        let mut encoder = GzEncoder::new(self.ports.directory.create(&dump_name)?, Compression::default());
        for object in &objects {
            encoder
                .write_all(remove_auth_hashes(&object.text).as_bytes())
                .map_err(write_error)?;
            encoder.write_all(b"\n").map_err(write_error)?;
        }
        encoder.finish().map_err(write_error)?.commit()?;

        let mut serial_file = self.ports.directory.create(&serial_file_name(name))?;
        serial_file
            .write_all(format!("{serial}\n").as_bytes())
            .map_err(|err| MirrorError::storage(format!("cannot write serial file: {err}")))?;
        serial_file.commit()?;

        let count = u64::try_from(objects.len()).unwrap_or(u64::MAX);
        info!(source = %name, objects = count, serial, "flat-file export written");
        Ok(FlatFileExportOutcome::Exported {
            objects: count,
            serial,
        })
    }
}
