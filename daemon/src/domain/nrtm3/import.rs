//! NRTM v3 import runs: full reloads from dumps and incremental streams.

use std::io::BufReader;
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::journal::{DatabaseOperation, JournalEntryOrigin};
use crate::domain::mirror::{admit_object, end_published_session};
use crate::domain::ports::{
    DatabaseHandler, DatabaseTransaction, FileRetriever, NrtmStreamSource, RpslParser,
};
use crate::domain::rpsl::Paragraphs;
use crate::domain::{MirrorError, Nrtm3ImportConfig, SourceConfig};

use super::parser::parse_stream;

/// Port bundle required by the NRTM v3 importer.
#[derive(Clone)]
pub struct Nrtm3ImportPorts {
    /// Object store.
    pub database: Arc<dyn DatabaseHandler>,
    /// Dump and serial file retrieval.
    pub retriever: Arc<dyn FileRetriever>,
    /// NRTM v3 whois client.
    pub stream_source: Arc<dyn NrtmStreamSource>,
    /// Object parser.
    pub parser: Arc<dyn RpslParser>,
}

/// What an import run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nrtm3ImportOutcome {
    /// The source was reloaded from its dumps.
    FullImport {
        /// Objects loaded.
        objects: u64,
        /// Serial the dumps correspond to, if known.
        serial: Option<u64>,
    },
    /// Operations from the NRTM stream were applied.
    Incremental {
        /// Operations applied.
        operations: u64,
        /// Newest serial now mirrored.
        serial: u64,
    },
    /// The remote had nothing newer.
    UpToDate,
}

/// Runs NRTM v3 imports for one source.
pub struct Nrtm3ImportRunner {
    source: Arc<SourceConfig>,
    config: Nrtm3ImportConfig,
    ports: Nrtm3ImportPorts,
}

impl Nrtm3ImportRunner {
    /// Build a runner for `source` using its NRTM v3 settings.
    #[must_use]
    pub const fn new(
        source: Arc<SourceConfig>,
        config: Nrtm3ImportConfig,
        ports: Nrtm3ImportPorts,
    ) -> Self {
        Self {
            source,
            config,
            ports,
        }
    }

    /// Run one import.
    ///
    /// Every change happens in one transaction. On failure the transaction
    /// is rolled back and the error is recorded against the source before it
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError`] when retrieval, parsing or storage fails.
    pub async fn run(&self) -> Result<Nrtm3ImportOutcome, MirrorError> {
        let mut txn = self.ports.database.begin().await?;
        match self.run_in(txn.as_mut()).await {
            Ok(outcome) => {
                txn.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback) = txn.rollback().await {
                    warn!(source = %self.source.name, error = %rollback, "rollback failed");
                }
                if let Err(record) = self
                    .ports
                    .database
                    .record_mirror_error(&self.source.name, &err.to_string())
                    .await
                {
                    warn!(source = %self.source.name, error = %record, "failed to record mirror error");
                }
                Err(err)
            }
        }
    }

    async fn run_in(
        &self,
        txn: &mut dyn DatabaseTransaction,
    ) -> Result<Nrtm3ImportOutcome, MirrorError> {
        let status = txn.status_for(&self.source.name).await?;
        let mirrored_serial = status
            .as_ref()
            .filter(|status| !status.force_reload)
            .and_then(|status| status.serial_newest_mirror);

        match (&self.config.nrtm_host, mirrored_serial) {
            (Some(host), Some(serial)) => self.run_incremental(txn, host, serial).await,
            _ => self.run_full_import(txn).await,
        }
    }

    async fn run_full_import(
        &self,
        txn: &mut dyn DatabaseTransaction,
    ) -> Result<Nrtm3ImportOutcome, MirrorError> {
        let name = &self.source.name;
        info!(source = %name, "starting full import");

        let serial = match &self.config.import_serial_source {
            Some(url) => {
                let bytes = self.ports.retriever.retrieve_bytes(url).await?;
                let text = String::from_utf8_lossy(&bytes);
                let serial = text.trim().parse::<u64>().map_err(|_| {
                    MirrorError::protocol(format!(
                        "serial file {url} does not hold a serial: `{}`",
                        text.trim()
                    ))
                })?;
                Some(serial)
            }
            None => None,
        };

        let removed = txn
            .delete_all_rpsl_objects(name, JournalEntryOrigin::Mirror)
            .await?;
        txn.disable_journaling();
        let mut loaded = 0_u64;
        for url in &self.config.import_sources {
            let file = self.ports.retriever.retrieve_to_file(url, true).await?;
            let reader = file
                .open()
                .map_err(|err| MirrorError::storage(format!("cannot open {url}: {err}")))?;
            for paragraph in Paragraphs::new(BufReader::new(reader)) {
                let paragraph = paragraph
                    .map_err(|err| MirrorError::storage(format!("cannot read {url}: {err}")))?;
                let Some(object) = admit_object(self.ports.parser.as_ref(), &self.source, &paragraph)
                else {
                    continue;
                };
                txn.upsert_rpsl_object(&object, JournalEntryOrigin::Mirror, None)
                    .await?;
                loaded += 1;
            }
        }
        txn.enable_journaling();
        end_published_session(txn, name).await?;

        if let Some(serial) = serial {
            txn.update_serial_newest_mirror(name, serial).await?;
        }
        txn.set_force_reload(name, false).await?;
        txn.clear_mirror_error(name).await?;
        info!(source = %name, removed, loaded, serial = ?serial, "full import finished");
        Ok(Nrtm3ImportOutcome::FullImport {
            objects: loaded,
            serial,
        })
    }

    async fn run_incremental(
        &self,
        txn: &mut dyn DatabaseTransaction,
        host: &str,
        mirrored_serial: u64,
    ) -> Result<Nrtm3ImportOutcome, MirrorError> {
        let name = &self.source.name;
        let next_serial = mirrored_serial.checked_add(1).ok_or_else(|| {
            MirrorError::protocol(format!(
                "mirrored serial {mirrored_serial} for {name} has no successor; a full reload is needed"
            ))
        })?;
        let query = format!("-g {name}:3:{next_serial}-LAST");
        let response = self
            .ports
            .stream_source
            .query(host, self.config.nrtm_port, &query)
            .await?;
        let stream = parse_stream(&response, name)?;
        let Some(header) = stream.header else {
            info!(source = %name, serial = mirrored_serial, "no newer NRTM updates");
            return Ok(Nrtm3ImportOutcome::UpToDate);
        };
        if header.first_serial > next_serial {
            warn!(
                source = %name,
                expected = next_serial,
                first = header.first_serial,
                "NRTM stream starts later than requested"
            );
        }

        let mut applied = 0_u64;
        for operation in &stream.operations {
            let Some(object) =
                admit_object(self.ports.parser.as_ref(), &self.source, &operation.object_text)
            else {
                continue;
            };
            match operation.operation {
                DatabaseOperation::AddOrUpdate => {
                    txn.upsert_rpsl_object(&object, JournalEntryOrigin::Mirror, Some(operation.serial))
                        .await?;
                }
                DatabaseOperation::Delete => {
                    let existed = txn
                        .delete_rpsl_object(
                            name,
                            &object.object_class,
                            &object.pk,
                            JournalEntryOrigin::Mirror,
                            Some(operation.serial),
                        )
                        .await?;
                    if !existed {
                        warn!(source = %name, pk = %object.pk, serial = operation.serial, "NRTM delete for unknown object");
                    }
                }
            }
            applied += 1;
        }

        txn.update_serial_newest_mirror(name, header.last_serial)
            .await?;
        txn.clear_mirror_error(name).await?;
        info!(source = %name, applied, serial = header.last_serial, "NRTM stream applied");
        Ok(Nrtm3ImportOutcome::Incremental {
            operations: applied,
            serial: header.last_serial,
        })
    }
}
