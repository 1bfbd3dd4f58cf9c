//! Wiring between the scheduler and the per-protocol runners.
//!
//! [`MirrorJobRunner`] decides, from a source's configuration, which runner
//! performs an import or export and builds the adapters each run needs.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cap_std::ambient_authority;
use cap_std::fs::Dir;
use ed25519_dalek::SigningKey;
use mockable::Clock;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::domain::export::{FlatFileExportOutcome, FlatFileExportPorts, FlatFileExporter};
use crate::domain::nrtm3::{Nrtm3ImportOutcome, Nrtm3ImportPorts, Nrtm3ImportRunner};
use crate::domain::nrtm4::{
    Nrtm4Client, Nrtm4ClientOutcome, Nrtm4ClientPorts, Nrtm4ServerKeys, Nrtm4ServerOutcome,
    Nrtm4ServerPorts, Nrtm4ServerWriter,
};
use crate::domain::ports::{DatabaseHandler, FileRetriever, NrtmStreamSource, RpslParser};
use crate::domain::scheduler::{MirrorRole, SourceJobRunner};
use crate::domain::signature::signing_key_from_pem;
use crate::domain::{LeaseRegistry, MirrorError, Nrtm4ServerConfig, SourceConfig};
use crate::outbound::publication::LocalPublicationDirectory;

/// Adapters shared by every run.
#[derive(Clone)]
pub struct MirrorJobPorts {
    /// Object store.
    pub database: Arc<dyn DatabaseHandler>,
    /// Remote file retrieval.
    pub retriever: Arc<dyn FileRetriever>,
    /// NRTM v3 whois client.
    pub stream_source: Arc<dyn NrtmStreamSource>,
    /// Object parser.
    pub parser: Arc<dyn RpslParser>,
    /// Leases keeping overlapping publication runs apart.
    pub leases: Arc<LeaseRegistry>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

/// [`SourceJobRunner`] dispatching on the configured roles of a source.
pub struct MirrorJobRunner {
    ports: MirrorJobPorts,
}

impl MirrorJobRunner {
    #[must_use]
    pub const fn new(ports: MirrorJobPorts) -> Self {
        Self { ports }
    }

    async fn import(&self, source: Arc<SourceConfig>) -> Result<(), MirrorError> {
        if let Some(config) = source.nrtm3.clone() {
            let ports = Nrtm3ImportPorts {
                database: Arc::clone(&self.ports.database),
                retriever: Arc::clone(&self.ports.retriever),
                stream_source: Arc::clone(&self.ports.stream_source),
                parser: Arc::clone(&self.ports.parser),
            };
            let outcome = Nrtm3ImportRunner::new(Arc::clone(&source), config, ports)
                .run()
                .await?;
            log_nrtm3(&source.name, &outcome);
            return Ok(());
        }

        if let Some(config) = source.nrtm4_client.clone() {
            let ports = Nrtm4ClientPorts {
                database: Arc::clone(&self.ports.database),
                retriever: Arc::clone(&self.ports.retriever),
                parser: Arc::clone(&self.ports.parser),
                clock: Arc::clone(&self.ports.clock),
            };
            let result = Nrtm4Client::new(Arc::clone(&source), config, ports).run().await;
            match result {
                Ok(outcome) => log_nrtm4_client(&source.name, &outcome),
                Err(err) => {
                    self.record_error(&source.name, &err).await;
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    async fn export(&self, source: Arc<SourceConfig>) -> Result<(), MirrorError> {
        let mut first_error = None;

        if let Some(config) = source.nrtm4_server.clone() {
            let result = self.publish_nrtm4(&source, config).await;
            if let Err(err) = result {
                warn!(source = %source.name, error = %err, "NRTM v4 publication failed");
                first_error = Some(err);
            }
        }

        if let Some(config) = source.export.as_ref() {
            let ports = FlatFileExportPorts {
                database: Arc::clone(&self.ports.database),
                directory: Arc::new(LocalPublicationDirectory::open(&config.destination)?),
            };
            match FlatFileExporter::new(Arc::clone(&source), ports).run().await {
                Ok(FlatFileExportOutcome::Exported { objects, serial }) => {
                    info!(source = %source.name, objects, serial, "flat-file export written");
                }
                Ok(FlatFileExportOutcome::NoSerial) => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn publish_nrtm4(
        &self,
        source: &Arc<SourceConfig>,
        config: Nrtm4ServerConfig,
    ) -> Result<(), MirrorError> {
        let keys = Nrtm4ServerKeys {
            current: load_signing_key(&config.private_key_path)?,
            next: config
                .next_private_key_path
                .as_deref()
                .map(load_signing_key)
                .transpose()?,
        };
        let ports = Nrtm4ServerPorts {
            database: Arc::clone(&self.ports.database),
            directory: Arc::new(LocalPublicationDirectory::open(&config.local_path)?),
            leases: Arc::clone(&self.ports.leases),
            clock: Arc::clone(&self.ports.clock),
        };
        let outcome = Nrtm4ServerWriter::new(Arc::clone(source), config, keys, ports)
            .run()
            .await?;
        match outcome {
            Nrtm4ServerOutcome::LeaseHeld => {
                debug!(source = %source.name, "publication lease held; skipping");
            }
            Nrtm4ServerOutcome::ForceReloadPending => {
                info!(source = %source.name, "force reload pending; not publishing");
            }
            Nrtm4ServerOutcome::Published {
                session_id,
                version,
                new_delta,
                new_snapshot,
                signed,
            } => info!(
                source = %source.name,
                %session_id,
                version,
                new_delta,
                new_snapshot,
                signed,
                "NRTM v4 publication current"
            ),
        }
        Ok(())
    }

    async fn record_error(&self, source: &str, err: &MirrorError) {
        if let Err(record) = self
            .ports
            .database
            .record_mirror_error(source, &err.to_string())
            .await
        {
            warn!(source, error = %record, "failed to record mirror error");
        }
    }
}

#[async_trait]
impl SourceJobRunner for MirrorJobRunner {
    async fn run(&self, source: Arc<SourceConfig>, role: MirrorRole) -> Result<(), MirrorError> {
        match role {
            MirrorRole::Import => self.import(source).await,
            MirrorRole::Export => self.export(source).await,
        }
    }
}

fn log_nrtm3(source: &str, outcome: &Nrtm3ImportOutcome) {
    match outcome {
        Nrtm3ImportOutcome::FullImport { objects, serial } => {
            info!(source, objects, serial = ?serial, "full import finished");
        }
        Nrtm3ImportOutcome::Incremental { operations, serial } => {
            info!(source, operations, serial, "NRTM v3 operations applied");
        }
        Nrtm3ImportOutcome::UpToDate => debug!(source, "NRTM v3 mirror up to date"),
    }
}

fn log_nrtm4_client(source: &str, outcome: &Nrtm4ClientOutcome) {
    match outcome {
        Nrtm4ClientOutcome::Reloaded {
            version,
            objects,
            deltas,
        } => info!(source, version, objects, deltas, "reloaded from NRTM v4 snapshot"),
        Nrtm4ClientOutcome::Updated { version, deltas } => {
            info!(source, version, deltas, "NRTM v4 deltas applied");
        }
        Nrtm4ClientOutcome::UpToDate { version } => {
            debug!(source, version, "NRTM v4 mirror up to date");
        }
    }
}

/// Read a PKCS#8 PEM Ed25519 private key from `path`.
///
/// # Errors
///
/// Returns [`MirrorError::Storage`] when the file cannot be read or does not
/// hold an Ed25519 key.
pub fn load_signing_key(path: &Path) -> Result<SigningKey, MirrorError> {
    let storage = |message: String| {
        MirrorError::storage(format!("private key {}: {message}", path.display()))
    };
    let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
        return Err(storage("not a file path".to_owned()));
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| storage(err.to_string()))?;
    let pem = Zeroizing::new(
        dir.read_to_string(file_name)
            .map_err(|err| storage(err.to_string()))?,
    );
    signing_key_from_pem(&pem).map_err(|err| storage(err.to_string()))
}
