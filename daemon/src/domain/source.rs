//! Per-source mirroring configuration as seen by the domain.
//!
//! Built from the JSON source registry by [`crate::settings`]; every value
//! here is already validated.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use super::rpsl::DummifyPolicy;

/// Default interval between import runs.
pub const DEFAULT_IMPORT_TIMER: Duration = Duration::from_secs(300);
/// Default interval between export runs.
pub const DEFAULT_EXPORT_TIMER: Duration = Duration::from_secs(3600);
/// Default minimum age of the last NRTM v4 snapshot before a new one.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(4 * 3600);

/// NRTM v3 mirroring from a whois server plus full-import dumps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nrtm3ImportConfig {
    /// NRTM host; without one the source is fully reloaded every run.
    pub nrtm_host: Option<String>,
    /// NRTM port.
    pub nrtm_port: u16,
    /// Dump files loaded on a full import.
    pub import_sources: Vec<Url>,
    /// File holding the serial the dumps correspond to.
    pub import_serial_source: Option<Url>,
}

/// NRTM v4 client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nrtm4ClientConfig {
    /// Location of the Update Notification File.
    pub notification_file_url: Url,
    /// PEM public key trusted before any key has been learned.
    pub initial_public_key: String,
}

/// NRTM v4 server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nrtm4ServerConfig {
    /// PEM private key used to sign the notification file.
    pub private_key_path: PathBuf,
    /// PEM private key announced as the next signing key.
    pub next_private_key_path: Option<PathBuf>,
    /// Directory files are published into.
    pub local_path: PathBuf,
    /// Minimum age of the last snapshot before a new one is written.
    pub snapshot_interval: Duration,
}

/// Flat-file export settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    /// Directory receiving `<source>.db.gz` and `<SOURCE>.CURRENTSERIAL`.
    pub destination: PathBuf,
}

/// Everything configured for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Upper-case source name.
    pub name: String,
    /// Whether this registry is the authority for the source.
    pub authoritative: bool,
    /// Interval between import runs.
    pub import_timer: Duration,
    /// Interval between export runs.
    pub export_timer: Duration,
    /// NRTM v3 import, if configured.
    pub nrtm3: Option<Nrtm3ImportConfig>,
    /// NRTM v4 client, if configured.
    pub nrtm4_client: Option<Nrtm4ClientConfig>,
    /// NRTM v4 server, if configured.
    pub nrtm4_server: Option<Nrtm4ServerConfig>,
    /// Flat-file export, if configured.
    pub export: Option<ExportConfig>,
    /// Object classes to keep when mirroring; `None` keeps everything.
    pub object_class_filter: Option<BTreeSet<String>>,
    /// Redaction applied to published objects.
    pub dummify: DummifyPolicy,
}

impl SourceConfig {
    /// Minimal configuration with neither import nor export.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authoritative: false,
            import_timer: DEFAULT_IMPORT_TIMER,
            export_timer: DEFAULT_EXPORT_TIMER,
            nrtm3: None,
            nrtm4_client: None,
            nrtm4_server: None,
            export: None,
            object_class_filter: None,
            dummify: DummifyPolicy::default(),
        }
    }

    /// Whether objects of `object_class` are mirrored.
    #[must_use]
    pub fn accepts_class(&self, object_class: &str) -> bool {
        self.object_class_filter
            .as_ref()
            .is_none_or(|classes| classes.contains(object_class))
    }

    /// Whether the source has an import role.
    #[must_use]
    pub const fn has_import(&self) -> bool {
        self.nrtm3.is_some() || self.nrtm4_client.is_some()
    }

    /// Whether the source has an export role.
    #[must_use]
    pub const fn has_export(&self) -> bool {
        self.nrtm4_server.is_some() || self.export.is_some()
    }
}
