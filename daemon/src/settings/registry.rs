//! JSON source registry.
//!
//! The registry lists every mirrored or published source with its transport
//! settings. It is parsed into raw structs first and then validated into
//! [`SourceConfig`] values, so the rest of the daemon never sees an
//! inconsistent configuration.
//!
//! ```
//! use irrd_mirror::settings::SourceRegistry;
//!
//! let json = r#"{
//!     "version": 1,
//!     "sources": [{
//!         "name": "rpki-demo",
//!         "nrtmHost": "whois.example.net",
//!         "importSource": ["https://example.net/demo.db.gz"],
//!         "importSerialSource": "https://example.net/DEMO.CURRENTSERIAL"
//!     }]
//! }"#;
//!
//! let registry = SourceRegistry::from_json(json).expect("valid registry");
//! assert_eq!(registry.sources()[0].name, "RPKI-DEMO");
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::domain::DummifyPolicy;
use crate::domain::signature::public_key_from_pem;
use crate::domain::source::{
    DEFAULT_EXPORT_TIMER, DEFAULT_IMPORT_TIMER, DEFAULT_SNAPSHOT_INTERVAL, ExportConfig,
    Nrtm3ImportConfig, Nrtm4ClientConfig, Nrtm4ServerConfig, SourceConfig,
};

const SUPPORTED_VERSION: u32 = 1;
const DEFAULT_NRTM_PORT: u16 = 43;

/// Errors raised while loading the source registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry file could not be read.
    #[error("failed to read source registry at '{path}': {message}")]
    Io {
        /// Registry path.
        path: PathBuf,
        /// I/O diagnostic.
        message: String,
    },

    /// The JSON is malformed or misses required fields.
    #[error("invalid source registry JSON: {message}")]
    Parse {
        /// Parser diagnostic.
        message: String,
    },

    /// The registry version is not supported.
    #[error("unsupported registry version: expected {expected}, found {actual}")]
    UnsupportedVersion {
        /// Supported version.
        expected: u32,
        /// Version in the file.
        actual: u32,
    },

    /// A source has a blank name.
    #[error("source at index {index} has an empty name")]
    EmptyName {
        /// Position in the `sources` array.
        index: usize,
    },

    /// Two entries share a name.
    #[error("source {name} is configured more than once")]
    DuplicateSource {
        /// Upper-case source name.
        name: String,
    },

    /// A source pulls over both NRTM v3 and NRTM v4.
    #[error("source {name} configures both NRTM v3 import and an NRTM v4 client")]
    ConflictingImport {
        /// Upper-case source name.
        name: String,
    },

    /// A source both mirrors and republishes over NRTM v4.
    #[error("source {name} cannot be an NRTM v4 client and server at once")]
    ClientAndServer {
        /// Upper-case source name.
        name: String,
    },

    /// NRTM v3 streaming is configured without a dump to start from.
    #[error("source {name} sets nrtmHost but no importSource")]
    MissingImportSource {
        /// Upper-case source name.
        name: String,
    },

    /// A URL does not parse.
    #[error("source {name}: invalid URL '{value}': {message}")]
    InvalidUrl {
        /// Upper-case source name.
        name: String,
        /// Offending value.
        value: String,
        /// Parser diagnostic.
        message: String,
    },

    /// The initial NRTM v4 public key is not an Ed25519 PEM key.
    #[error("source {name}: invalid initialPublicKey: {message}")]
    InvalidPublicKey {
        /// Upper-case source name.
        name: String,
        /// Key decoding diagnostic.
        message: String,
    },
}

/// Validated set of configured sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRegistry {
    sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    /// Parse and validate a registry document.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the JSON is malformed, the version is
    /// unsupported or any source fails validation.
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let raw: RawRegistry = serde_json::from_str(json).map_err(|err| RegistryError::Parse {
            message: err.to_string(),
        })?;
        Self::from_raw(raw)
    }

    /// Load a registry file.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Io`] when the file cannot be read, or any
    /// error of [`SourceRegistry::from_json`].
    pub fn from_file(path: &Path) -> Result<Self, RegistryError> {
        let contents = fs::read_to_string(path).map_err(|err| RegistryError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::from_json(&contents)
    }

    fn from_raw(raw: RawRegistry) -> Result<Self, RegistryError> {
        if raw.version != SUPPORTED_VERSION {
            return Err(RegistryError::UnsupportedVersion {
                expected: SUPPORTED_VERSION,
                actual: raw.version,
            });
        }

        let mut seen = HashSet::new();
        let mut sources = Vec::with_capacity(raw.sources.len());
        for (index, raw_source) in raw.sources.into_iter().enumerate() {
            let source = raw_source.validate(index)?;
            if !seen.insert(source.name.clone()) {
                return Err(RegistryError::DuplicateSource { name: source.name });
            }
            sources.push(source);
        }
        Ok(Self { sources })
    }

    /// Every configured source, in file order.
    #[must_use]
    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    /// The source called `name`, compared case-insensitively.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&SourceConfig> {
        self.sources
            .iter()
            .find(|source| source.name.eq_ignore_ascii_case(name))
    }

    /// Consume the registry.
    #[must_use]
    pub fn into_sources(self) -> Vec<SourceConfig> {
        self.sources
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRegistry {
    version: u32,
    #[serde(default)]
    sources: Vec<RawSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawSource {
    name: String,
    #[serde(default)]
    authoritative: bool,
    import_timer_secs: Option<u64>,
    export_timer_secs: Option<u64>,
    nrtm_host: Option<String>,
    nrtm_port: Option<u16>,
    #[serde(default)]
    import_source: Vec<String>,
    import_serial_source: Option<String>,
    nrtm4_client: Option<RawNrtm4Client>,
    nrtm4_server: Option<RawNrtm4Server>,
    export_destination: Option<PathBuf>,
    object_class_filter: Option<Vec<String>>,
    dummify: Option<RawDummify>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawNrtm4Client {
    notification_file_url: String,
    initial_public_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawNrtm4Server {
    private_key_path: PathBuf,
    next_private_key_path: Option<PathBuf>,
    local_path: PathBuf,
    snapshot_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawDummify {
    #[serde(default)]
    object_classes: Vec<String>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    remarks: Vec<String>,
}

fn parse_url(name: &str, value: &str) -> Result<Url, RegistryError> {
    Url::parse(value).map_err(|err| RegistryError::InvalidUrl {
        name: name.to_owned(),
        value: value.to_owned(),
        message: err.to_string(),
    })
}

fn lowercase_set(values: Vec<String>) -> BTreeSet<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .collect()
}

impl RawSource {
    fn validate(self, index: usize) -> Result<SourceConfig, RegistryError> {
        let name = self.name.trim().to_ascii_uppercase();
        if name.is_empty() {
            return Err(RegistryError::EmptyName { index });
        }

        let nrtm3 = self.nrtm3(&name)?;
        let nrtm4_client = self
            .nrtm4_client
            .map(|client| client.validate(&name))
            .transpose()?;
        if nrtm3.is_some() && nrtm4_client.is_some() {
            return Err(RegistryError::ConflictingImport { name });
        }
        if nrtm4_client.is_some() && self.nrtm4_server.is_some() {
            return Err(RegistryError::ClientAndServer { name });
        }

        let mut source = SourceConfig::new(name);
        source.authoritative = self.authoritative;
        source.import_timer = self
            .import_timer_secs
            .map_or(DEFAULT_IMPORT_TIMER, Duration::from_secs);
        source.export_timer = self
            .export_timer_secs
            .map_or(DEFAULT_EXPORT_TIMER, Duration::from_secs);
        source.nrtm3 = nrtm3;
        source.nrtm4_client = nrtm4_client;
        source.nrtm4_server = self.nrtm4_server.map(|server| Nrtm4ServerConfig {
            private_key_path: server.private_key_path,
            next_private_key_path: server.next_private_key_path,
            local_path: server.local_path,
            snapshot_interval: server
                .snapshot_interval_secs
                .map_or(DEFAULT_SNAPSHOT_INTERVAL, Duration::from_secs),
        });
        source.export = self
            .export_destination
            .map(|destination| ExportConfig { destination });
        source.object_class_filter = self.object_class_filter.map(lowercase_set);
        if let Some(dummify) = self.dummify {
            source.dummify = DummifyPolicy {
                object_classes: lowercase_set(dummify.object_classes),
                attributes: dummify
                    .attributes
                    .into_iter()
                    .map(|(attribute, value)| (attribute.to_ascii_lowercase(), value))
                    .collect(),
                remarks: dummify.remarks,
            };
        }
        Ok(source)
    }

    fn nrtm3(&self, name: &str) -> Result<Option<Nrtm3ImportConfig>, RegistryError> {
        let nrtm_host = self
            .nrtm_host
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_owned);
        if nrtm_host.is_none() && self.import_source.is_empty() {
            return Ok(None);
        }
        if self.import_source.is_empty() {
            return Err(RegistryError::MissingImportSource {
                name: name.to_owned(),
            });
        }
        let import_sources = self
            .import_source
            .iter()
            .map(|value| parse_url(name, value))
            .collect::<Result<Vec<_>, _>>()?;
        let import_serial_source = self
            .import_serial_source
            .as_deref()
            .map(|value| parse_url(name, value))
            .transpose()?;
        Ok(Some(Nrtm3ImportConfig {
            nrtm_host,
            nrtm_port: self.nrtm_port.unwrap_or(DEFAULT_NRTM_PORT),
            import_sources,
            import_serial_source,
        }))
    }
}

impl RawNrtm4Client {
    fn validate(self, name: &str) -> Result<Nrtm4ClientConfig, RegistryError> {
        let notification_file_url = parse_url(name, &self.notification_file_url)?;
        public_key_from_pem(&self.initial_public_key).map_err(|err| {
            RegistryError::InvalidPublicKey {
                name: name.to_owned(),
                message: err.to_string(),
            }
        })?;
        Ok(Nrtm4ClientConfig {
            notification_file_url,
            initial_public_key: self.initial_public_key,
        })
    }
}
