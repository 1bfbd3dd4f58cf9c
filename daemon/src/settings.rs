//! Daemon configuration loaded via OrthoConfig, and the per-source registry.

use std::path::PathBuf;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

mod registry;

pub use registry::{RegistryError, SourceRegistry};

const DEFAULT_SOURCES_PATH: &str = "/etc/irrd-mirror/sources.json";

/// Process-wide settings.
///
/// Each field can be set with an `IRRD_MIRROR_*` environment variable, a
/// command-line flag or a configuration file.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "IRRD_MIRROR")]
pub struct DaemonSettings {
    /// Path of the JSON source registry.
    pub sources_path: Option<PathBuf>,
    /// PostgreSQL URL. Without it the daemon keeps state in memory.
    pub database_url: Option<String>,
    /// Seconds between scheduler ticks.
    #[ortho_config(default = 15)]
    pub tick_interval_secs: u64,
    /// Timeout for every remote transfer, in seconds.
    #[ortho_config(default = 30)]
    pub request_timeout_secs: u64,
    /// Directory for spooled downloads.
    pub temp_dir: Option<PathBuf>,
}

impl DaemonSettings {
    /// Configured registry path, falling back to the system default.
    pub fn sources_path(&self) -> PathBuf {
        self.sources_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCES_PATH))
    }

    /// Scheduler tick period; never zero.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    /// Remote transfer timeout; never zero.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    use super::*;

    const VARS: [&str; 5] = [
        "IRRD_MIRROR_SOURCES_PATH",
        "IRRD_MIRROR_DATABASE_URL",
        "IRRD_MIRROR_TICK_INTERVAL_SECS",
        "IRRD_MIRROR_REQUEST_TIMEOUT_SECS",
        "IRRD_MIRROR_TEMP_DIR",
    ];

    fn load_from_empty_args() -> DaemonSettings {
        DaemonSettings::load_from_iter([OsString::from("irrd-mirror")])
            .expect("config should load")
    }

    #[rstest]
    fn defaults_apply_when_unset() {
        let _guard = lock_env(VARS.map(|name| (name, None::<String>)));

        let settings = load_from_empty_args();
        assert_eq!(settings.sources_path(), PathBuf::from(DEFAULT_SOURCES_PATH));
        assert!(settings.database_url.is_none());
        assert_eq!(settings.tick_interval(), Duration::from_secs(15));
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
        assert!(settings.temp_dir.is_none());
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let _guard = lock_env([
            ("IRRD_MIRROR_SOURCES_PATH", Some("/srv/irrd/sources.json".to_owned())),
            (
                "IRRD_MIRROR_DATABASE_URL",
                Some("postgres://irrd@localhost/irrd".to_owned()),
            ),
            ("IRRD_MIRROR_TICK_INTERVAL_SECS", Some("5".to_owned())),
            ("IRRD_MIRROR_REQUEST_TIMEOUT_SECS", Some("0".to_owned())),
            ("IRRD_MIRROR_TEMP_DIR", Some("/var/tmp/irrd".to_owned())),
        ]);

        let settings = load_from_empty_args();
        assert_eq!(settings.sources_path(), PathBuf::from("/srv/irrd/sources.json"));
        assert_eq!(
            settings.database_url.as_deref(),
            Some("postgres://irrd@localhost/irrd")
        );
        assert_eq!(settings.tick_interval(), Duration::from_secs(5));
        assert_eq!(settings.request_timeout(), Duration::from_secs(1));
        assert_eq!(settings.temp_dir, Some(PathBuf::from("/var/tmp/irrd")));
    }
}
