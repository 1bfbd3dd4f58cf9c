//! NRTM version 4: signed notification files over static HTTP(S) hosting.
//!
//! [`client`] follows a remote publication, and [`server_writer`] produces
//! one from a local source. Both share the file model in [`types`] and the
//! compressed JSON sequence framing in [`files`].

mod client;
pub mod files;
mod server_writer;
pub mod types;

pub use self::client::{Nrtm4Client, Nrtm4ClientOutcome, Nrtm4ClientPorts};
pub use self::files::{DataFileReader, UNF_FILENAME, data_file_name, write_data_file};
pub use self::server_writer::{
    DANGLING_MIN_AGE, DELTA_RETENTION, Nrtm4ServerKeys, Nrtm4ServerOutcome, Nrtm4ServerPorts,
    Nrtm4ServerWriter, UNF_REFRESH,
};
pub use self::types::{
    DataFileHeader, DeltaChange, FileReference, NRTM_VERSION, NrtmFileType, SnapshotObject,
    UNF_FRESHNESS, UpdateNotificationFile,
};
