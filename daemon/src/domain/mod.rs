//! Domain model and services for NRTM mirroring.
//!
//! The domain owns the protocol logic (NRTM v3 parsing, NRTM v4 client and
//! server, flat-file export, scheduling) and talks to the outside world only
//! through the traits in [`ports`].

pub mod error;
pub mod export;
pub mod hashing;
pub mod journal;
pub mod lease;
mod mirror;
pub mod nrtm3;
pub mod nrtm4;
pub mod ports;
pub mod rpsl;
pub mod scheduler;
pub mod signature;
pub mod source;
pub mod status;

pub use self::error::{MirrorError, MirrorErrorKind};
pub use self::journal::{DatabaseOperation, JournalEntry, JournalEntryOrigin, SerialRange};
pub use self::lease::{Lease, LeaseRegistry};
pub use self::rpsl::{DummifyPolicy, RpslObject};
pub use self::source::{
    ExportConfig, Nrtm3ImportConfig, Nrtm4ClientConfig, Nrtm4ServerConfig, SourceConfig,
};
pub use self::status::{
    ClientStatus, DatabaseStatus, DeltaRecord, FileFingerprint, ServerStatus, SnapshotRecord,
};
