//! Driven port for the directory files are published into.
//!
//! Files appear under their final name only once committed, so readers never
//! observe a partially written file.

use std::io::Write;

use chrono::{DateTime, Utc};

use super::define_port_error;

define_port_error! {
    /// Errors raised by publication directory adapters.
    pub enum PublicationError {
        /// The directory could not be opened or created.
        Open { path: String, message: String } => "cannot open publication directory {path}: {message}",
        /// A file could not be written.
        Write { name: String, message: String } => "cannot write {name}: {message}",
        /// A file could not be removed.
        Remove { name: String, message: String } => "cannot remove {name}: {message}",
        /// The directory listing failed.
        List { message: String } => "cannot list publication directory: {message}",
        /// The file name is not a plain name inside the directory.
        InvalidName { name: String } => "invalid publication file name: {name}",
    }
}

/// A file being written; it becomes visible on [`PendingFile::commit`].
pub trait PendingFile: Write + Send {
    /// Flush, sync and move the file to its final name.
    ///
    /// # Errors
    ///
    /// Returns [`PublicationError::Write`] when any step fails.
    fn commit(self: Box<Self>) -> Result<(), PublicationError>;
}

/// A file currently present in the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEntry {
    /// File name.
    pub name: String,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

/// Port for a publication directory.
pub trait PublicationDirectory: Send + Sync {
    /// Start writing `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PublicationError`] when the temporary file cannot be created.
    fn create(&self, name: &str) -> Result<Box<dyn PendingFile>, PublicationError>;

    /// Whether `name` exists.
    ///
    /// # Errors
    ///
    /// Returns [`PublicationError`] when the directory cannot be inspected.
    fn exists(&self, name: &str) -> Result<bool, PublicationError>;

    /// List regular files.
    ///
    /// # Errors
    ///
    /// Returns [`PublicationError::List`] when the listing fails.
    fn list(&self) -> Result<Vec<PublishedEntry>, PublicationError>;

    /// Remove `name`; missing files are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`PublicationError::Remove`] when removal fails.
    fn remove(&self, name: &str) -> Result<(), PublicationError>;
}
