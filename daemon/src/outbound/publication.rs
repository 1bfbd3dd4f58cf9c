//! Publication directory on the local filesystem.
//!
//! Files are written to a hidden temporary name in the same directory, synced,
//! then renamed over the final name. All access goes through a `cap_std`
//! directory handle, so names can never escape the directory.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use camino::{Utf8Component, Utf8Path};
use cap_std::ambient_authority;
use cap_std::fs::{Dir, File, OpenOptions};
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::domain::ports::{PendingFile, PublicationDirectory, PublicationError, PublishedEntry};

const TEMP_PREFIX: &str = ".";

/// [`PublicationDirectory`] backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct LocalPublicationDirectory {
    dir: Arc<Dir>,
    path: PathBuf,
}

impl LocalPublicationDirectory {
    /// Open `path`, creating it and its parents when missing.
    ///
    /// # Errors
    ///
    /// Returns [`PublicationError::Open`] when the directory cannot be created
    /// or opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PublicationError> {
        let path = path.as_ref();
        let open_error =
            |err: io::Error| PublicationError::open(path.display().to_string(), err.to_string());
        Dir::create_ambient_dir_all(path, ambient_authority()).map_err(open_error)?;
        let dir = Dir::open_ambient_dir(path, ambient_authority()).map_err(open_error)?;
        Ok(Self {
            dir: Arc::new(dir),
            path: path.to_path_buf(),
        })
    }

    /// Filesystem location of the directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn validate_name(name: &str) -> Result<(), PublicationError> {
    let mut components = Utf8Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Utf8Component::Normal(file_name)), None)
            if file_name == name && !name.starts_with(TEMP_PREFIX) =>
        {
            Ok(())
        }
        _ => Err(PublicationError::invalid_name(name)),
    }
}

fn sync_directory(dir: &Dir) {
    if let Err(err) = dir.open(".").and_then(|handle| handle.sync_all()) {
        debug!(error = %err, "directory sync failed");
    }
}

impl PublicationDirectory for LocalPublicationDirectory {
    fn create(&self, name: &str) -> Result<Box<dyn PendingFile>, PublicationError> {
        validate_name(name)?;
        let temp_name = format!("{TEMP_PREFIX}{name}.tmp.{}", Uuid::new_v4().simple());
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        let file = self
            .dir
            .open_with(&temp_name, &options)
            .map_err(|err| PublicationError::write(name, err.to_string()))?;
        Ok(Box::new(LocalPendingFile {
            dir: Arc::clone(&self.dir),
            file: Some(file),
            temp_name,
            name: name.to_owned(),
        }))
    }

    fn exists(&self, name: &str) -> Result<bool, PublicationError> {
        validate_name(name)?;
        match self.dir.metadata(name) {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(PublicationError::list(err.to_string())),
        }
    }

    fn list(&self) -> Result<Vec<PublishedEntry>, PublicationError> {
        let list_error = |err: io::Error| PublicationError::list(err.to_string());
        let mut entries = Vec::new();
        for entry in self.dir.entries().map_err(list_error)? {
            let entry = entry.map_err(list_error)?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            let metadata = entry.metadata().map_err(list_error)?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().map_err(list_error)?.into_std();
            entries.push(PublishedEntry {
                name,
                modified: DateTime::<Utc>::from(modified),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn remove(&self, name: &str) -> Result<(), PublicationError> {
        validate_name(name)?;
        match self.dir.remove_file(name) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PublicationError::remove(name, err.to_string())),
        }
    }
}

/// A file being written under a temporary name.
struct LocalPendingFile {
    dir: Arc<Dir>,
    file: Option<File>,
    temp_name: String,
    name: String,
}

impl LocalPendingFile {
    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("pending file already committed"))
    }
}

impl Write for LocalPendingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file()?.flush()
    }
}

impl PendingFile for LocalPendingFile {
    fn commit(mut self: Box<Self>) -> Result<(), PublicationError> {
        let name = self.name.clone();
        let write_error = |err: io::Error| PublicationError::write(&name, err.to_string());
        let mut file = self
            .file
            .take()
            .ok_or_else(|| write_error(io::Error::other("pending file already committed")))?;
        file.flush().map_err(write_error)?;
        file.sync_all().map_err(write_error)?;
        drop(file);
        self.dir
            .rename(&self.temp_name, &self.dir, &self.name)
            .map_err(write_error)?;
        sync_directory(&self.dir);
        self.temp_name.clear();
        Ok(())
    }
}

impl Drop for LocalPendingFile {
    fn drop(&mut self) {
        if self.temp_name.is_empty() {
            return;
        }
        self.file.take();
        if let Err(err) = self.dir.remove_file(&self.temp_name) {
            debug!(file = %self.temp_name, error = %err, "failed to remove abandoned temp file");
        }
    }
}
