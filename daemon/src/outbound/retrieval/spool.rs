//! Temporary local copies of retrieved files.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use tempfile::NamedTempFile;

use crate::domain::ports::LocalFile;

/// A temporary file removed on drop.
#[derive(Debug)]
pub(super) struct Spool {
    file: NamedTempFile,
}

impl Spool {
    pub(super) fn create(dir: Option<&Path>) -> io::Result<Self> {
        let file = match dir {
            Some(dir) => NamedTempFile::with_prefix_in("irrd-mirror-", dir)?,
            None => NamedTempFile::with_prefix("irrd-mirror-")?,
        };
        Ok(Self { file })
    }

    pub(super) fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.as_file_mut().write_all(chunk)
    }

    pub(super) fn finish(&mut self) -> io::Result<()> {
        self.file.as_file_mut().flush()
    }

    pub(super) fn as_file_mut(&mut self) -> &mut File {
        self.file.as_file_mut()
    }

    /// Inflate this spool into a new one.
    pub(super) fn gunzip(self, dir: Option<&Path>) -> io::Result<Self> {
        gunzip_reader(self.file.reopen()?, dir)
    }
}

pub(super) fn gunzip_path(path: &Path, dir: Option<&Path>) -> io::Result<Spool> {
    gunzip_reader(File::open(path)?, dir)
}

fn gunzip_reader(compressed: File, dir: Option<&Path>) -> io::Result<Spool> {
    let mut decoder = MultiGzDecoder::new(BufReader::new(compressed));
    let mut plain = Spool::create(dir)?;
    io::copy(&mut decoder, plain.as_file_mut())?;
    plain.finish()?;
    Ok(plain)
}

impl LocalFile for Spool {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(BufReader::new(self.file.reopen()?)))
    }
}

/// A `file://` source read in place.
#[derive(Debug)]
pub(super) struct ExistingFile {
    path: PathBuf,
}

impl ExistingFile {
    pub(super) const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl LocalFile for ExistingFile {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(BufReader::new(File::open(&self.path)?)))
    }
}
