//! In-memory stand-ins for remote publishers and publication directories.

use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use flate2::read::MultiGzDecoder;
use mockable::Clock;
use url::Url;
use uuid::Uuid;

use crate::domain::nrtm4::{
    DataFileHeader, DeltaChange, FileReference, NRTM_VERSION, NrtmFileType, SnapshotObject,
    UNF_FILENAME, UpdateNotificationFile, data_file_name, write_data_file,
};
use crate::domain::ports::{
    BufferedFile, FileRetriever, LocalFile, NrtmStreamError, NrtmStreamSource, PendingFile,
    PublicationDirectory, PublicationError, PublishedEntry, RetrievalError,
};
use crate::domain::signature::sign_compact;

use super::fixtures::public_pem;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(_) => panic!("test double mutex poisoned"),
    }
}

/// [`FileRetriever`] serving files from a map and recording every request.
#[derive(Default)]
pub struct MemoryRemote {
    files: Mutex<BTreeMap<Url, Vec<u8>>>,
    requests: Mutex<Vec<Url>>,
}

impl MemoryRemote {
    pub fn insert(&self, url: Url, bytes: impl Into<Vec<u8>>) {
        guard(&self.files).insert(url, bytes.into());
    }

    pub fn remove(&self, url: &Url) {
        guard(&self.files).remove(url);
    }

    pub fn get(&self, url: &Url) -> Option<Vec<u8>> {
        guard(&self.files).get(url).cloned()
    }

    pub fn requests(&self) -> Vec<Url> {
        guard(&self.requests).clone()
    }

    fn fetch(&self, url: &Url) -> Result<Vec<u8>, RetrievalError> {
        guard(&self.requests).push(url.clone());
        self.get(url)
            .ok_or_else(|| RetrievalError::status(url.as_str(), 404_u16))
    }
}

#[async_trait]
impl FileRetriever for MemoryRemote {
    async fn retrieve_bytes(&self, url: &Url) -> Result<Vec<u8>, RetrievalError> {
        self.fetch(url)
    }

    async fn retrieve_to_file(
        &self,
        url: &Url,
        decompress: bool,
    ) -> Result<Box<dyn LocalFile>, RetrievalError> {
        let bytes = self.fetch(url)?;
        if !(decompress && url.path().ends_with(".gz")) {
            return Ok(Box::new(BufferedFile(bytes)));
        }
        let mut plain = Vec::new();
        MultiGzDecoder::new(bytes.as_slice())
            .read_to_end(&mut plain)
            .map_err(|err| RetrievalError::local(url.as_str(), err.to_string()))?;
        Ok(Box::new(BufferedFile(plain)))
    }
}

/// [`NrtmStreamSource`] replaying canned responses in order.
#[derive(Default)]
pub struct ScriptedNrtmServer {
    responses: Mutex<VecDeque<Result<String, NrtmStreamError>>>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedNrtmServer {
    pub fn respond(&self, response: impl Into<String>) {
        guard(&self.responses).push_back(Ok(response.into()));
    }

    pub fn fail(&self, error: NrtmStreamError) {
        guard(&self.responses).push_back(Err(error));
    }

    pub fn queries(&self) -> Vec<String> {
        guard(&self.queries).clone()
    }
}

#[async_trait]
impl NrtmStreamSource for ScriptedNrtmServer {
    async fn query(&self, host: &str, _port: u16, query: &str) -> Result<String, NrtmStreamError> {
        guard(&self.queries).push(query.to_owned());
        guard(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(NrtmStreamError::connect(host, "no scripted response")))
    }
}

type Files = Arc<Mutex<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>>;

/// [`PublicationDirectory`] held in memory.
pub struct MemoryPublication {
    files: Files,
    clock: Arc<dyn Clock>,
}

impl MemoryPublication {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            files: Arc::default(),
            clock,
        }
    }

    pub fn read(&self, name: &str) -> Option<Vec<u8>> {
        guard(&self.files).get(name).map(|(bytes, _)| bytes.clone())
    }

    pub fn names(&self) -> Vec<String> {
        guard(&self.files).keys().cloned().collect()
    }

    /// Place a file directly, as if written at `modified`.
    pub fn insert(&self, name: &str, bytes: impl Into<Vec<u8>>, modified: DateTime<Utc>) {
        guard(&self.files).insert(name.to_owned(), (bytes.into(), modified));
    }

    pub fn delete(&self, name: &str) {
        guard(&self.files).remove(name);
    }

    /// Serve every published file from `base` on `remote`.
    pub fn serve_on(&self, remote: &MemoryRemote, base: &Url) {
        for (name, (bytes, _)) in guard(&self.files).iter() {
            match base.join(name) {
                Ok(url) => remote.insert(url, bytes.clone()),
                Err(error) => panic!("cannot join {name} onto {base}: {error}"),
            }
        }
    }
}

struct MemoryPendingFile {
    name: String,
    buffer: Vec<u8>,
    files: Files,
    clock: Arc<dyn Clock>,
}

impl Write for MemoryPendingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PendingFile for MemoryPendingFile {
    fn commit(self: Box<Self>) -> Result<(), PublicationError> {
        let now = self.clock.utc();
        guard(&self.files).insert(self.name, (self.buffer, now));
        Ok(())
    }
}

impl PublicationDirectory for MemoryPublication {
    fn create(&self, name: &str) -> Result<Box<dyn PendingFile>, PublicationError> {
        Ok(Box::new(MemoryPendingFile {
            name: name.to_owned(),
            buffer: Vec::new(),
            files: Arc::clone(&self.files),
            clock: Arc::clone(&self.clock),
        }))
    }

    fn exists(&self, name: &str) -> Result<bool, PublicationError> {
        Ok(guard(&self.files).contains_key(name))
    }

    fn list(&self) -> Result<Vec<PublishedEntry>, PublicationError> {
        Ok(guard(&self.files)
            .iter()
            .map(|(name, (_, modified))| PublishedEntry {
                name: name.clone(),
                modified: *modified,
            })
            .collect())
    }

    fn remove(&self, name: &str) -> Result<(), PublicationError> {
        guard(&self.files).remove(name);
        Ok(())
    }
}

/// Hand-built NRTM v4 publication served by a [`MemoryRemote`].
pub struct Nrtm4Publisher {
    pub source: String,
    pub session_id: Uuid,
    pub key: SigningKey,
    pub next_key: Option<SigningKey>,
    pub snapshot: Option<FileReference>,
    pub deltas: Vec<FileReference>,
    base: Url,
    remote: Arc<MemoryRemote>,
}

impl Nrtm4Publisher {
    pub fn new(source: &str, base: Url, key: SigningKey, remote: Arc<MemoryRemote>) -> Self {
        Self {
            source: source.to_owned(),
            session_id: Uuid::new_v4(),
            key,
            next_key: None,
            snapshot: None,
            deltas: Vec::new(),
            base,
            remote,
        }
    }

    pub fn notification_url(&self) -> Url {
        self.url(UNF_FILENAME)
    }

    pub fn url(&self, name: &str) -> Url {
        match self.base.join(name) {
            Ok(url) => url,
            Err(error) => panic!("cannot join {name}: {error}"),
        }
    }

    fn write_file<T: serde::Serialize>(
        &self,
        file_type: NrtmFileType,
        version: u64,
        records: Vec<T>,
    ) -> FileReference {
        let header = DataFileHeader {
            nrtm_version: NRTM_VERSION,
            file_type,
            source: self.source.clone(),
            session_id: self.session_id,
            version,
        };
        let (bytes, hash, _) = match write_data_file(Vec::new(), &header, records) {
            Ok(written) => written,
            Err(error) => panic!("write data file: {error}"),
        };
        let name = data_file_name(file_type, version);
        self.remote.insert(self.url(&name), bytes);
        FileReference {
            version,
            url: name,
            hash,
        }
    }

    /// Publish a snapshot at `version` holding `objects`.
    pub fn snapshot(&mut self, version: u64, objects: &[String]) -> FileReference {
        let records = objects
            .iter()
            .map(|object| SnapshotObject {
                object: object.clone(),
            })
            .collect();
        let reference = self.write_file(NrtmFileType::Snapshot, version, records);
        self.snapshot = Some(reference.clone());
        reference
    }

    /// Publish a delta at `version`.
    pub fn delta(&mut self, version: u64, changes: Vec<DeltaChange>) -> FileReference {
        let reference = self.write_file(NrtmFileType::Delta, version, changes);
        self.deltas.push(reference.clone());
        reference
    }

    /// The notification file describing the current files.
    pub fn notification(&self, timestamp: DateTime<Utc>) -> UpdateNotificationFile {
        let Some(snapshot) = self.snapshot.clone() else {
            panic!("publish a snapshot first");
        };
        let version = self
            .deltas
            .iter()
            .map(|delta| delta.version)
            .fold(snapshot.version, u64::max);
        UpdateNotificationFile {
            nrtm_version: NRTM_VERSION,
            timestamp,
            file_type: NrtmFileType::Notification,
            next_signing_key: self.next_key.as_ref().map(public_pem),
            source: self.source.clone(),
            session_id: self.session_id,
            version,
            snapshot,
            deltas: self.deltas.clone(),
        }
    }

    /// Sign `unf` with `key` and serve it.
    pub fn publish_with(&self, unf: &UpdateNotificationFile, key: &SigningKey) {
        let payload = match serde_json::to_vec(unf) {
            Ok(payload) => payload,
            Err(error) => panic!("serialise notification file: {error}"),
        };
        match sign_compact(&payload, key) {
            Ok(jws) => self.remote.insert(self.notification_url(), jws),
            Err(error) => panic!("sign notification file: {error}"),
        }
    }

    /// Sign the current notification file with the current key and serve it.
    pub fn publish(&self, timestamp: DateTime<Utc>) -> UpdateNotificationFile {
        let unf = self.notification(timestamp);
        self.publish_with(&unf, &self.key);
        unf
    }
}
