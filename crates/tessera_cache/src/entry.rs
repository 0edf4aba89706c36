//! On-disk cache entries.
//!
//! An entry file is the 4 magic bytes `TSRA`, a bincode [`EntryHeader`] and
//! the payload. The header records who wrote the entry and a checksum of the
//! payload, so a reader can tell an outdated entry from a damaged one.

use std::path::{Path, PathBuf};

use bincode::config::{standard, Configuration};
use serde::{Deserialize, Serialize};
use tessera_common::ContentHash;

use crate::error::CacheError;

const MAGIC: [u8; 4] = *b"TSRA";

/// Bumped whenever the header layout changes.
const FORMAT_VERSION: u32 = 1;

fn header_config() -> Configuration {
    standard()
}

/// Metadata written in front of every payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryHeader {
    /// Layout version of the header itself.
    pub format_version: u32,
    /// Engine version that wrote the payload.
    pub engine_version: String,
    /// Payload length in bytes.
    pub payload_len: u64,
    /// Checksum of the payload.
    pub checksum: ContentHash,
}

/// One directory of entry files named `<key>.<extension>`.
#[derive(Debug, Clone)]
pub struct EntryStore {
    dir: PathBuf,
    extension: &'static str,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError {
    let path = path.to_path_buf();
    move |source| CacheError::Io { path, source }
}

impl EntryStore {
    /// Entry files with `extension` inside `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>, extension: &'static str) -> Self {
        Self {
            dir: dir.into(),
            extension,
        }
    }

    /// File holding the entry under `key`.
    pub fn path_of(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{}", self.extension))
    }

    /// Writes `payload` under `key`, replacing any previous entry.
    pub fn write(
        &self,
        key: &str,
        payload: &[u8],
        engine_version: &str,
    ) -> Result<ContentHash, CacheError> {
        std::fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;
        let header = EntryHeader {
            format_version: FORMAT_VERSION,
            engine_version: engine_version.to_string(),
            payload_len: payload.len() as u64,
            checksum: ContentHash::from_bytes(payload),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, header_config())
            .map_err(|e| CacheError::Frame(e.to_string()))?;

        let mut file = Vec::with_capacity(MAGIC.len() + header_bytes.len() + payload.len());
        file.extend_from_slice(&MAGIC);
        file.extend_from_slice(&header_bytes);
        file.extend_from_slice(payload);
        let path = self.path_of(key);
        std::fs::write(&path, file).map_err(io_error(&path))?;
        Ok(header.checksum)
    }

    /// Reads the payload under `key`.
    ///
    /// `Ok(None)` means there is no entry. An entry written by another format
    /// or engine version yields an error for which [`CacheError::is_stale`]
    /// holds.
    pub fn read(&self, key: &str, engine_version: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path_of(key);
        let mut file = match std::fs::read(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path)(e)),
        };
        let corrupt = |reason: String| CacheError::Corrupt {
            path: path.clone(),
            reason,
        };

        if !file.starts_with(&MAGIC) {
            return Err(corrupt("not a tessera cache entry".to_string()));
        }
        let (header, header_len): (EntryHeader, usize) =
            bincode::serde::decode_from_slice(&file[MAGIC.len()..], header_config())
                .map_err(|e| corrupt(format!("unreadable header: {e}")))?;

        let stale = |reason: String| CacheError::Stale {
            path: path.clone(),
            reason,
        };
        if header.format_version != FORMAT_VERSION {
            return Err(stale(format!(
                "entry format {} is not {FORMAT_VERSION}",
                header.format_version
            )));
        }
        if header.engine_version != engine_version {
            return Err(stale(format!(
                "written by engine {}, running {engine_version}",
                header.engine_version
            )));
        }

        let payload = file.split_off(MAGIC.len() + header_len);
        if payload.len() as u64 != header.payload_len {
            return Err(corrupt(format!(
                "payload is {} bytes, header says {}",
                payload.len(),
                header.payload_len
            )));
        }
        if ContentHash::from_bytes(&payload) != header.checksum {
            return Err(corrupt(format!("checksum {} does not match", header.checksum)));
        }
        Ok(Some(payload))
    }

    /// Deletes the entry under `key`, if present.
    pub fn remove(&self, key: &str) -> Result<(), CacheError> {
        let path = self.path_of(key);
        match std::fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(io_error(&path)(e)),
            _ => Ok(()),
        }
    }

    /// Deletes every entry whose key `keep` rejects. Returns how many went.
    pub fn retain(&self, mut keep: impl FnMut(&str) -> bool) -> Result<usize, CacheError> {
        let listing = match std::fs::read_dir(&self.dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error(&self.dir)(e)),
        };
        let mut removed = 0;
        for item in listing {
            let path = item.map_err(io_error(&self.dir))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !keep(key) {
                std::fs::remove_file(&path).map_err(io_error(&path))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENGINE: &str = "0.1.0";

    fn store() -> (tempfile::TempDir, EntryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = EntryStore::new(dir.path().join("plans"), "bin");
        (dir, store)
    }

    fn overwrite(store: &EntryStore, key: &str, edit: impl FnOnce(&mut Vec<u8>)) {
        let path = store.path_of(key);
        let mut file = std::fs::read(&path).unwrap();
        edit(&mut file);
        std::fs::write(path, file).unwrap();
    }

    #[test]
    fn written_payload_reads_back() {
        let (_dir, store) = store();
        let checksum = store.write("plan", b"work graph bytes", ENGINE).unwrap();
        assert_eq!(checksum, ContentHash::from_bytes(b"work graph bytes"));
        let payload = store.read("plan", ENGINE).unwrap();
        assert_eq!(payload.as_deref(), Some(b"work graph bytes".as_slice()));
    }

    #[test]
    fn absent_entry_is_none() {
        let (_dir, store) = store();
        assert!(store.read("plan", ENGINE).unwrap().is_none());
    }

    #[test]
    fn foreign_file_is_corrupt() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.path_of("x").parent().unwrap()).unwrap();
        std::fs::write(store.path_of("x"), b"PK\x03\x04zip").unwrap();
        let err = store.read("x", ENGINE).unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { .. }));
        assert!(!err.is_stale());
    }

    #[test]
    fn cut_header_is_corrupt() {
        let (_dir, store) = store();
        store.write("plan", b"payload", ENGINE).unwrap();
        overwrite(&store, "plan", |file| file.truncate(MAGIC.len() + 2));
        assert!(matches!(
            store.read("plan", ENGINE).unwrap_err(),
            CacheError::Corrupt { .. }
        ));
    }

    #[test]
    fn flipped_payload_byte_fails_the_checksum() {
        let (_dir, store) = store();
        store.write("plan", b"payload", ENGINE).unwrap();
        overwrite(&store, "plan", |file| *file.last_mut().unwrap() ^= 0x20);
        let err = store.read("plan", ENGINE).unwrap_err();
        assert!(err.to_string().contains("checksum"), "{err}");
    }

    #[test]
    fn appended_bytes_are_corrupt() {
        let (_dir, store) = store();
        store.write("plan", b"payload", ENGINE).unwrap();
        overwrite(&store, "plan", |file| file.push(0));
        assert!(matches!(
            store.read("plan", ENGINE).unwrap_err(),
            CacheError::Corrupt { .. }
        ));
    }

    #[test]
    fn other_engine_is_stale() {
        let (_dir, store) = store();
        store.write("plan", b"payload", "0.0.9").unwrap();
        let err = store.read("plan", ENGINE).unwrap_err();
        assert!(err.is_stale());
        assert!(err.to_string().contains("0.0.9"));
    }

    #[test]
    fn other_format_is_stale() {
        let (_dir, store) = store();
        let header = EntryHeader {
            format_version: FORMAT_VERSION + 1,
            engine_version: ENGINE.to_string(),
            payload_len: 1,
            checksum: ContentHash::from_bytes(b"x"),
        };
        let mut file = MAGIC.to_vec();
        file.extend(bincode::serde::encode_to_vec(&header, header_config()).unwrap());
        file.push(b'x');
        std::fs::create_dir_all(store.path_of("plan").parent().unwrap()).unwrap();
        std::fs::write(store.path_of("plan"), file).unwrap();
        assert!(store.read("plan", ENGINE).unwrap_err().is_stale());
    }

    #[test]
    fn removing_twice_is_fine() {
        let (_dir, store) = store();
        store.write("plan", b"payload", ENGINE).unwrap();
        store.remove("plan").unwrap();
        store.remove("plan").unwrap();
        assert!(store.read("plan", ENGINE).unwrap().is_none());
    }

    #[test]
    fn retain_drops_rejected_keys_only() {
        let (_dir, store) = store();
        store.write("live", b"a", ENGINE).unwrap();
        store.write("orphan", b"b", ENGINE).unwrap();
        assert_eq!(store.retain(|key| key == "live").unwrap(), 1);
        assert!(store.read("live", ENGINE).unwrap().is_some());
        assert!(store.read("orphan", ENGINE).unwrap().is_none());
    }

    #[test]
    fn retain_without_directory_removes_nothing() {
        let (_dir, store) = store();
        assert_eq!(store.retain(|_| false).unwrap(), 0);
    }
}
