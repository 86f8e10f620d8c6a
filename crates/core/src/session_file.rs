//! Session files.
//!
//! A session file is the device [`Configuration`] followed by an ordered list
//! of named sub-system records. The engine only fixes the record order and the
//! "can reload" veto; each sub-system owns its own record format.
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "HSES"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode SessionImage
//! +------------------+
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::Configuration;
use crate::error::{Result, SessionError};

/// Magic bytes identifying a session file.
const MAGIC: &[u8; 4] = b"HSES";
/// Current session file format version.
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 8;

/// One named sub-system record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub payload: Vec<u8>,
}

/// Everything a session file holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionImage {
    pub configuration: Configuration,
    pub records: Vec<Record>,
}

impl SessionImage {
    pub fn record(&self, name: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.name == name)
    }

    /// Record names in file order.
    pub fn record_names(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.name.as_str()).collect()
    }
}

/// Collects records while a session is being saved.
pub struct SessionWriter {
    image: SessionImage,
}

impl SessionWriter {
    pub fn new(configuration: Configuration) -> Self {
        SessionWriter {
            image: SessionImage { configuration, records: Vec::new() },
        }
    }

    /// Append a record. A second record with the same name replaces the first.
    pub fn write<T: Serialize>(&mut self, name: &str, value: &T) -> Result<()> {
        let payload = bincode::serialize(value)?;
        self.write_raw(name, payload);
        Ok(())
    }

    pub fn write_raw(&mut self, name: &str, payload: Vec<u8>) {
        if let Some(existing) = self.image.records.iter_mut().find(|r| r.name == name) {
            existing.payload = payload;
        } else {
            self.image.records.push(Record { name: name.to_string(), payload });
        }
    }

    pub fn finish(self) -> SessionImage {
        self.image
    }
}

/// Hands records back to sub-systems while a session is being loaded.
pub struct SessionReader {
    image: SessionImage,
    can_reload: bool,
}

impl SessionReader {
    pub fn new(image: SessionImage) -> Self {
        SessionReader { image, can_reload: true }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.image.configuration
    }

    /// Decode a record. `Ok(None)` if the file has no record by that name.
    pub fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.image.record(name) {
            Some(record) => Ok(Some(bincode::deserialize(&record.payload)?)),
            None => Ok(None),
        }
    }

    pub fn read_raw(&self, name: &str) -> Option<&[u8]> {
        self.image.record(name).map(|r| r.payload.as_slice())
    }

    /// Veto (or re-allow) resuming from this file.
    pub fn set_can_reload(&mut self, can_reload: bool) {
        self.can_reload = can_reload;
    }

    pub fn can_reload(&self) -> bool {
        self.can_reload
    }
}

/// Encode an image with header and deflate compression.
pub fn to_bytes(image: &SessionImage) -> Result<Vec<u8>> {
    let payload = bincode::serialize(image)?;
    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Decode an image, verifying magic and version.
pub fn from_bytes(data: &[u8]) -> Result<SessionImage> {
    if data.len() < HEADER_LEN {
        return Err(SessionError::Truncated);
    }
    if &data[0..4] != MAGIC {
        return Err(SessionError::InvalidMagic);
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(SessionError::UnsupportedVersion {
            found: version,
            expected: FORMAT_VERSION,
        });
    }

    let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[HEADER_LEN..])
        .map_err(|e| SessionError::Decompress(format!("{:?}", e)))?;

    Ok(bincode::deserialize(&decompressed)?)
}

pub fn save_to_file(image: &SessionImage, path: &Path) -> Result<()> {
    let bytes = to_bytes(image)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load_from_file(path: &Path) -> Result<SessionImage> {
    let data = std::fs::read(path)?;
    from_bytes(&data)
}
