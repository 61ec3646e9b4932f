//! Audit log of file events
//!
//! Append-only journal, one per user. Entries are length-prefixed and closed by a CRC32;
//! reading stops at the first damaged or truncated entry.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};
use crc32fast::Hasher;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::codec::Reader;
use crate::error::{Error, Result};
use crate::model::FileId;

const MAGIC: &[u8] = b"MFSLOG01";
const MAX_ENTRY_LEN: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub sequence: u64,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub file_id: FileId,
    pub event: FileEvent,
}

impl AuditEntry {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileEvent {
    Created { name: String },
    AccessedOriginal,
    VersionCreated { version: u32 },
    AccessedVersion { version: u32 },
    Renamed { name: String },
    Deleted,
}

impl FileEvent {
    pub fn describe(&self) -> String {
        match self {
            FileEvent::Created { name } => format!("created as {name:?}"),
            FileEvent::AccessedOriginal => "original accessed".to_string(),
            FileEvent::VersionCreated { version } => format!("version {version} created"),
            FileEvent::AccessedVersion { version } => format!("version {version} accessed"),
            FileEvent::Renamed { name } => format!("renamed to {name:?}"),
            FileEvent::Deleted => "deleted".to_string(),
        }
    }
}

pub struct AuditLog {
    path: PathBuf,
    file: Mutex<File>,
    sequence: AtomicU64,
}

impl AuditLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = Self::open_append(&path)?;

        // Write magic if new file
        if file.metadata()?.len() == 0 {
            file.write_all(MAGIC)?;
            file.sync_data()?;
        }

        let next = Self::read_all(&path)?
            .last()
            .map(|entry| entry.sequence + 1)
            .unwrap_or(0);

        Ok(Self {
            path,
            file: Mutex::new(file),
            sequence: AtomicU64::new(next),
        })
    }

    /// Append an event, returning its sequence number.
    pub fn append(&self, file_id: FileId, event: FileEvent) -> Result<u64> {
        let mut file = self.file.lock();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let entry = AuditEntry {
            sequence,
            timestamp: Utc::now().timestamp_millis(),
            file_id,
            event,
        };

        file.write_all(&Self::encode_entry(&entry))?;
        file.sync_data()?;
        Ok(sequence)
    }

    pub fn entries(&self) -> Result<Vec<AuditEntry>> {
        let _file = self.file.lock();
        Self::read_all(&self.path)
    }

    pub fn entries_for_file(&self, file_id: FileId) -> Result<Vec<AuditEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|entry| entry.file_id == file_id)
            .collect())
    }

    /// Drop every entry of a file. Returns how many were removed.
    pub fn purge_file(&self, file_id: FileId) -> Result<usize> {
        self.retain(|entry| entry.file_id != file_id)
    }

    pub fn purge_all(&self) -> Result<usize> {
        self.retain(|_| false)
    }

    fn retain(&self, keep: impl Fn(&AuditEntry) -> bool) -> Result<usize> {
        let mut file = self.file.lock();
        let entries = Self::read_all(&self.path)?;
        let before = entries.len();
        let kept: Vec<_> = entries.into_iter().filter(|entry| keep(entry)).collect();
        let removed = before - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        let temp_path = self.path.with_extension("tmp");
        {
            let mut temp_file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp_path)?;
            temp_file.write_all(MAGIC)?;
            for entry in &kept {
                temp_file.write_all(&Self::encode_entry(entry))?;
            }
            temp_file.sync_all()?;
        }

        // Atomically replace the log, then append to the new file
        std::fs::rename(&temp_path, &self.path)?;
        *file = Self::open_append(&self.path)?;

        Ok(removed)
    }

    fn open_append(path: &Path) -> Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?)
    }

    fn read_all(path: &Path) -> Result<Vec<AuditEntry>> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 8];
        if reader.read_exact(&mut magic).is_err() {
            return Ok(Vec::new());
        }
        if &magic != MAGIC {
            return Err(Error::corrupted(format!("{} is not an audit log", path.display())));
        }

        let mut entries = Vec::new();
        while let Ok(entry) = Self::decode_entry(&mut reader) {
            entries.push(entry);
        }
        Ok(entries)
    }

    fn encode_entry(entry: &AuditEntry) -> Vec<u8> {
        let mut buf = BytesMut::new();

        buf.put_u64(entry.sequence);
        buf.put_i64(entry.timestamp);
        buf.put_u64(entry.file_id);

        match &entry.event {
            FileEvent::Created { name } => {
                buf.put_u8(1);
                buf.put_u32(name.len() as u32);
                buf.put(name.as_bytes());
            }
            FileEvent::AccessedOriginal => buf.put_u8(2),
            FileEvent::VersionCreated { version } => {
                buf.put_u8(3);
                buf.put_u32(*version);
            }
            FileEvent::AccessedVersion { version } => {
                buf.put_u8(4);
                buf.put_u32(*version);
            }
            FileEvent::Renamed { name } => {
                buf.put_u8(5);
                buf.put_u32(name.len() as u32);
                buf.put(name.as_bytes());
            }
            FileEvent::Deleted => buf.put_u8(6),
        }

        // Length prefix and CRC
        let data = buf.freeze();
        let mut hasher = Hasher::new();
        hasher.update(&data);
        let crc = hasher.finalize();

        let mut result = BytesMut::with_capacity(data.len() + 8);
        result.put_u32(data.len() as u32 + 4);
        result.put(data);
        result.put_u32(crc);
        result.to_vec()
    }

    fn decode_entry<R: Read>(reader: &mut R) -> Result<AuditEntry> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if !(4..=MAX_ENTRY_LEN).contains(&len) {
            return Err(Error::corrupted("audit entry length out of range"));
        }

        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;

        // Verify CRC
        let (data, crc) = buf.split_at(len - 4);
        let mut hasher = Hasher::new();
        hasher.update(data);
        if hasher.finalize() != u32::from_be_bytes([crc[0], crc[1], crc[2], crc[3]]) {
            return Err(Error::corrupted("audit entry CRC mismatch"));
        }

        let mut cursor = Reader::new(data, "audit entry");
        let sequence = cursor.u64()?;
        let timestamp = cursor.i64()?;
        let file_id = cursor.u64()?;
        let event = match cursor.u8()? {
            1 => FileEvent::Created { name: cursor.string()? },
            2 => FileEvent::AccessedOriginal,
            3 => FileEvent::VersionCreated { version: cursor.u32()? },
            4 => FileEvent::AccessedVersion { version: cursor.u32()? },
            5 => FileEvent::Renamed { name: cursor.string()? },
            6 => FileEvent::Deleted,
            other => return Err(Error::corrupted(format!("unknown audit event {other}"))),
        };

        Ok(AuditEntry {
            sequence,
            timestamp,
            file_id,
            event,
        })
    }
}

#[cfg(test)]
mod tests;
