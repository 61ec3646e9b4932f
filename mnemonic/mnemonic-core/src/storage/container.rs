//! Password-protected multi-entry containers
//!
//! Layout: `MFSCTR01`, a flags byte, and for sealed containers the Argon2id cost,
//! salt and nonce. The body lists `(name, data)` entries and ends with a CRC32.
//! Sealed bodies are AES-256-GCM ciphertext with the header as associated data.

use argon2::{Algorithm, Argon2, Params, Version};
use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher;
use rand::RngCore;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

use crate::codec::Reader;
use crate::config::ContainerConfig;
use crate::error::{Error, Result};

const MAGIC: &[u8; 8] = b"MFSCTR01";
const FLAG_SEALED: u8 = 0b0000_0001;
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
const SEALED_HEADER_LEN: usize = MAGIC.len() + 1 + 12 + SALT_LEN + NONCE_LEN;
const MAX_KDF_MEMORY_KIB: u32 = 4 * 1024 * 1024;
const MAX_KDF_ITERATIONS: u32 = 64;
const MAX_KDF_PARALLELISM: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEntry {
    pub name: String,
    pub data: Vec<u8>,
}

impl ContainerEntry {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Encode entries into container bytes. `None` leaves the body in the clear.
pub fn seal(
    entries: &[ContainerEntry],
    password: Option<&str>,
    kdf: &ContainerConfig,
) -> Result<Vec<u8>> {
    let body = encode_body(entries);
    let mut out = BytesMut::with_capacity(body.len() + SEALED_HEADER_LEN + 16);
    out.put_slice(MAGIC);

    let Some(password) = password else {
        out.put_u8(0);
        out.put_slice(&body);
        return Ok(out.to_vec());
    };
    if password.is_empty() {
        return Err(Error::invalid("container password must not be empty"));
    }

    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce_bytes);

    out.put_u8(FLAG_SEALED);
    out.put_u32(kdf.kdf_memory_kib);
    out.put_u32(kdf.kdf_iterations);
    out.put_u32(kdf.kdf_parallelism);
    out.put_slice(&salt);
    out.put_slice(&nonce_bytes);

    let key = derive_key(password, &salt, kdf)?;
    let mut in_out = body;
    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce_bytes),
        Aad::from(&out[..]),
        &mut in_out,
    )
    .map_err(|_| Error::corrupted("failed to seal container"))?;
    out.put_slice(&in_out);

    Ok(out.to_vec())
}

/// Decode container bytes. A wrong password surfaces as `StorageCorrupted`, and so
/// does a clear container when a password was expected.
pub fn open(bytes: &[u8], password: Option<&str>) -> Result<Vec<ContainerEntry>> {
    if bytes.len() < MAGIC.len() + 1 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(Error::corrupted("not a container"));
    }
    let flags = bytes[MAGIC.len()];
    if flags & FLAG_SEALED == 0 {
        if password.is_some() {
            return Err(Error::corrupted("expected a password protected container"));
        }
        return decode_body(&bytes[MAGIC.len() + 1..]);
    }

    let password =
        password.ok_or_else(|| Error::invalid("container is password protected"))?;
    if password.is_empty() {
        return Err(Error::invalid("container password must not be empty"));
    }
    if bytes.len() < SEALED_HEADER_LEN {
        return Err(Error::corrupted("truncated container header"));
    }

    let (header, sealed) = bytes.split_at(SEALED_HEADER_LEN);
    let mut cursor = &header[MAGIC.len() + 1..];
    let kdf = ContainerConfig {
        kdf_memory_kib: cursor.get_u32(),
        kdf_iterations: cursor.get_u32(),
        kdf_parallelism: cursor.get_u32(),
    };
    if kdf.kdf_memory_kib > MAX_KDF_MEMORY_KIB
        || kdf.kdf_iterations > MAX_KDF_ITERATIONS
        || kdf.kdf_parallelism > MAX_KDF_PARALLELISM
    {
        return Err(Error::corrupted("container key derivation cost out of range"));
    }
    let (salt, nonce) = cursor.split_at(SALT_LEN);
    let nonce: [u8; NONCE_LEN] = nonce
        .try_into()
        .map_err(|_| Error::corrupted("invalid nonce"))?;

    let key = derive_key(password, salt, &kdf)
        .map_err(|_| Error::corrupted("invalid key derivation parameters"))?;
    let mut in_out = sealed.to_vec();
    let plain_len = key
        .open_in_place(Nonce::assume_unique_for_key(nonce), Aad::from(header), &mut in_out)
        .map_err(|_| Error::corrupted("wrong password or damaged container"))?
        .len();
    in_out.truncate(plain_len);

    decode_body(&in_out)
}

/// Seal entries and place them at `path` through a temporary file and rename.
pub fn write_file(
    path: &Path,
    entries: &[ContainerEntry],
    password: Option<&str>,
    kdf: &ContainerConfig,
) -> Result<()> {
    let bytes = seal(entries, password, kdf)?;
    place(path, &bytes, |temp_path| std::fs::rename(temp_path, path))
}

/// Like [`write_file`], but never replaces an existing file: a taken `path` fails
/// with an `AlreadyExists` I/O error.
pub fn create_file(
    path: &Path,
    entries: &[ContainerEntry],
    password: Option<&str>,
    kdf: &ContainerConfig,
) -> Result<()> {
    let bytes = seal(entries, password, kdf)?;
    place(path, &bytes, |temp_path| {
        std::fs::hard_link(temp_path, path)?;
        std::fs::remove_file(temp_path)
    })
}

/// Write `bytes` to a fresh sibling of `path`, then let `commit` move it into place.
fn place(
    path: &Path,
    bytes: &[u8],
    commit: impl FnOnce(&Path) -> std::io::Result<()>,
) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::invalid(format!("{} has no parent directory", path.display())))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::invalid(format!("{} has no file name", path.display())))?;
    let temp_path = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let written = (|| -> std::io::Result<()> {
        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)?;
        temp_file.write_all(bytes)?;
        temp_file.sync_all()?;
        commit(&temp_path)
    })();

    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

pub fn read_file(path: &Path, password: Option<&str>) -> Result<Vec<ContainerEntry>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::corrupted(format!("container {} is missing", path.display())))
        }
        Err(e) => return Err(e.into()),
    };
    open(&bytes, password)
}

fn derive_key(password: &str, salt: &[u8], kdf: &ContainerConfig) -> Result<LessSafeKey> {
    let params = Params::new(
        kdf.kdf_memory_kib,
        kdf.kdf_iterations,
        kdf.kdf_parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| Error::invalid(format!("key derivation parameters: {e}")))?;

    let mut key = [0u8; KEY_LEN];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| Error::invalid(format!("key derivation failed: {e}")))?;

    let unbound = UnboundKey::new(&AES_256_GCM, &key)
        .map_err(|_| Error::invalid("invalid container key"))?;
    Ok(LessSafeKey::new(unbound))
}

fn encode_body(entries: &[ContainerEntry]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u32(entries.len() as u32);
    for entry in entries {
        buf.put_u32(entry.name.len() as u32);
        buf.put(entry.name.as_bytes());
        buf.put_u64(entry.data.len() as u64);
        buf.put_slice(&entry.data);
    }

    let mut hasher = Hasher::new();
    hasher.update(&buf);
    let crc = hasher.finalize();
    buf.put_u32(crc);

    buf.to_vec()
}

fn decode_body(body: &[u8]) -> Result<Vec<ContainerEntry>> {
    if body.len() < 8 {
        return Err(Error::corrupted("truncated container body"));
    }
    let (data, mut crc_bytes) = body.split_at(body.len() - 4);
    let mut hasher = Hasher::new();
    hasher.update(data);
    if hasher.finalize() != crc_bytes.get_u32() {
        return Err(Error::corrupted("container CRC mismatch"));
    }

    let mut reader = Reader::new(data, "container entry");
    let count = reader.u32()? as usize;
    let mut entries = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let name = reader.string()?;
        let data_len = usize::try_from(reader.u64()?)
            .map_err(|_| Error::corrupted("container entry too large"))?;
        let data = reader.bytes(data_len)?.to_vec();
        entries.push(ContainerEntry { name, data });
    }
    if !reader.is_empty() {
        return Err(Error::corrupted("trailing bytes after container entries"));
    }

    Ok(entries)
}
