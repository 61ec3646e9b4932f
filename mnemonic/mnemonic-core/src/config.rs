//! Vault configuration
//!
//! Every field has a default so a partial JSON file is enough.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Directory holding every user's data and the shared byte streams
    #[serde(default = "default_root")]
    pub root: PathBuf,

    #[serde(default)]
    pub limits: Limits,

    #[serde(default)]
    pub container: ContainerConfig,

    /// Journal file events to the per-user audit log (default true)
    #[serde(default = "default_true")]
    pub audit: bool,
}

fn default_root() -> PathBuf { PathBuf::from("mnemonic-data") }
fn default_true() -> bool { true }

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            limits: Limits::default(),
            container: ContainerConfig::default(),
            audit: true,
        }
    }
}

impl VaultConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn users_dir(&self) -> PathBuf {
        self.root.join("users")
    }

    pub fn user_dir(&self, user: &str) -> PathBuf {
        self.users_dir().join(user)
    }

    pub fn streams_dir(&self) -> PathBuf {
        self.root.join("streams")
    }
}

/// Input length limits, in characters, plus the payload size cap in bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "default_name_len")]
    pub max_file_name_length: usize,
    #[serde(default = "default_text_len")]
    pub max_file_narration_length: usize,
    #[serde(default = "default_label_len")]
    pub max_aspect_name_length: usize,
    #[serde(default = "default_desc_len")]
    pub max_aspect_description_length: usize,
    #[serde(default = "default_label_len")]
    pub max_briefcase_name_length: usize,
    #[serde(default = "default_desc_len")]
    pub max_briefcase_description_length: usize,
    #[serde(default = "default_label_len")]
    pub max_collection_name_length: usize,
    #[serde(default = "default_desc_len")]
    pub max_collection_description_length: usize,
    #[serde(default = "default_url_len")]
    pub max_url_length: usize,
    #[serde(default = "default_desc_len")]
    pub max_version_comment_length: usize,
    #[serde(default = "default_file_size")]
    pub max_file_size: u64,
}

fn default_name_len() -> usize { 256 }
fn default_text_len() -> usize { 4096 }
fn default_label_len() -> usize { 128 }
fn default_desc_len() -> usize { 1024 }
fn default_url_len() -> usize { 2048 }
fn default_file_size() -> u64 { 64 * 1024 * 1024 }

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_file_name_length: default_name_len(),
            max_file_narration_length: default_text_len(),
            max_aspect_name_length: default_label_len(),
            max_aspect_description_length: default_desc_len(),
            max_briefcase_name_length: default_label_len(),
            max_briefcase_description_length: default_desc_len(),
            max_collection_name_length: default_label_len(),
            max_collection_description_length: default_desc_len(),
            max_url_length: default_url_len(),
            max_version_comment_length: default_desc_len(),
            max_file_size: default_file_size(),
        }
    }
}

/// Argon2id cost used when sealing a container. Opening reads the cost from the container header.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default = "default_kdf_memory")]
    pub kdf_memory_kib: u32,
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
    #[serde(default = "default_kdf_parallelism")]
    pub kdf_parallelism: u32,
}

fn default_kdf_memory() -> u32 { 19 * 1024 }
fn default_kdf_iterations() -> u32 { 2 }
fn default_kdf_parallelism() -> u32 { 1 }

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            kdf_memory_kib: default_kdf_memory(),
            kdf_iterations: default_kdf_iterations(),
            kdf_parallelism: default_kdf_parallelism(),
        }
    }
}
