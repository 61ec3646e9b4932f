//! Storage usage of a user's vault directory

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageMetrics {
    /// Current total size in bytes
    pub total_size: u64,
    /// Number of stored containers (originals and versions)
    pub container_count: usize,
    /// Breakdown by component
    pub component_sizes: BTreeMap<String, u64>,
    pub calculated_at: DateTime<Utc>,
}

impl StorageMetrics {
    /// Walk `<user_dir>/{files, index}` and stat the catalog and audit files.
    pub fn calculate(user_dir: &Path) -> Result<Self> {
        let mut components = BTreeMap::new();

        let (files_size, container_count) = Self::calculate_dir_size(&user_dir.join("files"));
        components.insert("files".to_string(), files_size);

        let (index_size, _) = Self::calculate_dir_size(&user_dir.join("index"));
        components.insert("index".to_string(), index_size);

        components.insert("catalog".to_string(), Self::file_size(&user_dir.join("catalog.json")));
        components.insert("audit".to_string(), Self::file_size(&user_dir.join("audit.log")));

        Ok(Self {
            total_size: components.values().sum(),
            container_count,
            component_sizes: components,
            calculated_at: Utc::now(),
        })
    }

    /// Total bytes and file count under `dir`; zero when absent.
    fn calculate_dir_size(dir: &Path) -> (u64, usize) {
        if !dir.exists() {
            return (0, 0);
        }

        let mut total_size = 0u64;
        let mut count = 0usize;
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                if let Ok(metadata) = entry.metadata() {
                    total_size += metadata.len();
                    count += 1;
                }
            }
        }

        (total_size, count)
    }

    fn file_size(path: &Path) -> u64 {
        std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }

    /// Get human-readable size
    pub fn format_size(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_index])
    }

    pub fn summary(&self) -> String {
        let mut report = format!(
            "Storage Metrics ({})\n",
            self.calculated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        report.push_str(&format!(
            "Total Size: {} in {} containers\n",
            Self::format_size(self.total_size),
            self.container_count
        ));
        report.push_str("Components:\n");

        for (component, size) in &self.component_sizes {
            let percentage = if self.total_size == 0 {
                0.0
            } else {
                (*size as f64 / self.total_size as f64) * 100.0
            };
            report.push_str(&format!(
                "  {}: {} ({:.1}%)\n",
                component,
                Self::format_size(*size),
                percentage
            ));
        }

        report
    }
}
