//! Per-device settings kept as JSON next to the flash image.
use crate::download::{DOWNLOAD_CHUNK_LEN, DOWNLOAD_TIMEOUT};
use anyhow::Context as _;
use otaflash_core::{
    config::{DEFAULT_HASH_WINDOW, DEFAULT_MAX_HEADER_LEN, MODULE_IDENTITY, PRESERVED_SUBTREE},
    region::PartitionRow,
    UpdateConfig,
};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionEntry {
    pub label: String,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    pub module_identity: String,
    pub flash_size: u32,
    pub otadata_label: String,
    pub partitions: Vec<PartitionEntry>,
    pub preserved_subtree: String,
    /// Host directory with one subdirectory per filesystem region.
    pub mount_root: Option<PathBuf>,
    pub max_header_len: usize,
    pub hash_window: usize,
    pub download_chunk_len: usize,
    pub download_timeout_secs: u64,
}

impl Default for DeviceProfile {
    /// A 4 MiB layout with two 1 MiB executable regions and two 768 KiB filesystems.
    fn default() -> Self {
        let entry = |label: &str, offset: u32, size: u32| PartitionEntry {
            label: label.into(),
            offset,
            size,
        };
        Self {
            module_identity: MODULE_IDENTITY.into(),
            flash_size: 0x40_0000,
            otadata_label: "otadata".into(),
            partitions: vec![
                entry("otadata", 0x1_0000, 0x2000),
                entry("app_0", 0x2_0000, 0x10_0000),
                entry("app_1", 0x12_0000, 0x10_0000),
                entry("data_0", 0x22_0000, 0xc_0000),
                entry("data_1", 0x2e_0000, 0xc_0000),
            ],
            preserved_subtree: PRESERVED_SUBTREE.into(),
            mount_root: None,
            max_header_len: DEFAULT_MAX_HEADER_LEN,
            hash_window: DEFAULT_HASH_WINDOW,
            download_chunk_len: DOWNLOAD_CHUNK_LEN,
            download_timeout_secs: DOWNLOAD_TIMEOUT.as_secs(),
        }
    }
}

impl DeviceProfile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading device profile {}", path.display()))?;
        let profile: Self = serde_json::from_str(&json)
            .with_context(|| format!("parsing device profile {}", path.display()))?;
        profile.check()?;
        Ok(profile)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing device profile {}", path.display()))
    }

    /// Every partition has to lie inside the flash.
    pub fn check(&self) -> anyhow::Result<()> {
        for partition in &self.partitions {
            let end = partition.offset as u64 + partition.size as u64;
            if end > self.flash_size as u64 {
                anyhow::bail!(
                    "partition {} ends at {end:#x}, past the end of {:#x} bytes of flash",
                    partition.label,
                    self.flash_size
                );
            }
        }
        Ok(())
    }

    pub fn partition_rows(&self) -> Vec<PartitionRow> {
        self.partitions
            .iter()
            .map(|p| PartitionRow::new(p.label.clone(), p.offset, p.size))
            .collect()
    }

    pub fn update_config(&self) -> UpdateConfig {
        UpdateConfig {
            module_identity: self.module_identity.clone(),
            max_header_len: self.max_header_len,
            hash_window: self.hash_window,
            preserved_subtree: self.preserved_subtree.clone(),
            strip_multipart: false,
        }
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}
