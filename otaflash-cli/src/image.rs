use anyhow::{anyhow, Context};
use otaflash_embedded::{MemFlash, MEM_FLASH_ERASE_SIZE};
use otaflash_transport::DeviceProfile;
use std::path::PathBuf;

/// A dump of the device's whole flash kept in a file.
pub struct FlashImage {
    path: PathBuf,
}

impl FlashImage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// A fully erased flash the size the profile says.
    pub fn create(&self, profile: &DeviceProfile) -> anyhow::Result<()> {
        if self.path.exists() {
            return Err(anyhow!("{} already exists", self.path.display()));
        }
        check_sectors(profile.flash_size as usize)?;
        self.save(MemFlash::new(profile.flash_size as usize))
    }

    pub fn load(&self, profile: &DeviceProfile) -> anyhow::Result<MemFlash> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("Unable to read flash image {}", self.path.display()))?;
        if bytes.len() != profile.flash_size as usize {
            return Err(anyhow!(
                "flash image {} is {} bytes but the profile says {}",
                self.path.display(),
                bytes.len(),
                profile.flash_size
            ));
        }
        check_sectors(bytes.len())?;
        Ok(MemFlash::from_bytes(bytes))
    }

    pub fn save(&self, flash: MemFlash) -> anyhow::Result<()> {
        std::fs::write(&self.path, flash.into_bytes())
            .context(format!("Unable to save to {}", self.path.display()))?;
        Ok(())
    }
}

fn check_sectors(len: usize) -> anyhow::Result<()> {
    if len % MEM_FLASH_ERASE_SIZE != 0 {
        return Err(anyhow!(
            "flash size {len} is not a whole number of {MEM_FLASH_ERASE_SIZE} byte sectors"
        ));
    }
    Ok(())
}
