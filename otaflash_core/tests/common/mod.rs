#![allow(dead_code)]
use otaflash_core::{
    migrate::Migrator,
    target::{BootSwitch, ExecutableTarget, FilesystemTarget},
    BlockSink, UpdateConfig, UpdateEnvelope, UpdateSession, UpdateTargets,
};
use std::{cell::RefCell, rc::Rc};

pub const MODULE: &str = "TEST-MODULE";
pub const BLOCK_SIZE: usize = 16;
pub const EXECUTABLE_REGION: u32 = 256;
pub const FILESYSTEM_REGION: u32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault;

/// Records every block write. The written image is shared with [`FakeBoot`] so it can compare
/// against the running image.
#[derive(Debug, Default)]
pub struct FakeExecutable {
    pub image: Rc<RefCell<Vec<u8>>>,
    pub block_writes: Vec<usize>,
    pub begun: usize,
    pub fail_begin: bool,
    pub fail_write: bool,
}

impl BlockSink for FakeExecutable {
    type Error = Fault;

    fn write_blocks(&mut self, bytes: &[u8]) -> Result<(), Fault> {
        if self.fail_write {
            return Err(Fault);
        }
        assert_eq!(bytes.len() % BLOCK_SIZE, 0, "unaligned block write");
        let mut image = self.image.borrow_mut();
        assert!(image.len() + bytes.len() <= EXECUTABLE_REGION as usize);
        image.extend_from_slice(bytes);
        self.block_writes.push(bytes.len());
        Ok(())
    }
}

impl ExecutableTarget for FakeExecutable {
    fn begin(&mut self) -> Result<(), Fault> {
        if self.fail_begin {
            return Err(Fault);
        }
        self.begun += 1;
        self.image.borrow_mut().clear();
        Ok(())
    }

    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn size(&self) -> u32 {
        EXECUTABLE_REGION
    }
}

#[derive(Debug)]
pub struct FakeFilesystem {
    pub region: Vec<u8>,
    pub erases: usize,
    pub writes: Vec<(u32, usize)>,
    pub fail_erase: bool,
    pub fail_write: bool,
    /// Flip the low bit of this offset right after it has been written.
    pub corrupt_after_write: Option<u32>,
}

impl Default for FakeFilesystem {
    fn default() -> Self {
        Self {
            region: vec![0xaa; FILESYSTEM_REGION as usize],
            erases: 0,
            writes: vec![],
            fail_erase: false,
            fail_write: false,
            corrupt_after_write: None,
        }
    }
}

impl FilesystemTarget for FakeFilesystem {
    type Error = Fault;

    fn size(&self) -> u32 {
        FILESYSTEM_REGION
    }

    fn erase_all(&mut self) -> Result<(), Fault> {
        if self.fail_erase {
            return Err(Fault);
        }
        self.region.fill(0xff);
        self.erases += 1;
        Ok(())
    }

    fn write_at(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Fault> {
        if self.fail_write {
            return Err(Fault);
        }
        let start = offset as usize;
        self.region[start..start + bytes.len()].copy_from_slice(bytes);
        self.writes.push((offset, bytes.len()));
        if let Some(at) = self.corrupt_after_write {
            if (start..start + bytes.len()).contains(&(at as usize)) {
                self.region[at as usize] ^= 0x01;
            }
        }
        Ok(())
    }

    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Fault> {
        let start = offset as usize;
        buf.copy_from_slice(&self.region[start..start + buf.len()]);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeMigrator {
    pub runs: usize,
    pub fail: bool,
}

impl Migrator for FakeMigrator {
    type Error = Fault;

    fn migrate(&mut self) -> Result<(), Fault> {
        self.runs += 1;
        if self.fail {
            return Err(Fault);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeBoot {
    pub running: Vec<u8>,
    pub target: Rc<RefCell<Vec<u8>>>,
    pub selected: usize,
    pub fail_select: bool,
}

impl BootSwitch for FakeBoot {
    type Error = Fault;

    fn target_matches_running(&mut self, len: u32) -> Result<bool, Fault> {
        let len = len as usize;
        let target = self.target.borrow();
        Ok(self.running.len() >= len
            && target.len() >= len
            && self.running[..len] == target[..len])
    }

    fn select_target(&mut self) -> Result<(), Fault> {
        if self.fail_select {
            return Err(Fault);
        }
        self.selected += 1;
        Ok(())
    }
}

pub type TestTargets = UpdateTargets<FakeExecutable, FakeFilesystem, FakeMigrator, FakeBoot>;
pub type TestSession = UpdateSession<FakeExecutable, FakeFilesystem, FakeMigrator, FakeBoot>;

pub fn targets() -> TestTargets {
    let executable = FakeExecutable::default();
    let boot = FakeBoot {
        running: image(128, 200),
        target: executable.image.clone(),
        ..Default::default()
    };
    UpdateTargets {
        executable,
        filesystem: FakeFilesystem::default(),
        migrator: FakeMigrator::default(),
        boot,
    }
}

pub fn session() -> TestSession {
    UpdateSession::new(UpdateConfig::for_module(MODULE), targets())
}

pub fn image(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

pub fn update_file(executable: &[u8], filesystem: &[u8]) -> Vec<u8> {
    let envelope = UpdateEnvelope::for_images(MODULE, executable, filesystem).unwrap();
    let mut file = envelope.header_bytes();
    file.extend_from_slice(executable);
    file.extend_from_slice(filesystem);
    file
}

/// Feed `bytes` cycling through `sizes` for the chunk lengths. Stops early once the session is
/// done.
pub fn feed_chunked(session: &mut TestSession, bytes: &[u8], sizes: &[usize], total_len: usize) {
    let mut rest = bytes;
    let mut sizes = sizes.iter().cycle();
    while !rest.is_empty() && !session.is_done() {
        let n = (*sizes.next().unwrap()).min(rest.len());
        session.feed(&rest[..n], total_len).unwrap();
        rest = &rest[n..];
    }
}
