#![allow(dead_code)]
use anyhow::anyhow;
use core::cell::RefCell;
use otaflash_embedded::{MemFlash, OtaPartitions};
use otaflash_transport::{
    build_update_file,
    profile::{DeviceProfile, PartitionEntry},
    Download, HttpFetch,
};
use std::{
    io::{self, Cursor, Read},
    path::PathBuf,
};

pub const MODULE: &str = "TEST-MODULE";

/// A 48 KiB flash with 12 KiB executable regions and 8 KiB filesystems.
pub fn profile() -> DeviceProfile {
    let entry = |label: &str, offset: u32, size: u32| PartitionEntry {
        label: label.into(),
        offset,
        size,
    };
    DeviceProfile {
        module_identity: MODULE.into(),
        flash_size: 0xc000,
        partitions: vec![
            entry("otadata", 0x0000, 0x2000),
            entry("app_0", 0x2000, 0x3000),
            entry("app_1", 0x5000, 0x3000),
            entry("data_0", 0x8000, 0x2000),
            entry("data_1", 0xa000, 0x2000),
        ],
        ..Default::default()
    }
}

pub fn blank_flash() -> RefCell<MemFlash> {
    RefCell::new(MemFlash::new(profile().flash_size as usize))
}

pub fn partitions(flash: &RefCell<MemFlash>) -> OtaPartitions<'_, MemFlash> {
    let profile = profile();
    OtaPartitions::load(flash, &profile.partition_rows(), &profile.otadata_label)
        .expect("test layout is valid")
}

pub fn images() -> (Vec<u8>, Vec<u8>) {
    let executable = (0..6000u32).map(|i| (i * 31 % 251) as u8).collect();
    let filesystem = (0..2500u32).map(|i| (i * 17 % 239) as u8).collect();
    (executable, filesystem)
}

pub fn update_file() -> Vec<u8> {
    let (executable, filesystem) = images();
    build_update_file(MODULE, &executable, &filesystem).unwrap()
}

/// The update file the way a browser posts it.
pub fn multipart_body(file: &[u8]) -> Vec<u8> {
    let mut body = b"------WebKitFormBoundary7MA4YWxk\r\n\
Content-Disposition: form-data; name=\"update\"; filename=\"update.bin\"\r\n\
Content-Type: application/octet-stream\r\n\r\n"
        .to_vec();
    body.extend_from_slice(file);
    body.extend_from_slice(b"\r\n------WebKitFormBoundary7MA4YWxk--\r\n");
    body
}

/// Hands out `data` and then fails with a reset connection after `break_after` bytes.
pub struct FlakyReader {
    data: Cursor<Vec<u8>>,
    break_after: Option<usize>,
}

impl Read for FlakyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = match self.break_after {
            Some(0) => return Err(io::Error::from(io::ErrorKind::ConnectionReset)),
            Some(remaining) => remaining.min(buf.len()),
            None => buf.len(),
        };
        let n = self.data.read(&mut buf[..limit])?;
        if let Some(remaining) = &mut self.break_after {
            *remaining -= n;
        }
        Ok(n)
    }
}

#[derive(Default)]
pub struct FakeFetch {
    /// `None` means the server can't be reached.
    pub file: Option<Vec<u8>>,
    pub break_after: Option<usize>,
    pub hide_length: bool,
    pub requested: RefCell<Vec<String>>,
}

impl FakeFetch {
    pub fn serving(file: Vec<u8>) -> Self {
        Self {
            file: Some(file),
            ..Default::default()
        }
    }
}

impl HttpFetch for FakeFetch {
    fn get(&self, url: &str) -> anyhow::Result<Download> {
        self.requested.borrow_mut().push(url.into());
        let file = self
            .file
            .clone()
            .ok_or_else(|| anyhow!("connection refused: {url}"))?;
        Ok(Download {
            content_length: (!self.hide_length).then_some(file.len()),
            body: Box::new(FlakyReader {
                data: Cursor::new(file),
                break_after: self.break_after,
            }),
        })
    }
}

/// A fresh directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("otaflash-{}-{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
