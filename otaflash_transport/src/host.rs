//! Filesystem regions mounted as plain directories on the host.
//!
//! Each region label maps to a directory of the same name under one root, which lets the
//! migrator run against a host copy of the device's filesystems.
use otaflash_core::migrate::{DirEntry, EntryKind, FileTree, Mounter};
use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};

#[derive(Debug, Clone)]
pub struct HostMounter {
    root: PathBuf,
}

impl HostMounter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Mounter for HostMounter {
    type Tree = HostTree;
    type Error = io::Error;

    fn mount(&mut self, label: &str, writable: bool) -> io::Result<HostTree> {
        let root = self.root.join(checked(label)?);
        if !root.is_dir() {
            return Err(io::Error::new(
                ErrorKind::NotFound,
                format!("no filesystem for {label} at {}", root.display()),
            ));
        }
        Ok(HostTree { root, writable })
    }
}

#[derive(Debug, Clone)]
pub struct HostTree {
    root: PathBuf,
    writable: bool,
}

impl HostTree {
    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        Ok(self.root.join(checked(path)?))
    }

    fn ensure_writable(&self) -> io::Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(io::Error::new(
                ErrorKind::PermissionDenied,
                format!("{} is mounted read only", self.root.display()),
            ))
        }
    }
}

/// Only plain relative paths stay inside the mount.
fn checked(path: &str) -> io::Result<&Path> {
    let relative = Path::new(path);
    if relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        Ok(relative)
    } else {
        Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("{path:?} is not a plain relative path"),
        ))
    }
}

impl FileTree for HostTree {
    type Error = io::Error;

    fn is_dir(&mut self, path: &str) -> io::Result<bool> {
        Ok(self.resolve(path)?.is_dir())
    }

    fn list_dir(&mut self, path: &str) -> io::Result<Vec<DirEntry>> {
        let mut entries = vec![];
        for entry in std::fs::read_dir(self.resolve(path)?)? {
            let entry = entry?;
            let kind = if entry.file_type()?.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read_file(&mut self, path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.resolve(path)?)
    }

    fn create_dir(&mut self, path: &str) -> io::Result<()> {
        self.ensure_writable()?;
        std::fs::create_dir_all(self.resolve(path)?)
    }

    fn write_file(&mut self, path: &str, bytes: &[u8]) -> io::Result<()> {
        self.ensure_writable()?;
        std::fs::write(self.resolve(path)?, bytes)
    }
}
