//! Carrying device-local files over from the running filesystem into the freshly written one.
//!
//! Mounting is up to the platform. All this module needs is two [`FileTree`] views, one of the
//! running filesystem region and one of the update target.
use crate::config::UpdateConfig;
use alloc::{string::String, vec::Vec};
use tracing::{event, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// A mounted filesystem. Paths are `/` separated and relative to the root of the mount.
pub trait FileTree {
    type Error: core::fmt::Debug;

    fn is_dir(&mut self, path: &str) -> Result<bool, Self::Error>;

    fn list_dir(&mut self, path: &str) -> Result<Vec<DirEntry>, Self::Error>;

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, Self::Error>;

    /// Create a directory. Succeeds if it already exists.
    fn create_dir(&mut self, path: &str) -> Result<(), Self::Error>;

    fn write_file(&mut self, path: &str, bytes: &[u8]) -> Result<(), Self::Error>;
}

pub trait Mounter {
    type Tree: FileTree;
    type Error: core::fmt::Debug;

    fn mount(&mut self, label: &str, writable: bool) -> Result<Self::Tree, Self::Error>;
}

pub trait Migrator {
    type Error: core::fmt::Debug;

    fn migrate(&mut self) -> Result<(), Self::Error>;
}

/// For devices without anything to carry over.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipMigration;

impl Migrator for SkipMigration {
    type Error = core::convert::Infallible;

    fn migrate(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Debug)]
pub enum MigrateError<M, T> {
    Mount { label: String, error: M },
    Copy { path: String, error: T },
}

impl<M: core::fmt::Debug, T: core::fmt::Debug> core::fmt::Display for MigrateError<M, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MigrateError::Mount { label, error } => write!(f, "failed to mount {label}: {error:?}"),
            MigrateError::Copy { path, error } => write!(f, "failed to copy {path}: {error:?}"),
        }
    }
}

#[cfg(feature = "std")]
impl<M: core::fmt::Debug, T: core::fmt::Debug> std::error::Error for MigrateError<M, T> {}

/// Copies one fixed subtree of the running filesystem into the update target.
#[derive(Debug, Clone)]
pub struct PreservedMigrator<M> {
    mounter: M,
    running_label: String,
    target_label: String,
    subtree: String,
}

impl<M: Mounter> PreservedMigrator<M> {
    pub fn new(
        mounter: M,
        running_label: impl Into<String>,
        target_label: impl Into<String>,
        subtree: impl Into<String>,
    ) -> Self {
        Self {
            mounter,
            running_label: running_label.into(),
            target_label: target_label.into(),
            subtree: subtree.into(),
        }
    }

    /// Preserve whatever subtree `config` names.
    pub fn for_config(
        mounter: M,
        running_label: impl Into<String>,
        target_label: impl Into<String>,
        config: &UpdateConfig,
    ) -> Self {
        Self::new(
            mounter,
            running_label,
            target_label,
            config.preserved_subtree.clone(),
        )
    }

    pub fn mounter(&self) -> &M {
        &self.mounter
    }
}

impl<M: Mounter> Migrator for PreservedMigrator<M> {
    type Error = MigrateError<M::Error, <M::Tree as FileTree>::Error>;

    fn migrate(&mut self) -> Result<(), Self::Error> {
        let mut running = self
            .mounter
            .mount(&self.running_label, false)
            .map_err(|error| MigrateError::Mount {
                label: self.running_label.clone(),
                error,
            })?;
        let mut target = self
            .mounter
            .mount(&self.target_label, true)
            .map_err(|error| MigrateError::Mount {
                label: self.target_label.clone(),
                error,
            })?;

        let present = running
            .is_dir(&self.subtree)
            .map_err(|error| MigrateError::Copy {
                path: self.subtree.clone(),
                error,
            })?;
        if !present {
            event!(
                Level::INFO,
                subtree = self.subtree.as_str(),
                "nothing to carry over"
            );
            return Ok(());
        }

        let copied = copy_tree(&mut running, &mut target, &self.subtree)
            .map_err(|(path, error)| MigrateError::Copy { path, error })?;
        event!(
            Level::INFO,
            files = copied,
            from = self.running_label.as_str(),
            to = self.target_label.as_str(),
            "carried over preserved files"
        );
        Ok(())
    }
}

/// Recursively copy the directory `path` from one tree to the other. Returns the number of files
/// copied, or the path that failed.
pub fn copy_tree<T: FileTree>(
    from: &mut T,
    to: &mut T,
    path: &str,
) -> Result<usize, (String, T::Error)> {
    let mut copied = 0;
    let mut stack = vec![String::from(path)];
    while let Some(dir) = stack.pop() {
        to.create_dir(&dir).map_err(|e| (dir.clone(), e))?;
        for entry in from.list_dir(&dir).map_err(|e| (dir.clone(), e))? {
            let child = format!("{}/{}", dir.trim_end_matches('/'), entry.name);
            match entry.kind {
                EntryKind::Dir => stack.push(child),
                EntryKind::File => {
                    let bytes = from.read_file(&child).map_err(|e| (child.clone(), e))?;
                    to.write_file(&child, &bytes).map_err(|e| (child.clone(), e))?;
                    copied += 1;
                }
            }
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::{collections::BTreeMap, rc::Rc, string::ToString};
    use core::cell::RefCell;

    #[derive(Debug, Default)]
    struct Volume {
        dirs: Vec<String>,
        files: BTreeMap<String, Vec<u8>>,
    }

    #[derive(Clone)]
    struct MemTree {
        volume: Rc<RefCell<Volume>>,
        writable: bool,
    }

    impl FileTree for MemTree {
        type Error = &'static str;

        fn is_dir(&mut self, path: &str) -> Result<bool, Self::Error> {
            Ok(self.volume.borrow().dirs.iter().any(|dir| dir == path))
        }

        fn list_dir(&mut self, path: &str) -> Result<Vec<DirEntry>, Self::Error> {
            let volume = self.volume.borrow();
            let prefix = format!("{path}/");
            let direct = |p: &String| {
                p.strip_prefix(&prefix)
                    .filter(|rest| !rest.contains('/'))
                    .map(|rest| rest.to_string())
            };
            let mut entries: Vec<DirEntry> = volume
                .dirs
                .iter()
                .filter_map(direct)
                .map(|name| DirEntry {
                    name,
                    kind: EntryKind::Dir,
                })
                .collect();
            entries.extend(volume.files.keys().filter_map(direct).map(|name| DirEntry {
                name,
                kind: EntryKind::File,
            }));
            Ok(entries)
        }

        fn read_file(&mut self, path: &str) -> Result<Vec<u8>, Self::Error> {
            self.volume
                .borrow()
                .files
                .get(path)
                .cloned()
                .ok_or("no such file")
        }

        fn create_dir(&mut self, path: &str) -> Result<(), Self::Error> {
            if !self.writable {
                return Err("read only");
            }
            let mut volume = self.volume.borrow_mut();
            if !volume.dirs.iter().any(|dir| dir == path) {
                volume.dirs.push(path.to_string());
            }
            Ok(())
        }

        fn write_file(&mut self, path: &str, bytes: &[u8]) -> Result<(), Self::Error> {
            if !self.writable {
                return Err("read only");
            }
            self.volume
                .borrow_mut()
                .files
                .insert(path.to_string(), bytes.to_vec());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemMounter {
        volumes: BTreeMap<String, Rc<RefCell<Volume>>>,
    }

    impl Mounter for MemMounter {
        type Tree = MemTree;
        type Error = &'static str;

        fn mount(&mut self, label: &str, writable: bool) -> Result<MemTree, Self::Error> {
            let volume = self.volumes.get(label).ok_or("no such volume")?.clone();
            Ok(MemTree { volume, writable })
        }
    }

    fn mounter() -> MemMounter {
        let mut running = Volume::default();
        running.dirs.push("_internal".into());
        running.dirs.push("_internal/certs".into());
        running
            .files
            .insert("_internal/wifi.json".into(), b"{}".to_vec());
        running
            .files
            .insert("_internal/certs/device.pem".into(), b"pem".to_vec());
        running.files.insert("www/index.html".into(), b"old".to_vec());

        let mut mounter = MemMounter::default();
        mounter
            .volumes
            .insert("data_0".into(), Rc::new(RefCell::new(running)));
        mounter
            .volumes
            .insert("data_1".into(), Rc::new(RefCell::new(Volume::default())));
        mounter
    }

    #[test]
    fn copies_only_the_preserved_subtree() {
        let mut migrator = PreservedMigrator::new(mounter(), "data_0", "data_1", "_internal");
        migrator.migrate().unwrap();
        let target = migrator.mounter().volumes["data_1"].borrow();
        assert_eq!(target.files.len(), 2);
        assert_eq!(target.files["_internal/wifi.json"], b"{}");
        assert_eq!(target.files["_internal/certs/device.pem"], b"pem");
        assert!(target.dirs.contains(&"_internal/certs".to_string()));
    }

    #[test]
    fn subtree_comes_from_the_config() {
        let mounter = mounter();
        mounter.volumes["data_0"]
            .borrow_mut()
            .dirs
            .push("www".into());
        let config = UpdateConfig {
            preserved_subtree: "www".into(),
            ..Default::default()
        };
        let mut migrator = PreservedMigrator::for_config(mounter, "data_0", "data_1", &config);
        migrator.migrate().unwrap();
        let target = migrator.mounter().volumes["data_1"].borrow();
        assert_eq!(target.files.len(), 1);
        assert_eq!(target.files["www/index.html"], b"old");
    }

    #[test]
    fn missing_subtree_is_not_an_error() {
        let mut migrator = PreservedMigrator::new(mounter(), "data_1", "data_0", "_internal");
        migrator.migrate().unwrap();
    }

    #[test]
    fn mount_failure_is_reported() {
        let mut migrator = PreservedMigrator::new(mounter(), "data_0", "data_9", "_internal");
        assert!(matches!(
            migrator.migrate(),
            Err(MigrateError::Mount { label, .. }) if label == "data_9"
        ));
    }
}
