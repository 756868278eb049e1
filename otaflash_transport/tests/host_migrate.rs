mod common;

use common::*;
use otaflash_core::{
    migrate::{FileTree, Migrator, Mounter, PreservedMigrator},
    UpdateResult, UpdateSession,
};
use otaflash_transport::{feed_bytes, HostMounter};
use std::fs;

#[test]
fn preserved_files_follow_the_update() {
    let root = scratch_dir("follow");
    fs::create_dir_all(root.join("data_0/_internal/certs")).unwrap();
    fs::create_dir_all(root.join("data_0/www")).unwrap();
    fs::create_dir_all(root.join("data_1")).unwrap();
    fs::write(root.join("data_0/_internal/wifi.json"), br#"{"ssid":"home"}"#).unwrap();
    fs::write(root.join("data_0/_internal/certs/ca.pem"), b"-----BEGIN").unwrap();
    fs::write(root.join("data_0/www/index.html"), b"<html>").unwrap();

    let flash = blank_flash();
    let partitions = partitions(&flash);
    let map = partitions.region_map().clone();
    let migrator = PreservedMigrator::new(
        HostMounter::new(&root),
        map.filesystem_running.label,
        map.filesystem_target.label,
        "_internal",
    );
    let mut session = UpdateSession::new(profile().update_config(), partitions.update_targets(migrator));

    assert_eq!(feed_bytes(&mut session, &update_file(), 1024), Ok(UpdateResult::Ok));

    assert_eq!(
        fs::read(root.join("data_1/_internal/wifi.json")).unwrap(),
        br#"{"ssid":"home"}"#
    );
    assert_eq!(
        fs::read(root.join("data_1/_internal/certs/ca.pem")).unwrap(),
        b"-----BEGIN"
    );
    assert!(!root.join("data_1/www").exists());
    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn missing_target_filesystem_fails_the_update() {
    let root = scratch_dir("missing");
    fs::create_dir_all(root.join("data_0/_internal")).unwrap();
    fs::write(root.join("data_0/_internal/wifi.json"), b"{}").unwrap();

    let flash = blank_flash();
    let partitions = partitions(&flash);
    let migrator = PreservedMigrator::new(HostMounter::new(&root), "data_0", "data_1", "_internal");
    let mut session = UpdateSession::new(profile().update_config(), partitions.update_targets(migrator));

    assert_eq!(
        feed_bytes(&mut session, &update_file(), 1024),
        Ok(UpdateResult::WriteDataFailed)
    );
    drop(session);
    assert_eq!(common::partitions(&flash).running_slot(), 0);
    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn nothing_to_preserve() {
    let root = scratch_dir("nothing");
    fs::create_dir_all(root.join("data_0")).unwrap();
    fs::create_dir_all(root.join("data_1")).unwrap();

    let mut migrator = PreservedMigrator::new(HostMounter::new(&root), "data_0", "data_1", "_internal");
    migrator.migrate().unwrap();
    assert!(!root.join("data_1/_internal").exists());
    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn read_only_mounts_refuse_writes() {
    let root = scratch_dir("readonly");
    fs::create_dir_all(root.join("data_0")).unwrap();

    let mut mounter = HostMounter::new(&root);
    let mut tree = mounter.mount("data_0", false).unwrap();
    assert!(tree.write_file("x", b"1").is_err());
    assert!(tree.create_dir("d").is_err());
    assert!(tree.list_dir("").unwrap().is_empty());
    assert!(mounter.mount("data_9", true).is_err());
    assert!(mounter.mount("../data_0", true).is_err());
    fs::remove_dir_all(&root).unwrap();
}
