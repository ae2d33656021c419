/*
 * Copyright 2026
 *
 * This file is part of campfs-kernel, a teaching operating system.
 *
 * campfs-kernel is free software: you can redistribute it and/or modify it
 * under the terms of the GNU General Public License as published by the Free
 * Software Foundation, either version 3 of the License, or (at your option)
 * any later version.
 */

//! The filesystem facade (spec §4.4/§4.5): `format`/`mount`/`unmount` and
//! the path-taking operations every caller actually goes through.
//!
//! Grounded on `original_source/filesys/filesys.c`. Every mutating method
//! here takes the filesystem's own lock before touching the FAT table or
//! inode cache, mirroring the single global `fs_lock` the source project
//! takes at syscall entry (spec §5) — scoped to one mounted instance
//! instead of a process-wide static, since a process only ever mounts one
//! filesystem disk in this design (concurrent multi-disk mutation is out
//! of scope, spec §1).

pub mod boot;
pub mod config;
pub mod directory;
pub mod fat;
pub mod handle;
pub mod inode;

use boot::BootRecord;
use config::ROOT_DIR_CLUSTER;
use fat::{Fat, SharedFat};
use handle::{DirHandle, FileHandle};
use inode::{InodeKind, InodeRef, InodeTable};

use crate::device::BlockDevice;
use crate::errno::{errno, KResult};
use std::sync::{Arc, Mutex};

/// What `filesys_open` hands back, mirroring the inode kind it resolved to.
pub enum OpenHandle {
    File(FileHandle),
    Dir(DirHandle),
}

/// A mounted filesystem: the shared FAT table, the open-inode cache, the
/// underlying device, and the lock that serializes the operations spec §5
/// names.
pub struct FileSystem {
    device: Arc<dyn BlockDevice>,
    fat: SharedFat,
    table: InodeTable,
    root: InodeRef,
    lock: Mutex<()>,
}

const MAX_SYMLINK_DEPTH: u32 = 8;

impl FileSystem {
    /// Formats `device` with a fresh FAT, an empty root directory, and
    /// writes the boot record (spec §4.5 `format`).
    pub fn format(device: &dyn BlockDevice) -> KResult<()> {
        let boot = BootRecord::compute(device.sector_count() as u32);
        device.write_sector(config::BOOT_SECTOR, &boot.to_sector())?;
        let fat = Fat::format(boot);
        let root_sector = fat.cluster_to_sector(ROOT_DIR_CLUSTER);
        let fat = Mutex::new(fat);
        let table = InodeTable::new();
        table.create(device, root_sector, 0, InodeKind::Dir, None)?;
        let root = table.open(device, root_sector)?;
        directory::dir_init_self_parent(device, &fat, &root, root_sector)?;
        table.close(&fat, root);
        fat.lock().unwrap().flush(device)?;
        Ok(())
    }

    /// Mounts an already-formatted device: reads and validates the boot
    /// record, loads the FAT table, and opens the root directory (spec
    /// §4.5 `mount`).
    pub fn mount(device: Arc<dyn BlockDevice>) -> KResult<Self> {
        let mut buf = [0u8; crate::device::SECTOR_SIZE];
        device.read_sector(config::BOOT_SECTOR, &mut buf)?;
        let boot = BootRecord::from_sector(&buf)?;
        let fat = Fat::load(device.as_ref(), boot)?;
        let root_sector = fat.cluster_to_sector(ROOT_DIR_CLUSTER);
        let table = InodeTable::new();
        let root = table.open(device.as_ref(), root_sector)?;
        Ok(FileSystem {
            device,
            fat: Arc::new(Mutex::new(fat)),
            table,
            root,
            lock: Mutex::new(()),
        })
    }

    /// Writes the boot record and FAT table back to their sectors (spec
    /// §4.5 `unmount`). Consumes `self`: nothing should touch this handle
    /// after unmounting.
    pub fn unmount(self) -> KResult<()> {
        let fat = self.fat.lock().unwrap();
        self.device
            .write_sector(config::BOOT_SECTOR, &fat.boot_record().to_sector())?;
        fat.flush(self.device.as_ref())?;
        Ok(())
    }

    /// The root directory, already open for the lifetime of the mount.
    pub fn root(&self) -> &InodeRef {
        &self.root
    }

    /// Resolves `path` relative to `cwd` into `(parent, leaf)` (spec
    /// §4.3 `parse`).
    fn resolve(&self, cwd: &InodeRef, path: &str) -> KResult<(InodeRef, String)> {
        directory::resolve_parent(
            self.device.as_ref(),
            &self.fat,
            &self.table,
            &self.root,
            cwd,
            path,
        )
    }

    /// Creates a regular file (spec §4.4 `filesys_create`). Rolls back
    /// the allocated cluster on any failure past allocation.
    pub fn filesys_create(&self, cwd: &InodeRef, path: &str, initial_size: u64) -> KResult<bool> {
        let _guard = self.lock.lock().unwrap();
        let (parent, leaf) = self.resolve(cwd, path)?;
        let result = self.create_in(&parent, &leaf, initial_size, InodeKind::File, None);
        self.table.close(&self.fat, parent);
        result
    }

    fn create_in(
        &self,
        parent: &InodeRef,
        leaf: &str,
        initial_size: u64,
        kind: InodeKind,
        link_target: Option<String>,
    ) -> KResult<bool> {
        if self.is_removed_subtree(parent)? {
            return Err(errno!(ENOENT));
        }
        if leaf.is_empty() || leaf == "." || leaf == ".." {
            return Ok(false);
        }
        let clst = {
            let mut fat = self.fat.lock().unwrap();
            match fat.create_chain(0) {
                Some(c) => c,
                None => return Err(errno!(ENOSPC)),
            }
        };
        let sector = self.fat.lock().unwrap().cluster_to_sector(clst);
        if let Err(e) = self.table.create(self.device.as_ref(), sector, initial_size, kind, link_target) {
            self.fat.lock().unwrap().remove_chain(clst, 0);
            return Err(e);
        }
        let added = match directory::dir_add(self.device.as_ref(), &self.fat, parent, leaf, sector) {
            Ok(added) => added,
            Err(e) => {
                self.fat.lock().unwrap().remove_chain(clst, 0);
                return Err(e);
            }
        };
        if !added {
            self.fat.lock().unwrap().remove_chain(clst, 0);
            return Ok(false);
        }
        Ok(true)
    }

    /// Resolves `path` and opens the inode it names, following symlinks
    /// (spec §4.4 `filesys_open`). Returns `None` if resolution fails.
    pub fn filesys_open(&self, cwd: &InodeRef, path: &str) -> KResult<Option<OpenHandle>> {
        let _guard = self.lock.lock().unwrap();
        self.open_inner(cwd, path, 0)
    }

    fn open_inner(&self, cwd: &InodeRef, path: &str, depth: u32) -> KResult<Option<OpenHandle>> {
        if depth > MAX_SYMLINK_DEPTH {
            return Err(errno!(EINVAL));
        }
        let inode = match directory::lookup_path(
            self.device.as_ref(),
            &self.fat,
            &self.table,
            &self.root,
            cwd,
            path,
        ) {
            Ok(inode) => inode,
            Err(_) => return Ok(None),
        };
        let data = inode.read();
        match data.kind {
            InodeKind::Dir => Ok(Some(OpenHandle::Dir(DirHandle::new(inode)))),
            InodeKind::File => Ok(Some(OpenHandle::File(FileHandle::new(inode, false)))),
            InodeKind::Link => {
                let target = data.link_target.clone().unwrap_or_default();
                self.table.close(&self.fat, inode);
                self.open_inner(cwd, &target, depth + 1)
            }
        }
    }

    /// Removes the entry `path` names (spec §4.4 `filesys_remove`).
    pub fn filesys_remove(&self, cwd: &InodeRef, path: &str) -> KResult<bool> {
        let _guard = self.lock.lock().unwrap();
        let (parent, leaf) = self.resolve(cwd, path)?;
        let result = directory::dir_remove(self.device.as_ref(), &self.fat, &self.table, &parent, &leaf);
        self.table.close(&self.fat, parent);
        result
    }

    /// Creates a directory, seeding it with `.`/`..` (spec §4.4 `mkdir`).
    pub fn mkdir(&self, cwd: &InodeRef, path: &str) -> KResult<bool> {
        let _guard = self.lock.lock().unwrap();
        let (parent, leaf) = self.resolve(cwd, path)?;
        if leaf == "." || leaf == ".." {
            self.table.close(&self.fat, parent);
            return Ok(false);
        }
        let ok = self.create_in(&parent, &leaf, 0, InodeKind::Dir, None)?;
        if ok {
            let child = directory::dir_lookup(self.device.as_ref(), &self.fat.lock().unwrap(), &self.table, &parent, &leaf)?
                .ok_or(errno!(EIO))?;
            directory::dir_init_self_parent(self.device.as_ref(), &self.fat, &child, parent.sector)?;
            self.table.close(&self.fat, child);
        }
        self.table.close(&self.fat, parent);
        Ok(ok)
    }

    /// Creates a symbolic link whose target text is `target` (spec §4.4
    /// `symlink`).
    pub fn symlink(&self, cwd: &InodeRef, target: &str, linkpath: &str) -> KResult<bool> {
        let _guard = self.lock.lock().unwrap();
        let (parent, leaf) = self.resolve(cwd, linkpath)?;
        let result = self.create_in(&parent, &leaf, 0, InodeKind::Link, Some(target.to_string()));
        self.table.close(&self.fat, parent);
        result
    }

    /// True if `dir` has been unlinked, or any of its ancestors has (spec
    /// §4.3 `dir_removed`): creation under it must be refused.
    pub fn is_removed_subtree(&self, dir: &InodeRef) -> KResult<bool> {
        directory::dir_removed(self.device.as_ref(), &self.fat, &self.table, self.root.sector, dir)
    }

    pub fn close(&self, inode: InodeRef) {
        self.table.close(&self.fat, inode);
    }

    pub fn open_at(&self, sector: u64) -> KResult<InodeRef> {
        self.table.open(self.device.as_ref(), sector)
    }

    pub fn device(&self) -> &dyn BlockDevice {
        self.device.as_ref()
    }

    /// The underlying device's shared handle, for callers (mmap) that
    /// need to stash it alongside an inode past this facade's lifetime.
    pub fn device_arc(&self) -> Arc<dyn BlockDevice> {
        self.device.clone()
    }

    pub fn fat(&self) -> &SharedFat {
        &self.fat
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::{DiskId, MemBlockDevice};

    fn mounted(sectors: u32) -> FileSystem {
        let device: Arc<dyn BlockDevice> = Arc::new(MemBlockDevice::new(DiskId::FILESYS, sectors));
        FileSystem::format(device.as_ref()).unwrap();
        FileSystem::mount(device).unwrap()
    }

    #[test]
    fn format_then_mount_yields_empty_root() {
        let fs = mounted(2048);
        let root = fs.root();
        let mut dh = DirHandle::new(fs.table.open(fs.device.as_ref(), root.sector).unwrap());
        let fat_guard = fs.fat.lock().unwrap();
        assert_eq!(dh.read_next(fs.device(), &fat_guard).unwrap(), None);
    }

    #[test]
    fn create_write_read_round_trip() {
        let fs = mounted(2048);
        let root = fs.root().clone();
        assert!(fs.filesys_create(&root, "greeting.txt", 0).unwrap());
        let handle = fs.filesys_open(&root, "greeting.txt").unwrap().unwrap();
        let mut fh = match handle {
            OpenHandle::File(f) => f,
            OpenHandle::Dir(_) => panic!("expected a file"),
        };
        fh.write(fs.device(), fs.fat(), b"hi there").unwrap();
        fh.seek(0);
        let mut buf = [0u8; 8];
        let fat_guard = fs.fat.lock().unwrap();
        let n = fh.read(fs.device(), &fat_guard, &mut buf).unwrap();
        drop(fat_guard);
        assert_eq!(n, 8);
        assert_eq!(&buf, b"hi there");
    }

    #[test]
    fn mkdir_nested_create_then_remove_nonempty_then_empty() {
        let fs = mounted(2048);
        let root = fs.root().clone();
        assert!(fs.mkdir(&root, "/d").unwrap());
        assert!(fs.filesys_create(&root, "/d/x", 0).unwrap());
        assert!(!fs.filesys_remove(&root, "/d").unwrap());
        assert!(fs.filesys_remove(&root, "/d/x").unwrap());
        assert!(fs.filesys_remove(&root, "/d").unwrap());
    }

    #[test]
    fn symlink_to_file_opens_target() {
        let fs = mounted(2048);
        let root = fs.root().clone();
        assert!(fs.filesys_create(&root, "/real.txt", 0).unwrap());
        assert!(fs.symlink(&root, "/real.txt", "/link.txt").unwrap());
        let handle = fs.filesys_open(&root, "/link.txt").unwrap().unwrap();
        assert!(matches!(handle, OpenHandle::File(_)));
    }

    #[test]
    fn create_under_removed_directory_is_refused() {
        let fs = mounted(2048);
        let root = fs.root().clone();
        assert!(fs.mkdir(&root, "/d").unwrap());
        let dir_handle = fs.filesys_open(&root, "/d").unwrap().unwrap();
        let dir_inode = match dir_handle {
            OpenHandle::Dir(d) => d.inode().clone(),
            OpenHandle::File(_) => panic!("expected a dir"),
        };
        assert!(fs.filesys_remove(&root, "/d").unwrap());
        assert!(fs.is_removed_subtree(&dir_inode).unwrap());
    }
}
