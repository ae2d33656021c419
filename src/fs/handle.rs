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

//! Open file and directory handles (spec §3): the per-fd state a process
//! keeps on top of the shared, cached [`InodeRef`].

use super::directory;
use super::fat::Fat;
use super::inode::{read_at, write_at, InodeRef};
use crate::device::BlockDevice;
use crate::errno::KResult;
use std::sync::{Arc, Mutex};

/// A process's handle on an open file: its own cursor and deny-write bit,
/// layered on top of the inode shared by every handle on that file.
///
/// The cursor is behind an `Arc<Mutex<_>>` rather than a bare `u64` so
/// that [`FileHandle::dup`] can hand back a handle sharing the exact
/// same cursor (spec §6 `dup2`: "linked copies share an underlying file
/// handle") without the source's circular `copied_fd` list — two
/// independent `open()` calls on the same inode still get independent
/// `Arc`s and therefore independent cursors.
pub struct FileHandle {
    inode: InodeRef,
    pos: Arc<Mutex<u64>>,
    deny_write: bool,
}

impl FileHandle {
    pub fn new(inode: InodeRef, deny_write: bool) -> Self {
        FileHandle {
            inode,
            pos: Arc::new(Mutex::new(0)),
            deny_write,
        }
    }

    pub fn inode(&self) -> &InodeRef {
        &self.inode
    }

    pub fn tell(&self) -> u64 {
        *self.pos.lock().unwrap()
    }

    pub fn seek(&mut self, pos: u64) {
        *self.pos.lock().unwrap() = pos;
    }

    pub fn length(&self) -> u64 {
        self.inode.read().length
    }

    pub fn deny_write(&self) -> bool {
        self.deny_write
    }

    /// A handle on the same inode sharing this handle's cursor, for
    /// `dup2` (spec §6).
    pub fn dup(&self) -> Self {
        FileHandle {
            inode: self.inode.clone(),
            pos: self.pos.clone(),
            deny_write: self.deny_write,
        }
    }

    /// Reads from the current position, advancing it by the amount read.
    pub fn read(&mut self, device: &dyn BlockDevice, fat: &Fat, buf: &mut [u8]) -> KResult<usize> {
        let mut pos = self.pos.lock().unwrap();
        let n = read_at(device, fat, &self.inode, buf, *pos)?;
        *pos += n as u64;
        Ok(n)
    }

    /// Writes at the current position, advancing it by the amount written.
    /// A deny-write handle always writes zero bytes (spec §4.2: writers
    /// racing an executing image must be refused, not silently truncated).
    pub fn write(&mut self, device: &dyn BlockDevice, fat: &Mutex<Fat>, buf: &[u8]) -> KResult<usize> {
        if self.deny_write {
            return Ok(0);
        }
        let mut pos = self.pos.lock().unwrap();
        let n = write_at(device, fat, &self.inode, buf, *pos)?;
        *pos += n as u64;
        Ok(n)
    }
}

/// A process's handle on an open directory: the inode plus a byte cursor
/// into its packed entries, used only by [`DirHandle::read_next`].
pub struct DirHandle {
    inode: InodeRef,
    pos: Arc<Mutex<u64>>,
}

impl DirHandle {
    pub fn new(inode: InodeRef) -> Self {
        DirHandle {
            inode,
            pos: Arc::new(Mutex::new(0)),
        }
    }

    pub fn inode(&self) -> &InodeRef {
        &self.inode
    }

    /// A handle on the same directory sharing this handle's cursor, for
    /// `dup2` (spec §6).
    pub fn dup(&self) -> Self {
        DirHandle {
            inode: self.inode.clone(),
            pos: self.pos.clone(),
        }
    }

    /// Returns the next entry name, skipping `.` and `..`, or `None` at
    /// the end of the directory.
    pub fn read_next(&mut self, device: &dyn BlockDevice, fat: &Fat) -> KResult<Option<String>> {
        let mut pos = self.pos.lock().unwrap();
        directory::dir_readdir(device, fat, &self.inode, &mut pos)
    }

    pub fn rewind(&mut self) {
        *self.pos.lock().unwrap() = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::{DiskId, MemBlockDevice};
    use crate::fs::boot::BootRecord;
    use crate::fs::inode::{InodeKind, InodeTable};

    fn setup(sectors: u32) -> (MemBlockDevice, Mutex<Fat>, InodeTable) {
        let device = MemBlockDevice::new(DiskId::FILESYS, sectors);
        let boot = BootRecord::compute(sectors);
        let fat = Mutex::new(Fat::format(boot));
        (device, fat, InodeTable::new())
    }

    #[test]
    fn read_write_advance_the_cursor_independently_per_handle() {
        let (device, fat, table) = setup(2048);
        let header_cluster = fat.lock().unwrap().create_chain(0).unwrap();
        let sector = fat.lock().unwrap().cluster_to_sector(header_cluster);
        table.create(&device, sector, 0, InodeKind::File, None).unwrap();
        let inode_a = table.open(&device, sector).unwrap();
        let inode_b = table.open(&device, sector).unwrap();

        let mut writer = FileHandle::new(inode_a, false);
        let n = writer.write(&device, &fat, b"hello world").unwrap();
        assert_eq!(n, 11);
        assert_eq!(writer.tell(), 11);

        let mut reader = FileHandle::new(inode_b, false);
        let mut buf = [0u8; 5];
        {
            let fat_guard = fat.lock().unwrap();
            reader.read(&device, &fat_guard, &mut buf).unwrap();
        }
        assert_eq!(&buf, b"hello");
        assert_eq!(reader.tell(), 5);
        // The writer's own cursor is unaffected by the reader's progress.
        assert_eq!(writer.tell(), 11);
    }

    #[test]
    fn deny_write_handle_writes_nothing() {
        let (device, fat, table) = setup(2048);
        let header_cluster = fat.lock().unwrap().create_chain(0).unwrap();
        let sector = fat.lock().unwrap().cluster_to_sector(header_cluster);
        table.create(&device, sector, 0, InodeKind::File, None).unwrap();
        let inode = table.open(&device, sector).unwrap();
        let mut handle = FileHandle::new(inode, true);
        let n = handle.write(&device, &fat, b"nope").unwrap();
        assert_eq!(n, 0);
        assert_eq!(handle.tell(), 0);
    }

    #[test]
    fn dir_handle_skips_dot_entries() {
        let (device, fat, table) = setup(2048);
        let dir_cluster = fat.lock().unwrap().create_chain(0).unwrap();
        let dir_sector = fat.lock().unwrap().cluster_to_sector(dir_cluster);
        directory::dir_create(&device, &table, dir_sector, 16).unwrap();
        let dir_inode = table.open(&device, dir_sector).unwrap();
        directory::dir_init_self_parent(&device, &fat, &dir_inode, dir_sector).unwrap();

        let file_cluster = fat.lock().unwrap().create_chain(0).unwrap();
        let file_sector = fat.lock().unwrap().cluster_to_sector(file_cluster);
        table.create(&device, file_sector, 0, InodeKind::File, None).unwrap();
        directory::dir_add(&device, &fat, &dir_inode, "only.txt", file_sector).unwrap();

        let mut handle = DirHandle::new(dir_inode);
        let first = {
            let fat_guard = fat.lock().unwrap();
            handle.read_next(&device, &fat_guard).unwrap()
        };
        assert_eq!(first, Some("only.txt".to_string()));
        let second = {
            let fat_guard = fat.lock().unwrap();
            handle.read_next(&device, &fat_guard).unwrap()
        };
        assert_eq!(second, None);
    }
}
