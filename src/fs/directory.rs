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

//! The directory layer (spec §4.3): named entries packed inside a DIR
//! inode, plus path resolution.
//!
//! Grounded on `original_source/filesys/directory.c`. Per spec §9, the
//! source's mutually recursive `dir_parse`/`dir_lookup` (which also leaks
//! malloc'd buffers on early returns) collapses here into iteration over a
//! slash-split path.

use super::config::NAME_MAX;
use super::fat::Fat;
use super::inode::{read_at, write_at, InodeKind, InodeRef, InodeTable};
use crate::device::BlockDevice;
use crate::errno::{errno, KResult};
use std::sync::Mutex;

/// Packed size of one directory entry: 1 byte in-use flag, `NAME_MAX + 1`
/// bytes of name, 8 bytes of inode sector (spec §3).
pub const ENTRY_SIZE: usize = 1 + (NAME_MAX + 1) + 8;

#[derive(Debug, Clone)]
struct RawEntry {
    in_use: bool,
    name: String,
    inode_sector: u64,
}

impl RawEntry {
    fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0] = self.in_use as u8;
        let name_bytes = self.name.as_bytes();
        let n = name_bytes.len().min(NAME_MAX + 1);
        buf[1..1 + n].copy_from_slice(&name_bytes[..n]);
        buf[1 + NAME_MAX + 1..].copy_from_slice(&self.inode_sector.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; ENTRY_SIZE]) -> Self {
        let in_use = buf[0] != 0;
        let name_field = &buf[1..1 + NAME_MAX + 1];
        let end = name_field.iter().position(|&b| b == 0).unwrap_or(name_field.len());
        let name = String::from_utf8_lossy(&name_field[..end]).into_owned();
        let inode_sector =
            u64::from_le_bytes(buf[1 + NAME_MAX + 1..].try_into().unwrap());
        RawEntry {
            in_use,
            name,
            inode_sector,
        }
    }
}

/// Creates a DIR inode at `sector`. `entry_cnt` is a sizing hint only: per
/// the extend rule (spec §4.2), clusters are allocated lazily as entries
/// are actually written, never up front.
pub fn dir_create(
    device: &dyn BlockDevice,
    table: &InodeTable,
    sector: u64,
    entry_cnt: usize,
) -> KResult<()> {
    let _ = entry_cnt;
    table.create(device, sector, 0, InodeKind::Dir, None)
}

/// Scans `dir`'s entries for one named `name`. Returns the entry and its
/// byte offset within the directory's data, for callers that need to
/// rewrite it in place.
fn find(
    device: &dyn BlockDevice,
    fat: &Fat,
    dir: &InodeRef,
    name: &str,
) -> KResult<Option<(RawEntry, u64)>> {
    let mut ofs = 0u64;
    let mut buf = [0u8; ENTRY_SIZE];
    loop {
        let n = read_at(device, fat, dir, &mut buf, ofs)?;
        if n < ENTRY_SIZE {
            return Ok(None);
        }
        let entry = RawEntry::from_bytes(&buf);
        if entry.in_use && entry.name == name {
            return Ok(Some((entry, ofs)));
        }
        ofs += ENTRY_SIZE as u64;
    }
}

/// Single-component lookup: spec §4.3 `dir_lookup`.
pub fn dir_lookup(
    device: &dyn BlockDevice,
    fat: &Fat,
    table: &InodeTable,
    dir: &InodeRef,
    name: &str,
) -> KResult<Option<InodeRef>> {
    match find(device, fat, dir, name)? {
        Some((entry, _)) => Ok(Some(table.open(device, entry.inode_sector)?)),
        None => Ok(None),
    }
}

/// Adds an entry. Fails if `name` is empty, too long, or already present.
pub fn dir_add(
    device: &dyn BlockDevice,
    fat: &Mutex<Fat>,
    dir: &InodeRef,
    name: &str,
    inode_sector: u64,
) -> KResult<bool> {
    if name.is_empty() || name.len() > NAME_MAX {
        return Ok(false);
    }
    {
        let fat_guard = fat.lock().unwrap();
        if find(device, &fat_guard, dir, name)?.is_some() {
            return Ok(false);
        }
    }
    // Find the first free slot, or the current end of file.
    let mut ofs = 0u64;
    let mut buf = [0u8; ENTRY_SIZE];
    let write_ofs = loop {
        let n = {
            let fat_guard = fat.lock().unwrap();
            read_at(device, &fat_guard, dir, &mut buf, ofs)?
        };
        if n < ENTRY_SIZE {
            break ofs;
        }
        let entry = RawEntry::from_bytes(&buf);
        if !entry.in_use {
            break ofs;
        }
        ofs += ENTRY_SIZE as u64;
    };
    let entry = RawEntry {
        in_use: true,
        name: name.to_string(),
        inode_sector,
    };
    let written = write_at(device, fat, dir, &entry.to_bytes(), write_ofs)?;
    Ok(written == ENTRY_SIZE)
}

/// Removes the entry named `name`. Fails if it does not exist, or if it
/// names a non-empty directory.
pub fn dir_remove(
    device: &dyn BlockDevice,
    fat: &Mutex<Fat>,
    table: &InodeTable,
    dir: &InodeRef,
    name: &str,
) -> KResult<bool> {
    let (entry, ofs) = {
        let fat_guard = fat.lock().unwrap();
        match find(device, &fat_guard, dir, name)? {
            Some(v) => v,
            None => return Ok(false),
        }
    };
    let inode = table.open(device, entry.inode_sector)?;
    let data = inode.read();
    if data.kind == InodeKind::Dir {
        let mut pos = 0u64;
        let has_entry = {
            let fat_guard = fat.lock().unwrap();
            dir_readdir(device, &fat_guard, &inode, &mut pos)?.is_some()
        };
        if has_entry {
            table.close(fat, inode);
            return Ok(false);
        }
    }
    let mut off_entry = entry.clone();
    off_entry.in_use = false;
    let written = write_at(device, fat, dir, &off_entry.to_bytes(), ofs)?;
    if written != ENTRY_SIZE {
        table.close(fat, inode);
        return Err(errno!(EIO));
    }
    table.mark_removed(&inode);
    table.close(fat, inode);
    Ok(true)
}

/// Advances `pos` and returns the next in-use entry that is neither `.`
/// nor `..`.
pub fn dir_readdir(
    device: &dyn BlockDevice,
    fat: &Fat,
    dir: &InodeRef,
    pos: &mut u64,
) -> KResult<Option<String>> {
    let mut buf = [0u8; ENTRY_SIZE];
    loop {
        let n = read_at(device, fat, dir, &mut buf, *pos)?;
        if n < ENTRY_SIZE {
            return Ok(None);
        }
        *pos += ENTRY_SIZE as u64;
        let entry = RawEntry::from_bytes(&buf);
        if entry.in_use && entry.name != "." && entry.name != ".." {
            return Ok(Some(entry.name));
        }
    }
}

/// Writes the `.`/`..` entries a freshly created directory must contain.
pub fn dir_init_self_parent(
    device: &dyn BlockDevice,
    fat: &Mutex<Fat>,
    dir: &InodeRef,
    parent_sector: u64,
) -> KResult<()> {
    let self_entry = RawEntry {
        in_use: true,
        name: ".".to_string(),
        inode_sector: dir.sector,
    };
    let parent_entry = RawEntry {
        in_use: true,
        name: "..".to_string(),
        inode_sector: parent_sector,
    };
    write_at(device, fat, dir, &self_entry.to_bytes(), 0)?;
    write_at(device, fat, dir, &parent_entry.to_bytes(), ENTRY_SIZE as u64)?;
    Ok(())
}

/// Walks from `dir` up through `..` to the root, returning `true` if any
/// ancestor's own entry in its parent has been marked not-in-use (spec
/// §4.3 `dir_removed`, §9: "walk via `..` and verify entry presence in
/// parent", not the source's buggy assertion pattern).
pub fn dir_removed(
    device: &dyn BlockDevice,
    fat: &Mutex<Fat>,
    table: &InodeTable,
    root_sector: u64,
    dir: &InodeRef,
) -> KResult<bool> {
    let mut child = table.open(device, dir.sector)?;
    loop {
        if child.sector == root_sector {
            table.close(fat, child);
            return Ok(false);
        }
        let parent_sector = {
            let fat_guard = fat.lock().unwrap();
            find(device, &fat_guard, &child, "..")?
                .map(|(e, _)| e.inode_sector)
                .ok_or(errno!(EIO))?
        };
        let parent = table.open(device, parent_sector)?;
        let child_sector = child.sector;
        table.close(fat, child);
        let still_in_use = {
            let fat_guard = fat.lock().unwrap();
            entry_status_for(device, &fat_guard, &parent, child_sector)?
        };
        match still_in_use {
            Some(true) => {}
            Some(false) => {
                table.close(fat, parent);
                return Ok(true);
            }
            None => {
                table.close(fat, parent);
                return Err(errno!(EIO));
            }
        }
        child = parent;
    }
}

/// Finds the entry referencing `target_sector` in `parent`, regardless of
/// whether it is still in-use, and reports that status (used only by
/// [`dir_removed`], which needs to tell "still linked" apart from
/// "unlinked but not yet reclaimed").
fn entry_status_for(
    device: &dyn BlockDevice,
    fat: &Fat,
    parent: &InodeRef,
    target_sector: u64,
) -> KResult<Option<bool>> {
    let mut ofs = 0u64;
    let mut buf = [0u8; ENTRY_SIZE];
    loop {
        let n = read_at(device, fat, parent, &mut buf, ofs)?;
        if n < ENTRY_SIZE {
            return Ok(None);
        }
        let entry = RawEntry::from_bytes(&buf);
        if entry.inode_sector == target_sector && entry.name != "." {
            return Ok(Some(entry.in_use));
        }
        ofs += ENTRY_SIZE as u64;
    }
}

/// Splits a slash-joined path into `(parent directory, leaf name)`,
/// following spec §4.3's `parse` algorithm as a single iterative pass
/// instead of the source's mutual recursion (spec §9).
///
/// `root` and `current` are both already-open handles; the caller owns
/// them. Any intermediate directories opened during the walk are closed
/// before returning.
pub fn resolve_parent(
    device: &dyn BlockDevice,
    fat: &Mutex<Fat>,
    table: &InodeTable,
    root: &InodeRef,
    current: &InodeRef,
    path: &str,
) -> KResult<(InodeRef, String)> {
    if path.is_empty() {
        return Err(errno!(EINVAL));
    }
    let (mut dir, rest) = if let Some(stripped) = path.strip_prefix('/') {
        (table.open(device, root.sector)?, stripped)
    } else {
        (table.open(device, current.sector)?, path)
    };
    let trimmed = rest.strip_suffix('/').unwrap_or(rest);
    match trimmed.rfind('/') {
        None => Ok((dir, trimmed.to_string())),
        Some(idx) => {
            let (head, leaf) = (&trimmed[..idx], &trimmed[idx + 1..]);
            for component in head.split('/').filter(|c| !c.is_empty()) {
                let fat_guard = fat.lock().unwrap();
                let next = dir_lookup(device, &fat_guard, table, &dir, component)?;
                drop(fat_guard);
                let next = next.ok_or(errno!(ENOENT))?;
                table.close(fat, dir);
                dir = next;
            }
            Ok((dir, leaf.to_string()))
        }
    }
}

/// Resolves a full slash-joined path to the inode it names, walking
/// component by component and opening intermediate directories (spec
/// §4.3 "Lookup by multi-component name"). A path of `/` or `""` resolves
/// to `current` (or `root`, if absolute) itself.
pub fn lookup_path(
    device: &dyn BlockDevice,
    fat: &Mutex<Fat>,
    table: &InodeTable,
    root: &InodeRef,
    current: &InodeRef,
    path: &str,
) -> KResult<InodeRef> {
    let (mut dir, rest) = if let Some(stripped) = path.strip_prefix('/') {
        (table.open(device, root.sector)?, stripped)
    } else {
        (table.open(device, current.sector)?, path)
    };
    let trimmed = rest.strip_suffix('/').unwrap_or(rest);
    if trimmed.is_empty() {
        return Ok(dir);
    }
    let components: Vec<&str> = trimmed.split('/').filter(|c| !c.is_empty()).collect();
    for (i, component) in components.iter().enumerate() {
        let next = {
            let fat_guard = fat.lock().unwrap();
            dir_lookup(device, &fat_guard, table, &dir, component)?
        };
        let next = next.ok_or(errno!(ENOENT))?;
        if i + 1 < components.len() {
            table.close(fat, dir);
        } else {
            table.close(fat, dir);
            return Ok(next);
        }
        dir = next;
    }
    Ok(dir)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::{DiskId, MemBlockDevice};
    use crate::fs::boot::BootRecord;

    fn setup(sectors: u32) -> (MemBlockDevice, Mutex<Fat>, InodeTable) {
        let device = MemBlockDevice::new(DiskId::FILESYS, sectors);
        let boot = BootRecord::compute(sectors);
        let fat = Mutex::new(Fat::format(boot));
        (device, fat, InodeTable::new())
    }

    fn make_root(device: &MemBlockDevice, fat: &Mutex<Fat>, table: &InodeTable) -> InodeRef {
        let header_cluster = fat.lock().unwrap().create_chain(0).unwrap();
        let sector = fat.lock().unwrap().cluster_to_sector(header_cluster);
        dir_create(device, table, sector, 16).unwrap();
        let root = table.open(device, sector).unwrap();
        dir_init_self_parent(device, fat, &root, sector).unwrap();
        root
    }

    fn make_dir(
        device: &MemBlockDevice,
        fat: &Mutex<Fat>,
        table: &InodeTable,
        parent_sector: u64,
    ) -> InodeRef {
        let header_cluster = fat.lock().unwrap().create_chain(0).unwrap();
        let sector = fat.lock().unwrap().cluster_to_sector(header_cluster);
        dir_create(device, table, sector, 16).unwrap();
        let dir = table.open(device, sector).unwrap();
        dir_init_self_parent(device, fat, &dir, parent_sector).unwrap();
        dir
    }

    fn make_file(device: &MemBlockDevice, fat: &Mutex<Fat>, table: &InodeTable) -> u64 {
        let header_cluster = fat.lock().unwrap().create_chain(0).unwrap();
        let sector = fat.lock().unwrap().cluster_to_sector(header_cluster);
        table.create(device, sector, 0, InodeKind::File, None).unwrap();
        sector
    }

    #[test]
    fn add_lookup_and_readdir_skip_dot_entries() {
        let (device, fat, table) = setup(2048);
        let root = make_root(&device, &fat, &table);
        let file_sector = make_file(&device, &fat, &table);
        assert!(dir_add(&device, &fat, &root, "foo.txt", file_sector).unwrap());

        let found = {
            let fat_guard = fat.lock().unwrap();
            dir_lookup(&device, &fat_guard, &table, &root, "foo.txt").unwrap()
        };
        assert!(found.is_some());
        assert_eq!(found.unwrap().sector, file_sector);

        let mut pos = 0u64;
        let names = {
            let fat_guard = fat.lock().unwrap();
            let mut v = Vec::new();
            while let Some(name) = dir_readdir(&device, &fat_guard, &root, &mut pos).unwrap() {
                v.push(name);
            }
            v
        };
        assert_eq!(names, vec!["foo.txt".to_string()]);
    }

    #[test]
    fn duplicate_name_rejected() {
        let (device, fat, table) = setup(2048);
        let root = make_root(&device, &fat, &table);
        let a = make_file(&device, &fat, &table);
        let b = make_file(&device, &fat, &table);
        assert!(dir_add(&device, &fat, &root, "dup", a).unwrap());
        assert!(!dir_add(&device, &fat, &root, "dup", b).unwrap());
    }

    #[test]
    fn remove_nonempty_directory_fails_then_succeeds_once_emptied() {
        let (device, fat, table) = setup(2048);
        let root = make_root(&device, &fat, &table);
        let child = make_dir(&device, &fat, &table, root.sector);
        assert!(dir_add(&device, &fat, &root, "sub", child.sector).unwrap());

        let inner_file = make_file(&device, &fat, &table);
        assert!(dir_add(&device, &fat, &child, "inner.txt", inner_file).unwrap());

        assert!(!dir_remove(&device, &fat, &table, &root, "sub").unwrap());
        assert!(dir_remove(&device, &fat, &table, &child, "inner.txt").unwrap());
        assert!(dir_remove(&device, &fat, &table, &root, "sub").unwrap());
    }

    #[test]
    fn multi_component_path_resolves_through_nested_directories() {
        let (device, fat, table) = setup(2048);
        let root = make_root(&device, &fat, &table);
        let a = make_dir(&device, &fat, &table, root.sector);
        assert!(dir_add(&device, &fat, &root, "a", a.sector).unwrap());
        let b = make_dir(&device, &fat, &table, a.sector);
        assert!(dir_add(&device, &fat, &a, "b", b.sector).unwrap());
        let c = make_file(&device, &fat, &table);
        assert!(dir_add(&device, &fat, &b, "c", c).unwrap());

        let resolved = lookup_path(&device, &fat, &table, &root, &root, "/a/b/c").unwrap();
        assert_eq!(resolved.sector, c);

        let (parent, leaf) =
            resolve_parent(&device, &fat, &table, &root, &root, "/a/b/c").unwrap();
        assert_eq!(parent.sector, b.sector);
        assert_eq!(leaf, "c");
    }

    #[test]
    fn dir_removed_reflects_unlinked_ancestor() {
        let (device, fat, table) = setup(2048);
        let root = make_root(&device, &fat, &table);
        let a = make_dir(&device, &fat, &table, root.sector);
        assert!(dir_add(&device, &fat, &root, "a", a.sector).unwrap());

        assert!(!dir_removed(&device, &fat, &table, root.sector, &a).unwrap());
        assert!(dir_remove(&device, &fat, &table, &root, "a").unwrap());
        assert!(dir_removed(&device, &fat, &table, root.sector, &a).unwrap());
    }
}
