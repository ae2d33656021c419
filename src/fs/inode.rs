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

//! The inode layer (spec §4.2): a persistent file header, an open-inode
//! cache that keeps concurrent handles to the same file consistent, and
//! byte-range read/write with automatic extension.
//!
//! The inode's header occupies the whole first (and, with the default of
//! one sector per cluster, only) sector of the cluster it was allocated at
//! by the caller (the facade, spec §4.4); the inode's *data* lives in a
//! separate cluster chain referenced by `start_cluster`, grown lazily by
//! [`Inode::write_at`]'s extend rule. This mirrors the source project's
//! `struct inode_disk` living in its own sector while pointing at a
//! separate data chain.

use super::config::{NAME_MAX, PATH_MAX, SECTORS_PER_CLUSTER};
use super::fat::{Cluster, Fat};
use crate::device::{BlockDevice, SECTOR_SIZE};
use crate::errno::{errno, KResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What an inode represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    File,
    Dir,
    Link,
}

impl InodeKind {
    fn to_byte(self) -> u8 {
        match self {
            InodeKind::File => 0,
            InodeKind::Dir => 1,
            InodeKind::Link => 2,
        }
    }

    fn from_byte(b: u8) -> KResult<Self> {
        match b {
            0 => Ok(InodeKind::File),
            1 => Ok(InodeKind::Dir),
            2 => Ok(InodeKind::Link),
            _ => Err(errno!(EIO)),
        }
    }
}

/// The persistent, mutable part of an inode header.
#[derive(Debug, Clone)]
pub struct InodeData {
    pub start_cluster: Cluster,
    pub length: u64,
    pub kind: InodeKind,
    pub link_target: Option<String>,
}

const LINK_TARGET_OFFSET: usize = 13;

impl InodeData {
    fn to_sector(&self) -> KResult<[u8; SECTOR_SIZE]> {
        let mut buf = [0u8; SECTOR_SIZE];
        buf[0..4].copy_from_slice(&self.start_cluster.to_le_bytes());
        buf[4..12].copy_from_slice(&self.length.to_le_bytes());
        buf[12] = self.kind.to_byte();
        if let Some(target) = &self.link_target {
            if target.len() > PATH_MAX {
                return Err(errno!(EINVAL));
            }
            let bytes = target.as_bytes();
            buf[LINK_TARGET_OFFSET..LINK_TARGET_OFFSET + 2]
                .copy_from_slice(&(bytes.len() as u16).to_le_bytes());
            buf[LINK_TARGET_OFFSET + 2..LINK_TARGET_OFFSET + 2 + bytes.len()]
                .copy_from_slice(bytes);
        }
        Ok(buf)
    }

    fn from_sector(buf: &[u8; SECTOR_SIZE]) -> KResult<Self> {
        let start_cluster = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let length = u64::from_le_bytes(buf[4..12].try_into().unwrap());
        let kind = InodeKind::from_byte(buf[12])?;
        let link_target = if kind == InodeKind::Link {
            let len = u16::from_le_bytes(buf[LINK_TARGET_OFFSET..LINK_TARGET_OFFSET + 2].try_into().unwrap()) as usize;
            let bytes = &buf[LINK_TARGET_OFFSET + 2..LINK_TARGET_OFFSET + 2 + len];
            Some(String::from_utf8_lossy(bytes).into_owned())
        } else {
            None
        };
        Ok(InodeData {
            start_cluster,
            length,
            kind,
            link_target,
        })
    }
}

/// A cached, reference-counted inode. `sector` is both the cache key and
/// the disk location of its header.
pub struct InodeShared {
    pub sector: u64,
    data: Mutex<InodeData>,
    open_cnt: AtomicUsize,
    removed: AtomicBool,
}

impl InodeShared {
    pub fn read(&self) -> InodeData {
        self.data.lock().unwrap().clone()
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }
}

pub type InodeRef = Arc<InodeShared>;

/// The open-inode cache: "prevents two handles from observing inconsistent
/// in-memory state" (spec §4.2).
#[derive(Default)]
pub struct InodeTable {
    cache: Mutex<HashMap<u64, InodeRef>>,
}

impl InodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a fresh header at `sector`. The caller is responsible for
    /// having allocated the cluster that sector belongs to.
    pub fn create(
        &self,
        device: &dyn BlockDevice,
        sector: u64,
        length: u64,
        kind: InodeKind,
        link_target: Option<String>,
    ) -> KResult<()> {
        let data = InodeData {
            start_cluster: 0,
            length,
            kind,
            link_target,
        };
        device.write_sector(sector, &data.to_sector()?)?;
        Ok(())
    }

    /// Opens (or re-opens) the inode at `sector`, bumping its open count.
    pub fn open(&self, device: &dyn BlockDevice, sector: u64) -> KResult<InodeRef> {
        let mut cache = self.cache.lock().unwrap();
        if let Some(inode) = cache.get(&sector) {
            inode.open_cnt.fetch_add(1, Ordering::SeqCst);
            return Ok(Arc::clone(inode));
        }
        let mut buf = [0u8; SECTOR_SIZE];
        device.read_sector(sector, &mut buf)?;
        let data = InodeData::from_sector(&buf)?;
        let inode = Arc::new(InodeShared {
            sector,
            data: Mutex::new(data),
            open_cnt: AtomicUsize::new(1),
            removed: AtomicBool::new(false),
        });
        cache.insert(sector, Arc::clone(&inode));
        Ok(inode)
    }

    /// Marks an inode for removal. Reclamation is deferred to the last
    /// `close` (spec §4.2, §9 open question: the facade's `dir_remove`
    /// calls this immediately on successful removal, but disk space is
    /// only reclaimed once every handle has let go).
    pub fn mark_removed(&self, inode: &InodeRef) {
        inode.removed.store(true, Ordering::SeqCst);
    }

    /// Decrements the open count; at zero, evicts the cache entry and, if
    /// the inode was removed, frees its data chain and header cluster.
    pub fn close(&self, fat: &Mutex<Fat>, inode: InodeRef) {
        let prev = inode.open_cnt.fetch_sub(1, Ordering::SeqCst);
        if prev != 1 {
            return;
        }
        let mut cache = self.cache.lock().unwrap();
        cache.remove(&inode.sector);
        drop(cache);
        if inode.is_removed() {
            let data = inode.read();
            let mut fat = fat.lock().unwrap();
            if data.start_cluster != 0 {
                fat.remove_chain(data.start_cluster, 0);
            }
            let header_cluster = fat.sector_to_cluster(inode.sector);
            fat.remove_chain(header_cluster, 0);
        }
    }
}

const fn cluster_size() -> u64 {
    SECTORS_PER_CLUSTER * SECTOR_SIZE as u64
}

/// Reads up to `size` bytes at `offset`, stopping short only at EOF.
pub fn read_at(
    device: &dyn BlockDevice,
    fat: &Fat,
    inode: &InodeRef,
    buf: &mut [u8],
    offset: u64,
) -> KResult<usize> {
    let data = inode.read();
    if offset >= data.length {
        return Ok(0);
    }
    let size = buf.len().min((data.length - offset) as usize);
    let mut done = 0usize;
    while done < size {
        let pos = offset + done as u64;
        let cluster_idx = pos / cluster_size();
        let cluster_off = (pos % cluster_size()) as usize;
        let clst = nth_cluster(fat, data.start_cluster, cluster_idx)
            .ok_or(errno!(EIO))?;
        let sector = fat.cluster_to_sector(clst);
        let mut sector_buf = [0u8; SECTOR_SIZE];
        device.read_sector(sector, &mut sector_buf)?;
        let n = (SECTOR_SIZE - cluster_off).min(size - done);
        buf[done..done + n].copy_from_slice(&sector_buf[cluster_off..cluster_off + n]);
        done += n;
    }
    Ok(done)
}

/// Writes `buf` at `offset`, extending the cluster chain as needed. On
/// partial allocation failure, clusters added during this call are
/// released and a short write is returned.
pub fn write_at(
    device: &dyn BlockDevice,
    fat: &Mutex<Fat>,
    inode: &InodeRef,
    buf: &[u8],
    offset: u64,
) -> KResult<usize> {
    let mut data = inode.read();
    let end = offset + buf.len() as u64;
    if end > data.length {
        extend(fat, &mut data, end)?;
    }
    let fat_guard = fat.lock().unwrap();
    let mut done = 0usize;
    // Only write as far as the chain actually reaches (a short extend
    // leaves `data.length` reflecting how far we got).
    let writable = buf.len().min((data.length.saturating_sub(offset)) as usize);
    while done < writable {
        let pos = offset + done as u64;
        let cluster_idx = pos / cluster_size();
        let cluster_off = (pos % cluster_size()) as usize;
        let clst = nth_cluster(&fat_guard, data.start_cluster, cluster_idx)
            .ok_or(errno!(EIO))?;
        let sector = fat_guard.cluster_to_sector(clst);
        let mut sector_buf = [0u8; SECTOR_SIZE];
        if cluster_off != 0 || writable - done < SECTOR_SIZE {
            device.read_sector(sector, &mut sector_buf)?;
        }
        let n = (SECTOR_SIZE - cluster_off).min(writable - done);
        sector_buf[cluster_off..cluster_off + n].copy_from_slice(&buf[done..done + n]);
        device.write_sector(sector, &sector_buf)?;
        done += n;
    }
    drop(fat_guard);
    persist_header(device, inode, &data)?;
    Ok(done)
}

/// Walks the chain to find its `n`th cluster from the start, allocating
/// lazily via the FAT table.
fn nth_cluster(fat: &Fat, start: Cluster, n: u64) -> Option<Cluster> {
    let mut clst = start;
    if clst == 0 {
        return None;
    }
    for _ in 0..n {
        clst = fat.get(clst);
        if clst == 0 || clst == super::config::EOCHAIN {
            return None;
        }
    }
    Some(clst)
}

/// Grows the cluster chain backing `data` until it can hold up to
/// `needed` bytes, or as far as allocation allows.
fn extend(fat: &Mutex<Fat>, data: &mut InodeData, needed: u64) -> KResult<()> {
    let needed_clusters = needed.div_ceil(cluster_size());
    let mut fat = fat.lock().unwrap();
    let mut have_clusters = if data.start_cluster == 0 {
        0
    } else {
        count_chain(&fat, data.start_cluster)
    };
    let mut added = Vec::new();
    let mut tail = if data.start_cluster == 0 {
        0
    } else {
        last_cluster(&fat, data.start_cluster)
    };
    let mut ok = true;
    while have_clusters < needed_clusters {
        match fat.create_chain(tail) {
            Some(c) => {
                if data.start_cluster == 0 {
                    data.start_cluster = c;
                }
                tail = c;
                added.push(c);
                have_clusters += 1;
            }
            None => {
                ok = false;
                break;
            }
        }
    }
    if !ok {
        // Roll back everything we just added (spec §4.2 extend rule).
        if let Some(&first_added) = added.first() {
            let prev = if data.start_cluster == first_added {
                0
            } else {
                // Find the cluster preceding first_added in the chain.
                last_cluster_before(&fat, data.start_cluster, first_added)
            };
            fat.remove_chain(first_added, prev);
            if data.start_cluster == first_added {
                data.start_cluster = 0;
            }
        }
        // Short write: cap length at what the chain can actually hold.
        let have_clusters_now = if data.start_cluster == 0 {
            0
        } else {
            count_chain(&fat, data.start_cluster)
        };
        data.length = data.length.max(have_clusters_now * cluster_size());
        return Ok(());
    }
    data.length = data.length.max(needed);
    Ok(())
}

fn count_chain(fat: &Fat, start: Cluster) -> u64 {
    let mut n = 0u64;
    let mut clst = start;
    loop {
        n += 1;
        let next = fat.get(clst);
        if next == super::config::EOCHAIN {
            break;
        }
        clst = next;
    }
    n
}

fn last_cluster(fat: &Fat, start: Cluster) -> Cluster {
    let mut clst = start;
    loop {
        let next = fat.get(clst);
        if next == super::config::EOCHAIN {
            return clst;
        }
        clst = next;
    }
}

fn last_cluster_before(fat: &Fat, start: Cluster, target: Cluster) -> Cluster {
    let mut clst = start;
    loop {
        let next = fat.get(clst);
        if next == target {
            return clst;
        }
        clst = next;
    }
}

fn persist_header(device: &dyn BlockDevice, inode: &InodeRef, data: &InodeData) -> KResult<()> {
    device.write_sector(inode.sector, &data.to_sector()?)?;
    *inode_data_mut(inode) = data.clone();
    Ok(())
}

fn inode_data_mut(inode: &InodeRef) -> std::sync::MutexGuard<'_, InodeData> {
    inode.data.lock().unwrap()
}

/// Limits referenced by callers constructing directory entries.
pub const ENTRY_NAME_CAP: usize = NAME_MAX + 1;
