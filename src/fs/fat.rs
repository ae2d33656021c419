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

//! The cluster chain allocator (spec §4.1).
//!
//! Grounded on `original_source/filesys/fat.c`: `fat_create_chain` scans for
//! the first free entry, `fat_remove_chain` walks and frees a chain,
//! following a sentinel that must never be crossed twice.

use super::boot::BootRecord;
use super::config::{EOCHAIN, FREE_CLUSTER, SECTORS_PER_CLUSTER};
use crate::device::{BlockDevice, SECTOR_SIZE};
use crate::errno::KResult;
use std::sync::Arc;

/// A cluster index. `0` means free, [`EOCHAIN`] marks the end of a chain.
pub type Cluster = u32;

/// The in-memory FAT table, kept fully resident while mounted and written
/// back to disk on unmount (spec §3).
pub struct Fat {
    boot: BootRecord,
    table: Vec<Cluster>,
}

impl Fat {
    /// Builds a fresh FAT for a newly formatted disk: every entry free,
    /// except the root directory cluster which is immediately terminated.
    pub fn format(boot: BootRecord) -> Self {
        let mut table = vec![FREE_CLUSTER; boot.fat_length() as usize];
        table[super::config::ROOT_DIR_CLUSTER as usize] = EOCHAIN;
        Fat { boot, table }
    }

    /// Loads the FAT table from disk (spec §4.5 `mount`).
    pub fn load(device: &dyn BlockDevice, boot: BootRecord) -> KResult<Self> {
        let len = boot.fat_length() as usize;
        let mut table = vec![FREE_CLUSTER; len];
        let entries_per_sector = SECTOR_SIZE / 4;
        let mut buf = [0u8; SECTOR_SIZE];
        let mut written = 0usize;
        for i in 0..boot.fat_sectors as u64 {
            device.read_sector(boot.fat_start as u64 + i, &mut buf)?;
            for chunk in buf.chunks_exact(4) {
                if written >= len {
                    break;
                }
                table[written] = u32::from_le_bytes(chunk.try_into().unwrap());
                written += 1;
            }
            let _ = entries_per_sector;
        }
        Ok(Fat { boot, table })
    }

    /// Writes the FAT table back to its sectors (spec §4.5 `unmount`).
    pub fn flush(&self, device: &dyn BlockDevice) -> KResult<()> {
        let mut iter = self.table.iter();
        for i in 0..self.boot.fat_sectors as u64 {
            let mut buf = [0u8; SECTOR_SIZE];
            for chunk in buf.chunks_exact_mut(4) {
                let v = iter.next().copied().unwrap_or(FREE_CLUSTER);
                chunk.copy_from_slice(&v.to_le_bytes());
            }
            device.write_sector(self.boot.fat_start as u64 + i, &buf)?;
        }
        Ok(())
    }

    pub fn boot_record(&self) -> BootRecord {
        self.boot
    }

    pub fn fat_length(&self) -> u32 {
        self.table.len() as u32
    }

    /// Converts a cluster index to its first sector.
    pub fn cluster_to_sector(&self, clst: Cluster) -> u64 {
        self.boot.data_start() + clst as u64 * SECTORS_PER_CLUSTER
    }

    pub fn sector_to_cluster(&self, sector: u64) -> Cluster {
        ((sector - self.boot.data_start()) / SECTORS_PER_CLUSTER) as Cluster
    }

    /// Fetches a FAT entry.
    pub fn get(&self, clst: Cluster) -> Cluster {
        self.table[clst as usize]
    }

    /// Updates a FAT entry.
    pub fn put(&mut self, clst: Cluster, val: Cluster) {
        self.table[clst as usize] = val;
    }

    /// Scans from cluster 1 upward for the first free entry.
    pub fn find_empty(&self) -> Option<Cluster> {
        (1..self.table.len() as Cluster).find(|&c| self.table[c as usize] == FREE_CLUSTER)
    }

    /// True if at least `n` clusters are free.
    pub fn has_space(&self, n: usize) -> bool {
        self.table
            .iter()
            .skip(1)
            .filter(|&&c| c == FREE_CLUSTER)
            .count()
            >= n
    }

    /// Extends (or starts) a chain by one cluster. If `prev` is non-zero, it
    /// must currently be the end of its chain; the new cluster is spliced
    /// on. Returns `None` if the disk is full.
    pub fn create_chain(&mut self, prev: Cluster) -> Option<Cluster> {
        let new = self.find_empty()?;
        self.put(new, EOCHAIN);
        if prev != FREE_CLUSTER {
            assert_eq!(self.get(prev), EOCHAIN, "create_chain: prev is not chain-terminal");
            self.put(prev, new);
        }
        Some(new)
    }

    /// Frees every cluster in the chain starting at `start`. If
    /// `prev_link` is non-zero, that cluster is truncated (set to
    /// end-of-chain) before the walk begins, so it keeps whatever remains
    /// of its own chain.
    ///
    /// Panics if the walk encounters a free cluster before the sentinel:
    /// that indicates chain corruption, which spec §7 treats as a fatal
    /// invariant violation.
    pub fn remove_chain(&mut self, start: Cluster, prev_link: Cluster) {
        if prev_link != FREE_CLUSTER {
            self.put(prev_link, EOCHAIN);
        }
        let mut clst = start;
        loop {
            let next = self.get(clst);
            assert_ne!(next, FREE_CLUSTER, "remove_chain: chain corruption (free cluster mid-chain)");
            self.put(clst, FREE_CLUSTER);
            if next == EOCHAIN {
                return;
            }
            clst = next;
        }
    }

    /// Number of clusters currently allocated (for the invariant in spec
    /// §8: free + allocated == fat_length - 1).
    pub fn allocated_count(&self) -> usize {
        self.table
            .iter()
            .skip(1)
            .filter(|&&c| c != FREE_CLUSTER)
            .count()
    }
}

/// A [`Fat`] shared between the facade and the inode layer, guarded by the
/// single filesystem lock (spec §5) rather than its own lock.
pub type SharedFat = Arc<std::sync::Mutex<Fat>>;

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::{DiskId, MemBlockDevice};

    fn fresh_fat(sectors: u32) -> Fat {
        let boot = BootRecord::compute(sectors);
        Fat::format(boot)
    }

    #[test]
    fn create_and_remove_chain() {
        let mut fat = fresh_fat(2048);
        let c1 = fat.create_chain(0).unwrap();
        let c2 = fat.create_chain(c1).unwrap();
        assert_eq!(fat.get(c1), c2);
        assert_eq!(fat.get(c2), EOCHAIN);
        fat.remove_chain(c1, 0);
        assert_eq!(fat.get(c1), FREE_CLUSTER);
        assert_eq!(fat.get(c2), FREE_CLUSTER);
    }

    #[test]
    fn remove_chain_truncates_via_prev_link() {
        let mut fat = fresh_fat(2048);
        let c1 = fat.create_chain(0).unwrap();
        let c2 = fat.create_chain(c1).unwrap();
        let c3 = fat.create_chain(c2).unwrap();
        // Truncate the chain after c1, freeing c2..c3.
        fat.remove_chain(c2, c1);
        assert_eq!(fat.get(c1), EOCHAIN);
        assert_eq!(fat.get(c2), FREE_CLUSTER);
        assert_eq!(fat.get(c3), FREE_CLUSTER);
    }

    #[test]
    #[should_panic(expected = "chain corruption")]
    fn remove_chain_panics_on_corruption() {
        let mut fat = fresh_fat(2048);
        // cluster 5 was never allocated: walking it is corruption.
        fat.remove_chain(5, 0);
    }

    #[test]
    fn cluster_sector_round_trip() {
        let device = MemBlockDevice::new(DiskId::FILESYS, 2048);
        let fat = fresh_fat(2048);
        let sector = fat.cluster_to_sector(10);
        assert_eq!(fat.sector_to_cluster(sector), 10);
        let _ = device;
    }

    #[test]
    fn load_after_flush_round_trips() {
        let device = MemBlockDevice::new(DiskId::FILESYS, 2048);
        let mut fat = fresh_fat(2048);
        let c1 = fat.create_chain(0).unwrap();
        fat.flush(&device).unwrap();
        let loaded = Fat::load(&device, fat.boot_record()).unwrap();
        assert_eq!(loaded.get(c1), EOCHAIN);
    }

    #[test]
    fn invariant_free_plus_allocated_is_fat_length_minus_one() {
        let mut fat = fresh_fat(2048);
        fat.create_chain(0).unwrap();
        fat.create_chain(0).unwrap();
        let free = (1..fat.fat_length())
            .filter(|&c| fat.get(c) == FREE_CLUSTER)
            .count();
        assert_eq!(free + fat.allocated_count(), fat.fat_length() as usize - 1);
    }
}
