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

//! The swap disk's free-slot bitmap (spec §4.8 ANON, §5 "the bitmap
//! allocation for a new swap slot happens before any disk write").
//!
//! Grounded on `original_source/vm/anon.c`'s `swap_table` bitmap and
//! `vm_anon_init`.

use super::config::{PGSIZE, SWAP_SLOT_SECTORS};
use crate::device::{BlockDevice, SECTOR_SIZE};
use crate::errno::KResult;

/// Tracks which page-sized slots of the swap disk are occupied.
pub struct SwapBitmap {
    bits: Vec<bool>,
}

impl SwapBitmap {
    /// Builds a bitmap sized to the swap device: one bit per
    /// `SWAP_SLOT_SECTORS`-sector slot.
    pub fn new(device: &dyn BlockDevice) -> Self {
        let slots = device.sector_count() / SWAP_SLOT_SECTORS;
        SwapBitmap {
            bits: vec![false; slots as usize],
        }
    }

    /// Claims the first free slot. `None` means the swap disk is full,
    /// which spec §7 treats as fatal at the caller.
    pub fn alloc(&mut self) -> Option<u32> {
        let idx = self.bits.iter().position(|&b| !b)?;
        self.bits[idx] = true;
        Some(idx as u32)
    }

    pub fn free(&mut self, slot: u32) {
        self.bits[slot as usize] = false;
    }

    pub fn is_set(&self, slot: u32) -> bool {
        self.bits[slot as usize]
    }

    pub fn free_count(&self) -> usize {
        self.bits.iter().filter(|&&b| !b).count()
    }
}

/// Reads one page-sized slot from the swap disk.
pub fn read_slot(device: &dyn BlockDevice, slot: u32, buf: &mut [u8; PGSIZE]) -> KResult<()> {
    let base = slot as u64 * SWAP_SLOT_SECTORS;
    for i in 0..SWAP_SLOT_SECTORS {
        let mut sector = [0u8; SECTOR_SIZE];
        device.read_sector(base + i, &mut sector)?;
        let off = i as usize * SECTOR_SIZE;
        buf[off..off + SECTOR_SIZE].copy_from_slice(&sector);
    }
    Ok(())
}

/// Writes one page-sized slot to the swap disk.
pub fn write_slot(device: &dyn BlockDevice, slot: u32, buf: &[u8; PGSIZE]) -> KResult<()> {
    let base = slot as u64 * SWAP_SLOT_SECTORS;
    for i in 0..SWAP_SLOT_SECTORS {
        let off = i as usize * SECTOR_SIZE;
        let mut sector = [0u8; SECTOR_SIZE];
        sector.copy_from_slice(&buf[off..off + SECTOR_SIZE]);
        device.write_sector(base + i, &sector)?;
    }
    Ok(())
}
