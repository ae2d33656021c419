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

//! The virtual-memory core (spec §4.6-§4.10): frame table, supplemental
//! page table, page classes, fault handler, and fork's address-space
//! copy, tied together behind one per-process [`VmSpace`] and one
//! system-wide [`Vm`] holding the physical frame pool and swap disk.
//!
//! Grounded on the split between `memory::vmem::VMem` (one per process,
//! §4.9/§4.10) and the single system-wide `memory::buddy` allocator
//! (§4.6's frame pool is likewise shared, since physical memory is not
//! a per-process resource).

pub mod address_space;
pub mod config;
pub mod fault;
pub mod fork;
pub mod frame;
pub mod page;
pub mod spt;
pub mod swap;

pub use address_space::{AddressSpace, SimpleAddressSpace};
pub use fault::FaultOutcome;
pub use frame::{FrameId, FrameTable};
pub use page::{FileBacking, Page, PageRef, PageState, SwapCtx, Target};
pub use spt::SupplementalPageTable;
pub use swap::SwapBitmap;

use crate::device::BlockDevice;
use crate::errno::KResult;
use std::sync::{Arc, Mutex};

/// The backing a [`VmSpace::mmap`] call maps in: an already-open file the
/// caller (the syscall layer) resolved through the filesystem facade.
pub struct MmapSource {
    pub device: Arc<dyn BlockDevice>,
    pub fat: crate::fs::fat::SharedFat,
    pub inode: crate::fs::inode::InodeRef,
    pub length: u64,
}

/// The system-wide physical resources every process's address space
/// draws from: the frame pool and the swap disk. One per kernel
/// instance; [`VmSpace`]s borrow it for every operation that touches a
/// frame.
pub struct Vm {
    frames: Mutex<FrameTable>,
    swap_device: Arc<dyn BlockDevice>,
    bitmap: Mutex<SwapBitmap>,
}

impl Vm {
    /// Brings the VM subsystem up: allocates the frame pool and sizes the
    /// swap bitmap to the swap disk (spec §9 "treat as subsystems with
    /// explicit init/shutdown").
    pub fn init(pool_size: usize, swap_device: Arc<dyn BlockDevice>) -> Self {
        let bitmap = SwapBitmap::new(swap_device.as_ref());
        Vm {
            frames: Mutex::new(FrameTable::new(pool_size)),
            swap_device,
            bitmap: Mutex::new(bitmap),
        }
    }

    /// Tears the VM subsystem down. There is no persistent VM state to
    /// flush (unlike the filesystem's FAT), so this only exists to make
    /// the subsystem's lifecycle explicit and symmetric with `init`.
    pub fn shutdown(self) {}

    fn swap_ctx(&self) -> SwapCtx<'_> {
        SwapCtx {
            device: self.swap_device.as_ref(),
            bitmap: &self.bitmap,
        }
    }
}

/// One process's address space: its supplemental page table and its
/// (hosted) MMU mappings, plus the bookkeeping `munmap` needs to find
/// the extent of a mapping it didn't track in the SPT itself.
pub struct VmSpace {
    spt: SupplementalPageTable,
    address_space: SimpleAddressSpace,
    mmaps: Vec<(u64, usize)>,
}

impl VmSpace {
    pub fn new() -> Self {
        VmSpace {
            spt: SupplementalPageTable::new(),
            address_space: SimpleAddressSpace::new(),
            mmaps: Vec::new(),
        }
    }

    pub fn spt(&self) -> &SupplementalPageTable {
        &self.spt
    }

    pub fn address_space(&self) -> &SimpleAddressSpace {
        &self.address_space
    }

    /// Simulates a CPU store to a mapped page: writes `value` at
    /// `offset` within the frame backing `va` and sets the dirty bit.
    /// Stands in for the hardware memory access this hosted crate has no
    /// CPU to perform; `va` must already be mapped (e.g. by a prior
    /// `handle_fault`).
    pub fn poke(&mut self, vm: &Vm, va: u64, offset: usize, value: u8) -> bool {
        let Some(frame_id) = self.address_space.frame_of(va) else {
            return false;
        };
        let mut frames = vm.frames.lock().unwrap();
        frames.data_mut(frame_id)[offset] = value;
        self.address_space.mark_dirty(va);
        true
    }

    /// Reads back a byte written by [`VmSpace::poke`], straight from the
    /// backing frame.
    pub fn peek(&self, vm: &Vm, va: u64, offset: usize) -> Option<u8> {
        let frame_id = self.address_space.frame_of(va)?;
        let frames = vm.frames.lock().unwrap();
        Some(frames.data(frame_id)[offset])
    }

    /// Registers a fresh ANON page covering `va, va+length)` rounded to
    /// page boundaries, e.g. for the initial user stack or a `brk`-style
    /// heap grant. Not part of spec §4.8's mmap path; a convenience for
    /// process setup.
    pub fn add_anon_region(&mut self, va: u64, length: u64, writable: bool, stack: bool) -> KResult<()> {
        let start = config::pg_round_down(va);
        let end = config::pg_round_down(va + length - 1);
        let mut cur = start;
        loop {
            let page = Page::new_uninit(cur, writable, Target::Anon { stack });
            self.spt.insert(page);
            if cur == end {
                break;
            }
            cur += config::PGSIZE as u64;
        }
        Ok(())
    }

    /// Runs the fault algorithm against this address space (spec §4.9).
    pub fn handle_fault(&mut self, vm: &Vm, addr: u64, user: bool, write: bool, rsp: u64) -> FaultOutcome {
        let swap = vm.swap_ctx();
        let mut frames = vm.frames.lock().unwrap();
        fault::handle_fault(
            &mut self.spt,
            &mut self.address_space,
            &mut frames,
            &swap,
            addr,
            user,
            write,
            rsp,
        )
    }

    /// Copies this address space into a fresh child, per spec §4.10.
    /// `reopen` re-opens a FILE page's backing inode through whatever
    /// filesystem facade the caller holds.
    pub fn fork(&self, vm: &Vm, reopen: &dyn Fn(&FileBacking) -> KResult<FileBacking>) -> KResult<VmSpace> {
        let mut child = VmSpace::new();
        let swap = vm.swap_ctx();
        let mut frames = vm.frames.lock().unwrap();
        fork::copy_address_space(
            &self.spt,
            &mut child.spt,
            &mut child.address_space,
            &mut frames,
            &swap,
            reopen,
        )?;
        child.mmaps = self.mmaps.clone();
        Ok(child)
    }

    /// Maps `source` at `addr` (spec §4.8 `mmap`). Returns `None`
    /// (`MAP_FAILED`) on any validation failure.
    pub fn mmap(&mut self, addr: u64, length: u64, writable: bool, source: MmapSource, offset: u64) -> Option<u64> {
        if addr == 0 || addr % config::PGSIZE as u64 != 0 || config::is_kernel_vaddr(addr) {
            return None;
        }
        if length == 0 || source.length == 0 {
            return None;
        }
        if offset % config::PGSIZE as u64 != 0 {
            return None;
        }
        let num_pages = length.div_ceil(config::PGSIZE as u64) as usize;
        let mut pages = Vec::with_capacity(num_pages);
        for i in 0..num_pages {
            let va = addr + (i as u64) * config::PGSIZE as u64;
            if self.spt.find(va).is_some() {
                return None;
            }
            let remaining = length - (i as u64) * config::PGSIZE as u64;
            let read_bytes = remaining.min(config::PGSIZE as u64) as u32;
            let backing = FileBacking {
                device: source.device.clone(),
                fat: source.fat.clone(),
                inode: source.inode.clone(),
                offset: offset + (i as u64) * config::PGSIZE as u64,
                read_bytes,
            };
            pages.push(Page::new_uninit(va, writable, Target::File(backing)));
        }
        for page in pages {
            if !self.spt.insert(page) {
                return None;
            }
        }
        self.mmaps.push((addr, num_pages));
        Some(addr)
    }

    /// Unmaps the mapping registered at `addr` (spec §4.8 `munmap`),
    /// writing back dirty pages.
    pub fn munmap(&mut self, vm: &Vm, addr: u64) -> KResult<()> {
        let Some(idx) = self.mmaps.iter().position(|&(base, _)| base == addr) else {
            return Ok(());
        };
        let (base, num_pages) = self.mmaps.remove(idx);
        let swap = vm.swap_ctx();
        let mut frames = vm.frames.lock().unwrap();
        for i in 0..num_pages {
            let va = base + (i as u64) * config::PGSIZE as u64;
            self.spt
                .remove(va, &mut self.address_space, &mut frames, &swap)?;
        }
        Ok(())
    }
}

impl Default for VmSpace {
    fn default() -> Self {
        Self::new()
    }
}
