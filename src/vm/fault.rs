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

//! The page-fault handler (spec §4.9).
//!
//! Grounded on `process::mem_space::MemSpace::handle_page_fault`'s shape
//! (look up the mapping, check permissions, map the accessed page) with
//! the stack-growth and SPT-miss handling from `original_source/vm/vm.c`'s
//! `vm_try_handle_fault`/`vm_stack_growth` folded in.

use super::address_space::AddressSpace;
use super::config::{is_kernel_vaddr, pg_round_down, STACK_GROWTH_LIMIT, STACK_GROWTH_SLACK, USER_STACK_TOP};
use super::frame::FrameTable;
use super::page::{self, SwapCtx, Target};
use super::spt::SupplementalPageTable;

/// Why a fault could not be resolved and the process must be killed.
#[derive(Debug, PartialEq, Eq)]
pub enum FaultOutcome {
    Resolved,
    Kill,
}

/// Runs the fault algorithm (spec §4.9). `rsp` is the user-mode stack
/// pointer captured at syscall entry, used only for the stack-growth
/// check; faults from user mode may pass the true hardware `%rsp`
/// instead.
#[allow(clippy::too_many_arguments)]
pub fn handle_fault(
    spt: &mut SupplementalPageTable,
    address_space: &mut dyn AddressSpace,
    frames: &mut FrameTable,
    swap: &SwapCtx,
    addr: u64,
    user: bool,
    write: bool,
    rsp: u64,
) -> FaultOutcome {
    if user && is_kernel_vaddr(addr) {
        return FaultOutcome::Kill;
    }
    let rounded = pg_round_down(addr);
    let page_ref = match spt.find(rounded) {
        Some(p) => p,
        None => {
            if !stack_growth_applies(addr, rsp) {
                return FaultOutcome::Kill;
            }
            let page = super::page::Page::new_uninit(rounded, true, Target::Anon { stack: true });
            if !spt.insert(page.clone()) {
                return FaultOutcome::Kill;
            }
            page
        }
    };

    {
        let guard = page_ref.lock().unwrap();
        if write && !guard.writable {
            return FaultOutcome::Kill;
        }
    }

    let frame_id = match frames.get_frame(swap, address_space) {
        Ok(id) => id,
        Err(_) => return FaultOutcome::Kill,
    };

    let mut guard = page_ref.lock().unwrap();
    if matches!(guard.state, super::page::PageState::Uninit(_)) {
        if page::initialize(&mut guard).is_err() {
            return FaultOutcome::Kill;
        }
    }
    if page::swap_in(&mut guard, frames.data_mut(frame_id), swap).is_err() {
        return FaultOutcome::Kill;
    }
    guard.frame = Some(frame_id);
    drop(guard);
    frames.claim(frame_id, page_ref.clone());
    let writable = page_ref.lock().unwrap().writable;
    address_space.map(rounded, frame_id, writable);
    FaultOutcome::Resolved
}

/// Spec §4.9 step 3's stack-growth conditions, evaluated against the
/// unrounded fault address.
fn stack_growth_applies(addr: u64, rsp: u64) -> bool {
    let lower = USER_STACK_TOP.saturating_sub(STACK_GROWTH_LIMIT);
    let within_region = addr > lower && addr < USER_STACK_TOP;
    let near_rsp = addr >= rsp.saturating_sub(STACK_GROWTH_SLACK);
    within_region && near_rsp
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::{DiskId, MemBlockDevice};
    use crate::vm::address_space::SimpleAddressSpace;
    use crate::vm::config::SWAP_SLOT_SECTORS;
    use crate::vm::swap::SwapBitmap;
    use std::sync::Mutex;

    fn ctx(device: &dyn crate::device::BlockDevice, bitmap: &Mutex<SwapBitmap>) -> SwapCtx<'_> {
        SwapCtx { device, bitmap }
    }

    #[test]
    fn kernel_address_from_user_mode_is_killed() {
        let swap_device = MemBlockDevice::new(DiskId::SWAP, SWAP_SLOT_SECTORS);
        let bitmap = Mutex::new(SwapBitmap::new(&swap_device));
        let swap = ctx(&swap_device, &bitmap);
        let mut spt = SupplementalPageTable::new();
        let mut address_space = SimpleAddressSpace::new();
        let mut frames = FrameTable::new(1);
        let outcome = handle_fault(
            &mut spt,
            &mut address_space,
            &mut frames,
            &swap,
            crate::vm::config::KERNEL_VADDR_BASE,
            true,
            false,
            0,
        );
        assert_eq!(outcome, FaultOutcome::Kill);
    }

    #[test]
    fn miss_outside_stack_growth_region_is_killed() {
        let swap_device = MemBlockDevice::new(DiskId::SWAP, SWAP_SLOT_SECTORS);
        let bitmap = Mutex::new(SwapBitmap::new(&swap_device));
        let swap = ctx(&swap_device, &bitmap);
        let mut spt = SupplementalPageTable::new();
        let mut address_space = SimpleAddressSpace::new();
        let mut frames = FrameTable::new(1);
        let outcome = handle_fault(&mut spt, &mut address_space, &mut frames, &swap, 0x1000, true, false, 0x7fff_0000);
        assert_eq!(outcome, FaultOutcome::Kill);
    }

    #[test]
    fn miss_near_rsp_below_stack_top_grows_the_stack() {
        let swap_device = MemBlockDevice::new(DiskId::SWAP, SWAP_SLOT_SECTORS * 2);
        let bitmap = Mutex::new(SwapBitmap::new(&swap_device));
        let swap = ctx(&swap_device, &bitmap);
        let mut spt = SupplementalPageTable::new();
        let mut address_space = SimpleAddressSpace::new();
        let mut frames = FrameTable::new(1);
        let rsp = USER_STACK_TOP - 4096;
        let addr = rsp - 4;
        let outcome = handle_fault(&mut spt, &mut address_space, &mut frames, &swap, addr, true, true, rsp);
        assert_eq!(outcome, FaultOutcome::Resolved);
        assert!(spt.find(addr).is_some());
        assert!(address_space.is_mapped(pg_round_down(addr)));
    }

    #[test]
    fn write_to_read_only_page_is_killed() {
        let swap_device = MemBlockDevice::new(DiskId::SWAP, SWAP_SLOT_SECTORS * 2);
        let bitmap = Mutex::new(SwapBitmap::new(&swap_device));
        let swap = ctx(&swap_device, &bitmap);
        let mut spt = SupplementalPageTable::new();
        let mut address_space = SimpleAddressSpace::new();
        let mut frames = FrameTable::new(1);
        let page = super::super::page::Page::new_uninit(0x5000, false, Target::Anon { stack: false });
        spt.insert(page);
        let outcome = handle_fault(&mut spt, &mut address_space, &mut frames, &swap, 0x5000, true, true, 0);
        assert_eq!(outcome, FaultOutcome::Kill);
    }

    #[test]
    fn hit_on_writable_page_claims_a_frame_and_maps_it() {
        let swap_device = MemBlockDevice::new(DiskId::SWAP, SWAP_SLOT_SECTORS * 2);
        let bitmap = Mutex::new(SwapBitmap::new(&swap_device));
        let swap = ctx(&swap_device, &bitmap);
        let mut spt = SupplementalPageTable::new();
        let mut address_space = SimpleAddressSpace::new();
        let mut frames = FrameTable::new(1);
        let page = super::super::page::Page::new_uninit(0x6000, true, Target::Anon { stack: false });
        spt.insert(page);
        let outcome = handle_fault(&mut spt, &mut address_space, &mut frames, &swap, 0x6000, true, false, 0);
        assert_eq!(outcome, FaultOutcome::Resolved);
        assert!(address_space.is_mapped(0x6000));
        assert!(address_space.is_writable(0x6000));
    }
}
