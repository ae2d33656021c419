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

//! The supplemental page table (spec §4.7): per-process bookkeeping of
//! every page that exists in the address space, keyed by page-aligned
//! virtual address.
//!
//! Grounded on `original_source/vm/vm.c`'s `spt_find_page`/
//! `spt_insert_page`/`spt_remove_page`, a hash table keyed by rounded-down
//! `va`.

use super::address_space::AddressSpace;
use super::config::pg_round_down;
use super::frame::FrameTable;
use super::page::{self, PageRef, SwapCtx};
use crate::errno::KResult;
use std::collections::HashMap;

/// One process's set of known pages.
#[derive(Default)]
pub struct SupplementalPageTable {
    pages: HashMap<u64, PageRef>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        SupplementalPageTable {
            pages: HashMap::new(),
        }
    }

    /// Looks up the page covering `va`, rounding down to the page
    /// boundary first (spec §4.7 `find`).
    pub fn find(&self, va: u64) -> Option<PageRef> {
        self.pages.get(&pg_round_down(va)).cloned()
    }

    /// Registers a new page. Fails if a page already exists at that
    /// address (spec §4.7 `insert`: "fails if `va` is already present").
    pub fn insert(&mut self, page: PageRef) -> bool {
        let va = page.lock().unwrap().va;
        if self.pages.contains_key(&va) {
            return false;
        }
        self.pages.insert(va, page);
        true
    }

    /// Tears a page down (spec §4.7 `remove`): unmaps it from the address
    /// space if resident, asks the page to clean up its own state
    /// (write back / free swap slot), releases its frame, and drops it
    /// from the table.
    pub fn remove(
        &mut self,
        va: u64,
        address_space: &mut dyn AddressSpace,
        frames: &mut FrameTable,
        swap: &SwapCtx,
    ) -> KResult<()> {
        let va = pg_round_down(va);
        let Some(page_ref) = self.pages.remove(&va) else {
            return Ok(());
        };
        let frame = {
            let mut guard = page_ref.lock().unwrap();
            if address_space.is_mapped(va) {
                if address_space.is_dirty(va) {
                    if let super::page::PageState::File(f) = &mut guard.state {
                        f.dirty = true;
                    }
                }
                address_space.unmap(va);
            }
            let frame_bytes = guard.frame.map(|f| *frames.data(f));
            page::destroy(&mut guard, frame_bytes.as_ref(), swap)?;
            guard.frame.take()
        };
        if let Some(frame) = frame {
            frames.release(frame);
        }
        Ok(())
    }

    /// Snapshots every page currently registered, for fork's address-space
    /// copy (spec §4.10 "for each entry in the source SPT").
    pub fn pages_in_order(&self) -> Vec<PageRef> {
        self.pages.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::{DiskId, MemBlockDevice};
    use crate::vm::address_space::SimpleAddressSpace;
    use crate::vm::config::SWAP_SLOT_SECTORS;
    use crate::vm::page::{Page, Target};
    use crate::vm::swap::SwapBitmap;
    use std::sync::Mutex;

    #[test]
    fn insert_rejects_duplicate_va() {
        let mut spt = SupplementalPageTable::new();
        let p1 = Page::new_uninit(0x1000, true, Target::Anon { stack: false });
        let p2 = Page::new_uninit(0x1000, true, Target::Anon { stack: false });
        assert!(spt.insert(p1));
        assert!(!spt.insert(p2));
        assert_eq!(spt.len(), 1);
    }

    #[test]
    fn find_rounds_down_to_the_page_boundary() {
        let mut spt = SupplementalPageTable::new();
        let p = Page::new_uninit(0x2000, true, Target::Anon { stack: false });
        spt.insert(p);
        assert!(spt.find(0x2123).is_some());
        assert!(spt.find(0x3123).is_none());
    }

    #[test]
    fn remove_unmaps_and_frees_a_resident_frame() {
        let swap_device = MemBlockDevice::new(DiskId::SWAP, SWAP_SLOT_SECTORS * 2);
        let bitmap = Mutex::new(SwapBitmap::new(&swap_device));
        let swap = SwapCtx {
            device: &swap_device,
            bitmap: &bitmap,
        };
        let mut frames = FrameTable::new(1);
        let mut address_space = SimpleAddressSpace::new();
        let mut spt = SupplementalPageTable::new();

        let page = Page::new_uninit(0x4000, true, Target::Anon { stack: false });
        page::initialize(&mut page.lock().unwrap()).unwrap();
        let frame = frames.get_frame(&swap, &mut address_space).unwrap();
        frames.claim(frame, page.clone());
        page.lock().unwrap().frame = Some(frame);
        address_space.map(0x4000, frame, true);
        spt.insert(page);

        spt.remove(0x4000, &mut address_space, &mut frames, &swap)
            .unwrap();
        assert!(spt.find(0x4000).is_none());
        assert!(!address_space.is_mapped(0x4000));
        assert_eq!(frames.capacity(), 1);
    }

    #[test]
    fn remove_of_unknown_address_is_a_no_op() {
        let swap_device = MemBlockDevice::new(DiskId::SWAP, SWAP_SLOT_SECTORS);
        let bitmap = Mutex::new(SwapBitmap::new(&swap_device));
        let swap = SwapCtx {
            device: &swap_device,
            bitmap: &bitmap,
        };
        let mut frames = FrameTable::new(1);
        let mut address_space = SimpleAddressSpace::new();
        let mut spt = SupplementalPageTable::new();
        assert!(spt.remove(0x9000, &mut address_space, &mut frames, &swap).is_ok());
    }
}
