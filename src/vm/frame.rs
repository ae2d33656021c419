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

//! The physical frame table (spec §4.6): a fixed pool of frames handed
//! out to pages, evicted in FIFO order when the pool is exhausted.
//!
//! Grounded on `original_source/vm/vm.c`'s `vm_get_frame`/`vm_evict_frame`/
//! `vm_get_victim`, which walks a FIFO list of claimed frames. Physical
//! memory itself has no stand-in in a hosted collaborator model, so each
//! frame owns its bytes directly rather than pointing at a `kva` the way
//! the source's frame struct does.

use super::address_space::AddressSpace;
use super::config::PGSIZE;
use super::page::{self, PageRef, SwapCtx};
use crate::errno::{Errno, KResult};
use std::collections::VecDeque;

pub type FrameId = usize;

struct Slot {
    data: Box<[u8; PGSIZE]>,
    page: Option<PageRef>,
}

/// Holds the set of allocated physical frames in FIFO order (spec §4.6).
pub struct FrameTable {
    slots: Vec<Slot>,
    free: VecDeque<FrameId>,
    fifo: VecDeque<FrameId>,
}

impl FrameTable {
    /// Builds a pool of `pool_size` frames, all initially free.
    pub fn new(pool_size: usize) -> Self {
        let slots = (0..pool_size)
            .map(|_| Slot {
                data: Box::new([0u8; PGSIZE]),
                page: None,
            })
            .collect();
        FrameTable {
            slots,
            free: (0..pool_size).collect(),
            fifo: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Allocates a frame from the free pool, or evicts the oldest claimed
    /// one if the pool is exhausted (spec §4.6 `get_frame`). `address_space`
    /// answers the MMU dirty-bit question for the victim and has its stale
    /// mapping torn down on eviction; the caller (which owns the address
    /// space) supplies it since the frame table itself has no notion of
    /// page tables.
    pub fn get_frame(&mut self, swap: &SwapCtx, address_space: &mut dyn AddressSpace) -> KResult<FrameId> {
        if let Some(id) = self.free.pop_front() {
            return Ok(id);
        }
        self.evict_frame(swap, address_space)
    }

    /// Removes the oldest claimed frame, asks its owning page to swap
    /// out, and returns it with `page == None` (spec §4.6 `evict_frame`).
    /// Also unmaps the victim's `va` so a stale page-table entry can't
    /// point at a frame the next claimant is about to overwrite.
    fn evict_frame(&mut self, swap: &SwapCtx, address_space: &mut dyn AddressSpace) -> KResult<FrameId> {
        let victim = self
            .fifo
            .pop_front()
            .ok_or(Errno::Fatal("frame table exhausted with nothing claimed"))?;
        let owner = self.slots[victim]
            .page
            .take()
            .ok_or(Errno::Fatal("frame table corruption: fifo entry has no page"))?;
        let va = owner.lock().unwrap().va;
        let dirty = address_space.is_dirty(va);
        {
            let mut guard = owner.lock().unwrap();
            page::swap_out(&mut guard, &self.slots[victim].data, dirty, swap)?;
            guard.frame = None;
        }
        address_space.unmap(va);
        Ok(victim)
    }

    /// Links `frame` to `page` and puts it at the back of the FIFO claim
    /// order. Call after `get_frame` once the page is ready to be wired
    /// in (spec §4.6 invariant: a claimed frame's page always points
    /// back to it).
    pub fn claim(&mut self, frame: FrameId, page: PageRef) {
        self.slots[frame].page = Some(page);
        self.fifo.push_back(frame);
    }

    pub fn data_mut(&mut self, frame: FrameId) -> &mut [u8; PGSIZE] {
        &mut self.slots[frame].data
    }

    pub fn data(&self, frame: FrameId) -> &[u8; PGSIZE] {
        &self.slots[frame].data
    }

    /// Releases a frame directly back to the free pool without eviction
    /// (used when a page is destroyed while still resident).
    pub fn release(&mut self, frame: FrameId) {
        self.slots[frame].page = None;
        self.fifo.retain(|&id| id != frame);
        self.free.push_back(frame);
        *self.slots[frame].data = [0u8; PGSIZE];
    }
}
