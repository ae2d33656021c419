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

//! The MMU collaborator (spec's "Non-goals": syscall dispatch, interrupt
//! handling, and scheduling are out of scope; the MMU is modeled the same
//! way — as a narrow interface the fault handler and frame table talk to,
//! not a page-table walker this crate implements itself).
//!
//! Grounded on `memory::vmem::VMem`'s `map`/`unmap`/`translate`, which
//! plays the same role: an architecture-independent surface over
//! hardware page tables. [`SimpleAddressSpace`] is a hosted stand-in for
//! `VMem` that a test or a real kernel's arch backend could replace.

use std::collections::HashMap;

/// One page's worth of mapping state the MMU would otherwise track in the
/// page table entry itself (present frame, writable bit, dirty bit).
#[derive(Clone, Copy)]
struct Mapping {
    frame: usize,
    writable: bool,
    dirty: bool,
}

/// Maps and unmaps pages, and answers the dirty-bit question the frame
/// table needs before evicting a FILE page (spec §4.6 `evict_frame`,
/// §4.8 `swap_out`).
pub trait AddressSpace {
    /// Installs a va → frame mapping. Overwrites any previous mapping at
    /// the same `va`.
    fn map(&mut self, va: u64, frame: usize, writable: bool);

    /// Tears down the mapping at `va`, if any.
    fn unmap(&mut self, va: u64);

    /// Whether `va` has been written since it was mapped (or since
    /// `clear_dirty`). `false` for an address with no mapping.
    fn is_dirty(&self, va: u64) -> bool;

    fn clear_dirty(&mut self, va: u64);

    /// Marks a write having occurred at `va`, standing in for the CPU
    /// setting the hardware dirty bit on a store. A hosted environment
    /// has no CPU to do this for us, so callers that simulate a write
    /// (e.g. fork's eager copy) call this explicitly.
    fn mark_dirty(&mut self, va: u64);

    fn is_mapped(&self, va: u64) -> bool;

    fn frame_of(&self, va: u64) -> Option<usize>;

    fn is_writable(&self, va: u64) -> bool;
}

/// A hosted `AddressSpace`: a plain hash map from page-aligned `va` to
/// mapping state. Stands in for `VMem`'s page directory when there is no
/// real processor to fault.
#[derive(Default)]
pub struct SimpleAddressSpace {
    mappings: HashMap<u64, Mapping>,
}

impl SimpleAddressSpace {
    pub fn new() -> Self {
        SimpleAddressSpace {
            mappings: HashMap::new(),
        }
    }
}

impl AddressSpace for SimpleAddressSpace {
    fn map(&mut self, va: u64, frame: usize, writable: bool) {
        self.mappings.insert(
            va,
            Mapping {
                frame,
                writable,
                dirty: false,
            },
        );
    }

    fn unmap(&mut self, va: u64) {
        self.mappings.remove(&va);
    }

    fn is_dirty(&self, va: u64) -> bool {
        self.mappings.get(&va).map(|m| m.dirty).unwrap_or(false)
    }

    fn clear_dirty(&mut self, va: u64) {
        if let Some(m) = self.mappings.get_mut(&va) {
            m.dirty = false;
        }
    }

    fn mark_dirty(&mut self, va: u64) {
        if let Some(m) = self.mappings.get_mut(&va) {
            m.dirty = true;
        }
    }

    fn is_mapped(&self, va: u64) -> bool {
        self.mappings.contains_key(&va)
    }

    fn frame_of(&self, va: u64) -> Option<usize> {
        self.mappings.get(&va).map(|m| m.frame)
    }

    fn is_writable(&self, va: u64) -> bool {
        self.mappings.get(&va).map(|m| m.writable).unwrap_or(false)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn map_unmap_round_trip() {
        let mut sp = SimpleAddressSpace::new();
        assert!(!sp.is_mapped(0x1000));
        sp.map(0x1000, 3, true);
        assert!(sp.is_mapped(0x1000));
        assert_eq!(sp.frame_of(0x1000), Some(3));
        assert!(sp.is_writable(0x1000));
        sp.unmap(0x1000);
        assert!(!sp.is_mapped(0x1000));
    }

    #[test]
    fn dirty_bit_tracks_marks_and_clears() {
        let mut sp = SimpleAddressSpace::new();
        sp.map(0x2000, 0, true);
        assert!(!sp.is_dirty(0x2000));
        sp.mark_dirty(0x2000);
        assert!(sp.is_dirty(0x2000));
        sp.clear_dirty(0x2000);
        assert!(!sp.is_dirty(0x2000));
    }

    #[test]
    fn unmapped_address_reads_as_clean_and_not_writable() {
        let sp = SimpleAddressSpace::new();
        assert!(!sp.is_dirty(0x3000));
        assert!(!sp.is_writable(0x3000));
        assert_eq!(sp.frame_of(0x3000), None);
    }
}
