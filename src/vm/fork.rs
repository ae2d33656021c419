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

//! Address-space copy on fork (spec §4.10).
//!
//! Grounded on `original_source/vm/vm.c`'s `supplemental_page_table_copy`,
//! which walks the parent's hash table and, per page class, either
//! registers a shallow duplicate (UNINIT), eagerly copies frame contents
//! (ANON), or re-opens the backing file (FILE).

use super::address_space::AddressSpace;
use super::frame::FrameTable;
use super::page::{self, FileBacking, Page, PageState, SwapCtx, Target};
use super::spt::SupplementalPageTable;
use crate::errno::KResult;

/// Copies every page in `parent` into `child`, per spec §4.10. `reopen`
/// re-opens a FILE page's backing inode (bumping its open count) since
/// the child needs its own handle on the same file; the caller supplies
/// it because only the filesystem facade holds the inode table.
pub fn copy_address_space(
    parent_spt: &SupplementalPageTable,
    child_spt: &mut SupplementalPageTable,
    child_space: &mut dyn AddressSpace,
    frames: &mut FrameTable,
    swap: &SwapCtx,
    reopen: &dyn Fn(&FileBacking) -> KResult<FileBacking>,
) -> KResult<()> {
    for page_ref in parent_spt.pages_in_order() {
        let parent = page_ref.lock().unwrap();
        match &parent.state {
            PageState::Uninit(u) => {
                let child_page = Page::new_uninit(parent.va, parent.writable, u.target.clone());
                child_spt.insert(child_page);
            }
            PageState::Anon(a) => {
                if parent.frame.is_none() {
                    // Not resident: nothing to copy yet, treat like a
                    // fresh ANON page that will fault in independently.
                    let child_page =
                        Page::new_uninit(parent.va, parent.writable, Target::Anon { stack: a.stack });
                    child_spt.insert(child_page);
                    continue;
                }
                let child_page =
                    Page::new_uninit(parent.va, parent.writable, Target::Anon { stack: a.stack });
                page::initialize(&mut child_page.lock().unwrap())?;
                let frame_id = frames.get_frame(swap, child_space)?;
                {
                    let src = parent.frame.map(|f| *frames.data(f));
                    if let Some(src) = src {
                        frames.data_mut(frame_id).copy_from_slice(&src);
                    }
                }
                let mut child_guard = child_page.lock().unwrap();
                child_guard.frame = Some(frame_id);
                drop(child_guard);
                frames.claim(frame_id, child_page.clone());
                child_space.map(parent.va, frame_id, parent.writable);
                child_spt.insert(child_page);
            }
            PageState::File(f) => {
                let backing = reopen(&f.backing)?;
                let child_page = Page::new_uninit(parent.va, false, Target::File(backing));
                page::initialize(&mut child_page.lock().unwrap())?;
                let frame_id = frames.get_frame(swap, child_space)?;
                {
                    let mut guard = child_page.lock().unwrap();
                    page::swap_in(&mut guard, frames.data_mut(frame_id), swap)?;
                    guard.frame = Some(frame_id);
                }
                frames.claim(frame_id, child_page.clone());
                child_space.map(parent.va, frame_id, false);
                child_spt.insert(child_page);
            }
        }
    }
    Ok(())
}
