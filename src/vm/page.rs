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

//! The page descriptor (spec §3, §4.8): a tagged sum type with UNINIT,
//! ANON, and FILE variants.
//!
//! Grounded on `original_source/vm/anon.c` and `vm/file.c`. Per spec §9,
//! the source's embedded union plus function-pointer vtable collapses
//! here into a `PageState` enum and free dispatch functions
//! (`swap_in`/`swap_out`/`destroy`) matched over it — the same shape
//! `kernel/src/file/fs/mod.rs`'s `FileOps`/`NodeOps` traits give per-type
//! behavior over one handle type, without a trait object's indirection.
//!
//! The three UNINIT fields the spec names (`target_type`, `init_fn`,
//! `aux`) collapse into one `Target` value: for this design `aux` is
//! always either nothing (anonymous) or a file range, so the callback is
//! just a match over `Target` rather than a boxed closure (documented in
//! DESIGN.md).

use super::config::PGSIZE;
use super::frame::FrameId;
use crate::errno::{errno, Errno, KResult};
use crate::fs::fat::SharedFat;
use crate::fs::inode::{read_at, write_at, InodeRef};
use crate::device::BlockDevice;
use std::sync::{Arc, Mutex};

/// A byte range of an already-open file, reopened per spec §4.10 ("FILE
/// → register a fresh UNINIT→FILE page over the same file (re-opened)").
#[derive(Clone)]
pub struct FileBacking {
    pub device: Arc<dyn BlockDevice>,
    pub fat: SharedFat,
    pub inode: InodeRef,
    pub offset: u64,
    pub read_bytes: u32,
}

/// What an UNINIT page will become on first fault.
#[derive(Clone)]
pub enum Target {
    Anon { stack: bool },
    File(FileBacking),
}

pub struct UninitPage {
    pub target: Target,
}

pub struct AnonPage {
    pub stack: bool,
    pub swap_slot: Option<u32>,
}

pub struct FilePage {
    pub backing: FileBacking,
    pub dirty: bool,
}

pub enum PageState {
    Uninit(UninitPage),
    Anon(AnonPage),
    File(FilePage),
}

/// A page-table entry's worth of bookkeeping (spec §3 "Page descriptor").
pub struct Page {
    pub va: u64,
    pub writable: bool,
    pub frame: Option<FrameId>,
    pub state: PageState,
}

pub type PageRef = Arc<Mutex<Page>>;

impl Page {
    pub fn new_uninit(va: u64, writable: bool, target: Target) -> PageRef {
        Arc::new(Mutex::new(Page {
            va,
            writable,
            frame: None,
            state: PageState::Uninit(UninitPage { target }),
        }))
    }
}

/// Rewrites an UNINIT page in place into its target's typed variant
/// (spec §4.8 "the variant is rewritten to `target_type`").
pub fn initialize(page: &mut Page) -> KResult<()> {
    let target = match &page.state {
        PageState::Uninit(u) => u.target.clone(),
        _ => return Err(errno!(EINVAL)),
    };
    page.state = match target {
        Target::Anon { stack } => PageState::Anon(AnonPage {
            stack,
            swap_slot: None,
        }),
        Target::File(backing) => PageState::File(FilePage {
            backing,
            dirty: false,
        }),
    };
    Ok(())
}

/// Context the two resident page classes need to actually move bytes:
/// a swap device plus its slot bitmap.
pub struct SwapCtx<'a> {
    pub device: &'a dyn BlockDevice,
    pub bitmap: &'a Mutex<super::swap::SwapBitmap>,
}

/// Populates a freshly claimed frame's contents (spec §4.8 `swap_in`).
/// Called once right after [`initialize`] for a page transitioning out of
/// UNINIT, and again whenever a resident page is brought back in after
/// eviction.
pub fn swap_in(page: &mut Page, frame: &mut [u8; PGSIZE], swap: &SwapCtx) -> KResult<()> {
    match &mut page.state {
        PageState::Anon(a) => {
            match a.swap_slot.take() {
                Some(slot) => {
                    super::swap::read_slot(swap.device, slot, frame)?;
                    swap.bitmap.lock().unwrap().free(slot);
                }
                None => frame.fill(0),
            }
            Ok(())
        }
        PageState::File(f) => {
            frame.fill(0);
            let n = f.backing.read_bytes as usize;
            let fat = f.backing.fat.lock().unwrap();
            let read = read_at(
                f.backing.device.as_ref(),
                &fat,
                &f.backing.inode,
                &mut frame[..n],
                f.backing.offset,
            )?;
            let _ = read;
            Ok(())
        }
        PageState::Uninit(_) => Err(Errno::Fatal("swap_in on an uninitialized page")),
    }
}

/// Evicts a resident page's contents (spec §4.8 `swap_out`). `dirty` is
/// the MMU dirty bit the frame table observed before unmapping.
pub fn swap_out(page: &mut Page, frame: &[u8; PGSIZE], dirty: bool, swap: &SwapCtx) -> KResult<()> {
    match &mut page.state {
        PageState::Anon(a) => {
            let slot = swap
                .bitmap
                .lock()
                .unwrap()
                .alloc()
                .ok_or(Errno::Fatal("swap disk exhausted"))?;
            super::swap::write_slot(swap.device, slot, frame)?;
            a.swap_slot = Some(slot);
            Ok(())
        }
        PageState::File(f) => {
            if dirty {
                write_back(f, frame)?;
            }
            Ok(())
        }
        PageState::Uninit(_) => Ok(()),
    }
}

/// Writes back a FILE page's contents unconditionally and clears the
/// dirty flag we track ourselves (`f.dirty`, independent from whatever
/// the caller's MMU dirty bit said — `destroy` uses this one).
fn write_back(f: &mut FilePage, frame: &[u8; PGSIZE]) -> KResult<()> {
    let n = f.backing.read_bytes as usize;
    write_at(
        f.backing.device.as_ref(),
        &f.backing.fat,
        &f.backing.inode,
        &frame[..n],
        f.backing.offset,
    )?;
    f.dirty = false;
    Ok(())
}

/// Tears a page down (spec §4.7 `remove`/§4.8 `destroy`): writes back a
/// dirty FILE page one last time, frees an ANON page's swap slot if it
/// still holds one, and closes any file reference the page owns.
pub fn destroy(page: &mut Page, frame: Option<&[u8; PGSIZE]>, swap: &SwapCtx) -> KResult<()> {
    match &mut page.state {
        PageState::Anon(a) => {
            if let Some(slot) = a.swap_slot.take() {
                swap.bitmap.lock().unwrap().free(slot);
            }
            Ok(())
        }
        PageState::File(f) => {
            if f.dirty {
                if let Some(frame) = frame {
                    write_back(f, frame)?;
                }
            }
            Ok(())
        }
        PageState::Uninit(_) => Ok(()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn initialize_rewrites_uninit_anon_in_place() {
        let page = Page::new_uninit(0x1000, true, Target::Anon { stack: false });
        {
            let mut guard = page.lock().unwrap();
            initialize(&mut guard).unwrap();
            assert!(matches!(guard.state, PageState::Anon(_)));
        }
    }
}
