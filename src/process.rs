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

//! The process (spec §6): the bundle of per-process state a syscall
//! dispatcher would hang off a `struct thread` — a current directory, a
//! file-descriptor table, and an address space.
//!
//! Grounded on the pairing of `process::mem_space::MemSpace` (owns a
//! `VMem`) with the pintos `struct thread` fields (`curr_dir`, the fd
//! array) referenced throughout `original_source/userprog/syscall.c`.

use crate::errno::{errno, KResult};
use crate::fs::config::MAX_OPEN_FDS;
use crate::fs::inode::InodeRef;
use crate::fs::OpenHandle;
use crate::vm::VmSpace;

/// fd 0 and 1 are reserved for stdin/stdout and never hold a real file
/// (spec §6: "read from stdout or write to stdin → −1").
const FIRST_REAL_FD: i32 = 2;

/// One open file-descriptor slot. `Std` stands in for the console
/// collaborator (§1): no real data, just enough to reject the wrong
/// direction of I/O and to let `close` disable the stream.
pub enum FileDescriptor {
    Std,
    Open(OpenHandle),
}

/// A process: one address space, one current-directory handle, one fd
/// table.
pub struct Process {
    pub cwd: InodeRef,
    fds: Vec<Option<FileDescriptor>>,
    pub vm: VmSpace,
}

impl Process {
    /// Starts a fresh process rooted at `cwd`, with fd 0/1 wired to the
    /// console collaborator.
    pub fn new(cwd: InodeRef) -> Self {
        let mut fds = Vec::with_capacity(MAX_OPEN_FDS);
        fds.push(Some(FileDescriptor::Std)); // fd 0: stdin
        fds.push(Some(FileDescriptor::Std)); // fd 1: stdout
        fds.resize_with(MAX_OPEN_FDS, || None);
        Process {
            cwd,
            fds,
            vm: VmSpace::new(),
        }
    }

    /// Installs `handle` in the lowest free slot at or above fd 2
    /// (spec §6 `open`: "fd ≥ 2, or −1 ... limit 135").
    pub fn install_fd(&mut self, handle: OpenHandle) -> KResult<i32> {
        let slot = self.fds[FIRST_REAL_FD as usize..]
            .iter()
            .position(|f| f.is_none())
            .ok_or(errno!(EMFILE))?;
        let fd = FIRST_REAL_FD as usize + slot;
        self.fds[fd] = Some(FileDescriptor::Open(handle));
        Ok(fd as i32)
    }

    pub fn get(&self, fd: i32) -> Option<&FileDescriptor> {
        if fd < 0 {
            return None;
        }
        self.fds.get(fd as usize).and_then(|f| f.as_ref())
    }

    pub fn get_mut(&mut self, fd: i32) -> Option<&mut FileDescriptor> {
        if fd < 0 {
            return None;
        }
        self.fds.get_mut(fd as usize).and_then(|f| f.as_mut())
    }

    /// Closes `fd`. Closing 0 or 1 "disables that stream for the
    /// process" (spec §6) rather than freeing the slot for reuse.
    pub fn close_fd(&mut self, fd: i32) {
        if fd < 0 || fd as usize >= self.fds.len() {
            return;
        }
        self.fds[fd as usize] = None;
    }

    /// Clones the file handle held at `old` into `new`, closing whatever
    /// `new` previously held (spec §6 `dup2`). Distinct fds share the
    /// same underlying position cursor here since `FileHandle`/`DirHandle`
    /// carry no `Drop`-based lifecycle of their own — the spec's
    /// "copied_fd" list exists in the source to share one cursor across
    /// linked fds, which duplicating the handle's inode reference alone
    /// would not give us; tracked as an open question (see DESIGN.md).
    pub fn dup2(&mut self, old: i32, new: i32) -> KResult<i32> {
        if old < 0 || new < 0 {
            return Err(errno!(EINVAL));
        }
        let old_idx = old as usize;
        if old_idx >= self.fds.len() || self.fds[old_idx].is_none() {
            return Err(errno!(EINVAL));
        }
        if new as usize >= self.fds.len() {
            return Err(errno!(EMFILE));
        }
        if old == new {
            return Ok(new);
        }
        let dup = match &self.fds[old_idx] {
            Some(FileDescriptor::Std) => FileDescriptor::Std,
            Some(FileDescriptor::Open(OpenHandle::File(f))) => {
                FileDescriptor::Open(OpenHandle::File(f.dup()))
            }
            Some(FileDescriptor::Open(OpenHandle::Dir(d))) => {
                FileDescriptor::Open(OpenHandle::Dir(d.dup()))
            }
            None => unreachable!(),
        };
        self.fds[new as usize] = Some(dup);
        Ok(new)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::{DiskId, MemBlockDevice};
    use crate::fs::FileSystem;
    use std::sync::Arc;

    fn mounted() -> FileSystem {
        let device = MemBlockDevice::new(DiskId::FILESYS, 4096);
        FileSystem::format(&device).unwrap();
        FileSystem::mount(Arc::new(device)).unwrap()
    }

    #[test]
    fn install_fd_starts_at_two_and_reuses_closed_slots() {
        let fs = mounted();
        let mut proc = Process::new(fs.root().clone());
        fs.filesys_create(&proc.cwd.clone(), "a", 0).unwrap();
        fs.filesys_create(&proc.cwd.clone(), "b", 0).unwrap();
        let a = fs.filesys_open(&proc.cwd.clone(), "a").unwrap().unwrap();
        let b = fs.filesys_open(&proc.cwd.clone(), "b").unwrap().unwrap();
        let fd_a = proc.install_fd(a).unwrap();
        let fd_b = proc.install_fd(b).unwrap();
        assert_eq!(fd_a, 2);
        assert_eq!(fd_b, 3);
        proc.close_fd(fd_a);
        let c = fs
            .filesys_open(&proc.cwd.clone(), "a")
            .unwrap()
            .unwrap();
        assert_eq!(proc.install_fd(c).unwrap(), 2);
    }

    #[test]
    fn closing_stdin_disables_it_without_freeing_a_real_fd_slot() {
        let fs = mounted();
        let mut proc = Process::new(fs.root().clone());
        assert!(proc.get(0).is_some());
        proc.close_fd(0);
        assert!(proc.get(0).is_none());
        fs.filesys_create(&proc.cwd.clone(), "a", 0).unwrap();
        let a = fs.filesys_open(&proc.cwd.clone(), "a").unwrap().unwrap();
        assert_eq!(proc.install_fd(a).unwrap(), 2);
    }

    #[test]
    fn dup2_shares_the_cursor_with_the_original_fd() {
        let fs = mounted();
        let mut proc = Process::new(fs.root().clone());
        fs.filesys_create(&proc.cwd.clone(), "a", 0).unwrap();
        let handle = fs.filesys_open(&proc.cwd.clone(), "a").unwrap().unwrap();
        let fd = proc.install_fd(handle).unwrap();
        if let Some(FileDescriptor::Open(OpenHandle::File(f))) = proc.get_mut(fd) {
            f.write(fs.device(), fs.fat(), b"hello").unwrap();
        }
        proc.dup2(fd, 10).unwrap();
        let tell = match proc.get(10).unwrap() {
            FileDescriptor::Open(OpenHandle::File(f)) => f.tell(),
            _ => panic!("expected file"),
        };
        assert_eq!(tell, 5);
        if let Some(FileDescriptor::Open(OpenHandle::File(f))) = proc.get_mut(10) {
            f.seek(0);
        }
        let original_tell = match proc.get(fd).unwrap() {
            FileDescriptor::Open(OpenHandle::File(f)) => f.tell(),
            _ => panic!("expected file"),
        };
        assert_eq!(original_tell, 0);
    }
}
