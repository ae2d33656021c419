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

//! The system-call surface (spec §6) — a collaborator interface (§1):
//! this is not a real trap-frame dispatcher, argument-pointer validator,
//! or scheduler. It is the thin caller the spec asks for, bundling one
//! [`Process`] and exposing spec §6's table as plain methods that call
//! straight into the filesystem facade and the VM fault/mmap entry
//! points, so the two real subsystems have one realistic exerciser.
//!
//! Grounded on `original_source/userprog/syscall.c`'s dispatch table,
//! restyled the way `kernel/src/syscall/mem.rs` turns one line of a
//! jump table into one Rust function per call.

use crate::errno::{errno, KResult};
use crate::fs::config::NAME_MAX;
use crate::fs::{FileSystem, OpenHandle};
use crate::process::{FileDescriptor, Process};
use crate::vm::{MmapSource, Vm};

/// `halt`/`exit`/`exec`/`wait` touch the scheduler and process-image
/// loader, which are collaborator interfaces this crate never
/// implements (§1). These methods exist so the table in spec §6 has one
/// caller-visible entry per syscall; they return the documented
/// sentinel rather than doing real work.
pub struct Syscalls<'a> {
    fs: &'a FileSystem,
    vm: &'a Vm,
    process: &'a mut Process,
}

impl<'a> Syscalls<'a> {
    pub fn new(fs: &'a FileSystem, vm: &'a Vm, process: &'a mut Process) -> Self {
        Syscalls { fs, vm, process }
    }

    /// Powers the machine off. Collaborator-only; always "succeeds" by
    /// doing nothing observable in a hosted crate.
    pub fn halt(&self) {}

    /// Terminates the calling thread. Collaborator-only: a real kernel
    /// never returns from this. Returns the status so a test harness can
    /// observe it instead.
    pub fn exit(&self, status: i32) -> i32 {
        status
    }

    /// Replaces the process image. Out of scope (§1: no ELF loader); a
    /// real caller always observes failure here.
    pub fn exec(&self, _path: &str) -> i32 {
        -1
    }

    /// Waits for a child's exit status. Out of scope (§1: no scheduler,
    /// no process tree).
    pub fn wait(&self, _pid: i32) -> i32 {
        -1
    }

    /// Forks the calling process: copies the address space (spec §4.10)
    /// and duplicates the fd table, standing in for the scheduler
    /// spawning a new thread around the copy. Returns the child directly
    /// rather than a pid, since pid allocation belongs to the
    /// out-of-scope process tree.
    pub fn fork(&mut self) -> KResult<Process> {
        let fs = self.fs;
        let reopen = |backing: &crate::vm::FileBacking| -> KResult<crate::vm::FileBacking> {
            let inode = fs.open_at(backing.inode.sector)?;
            Ok(crate::vm::FileBacking {
                device: backing.device.clone(),
                fat: backing.fat.clone(),
                inode,
                offset: backing.offset,
                read_bytes: backing.read_bytes,
            })
        };
        let child_vm = self.process.vm.fork(self.vm, &reopen)?;
        let mut child = Process::new(self.process.cwd.clone());
        child.vm = child_vm;
        Ok(child)
    }

    /// `create(path, size)`: false if the leaf component exceeds
    /// `NAME_MAX` (spec §6), otherwise delegates to the facade.
    pub fn create(&self, path: &str, initial_size: u64) -> KResult<bool> {
        if let Some(leaf) = path.rsplit('/').next() {
            if leaf.len() > NAME_MAX {
                return Ok(false);
            }
        }
        self.fs.filesys_create(&self.process.cwd, path, initial_size)
    }

    pub fn remove(&self, path: &str) -> KResult<bool> {
        self.fs.filesys_remove(&self.process.cwd, path)
    }

    /// `open(path)`: fd ≥ 2, or −1 on an empty path, missing file, or a
    /// full fd table (spec §6).
    pub fn open(&mut self, path: &str) -> KResult<i32> {
        if path.is_empty() {
            return Ok(-1);
        }
        match self.fs.filesys_open(&self.process.cwd, path)? {
            Some(handle) => match self.process.install_fd(handle) {
                Ok(fd) => Ok(fd),
                Err(_) => Ok(-1),
            },
            None => Ok(-1),
        }
    }

    /// `filesize(fd)`. Reading/writing fd 0/1 (stdin/stdout) in the
    /// wrong direction returns −1 (spec §6); `filesize` on a std stream
    /// is likewise meaningless and reported as −1.
    pub fn filesize(&self, fd: i32) -> i32 {
        match self.process.get(fd) {
            Some(FileDescriptor::Open(OpenHandle::File(f))) => f.length() as i32,
            _ => -1,
        }
    }

    pub fn read(&mut self, fd: i32, buf: &mut [u8]) -> KResult<i32> {
        if fd == 1 {
            return Ok(-1); // stdout
        }
        if fd == 0 {
            return Ok(0); // no console input collaborator wired up
        }
        match self.process.get_mut(fd) {
            Some(FileDescriptor::Open(OpenHandle::File(f))) => {
                let fat = self.fs.fat().lock().unwrap();
                Ok(f.read(self.fs.device(), &fat, buf)? as i32)
            }
            _ => Ok(-1),
        }
    }

    pub fn write(&mut self, fd: i32, buf: &[u8]) -> KResult<i32> {
        if fd == 0 {
            return Ok(-1); // stdin
        }
        if fd == 1 {
            return Ok(buf.len() as i32); // console output collaborator
        }
        match self.process.get_mut(fd) {
            Some(FileDescriptor::Open(OpenHandle::File(f))) => {
                Ok(f.write(self.fs.device(), self.fs.fat(), buf)? as i32)
            }
            _ => Ok(-1),
        }
    }

    pub fn seek(&mut self, fd: i32, pos: u64) {
        if let Some(FileDescriptor::Open(OpenHandle::File(f))) = self.process.get_mut(fd) {
            f.seek(pos);
        }
    }

    pub fn tell(&self, fd: i32) -> i32 {
        match self.process.get(fd) {
            Some(FileDescriptor::Open(OpenHandle::File(f))) => f.tell() as i32,
            _ => -1,
        }
    }

    pub fn close(&mut self, fd: i32) {
        self.process.close_fd(fd);
    }

    pub fn dup2(&mut self, old: i32, new: i32) -> KResult<i32> {
        self.process.dup2(old, new)
    }

    /// `mmap(addr, length, writable, fd, offset)` (spec §4.8). `None`
    /// covers every validation failure the table calls `MAP_FAILED`,
    /// including `fd` not naming a real open file.
    pub fn mmap(&mut self, addr: u64, length: u64, writable: bool, fd: i32, offset: u64) -> Option<u64> {
        let inode = match self.process.get(fd) {
            Some(FileDescriptor::Open(OpenHandle::File(f))) => f.inode().clone(),
            _ => return None,
        };
        let length_on_disk = inode.read().length;
        let source = MmapSource {
            device: self.fs.device_arc(),
            fat: self.fs.fat().clone(),
            inode,
            length: length_on_disk,
        };
        self.process.vm.mmap(addr, length, writable, source, offset)
    }

    pub fn munmap(&mut self, addr: u64) -> KResult<()> {
        self.process.vm.munmap(self.vm, addr)
    }

    pub fn chdir(&mut self, path: &str) -> KResult<bool> {
        match self.fs.filesys_open(&self.process.cwd, path)? {
            Some(OpenHandle::Dir(d)) => {
                self.process.cwd = d.inode().clone();
                Ok(true)
            }
            Some(OpenHandle::File(_)) => Ok(false),
            None => Ok(false),
        }
    }

    pub fn mkdir(&self, path: &str) -> KResult<bool> {
        self.fs.mkdir(&self.process.cwd, path)
    }

    pub fn readdir(&mut self, fd: i32) -> KResult<Option<String>> {
        match self.process.get_mut(fd) {
            Some(FileDescriptor::Open(OpenHandle::Dir(d))) => {
                let fat = self.fs.fat().lock().unwrap();
                d.read_next(self.fs.device(), &fat)
            }
            _ => Err(errno!(ENOTDIR)),
        }
    }

    pub fn isdir(&self, fd: i32) -> bool {
        matches!(self.process.get(fd), Some(FileDescriptor::Open(OpenHandle::Dir(_))))
    }

    pub fn inumber(&self, fd: i32) -> Option<u64> {
        match self.process.get(fd) {
            Some(FileDescriptor::Open(OpenHandle::File(f))) => Some(f.inode().sector),
            Some(FileDescriptor::Open(OpenHandle::Dir(d))) => Some(d.inode().sector),
            _ => None,
        }
    }

    pub fn symlink(&self, target: &str, linkpath: &str) -> KResult<i32> {
        Ok(if self.fs.symlink(&self.process.cwd, target, linkpath)? {
            0
        } else {
            -1
        })
    }
}
