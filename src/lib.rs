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

//! campfs-kernel implements two subsystems of a small teaching kernel: a
//! FAT-style filesystem ([`fs`]) and a demand-paged virtual memory core
//! ([`vm`]), bundled behind a per-process [`process::Process`] and exercised
//! through the [`syscall::Syscalls`] table.
//!
//! Everything a real kernel would need around these two subsystems —
//! interrupt handling, scheduling, the console, a bootstrap sequence, the
//! raw disk controller — is a collaborator interface this crate calls into
//! but never implements; [`device::BlockDevice`] and [`device::MemBlockDevice`]
//! are its one piece of hardware, standing in for the controller the real
//! kernel would drive.

pub mod device;
pub mod errno;
pub mod fs;
pub mod process;
pub mod syscall;
pub mod vm;
