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

//! Error codes shared by the filesystem and virtual memory cores.
//!
//! Most operations in this crate follow the source project's own
//! conventions (`bool`, `Option<_>`, or a sentinel) rather than `Errno`
//! directly; `Errno` exists for the handful of places that need to
//! distinguish *why* an operation failed, and for [`Errno::Fatal`], which
//! stands in for conditions the design treats as unrecoverable (disk I/O
//! failure, chain corruption, swap exhaustion — see spec §7).

use std::fmt;

/// An error code, loosely modeled after POSIX `errno` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    /// Invalid argument.
    Einval,
    /// No such file or directory.
    Enoent,
    /// Not a directory.
    Enotdir,
    /// Is a directory.
    Eisdir,
    /// Directory not empty.
    Enotempty,
    /// No space left on device (clusters or swap slots exhausted).
    Enospc,
    /// Too many open files.
    Emfile,
    /// No such device or address.
    Enxio,
    /// I/O error.
    Eio,
    /// A condition the design treats as unrecoverable: a real kernel would
    /// panic here. Callers that hit this should treat the subsystem as
    /// dead rather than retry.
    Fatal(&'static str),
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Errno::Einval => write!(f, "invalid argument"),
            Errno::Enoent => write!(f, "no such file or directory"),
            Errno::Enotdir => write!(f, "not a directory"),
            Errno::Eisdir => write!(f, "is a directory"),
            Errno::Enotempty => write!(f, "directory not empty"),
            Errno::Enospc => write!(f, "no space left on device"),
            Errno::Emfile => write!(f, "too many open files"),
            Errno::Enxio => write!(f, "no such device"),
            Errno::Eio => write!(f, "I/O error"),
            Errno::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

impl std::error::Error for Errno {}

/// The result type used throughout the kernel core.
pub type KResult<T> = Result<T, Errno>;

/// Builds an [`Errno`] from one of its bare variant names, mirroring the
/// call-site brevity of the source project's `errno!(EINVAL)`.
macro_rules! errno {
    (EINVAL) => {
        $crate::errno::Errno::Einval
    };
    (ENOENT) => {
        $crate::errno::Errno::Enoent
    };
    (ENOTDIR) => {
        $crate::errno::Errno::Enotdir
    };
    (EISDIR) => {
        $crate::errno::Errno::Eisdir
    };
    (ENOTEMPTY) => {
        $crate::errno::Errno::Enotempty
    };
    (ENOSPC) => {
        $crate::errno::Errno::Enospc
    };
    (EMFILE) => {
        $crate::errno::Errno::Emfile
    };
    (ENXIO) => {
        $crate::errno::Errno::Enxio
    };
    (EIO) => {
        $crate::errno::Errno::Eio
    };
}
pub(crate) use errno;
