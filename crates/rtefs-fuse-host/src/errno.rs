// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core error → errno translation

use libc::c_int;
use rtefs_core::FsError;

pub fn to_errno(err: &FsError) -> c_int {
    match err {
        FsError::NotFound => libc::ENOENT,
        FsError::PermissionDenied => libc::EACCES,
        FsError::AlreadyExists => libc::EEXIST,
        FsError::NotADirectory => libc::ENOTDIR,
        FsError::IsADirectory => libc::EISDIR,
        FsError::NotEmpty => libc::ENOTEMPTY,
        FsError::Busy => libc::EBUSY,
        FsError::InvalidArgument => libc::EINVAL,
        FsError::BadFileDescriptor => libc::EBADF,
        FsError::Io(io) => io.raw_os_error().unwrap_or(libc::EIO),
    }
}
