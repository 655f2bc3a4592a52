// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! RTEFS FUSE adapter implementation
//!
//! Maps FUSE operations to RteFs calls.

#[cfg(not(all(feature = "fuse", target_os = "linux")))]
compile_error!("This module requires the 'fuse' feature on Linux");

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow, FUSE_ROOT_ID,
};
use libc::{c_int, EINVAL, ENAMETOOLONG, ENOENT};
use rtefs_core::store::parent_of;
use rtefs_core::{HandleId, Node, NodeKind, RteFs};
use tracing::{debug, info, warn};

use crate::errno::to_errno;
use crate::inodes::{InodeTable, ROOT_INO};

const _: () = assert!(ROOT_INO == FUSE_ROOT_ID);

/// Block size used for the `blocks` attribute
const BLOCK_SIZE: u64 = 512;

/// RTEFS FUSE filesystem adapter
pub struct RteFsFuse {
    fs: RteFs,
    inodes: InodeTable,
    /// TTL for attribute cache responses
    attr_ttl: Duration,
    /// TTL for directory entry cache responses
    entry_ttl: Duration,
    name_max: usize,
}

fn kind_to_fuse(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::Directory => FileType::Directory,
        NodeKind::RegularFile => FileType::RegularFile,
        NodeKind::Symlink => FileType::Symlink,
    }
}

fn resolve_time(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(at) => at,
        TimeOrNow::Now => SystemTime::now(),
    }
}

impl RteFsFuse {
    pub fn new(fs: RteFs) -> Self {
        let config = fs.config();
        let attr_ttl = Duration::from_millis(u64::from(config.cache.attr_ttl_ms));
        let entry_ttl = Duration::from_millis(u64::from(config.cache.entry_ttl_ms));
        let name_max = config.statfs.name_max as usize;
        Self {
            fs,
            inodes: InodeTable::new(),
            attr_ttl,
            entry_ttl,
            name_max,
        }
    }

    /// The reserved directory's mode flips with the gate, so the kernel must
    /// never cache it.
    fn ttl_for(&self, path: &str, ttl: Duration) -> Duration {
        if path == self.fs.input_dir() {
            Duration::ZERO
        } else {
            ttl
        }
    }

    fn path_of(&self, ino: u64) -> Result<String, c_int> {
        self.inodes.path(ino).map(str::to_string).ok_or(ENOENT)
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> Result<String, c_int> {
        if name.as_bytes().len() > self.name_max {
            return Err(ENAMETOOLONG);
        }
        let name = name.to_str().ok_or(EINVAL)?;
        self.inodes.child_path(parent, name).ok_or(ENOENT)
    }

    fn file_attr(&self, req: &Request, node: &Node, ino: u64) -> FileAttr {
        FileAttr {
            ino,
            size: node.size,
            blocks: node.size.div_ceil(BLOCK_SIZE),
            atime: node.times.accessed,
            mtime: node.times.modified,
            ctime: node.times.modified,
            crtime: node.times.created,
            kind: kind_to_fuse(node.kind),
            perm: node.permissions as u16,
            nlink: node.link_count.max(1),
            uid: node.owner.unwrap_or_else(|| req.uid()),
            gid: node.group.unwrap_or_else(|| req.gid()),
            rdev: 0,
            blksize: BLOCK_SIZE as u32,
            flags: 0,
        }
    }

    /// Look `path` up and register its inode
    fn entry_for(&mut self, req: &Request, path: &str) -> Result<(Duration, FileAttr), c_int> {
        let node = self.fs.lookup(path).map_err(|err| to_errno(&err))?;
        let ino = self.inodes.get_or_alloc(path);
        Ok((self.ttl_for(path, self.entry_ttl), self.file_attr(req, &node, ino)))
    }

    fn attr_for(&self, req: &Request, ino: u64, path: &str) -> Result<(Duration, FileAttr), c_int> {
        let node = self.fs.getattr(path).map_err(|err| to_errno(&err))?;
        Ok((self.ttl_for(path, self.attr_ttl), self.file_attr(req, &node, ino)))
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_setattr(
        &self,
        path: &str,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
    ) -> rtefs_core::FsResult<()> {
        if let Some(mode) = mode {
            self.fs.chmod(path, mode)?;
        }
        if uid.is_some() || gid.is_some() {
            self.fs.chown(path, uid, gid)?;
        }
        if let Some(size) = size {
            self.fs.truncate(path, size)?;
        }
        match (atime, mtime) {
            (None, None) => {}
            (Some(TimeOrNow::Now), Some(TimeOrNow::Now)) => self.fs.utimens(path, None)?,
            (atime, mtime) => {
                let current = self.fs.getattr(path)?.times;
                let accessed = atime.map(resolve_time).unwrap_or(current.accessed);
                let modified = mtime.map(resolve_time).unwrap_or(current.modified);
                self.fs.utimens(path, Some((accessed, modified)))?;
            }
        }
        Ok(())
    }
}

impl fuser::Filesystem for RteFsFuse {
    fn init(&mut self, _req: &Request, _config: &mut fuser::KernelConfig) -> Result<(), c_int> {
        info!(
            target: "rtefs::fuse",
            input_dir = %self.fs.input_dir(),
            attr_ttl_ms = self.attr_ttl.as_millis() as u64,
            entry_ttl_ms = self.entry_ttl.as_millis() as u64,
            "RTEFS FUSE adapter initialized"
        );
        Ok(())
    }

    fn destroy(&mut self) {
        info!(target: "rtefs::fuse", "RTEFS FUSE adapter destroyed");
    }

    fn forget(&mut self, _req: &Request, ino: u64, _nlookup: u64) {
        self.inodes.forget(ino);
    }

    fn lookup(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let result = self
            .child_of(parent, name)
            .and_then(|path| self.entry_for(req, &path));
        match result {
            Ok((ttl, attr)) => reply.entry(&ttl, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let result = self
            .path_of(ino)
            .and_then(|path| self.attr_for(req, ino, &path));
        match result {
            Ok((ttl, attr)) => reply.attr(&ttl, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn setattr(
        &mut self,
        req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        if let Err(err) = self.apply_setattr(&path, mode, uid, gid, size, atime, mtime) {
            debug!(target: "rtefs::fuse", %path, error = %err, "setattr failed");
            reply.error(to_errno(&err));
            return;
        }
        match self.attr_for(req, ino, &path) {
            Ok((ttl, attr)) => reply.attr(&ttl, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        let stats = self.fs.statfs();
        reply.statfs(
            stats.blocks,
            stats.blocks_free,
            stats.blocks_available,
            stats.files,
            stats.files_free,
            stats.block_size,
            stats.name_max,
            stats.block_size,
        );
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        let result = self
            .path_of(ino)
            .and_then(|path| self.fs.access(&path, mask).map_err(|err| to_errno(&err)));
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let result = self
            .path_of(ino)
            .and_then(|path| self.fs.open(&path, flags).map_err(|err| to_errno(&err)));
        match result {
            Ok(fh) => reply.opened(fh.0, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn create(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.child_of(parent, name) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let fh = match self.fs.create(&path, mode) {
            Ok(fh) => fh,
            Err(err) => {
                reply.error(to_errno(&err));
                return;
            }
        };
        match self.entry_for(req, &path) {
            Ok((ttl, attr)) => reply.created(&ttl, &attr, 0, fh.0, 0),
            Err(errno) => {
                if let Err(err) = self.fs.release(fh) {
                    warn!(target: "rtefs::fuse", %path, error = %err, "releasing orphaned handle failed");
                }
                reply.error(errno);
            }
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }
        match self.fs.read_handle(HandleId(fh), size as usize, offset as u64) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }
        match self.fs.write_handle(HandleId(fh), data, offset as u64) {
            Ok(written) => reply.written(written as u32),
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.fs.release(HandleId(fh)) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    fn fsync(&mut self, _req: &Request, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        reply.ok();
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let entries = match self.fs.readdir(&path) {
            Ok(entries) => entries,
            Err(err) => {
                reply.error(to_errno(&err));
                return;
            }
        };

        for (i, entry) in entries.iter().enumerate().skip(offset.max(0) as usize) {
            let entry_ino = match entry.name.as_str() {
                "." => ino,
                ".." => self.inodes.get_or_alloc(parent_of(&path)),
                name => {
                    let child = rtefs_core::store::join(&path, name);
                    self.inodes.get_or_alloc(&child)
                }
            };
            if reply.add(entry_ino, (i + 1) as i64, kind_to_fuse(entry.kind), &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn mkdir(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let result = self.child_of(parent, name).and_then(|path| {
            self.fs.mkdir(&path, mode).map_err(|err| to_errno(&err))?;
            self.entry_for(req, &path)
        });
        match result {
            Ok((ttl, attr)) => reply.entry(&ttl, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.child_of(parent, name).and_then(|path| {
            self.fs.unlink(&path).map_err(|err| to_errno(&err))?;
            self.inodes.remove(&path);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.child_of(parent, name).and_then(|path| {
            self.fs.rmdir(&path).map_err(|err| to_errno(&err))?;
            self.inodes.remove(&path);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let result = self.child_of(parent, name).and_then(|old| {
            let new = self.child_of(newparent, newname)?;
            self.fs.rename(&old, &new).map_err(|err| to_errno(&err))?;
            self.inodes.rename(&old, &new);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn symlink(
        &mut self,
        req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let result = self.child_of(parent, link_name).and_then(|path| {
            let target = target.to_str().ok_or(EINVAL)?;
            self.fs.symlink(&path, target).map_err(|err| to_errno(&err))?;
            self.entry_for(req, &path)
        });
        match result {
            Ok((ttl, attr)) => reply.entry(&ttl, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        let result = self
            .path_of(ino)
            .and_then(|path| self.fs.readlink(&path).map_err(|err| to_errno(&err)));
        match result {
            Ok(target) => reply.data(target.as_bytes()),
            Err(errno) => reply.error(errno),
        }
    }

    fn getxattr(&mut self, _req: &Request, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        let result = self.path_of(ino).and_then(|path| {
            let name = name.to_str().ok_or(EINVAL)?;
            self.fs.getxattr(&path, name).map_err(|err| to_errno(&err))
        });
        match result {
            Ok(value) => {
                if size == 0 {
                    reply.size(value.len() as u32);
                } else if value.len() <= size as usize {
                    reply.data(&value);
                } else {
                    reply.error(libc::ERANGE);
                }
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let result = self.path_of(ino).and_then(|path| {
            let name = name.to_str().ok_or(EINVAL)?;
            self.fs.setxattr(&path, name, value).map_err(|err| to_errno(&err))
        });
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn listxattr(&mut self, _req: &Request, ino: u64, size: u32, reply: ReplyXattr) {
        let result = self
            .path_of(ino)
            .and_then(|path| self.fs.listxattr(&path).map_err(|err| to_errno(&err)));
        match result {
            Ok(names) => {
                let mut buffer = Vec::new();
                for name in &names {
                    buffer.extend_from_slice(name.as_bytes());
                    buffer.push(0); // NUL terminator
                }

                if size == 0 {
                    reply.size(buffer.len() as u32);
                } else if buffer.len() <= size as usize {
                    reply.data(&buffer);
                } else {
                    reply.error(libc::ERANGE);
                }
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn removexattr(&mut self, _req: &Request, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.path_of(ino).and_then(|path| {
            let name = name.to_str().ok_or(EINVAL)?;
            self.fs.removexattr(&path, name).map_err(|err| to_errno(&err))
        });
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }
}
