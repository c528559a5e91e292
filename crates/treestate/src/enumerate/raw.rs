//! Bulk directory reading with `getdents64`.
//!
//! One system call fills a whole buffer with directory records, instead of
//! one call per entry as `readdir` may do on some libcs.

use std::ffi::{CStr, CString};
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::storage::EntryMetadata;

/// Offset of `d_name` in `struct linux_dirent64`.
pub(super) const DIRENT_HEADER: usize = 19;

/// An open directory descriptor.
#[derive(Debug)]
pub(super) struct RawDir {
    fd: OwnedFd,
}

impl RawDir {
    pub(super) fn open(path: &Path) -> io::Result<Self> {
        let c_path = CString::new(path.as_os_str().as_bytes())?;
        let fd = unsafe {
            libc::open(
                c_path.as_ptr(),
                libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` was just returned by open and is owned by nobody else.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Reads the next batch of records into `buffer`; 0 means end of
    /// directory.
    pub(super) fn read_chunk(&self, buffer: &mut [u8]) -> io::Result<usize> {
        loop {
            let read = unsafe {
                libc::syscall(
                    libc::SYS_getdents64,
                    self.fd.as_raw_fd(),
                    buffer.as_mut_ptr(),
                    buffer.len(),
                )
            };
            if read >= 0 {
                return Ok(read as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// `lstat` of a child, relative to this directory.
    pub(super) fn stat_at(&self, name: &CStr) -> io::Result<EntryMetadata> {
        let mut stat = MaybeUninit::<libc::stat>::uninit();
        let rc = unsafe {
            libc::fstatat(
                self.fd.as_raw_fd(),
                name.as_ptr(),
                stat.as_mut_ptr(),
                libc::AT_SYMLINK_NOFOLLOW,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fstatat succeeded, so the buffer is initialized.
        Ok(EntryMetadata::from_stat(unsafe { stat.assume_init_ref() }))
    }
}

/// Iterates over (inode, name) pairs in a `getdents64` buffer.
pub(super) fn records(chunk: &[u8]) -> Records<'_> {
    Records { chunk, offset: 0 }
}

pub(super) struct Records<'a> {
    chunk: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for Records<'a> {
    type Item = (u64, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.chunk.get(self.offset..)?;
        if rest.len() < DIRENT_HEADER {
            return None;
        }
        let reclen = usize::from(u16::from_ne_bytes([rest[16], rest[17]]));
        if reclen < DIRENT_HEADER || reclen > rest.len() {
            return None;
        }
        self.offset += reclen;

        let mut ino = [0u8; 8];
        ino.copy_from_slice(&rest[..8]);
        let name_field = &rest[DIRENT_HEADER..reclen];
        let name_len = memchr::memchr(0, name_field).unwrap_or(name_field.len());
        Some((u64::from_ne_bytes(ino), &name_field[..name_len]))
    }
}
