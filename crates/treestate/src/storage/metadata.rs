//! Recorded metadata snapshot for one filesystem object.

use std::os::unix::fs::MetadataExt;

// ---------------------------------------------------------------------------
// Entry kind
// ---------------------------------------------------------------------------

const S_IFMT: u32 = 0o170000;
const S_IFSOCK: u32 = 0o140000;
const S_IFLNK: u32 = 0o120000;
const S_IFREG: u32 = 0o100000;
const S_IFBLK: u32 = 0o060000;
const S_IFDIR: u32 = 0o040000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;

/// Permission bits, including setuid, setgid and sticky.
pub(crate) const PERMISSION_BITS: u32 = 0o7777;

/// File type, decoded from the type bits of a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    #[default]
    Unknown,
}

impl EntryKind {
    /// Decodes the type bits of `mode`.
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFREG => Self::File,
            S_IFDIR => Self::Dir,
            S_IFLNK => Self::Symlink,
            S_IFCHR => Self::CharDevice,
            S_IFBLK => Self::BlockDevice,
            S_IFIFO => Self::Fifo,
            S_IFSOCK => Self::Socket,
            _ => Self::Unknown,
        }
    }

    /// The type bits for this kind.
    pub fn mode_bits(self) -> u32 {
        match self {
            Self::File => S_IFREG,
            Self::Dir => S_IFDIR,
            Self::Symlink => S_IFLNK,
            Self::CharDevice => S_IFCHR,
            Self::BlockDevice => S_IFBLK,
            Self::Fifo => S_IFIFO,
            Self::Socket => S_IFSOCK,
            Self::Unknown => 0,
        }
    }

    /// Regular files and symlinks are the only kinds with content digests.
    #[inline]
    pub fn has_content(self) -> bool {
        matches!(self, Self::File | Self::Symlink)
    }

    #[inline]
    pub fn is_device(self) -> bool {
        matches!(self, Self::CharDevice | Self::BlockDevice)
    }
}

// ---------------------------------------------------------------------------
// Device numbers
// ---------------------------------------------------------------------------

/// Major number of a device id (glibc encoding).
pub fn dev_major(dev: u64) -> u32 {
    (((dev >> 32) & 0xffff_f000) | ((dev >> 8) & 0x0000_0fff)) as u32
}

/// Minor number of a device id (glibc encoding).
pub fn dev_minor(dev: u64) -> u32 {
    (((dev >> 12) & 0xffff_ff00) | (dev & 0x0000_00ff)) as u32
}

/// Builds a device id from major and minor numbers.
pub fn make_dev(major: u32, minor: u32) -> u64 {
    let (major, minor) = (u64::from(major), u64::from(minor));
    ((major & 0xffff_f000) << 32)
        | ((major & 0x0000_0fff) << 8)
        | ((minor & 0xffff_ff00) << 12)
        | (minor & 0x0000_00ff)
}

// ---------------------------------------------------------------------------
// EntryMetadata
// ---------------------------------------------------------------------------

/// Metadata snapshot as recorded at the last synchronization, or as freshly
/// observed by `lstat`.
///
/// Timestamps are whole seconds; sub-second precision is never compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryMetadata {
    /// Type and permission bits.
    pub mode: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub mtime: i64,
    pub ctime: i64,
    /// Device the object lives on.
    pub dev: u64,
    pub ino: u64,
    /// Device number, for device nodes only.
    pub rdev: u64,
}

impl EntryMetadata {
    /// Creates metadata from `std::fs::symlink_metadata` output.
    pub fn from_fs_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            mode: metadata.mode(),
            size: metadata.size(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            mtime: metadata.mtime(),
            ctime: metadata.ctime(),
            dev: metadata.dev(),
            ino: metadata.ino(),
            rdev: metadata.rdev(),
        }
    }

    /// Creates metadata from a raw `stat` buffer.
    #[cfg(target_os = "linux")]
    #[allow(clippy::unnecessary_cast)]
    pub fn from_stat(stat: &libc::stat) -> Self {
        Self {
            mode: stat.st_mode as u32,
            size: stat.st_size as u64,
            uid: stat.st_uid as u32,
            gid: stat.st_gid as u32,
            mtime: stat.st_mtime as i64,
            ctime: stat.st_ctime as i64,
            dev: stat.st_dev as u64,
            ino: stat.st_ino as u64,
            rdev: stat.st_rdev as u64,
        }
    }

    /// Placeholder for a directory that is referenced but not yet on disk.
    pub fn placeholder_dir() -> Self {
        Self {
            mode: S_IFDIR | 0o700,
            ..Self::default()
        }
    }

    #[inline]
    pub fn kind(&self) -> EntryKind {
        EntryKind::from_mode(self.mode)
    }

    #[inline]
    pub fn permissions(&self) -> u32 {
        self.mode & PERMISSION_BITS
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind() == EntryKind::Dir
    }
}
