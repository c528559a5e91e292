//! Directory enumeration into the entry tree.
//!
//! `DirectoryEnumerator` lists one directory and turns its children into
//! entries with as few system calls as possible:
//! - records are read in bulk into a fixed buffer (`getdents64` on Linux)
//! - names and inode numbers go into reusable scratch arrays that grow
//!   geometrically, sized up front from the directory's byte size and the
//!   previous child count
//! - entries are allocated from the arena in as few batches as it allows
//! - children are `lstat`-ed in inode order, which keeps disk seeks short on
//!   most filesystems, and then kept sorted by (device, inode)

#[cfg(target_os = "linux")]
mod raw;

use std::ffi::CStr;
use std::io;
use std::path::Path;

use crate::error::{Result, TreeStateError};
use crate::storage::{EntryFlags, EntryIndex, EntryMetadata, OptionEntryIndex};
use crate::tree::EntryTree;

/// Size of the record buffer; also the free space kept in the name buffer.
const READ_BUFFER: usize = 4096;

/// Assumed average name length when sizing the scratch arrays.
const ESTIMATED_NAME_LEN: usize = 15;

/// Smallest scratch size; pseudo filesystems report a directory size of 0.
const MIN_ESTIMATE: usize = 32;

#[cfg(target_os = "linux")]
const RECORD_HEADER: usize = raw::DIRENT_HEADER;
#[cfg(not(target_os = "linux"))]
const RECORD_HEADER: usize = 19;

/// Estimates how many children a directory has.
///
/// Uses the larger of the directory's byte size divided by a typical record
/// size, and the previous count plus a little headroom.
pub fn estimate_children(dir_size: u64, previous_count: usize) -> usize {
    let by_size = usize::try_from(dir_size).unwrap_or(usize::MAX)
        / (RECORD_HEADER + ESTIMATED_NAME_LEN + 1);
    let by_count = previous_count.saturating_mul(19) / 16 + 1;
    by_size.max(by_count).max(MIN_ESTIMATE)
}

/// Reusable directory reader.
#[derive(Debug)]
pub struct DirectoryEnumerator {
    buffer: Vec<u8>,
    /// Start of each name in `names`.
    offsets: Vec<usize>,
    inodes: Vec<u64>,
    /// NUL-terminated names, back to back.
    names: Vec<u8>,
    build_by_name: bool,
}

impl Default for DirectoryEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryEnumerator {
    pub fn new() -> Self {
        Self {
            buffer: vec![0u8; READ_BUFFER],
            offsets: Vec::new(),
            inodes: Vec::new(),
            names: Vec::new(),
            build_by_name: false,
        }
    }

    /// Also builds the by-name child view after each enumeration.
    pub fn with_by_name(mut self, enabled: bool) -> Self {
        self.build_by_name = enabled;
        self
    }

    /// Reads the children of `dir`, found on disk at `path`, into the tree.
    ///
    /// `dir` must not have children yet. `previous_count` is the child count
    /// from an earlier listing (0 if unknown) and only sizes the scratch
    /// arrays. Children that vanish before they can be `lstat`-ed are kept,
    /// flagged `IGNORABLE`. Any other error frees the children allocated so
    /// far and is returned with the offending path.
    ///
    /// Returns the number of children.
    pub fn enumerate(
        &mut self,
        tree: &mut EntryTree,
        dir: EntryIndex,
        path: &Path,
        previous_count: usize,
    ) -> Result<usize> {
        let entry = tree.try_entry(dir)?;
        if entry.child_count() != 0 {
            return Err(TreeStateError::Structural(format!(
                "{} already has {} children",
                path.display(),
                entry.child_count()
            )));
        }
        self.reset(estimate_children(entry.meta.size, previous_count))?;

        let handle = DirHandle::open(path).map_err(|err| TreeStateError::at(path, err))?;
        self.read_all(&handle, path)?;
        self.attach(tree, &handle, path, dir)
    }

    /// Turns the records read so far into children of `dir`.
    fn attach(
        &mut self,
        tree: &mut EntryTree,
        handle: &DirHandle,
        path: &Path,
        dir: EntryIndex,
    ) -> Result<usize> {
        let used = self.names.len();
        self.names.shrink_to(used);

        let count = self.offsets.len();
        let mut order: Vec<usize> = (0..count).collect();
        order.sort_by_key(|&position| self.inodes[position]);

        let children = allocate_children(tree, count)?;
        if let Err(err) = self.populate(tree, handle, path, dir, &order, &children) {
            for &child in &children {
                tree.arena_mut().free(child)?;
            }
            return Err(err);
        }

        tree.set_children(dir, children.into_iter().collect())?;
        tree.sort_by_inode(dir)?;
        if self.build_by_name {
            tree.build_by_name(dir)?;
        }
        log::trace!("enumerated {count} entries in {}", path.display());
        Ok(count)
    }

    fn reset(&mut self, estimate: usize) -> Result<()> {
        self.offsets.clear();
        self.inodes.clear();
        self.names.clear();
        self.offsets.try_reserve_exact(estimate)?;
        self.inodes.try_reserve_exact(estimate)?;
        self.names
            .try_reserve_exact(READ_BUFFER + estimate * (ESTIMATED_NAME_LEN + 1))?;
        Ok(())
    }

    /// Appends one record to the scratch arrays.
    fn push(&mut self, ino: u64, name: &[u8]) -> Result<()> {
        if name == b"." || name == b".." {
            return Ok(());
        }
        if self.offsets.len() == self.offsets.capacity() {
            let extra = (self.offsets.capacity() * 3 / 16).max(1);
            self.offsets.try_reserve_exact(extra)?;
            self.inodes.try_reserve_exact(extra)?;
        }
        let free = self.names.capacity() - self.names.len();
        if free < READ_BUFFER.max(name.len() + 1) {
            let grown = self.names.capacity() * 21 / 16;
            let target = grown.max(self.names.len() + READ_BUFFER + name.len() + 1);
            self.names.try_reserve_exact(target - self.names.len())?;
        }

        self.offsets.push(self.names.len());
        self.names.extend_from_slice(name);
        self.names.push(0);
        self.inodes.push(ino);
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn read_all(&mut self, handle: &DirHandle, path: &Path) -> Result<()> {
        let mut buffer = std::mem::take(&mut self.buffer);
        let result = self.read_chunks(handle, path, &mut buffer);
        self.buffer = buffer;
        result
    }

    #[cfg(target_os = "linux")]
    fn read_chunks(&mut self, handle: &DirHandle, path: &Path, buffer: &mut [u8]) -> Result<()> {
        loop {
            let read = handle
                .read_chunk(buffer)
                .map_err(|err| TreeStateError::at(path, err))?;
            if read == 0 {
                return Ok(());
            }
            for (ino, name) in raw::records(&buffer[..read]) {
                self.push(ino, name)?;
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn read_all(&mut self, handle: &DirHandle, path: &Path) -> Result<()> {
        use std::os::unix::ffi::OsStrExt;
        use std::os::unix::fs::DirEntryExt;

        let listing = std::fs::read_dir(&handle.path).map_err(|err| TreeStateError::at(path, err))?;
        for item in listing {
            let item = item.map_err(|err| TreeStateError::at(path, err))?;
            self.push(item.ino(), item.file_name().as_bytes())?;
        }
        Ok(())
    }

    /// NUL-terminated name of the record at `position`.
    fn name_at(&self, position: usize) -> &[u8] {
        let start = self.offsets[position];
        let len = memchr::memchr(0, &self.names[start..]).unwrap_or(self.names.len() - start);
        &self.names[start..=start + len]
    }

    /// Fills in name, parent and metadata of every child, in inode order.
    fn populate(
        &self,
        tree: &mut EntryTree,
        handle: &DirHandle,
        path: &Path,
        dir: EntryIndex,
        order: &[usize],
        children: &[EntryIndex],
    ) -> Result<()> {
        for (&position, &child) in order.iter().zip(children) {
            let with_nul = self.name_at(position);
            let name = &with_nul[..with_nul.len() - 1];
            let name_id = tree.names_mut().intern(name);

            let stat = CStr::from_bytes_with_nul(with_nul)
                .map_err(|err| TreeStateError::Structural(err.to_string()))
                .and_then(|c_name| {
                    handle
                        .stat_at(c_name)
                        .map_err(|err| child_error(path, name, err))
                });

            let entry = tree.try_entry_mut(child)?;
            entry.name = name_id;
            entry.parent = OptionEntryIndex::some(dir);
            match stat {
                Ok(meta) => entry.meta = meta,
                Err(err) if err.is_vanished() => {
                    log::debug!("entry vanished before lstat: {err}");
                    entry.meta.ino = self.inodes[position];
                    entry.flags |= EntryFlags::IGNORABLE;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

fn child_error(path: &Path, name: &[u8], err: io::Error) -> TreeStateError {
    use std::os::unix::ffi::OsStrExt;
    TreeStateError::at(path.join(std::ffi::OsStr::from_bytes(name)), err)
}

/// Allocates `count` detached entries, in as many batches as the arena needs.
fn allocate_children(tree: &mut EntryTree, count: usize) -> Result<Vec<EntryIndex>> {
    let mut children = Vec::new();
    children.try_reserve_exact(count)?;
    while children.len() < count {
        match tree.arena_mut().allocate(count - children.len()) {
            Ok((first, got)) => children.extend((0..got).map(|offset| first.offset(offset))),
            Err(err) => {
                for &child in &children {
                    tree.arena_mut().free(child)?;
                }
                return Err(err);
            }
        }
    }
    Ok(children)
}

// ---------------------------------------------------------------------------
// Platform handles
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
type DirHandle = raw::RawDir;

#[cfg(not(target_os = "linux"))]
#[derive(Debug)]
struct DirHandle {
    path: std::path::PathBuf,
}

#[cfg(not(target_os = "linux"))]
impl DirHandle {
    fn open(path: &Path) -> io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_dir() {
            return Err(io::Error::new(io::ErrorKind::Other, "not a directory"));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn stat_at(&self, name: &CStr) -> io::Result<EntryMetadata> {
        use std::os::unix::ffi::OsStrExt;
        let child = self.path.join(std::ffi::OsStr::from_bytes(name.to_bytes()));
        std::fs::symlink_metadata(child).map(|metadata| EntryMetadata::from_fs_metadata(&metadata))
    }
}
