//! Entry-list persistence.
//!
//! The list is a text file with one [`Record`] per entry, parents before
//! their children, each naming its parent by 1-based line number. Ignorable
//! entries are never written. Writes go to a temporary file in the target
//! directory that is renamed over the old list once complete.

mod record;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use fnv::FnvHashMap;
use memmap2::Mmap;
use tempfile::NamedTempFile;

use crate::error::{Result, TreeStateError};
use crate::storage::EntryIndex;
use crate::tree::EntryTree;

pub use record::{Record, TypeField};

/// Encodes every non-ignorable entry of `tree` into `out`.
///
/// Returns the number of records written.
pub fn encode_entry_list(tree: &EntryTree, out: &mut impl Write) -> Result<usize> {
    let mut lines: FnvHashMap<EntryIndex, usize> = FnvHashMap::default();
    let mut buffer = Vec::with_capacity(256);
    let mut written = 0;

    let mut stack = vec![tree.root()];
    while let Some(index) = stack.pop() {
        let entry = tree.try_entry(index)?;
        let parent_line = match entry.parent() {
            Some(parent) if index != tree.root() => *lines.get(&parent).ok_or_else(|| {
                TreeStateError::Structural(format!(
                    "entry {} written before its parent",
                    index.get()
                ))
            })?,
            _ => 0,
        };
        let visible: Vec<EntryIndex> = entry
            .children()
            .iter()
            .copied()
            .filter(|&child| tree.entry(child).is_some_and(|c| !c.is_ignorable()))
            .collect();

        buffer.clear();
        Record {
            meta: entry.meta,
            flags: entry.flags,
            type_field: TypeField::for_entry(&entry.meta, entry.digest().copied()),
            repos_rev: entry.repos_rev,
            url_ref: entry.url_ref,
            parent_line,
            child_count: visible.len(),
            name: tree.name(index),
        }
        .encode(&mut buffer);
        out.write_all(&buffer)?;

        written += 1;
        lines.insert(index, written);
        stack.extend(visible.into_iter().rev());
    }
    Ok(written)
}

/// Writes the entry list of `tree` to `path`, replacing it atomically.
pub fn write_entry_list(tree: &EntryTree, path: &Path) -> Result<usize> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|err| TreeStateError::at(dir, err))?;
    let written = {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let written = encode_entry_list(tree, &mut writer)?;
        writer.flush()?;
        written
    };
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|err| TreeStateError::at(path, err.error))?;

    log::debug!("wrote entry list {} ({} entries)", path.display(), written);
    Ok(written)
}

/// Rebuilds a tree from an encoded entry list.
pub fn decode_entry_list(bytes: &[u8]) -> Result<EntryTree> {
    if bytes.is_empty() {
        return Err(TreeStateError::Structural("entry list is empty".to_string()));
    }
    let (root_record, mut offset) = Record::decode(bytes, 1)?;
    if root_record.parent_line != 0 {
        return Err(TreeStateError::Structural(format!(
            "line 1: root names parent line {}",
            root_record.parent_line
        )));
    }
    let mut tree = EntryTree::new(root_record.name, root_record.meta)?;
    let root = tree.root();
    apply_record(&mut tree, root, &root_record)?;
    let mut lines = vec![root];
    let mut expected = vec![root_record.child_count];

    while offset < bytes.len() {
        let line = lines.len() + 1;
        let (record, used) = Record::decode(&bytes[offset..], line)?;
        offset += used;

        let parent = record
            .parent_line
            .checked_sub(1)
            .and_then(|at| lines.get(at).copied())
            .ok_or_else(|| {
                TreeStateError::Structural(format!(
                    "line {line}: parent line {} is not an earlier record",
                    record.parent_line
                ))
            })?;
        if !tree.try_entry(parent)?.is_dir() {
            return Err(TreeStateError::Structural(format!(
                "line {line}: parent line {} is not a directory",
                record.parent_line
            )));
        }
        let child = tree.allocate_detached(record.name, record.meta)?;
        tree.push_child_unsorted(parent, child)?;
        apply_record(&mut tree, child, &record)?;

        lines.push(child);
        expected.push(record.child_count);
    }

    for (position, (&index, &count)) in lines.iter().zip(&expected).enumerate() {
        let actual = tree.try_entry(index)?.child_count();
        if actual != count {
            return Err(TreeStateError::Structural(format!(
                "line {}: expected {count} children, found {actual}",
                position + 1
            )));
        }
        if actual > 0 {
            tree.sort_by_inode(index)?;
        }
    }
    Ok(tree)
}

fn apply_record(tree: &mut EntryTree, index: EntryIndex, record: &Record<'_>) -> Result<()> {
    tree.set_digest(index, record.digest())?;
    let entry = tree.try_entry_mut(index)?;
    entry.flags = record.flags;
    entry.repos_rev = record.repos_rev;
    entry.url_ref = record.url_ref;
    Ok(())
}

/// Loads the entry list at `path`.
pub fn load_entry_list(path: &Path) -> Result<EntryTree> {
    let file = File::open(path).map_err(|err| TreeStateError::at(path, err))?;
    let len = file
        .metadata()
        .map_err(|err| TreeStateError::at(path, err))?
        .len();
    if len == 0 {
        log::warn!("entry list {} is empty", path.display());
        return Err(TreeStateError::Structural(format!(
            "entry list {} is empty",
            path.display()
        )));
    }
    // SAFETY: the list is only replaced by rename, never rewritten in place.
    let map = unsafe { Mmap::map(&file) }.map_err(|err| TreeStateError::at(path, err))?;
    let tree = decode_entry_list(&map).inspect_err(|err| {
        log::warn!("failed to load entry list {}: {err}", path.display());
    })?;

    log::debug!("loaded entry list {} ({} entries)", path.display(), tree.len());
    Ok(tree)
}
