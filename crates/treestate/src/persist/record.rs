//! One line of the entry list, shown wrapped:
//!
//! ```text
//! mode ctime mtime flags type-field size revision url-ref
//!     dev inode parent-line child-count uid gid name\0\n
//! ```
//!
//! Numeric fields are separated by one or more spaces (the timestamps are
//! space-padded to width 8); exactly one space precedes the raw name bytes,
//! which run up to the NUL before the newline.

use std::io::Write;
use std::str::FromStr;

use crate::digest::ContentDigest;
use crate::error::{Result, TreeStateError};
use crate::storage::{dev_major, dev_minor, make_dev, EntryFlags, EntryKind, EntryMetadata};

const NUMERIC_FIELDS: usize = 14;

const DIR_FIELD: &[u8] = b"x";
const NO_DIGEST_FIELD: &[u8] = b"-";
const NO_DATA_FIELD: &[u8] = b"nd";
const CHAR_DEVICE_PREFIX: &str = "cdev";
const BLOCK_DEVICE_PREFIX: &str = "bdev";

/// Type-specific fifth field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeField {
    Device { block: bool, major: u32, minor: u32 },
    Directory,
    Digest(Option<ContentDigest>),
    NoData,
}

impl TypeField {
    /// The field an entry of `kind` is written with.
    pub fn for_entry(meta: &EntryMetadata, digest: Option<ContentDigest>) -> Self {
        match meta.kind() {
            EntryKind::CharDevice | EntryKind::BlockDevice => Self::Device {
                block: meta.kind() == EntryKind::BlockDevice,
                major: dev_major(meta.rdev),
                minor: dev_minor(meta.rdev),
            },
            EntryKind::Dir => Self::Directory,
            EntryKind::File | EntryKind::Symlink => Self::Digest(digest),
            _ => Self::NoData,
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Self::Device { block, major, minor } => {
                let prefix = if *block {
                    BLOCK_DEVICE_PREFIX
                } else {
                    CHAR_DEVICE_PREFIX
                };
                // Writing into a Vec cannot fail.
                let _ = write!(out, "{prefix}:0x{major:x}:0x{minor:x}");
            }
            Self::Directory => out.extend_from_slice(DIR_FIELD),
            Self::Digest(Some(digest)) => out.extend_from_slice(digest.to_hex().as_bytes()),
            Self::Digest(None) => out.extend_from_slice(NO_DIGEST_FIELD),
            Self::NoData => out.extend_from_slice(NO_DATA_FIELD),
        }
    }

    fn parse(token: &[u8], line: usize) -> Result<Self> {
        match token {
            DIR_FIELD => return Ok(Self::Directory),
            NO_DIGEST_FIELD => return Ok(Self::Digest(None)),
            NO_DATA_FIELD => return Ok(Self::NoData),
            _ => {}
        }
        let text = std::str::from_utf8(token).map_err(|_| parse_error(line, "type field"))?;
        if let Some((prefix, numbers)) = text.split_once(':') {
            let block = match prefix {
                CHAR_DEVICE_PREFIX => false,
                BLOCK_DEVICE_PREFIX => true,
                _ => return Err(parse_error(line, "device prefix")),
            };
            let (major, minor) = numbers
                .split_once(':')
                .ok_or_else(|| parse_error(line, "device numbers"))?;
            return Ok(Self::Device {
                block,
                major: parse_prefixed_hex(major, line)?,
                minor: parse_prefixed_hex(minor, line)?,
            });
        }
        ContentDigest::from_hex(token)
            .map(|digest| Self::Digest(Some(digest)))
            .ok_or_else(|| parse_error(line, "digest"))
    }

    /// Checks the field agrees with the kind from the mode.
    fn check_kind(&self, kind: EntryKind, line: usize) -> Result<()> {
        let ok = match self {
            Self::Device { block: true, .. } => kind == EntryKind::BlockDevice,
            Self::Device { block: false, .. } => kind == EntryKind::CharDevice,
            Self::Directory => kind == EntryKind::Dir,
            Self::Digest(_) => kind.has_content(),
            Self::NoData => !kind.has_content() && !kind.is_device() && kind != EntryKind::Dir,
        };
        if ok {
            Ok(())
        } else {
            Err(TreeStateError::Structural(format!(
                "line {line}: {self:?} does not fit an entry of kind {kind:?}"
            )))
        }
    }
}

/// A decoded (or to-be-encoded) entry-list line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<'a> {
    pub meta: EntryMetadata,
    pub flags: EntryFlags,
    pub type_field: TypeField,
    pub repos_rev: Option<u64>,
    pub url_ref: u32,
    /// 1-based line of the parent record; 0 for the root.
    pub parent_line: usize,
    pub child_count: usize,
    pub name: &'a [u8],
}

impl<'a> Record<'a> {
    /// Appends this record, terminator included, to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let meta = &self.meta;
        let _ = write!(
            out,
            "{:07o} {:8x} {:8x} {:x} ",
            meta.mode,
            meta.ctime,
            meta.mtime,
            (self.flags & EntryFlags::PERSISTED).bits()
        );
        self.type_field.write_to(out);
        let revision = self.repos_rev.map_or(-1, |rev| rev as i64);
        let _ = write!(
            out,
            " {} {} {} {:x} {} {} {} {} {} ",
            meta.size,
            revision,
            self.url_ref,
            meta.dev,
            meta.ino,
            self.parent_line,
            self.child_count,
            meta.uid,
            meta.gid
        );
        out.extend_from_slice(self.name);
        out.extend_from_slice(b"\0\n");
    }

    /// Decodes the record at the start of `input`.
    ///
    /// Returns the record and the number of bytes it occupied.
    pub fn decode(input: &'a [u8], line: usize) -> Result<(Self, usize)> {
        let mut tokens = [&input[..0]; NUMERIC_FIELDS];
        let mut pos = 0;
        for token in tokens.iter_mut() {
            while input.get(pos) == Some(&b' ') {
                pos += 1;
            }
            let start = pos;
            while input.get(pos).is_some_and(|&byte| byte != b' ' && byte != b'\n') {
                pos += 1;
            }
            if start == pos {
                return Err(parse_error(line, "missing field"));
            }
            *token = &input[start..pos];
        }
        if input.get(pos) != Some(&b' ') {
            return Err(parse_error(line, "name separator"));
        }
        let name_start = pos + 1;
        let name_len = memchr::memchr(0, &input[name_start..])
            .ok_or_else(|| parse_error(line, "unterminated name"))?;
        let name_end = name_start + name_len;
        if input.get(name_end + 1) != Some(&b'\n') {
            return Err(parse_error(line, "record terminator"));
        }

        let [
            mode,
            ctime,
            mtime,
            flags,
            type_field,
            size,
            revision,
            url_ref,
            dev,
            ino,
            parent_line,
            child_count,
            uid,
            gid,
        ] = tokens;
        let mode = u32::from_str_radix(as_str(mode, line)?, 8)
            .map_err(|_| parse_error(line, "mode"))?;
        let type_field = TypeField::parse(type_field, line)?;
        let revision: i64 = parse_dec(revision, line, "revision")?;

        let mut meta = EntryMetadata {
            mode,
            size: parse_dec(size, line, "size")?,
            uid: parse_dec(uid, line, "uid")?,
            gid: parse_dec(gid, line, "gid")?,
            mtime: parse_hex(mtime, line, "mtime")? as i64,
            ctime: parse_hex(ctime, line, "ctime")? as i64,
            dev: parse_hex(dev, line, "device")?,
            ino: parse_dec(ino, line, "inode")?,
            rdev: 0,
        };
        type_field.check_kind(meta.kind(), line)?;
        if let TypeField::Device { major, minor, .. } = type_field {
            meta.rdev = make_dev(major, minor);
        }

        let record = Self {
            meta,
            flags: EntryFlags::from_bits_truncate(parse_hex(flags, line, "flags")? as u32)
                & EntryFlags::PERSISTED,
            type_field,
            repos_rev: u64::try_from(revision).ok(),
            url_ref: parse_dec(url_ref, line, "url reference")?,
            parent_line: parse_dec(parent_line, line, "parent line")?,
            child_count: parse_dec(child_count, line, "child count")?,
            name: &input[name_start..name_end],
        };
        Ok((record, name_end + 2))
    }

    /// The digest carried by the type field, if any.
    pub fn digest(&self) -> Option<ContentDigest> {
        match self.type_field {
            TypeField::Digest(digest) => digest,
            _ => None,
        }
    }
}

fn parse_error(line: usize, what: &str) -> TreeStateError {
    TreeStateError::Parse {
        line,
        reason: format!("malformed {what}"),
    }
}

fn as_str(token: &[u8], line: usize) -> Result<&str> {
    std::str::from_utf8(token).map_err(|_| parse_error(line, "number"))
}

fn parse_dec<T: FromStr>(token: &[u8], line: usize, what: &str) -> Result<T> {
    as_str(token, line)?
        .parse()
        .map_err(|_| parse_error(line, what))
}

fn parse_hex(token: &[u8], line: usize, what: &str) -> Result<u64> {
    u64::from_str_radix(as_str(token, line)?, 16).map_err(|_| parse_error(line, what))
}

fn parse_prefixed_hex(text: &str, line: usize) -> Result<u32> {
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| parse_error(line, "device number"))?;
    u32::from_str_radix(digits, 16).map_err(|_| parse_error(line, "device number"))
}
