//! Content digests for regular files and symlinks.
//!
//! The digest is treated as an opaque fingerprint: equal digests mean equal
//! content. Symlinks are digested over their target bytes so that a moved
//! link still matches its origin.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::error::{Result, TreeStateError};
use crate::storage::EntryKind;

const READ_CHUNK: usize = 64 * 1024;

/// A 256-bit content fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Length of the lowercase hex form.
    pub const HEX_LEN: usize = 64;

    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Digests everything `reader` yields.
    pub fn from_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; READ_CHUNK];
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            hasher.update(&buffer[..read]);
        }
        Ok(Self(*hasher.finalize().as_bytes()))
    }

    /// Digests the object at `path`, which must be of `kind`.
    pub fn of_path(path: &Path, kind: EntryKind) -> Result<Self> {
        match kind {
            EntryKind::File => {
                let file = File::open(path).map_err(|err| TreeStateError::at(path, err))?;
                Self::from_reader(file).map_err(|err| TreeStateError::at(path, err))
            }
            EntryKind::Symlink => {
                let target = std::fs::read_link(path).map_err(|err| TreeStateError::at(path, err))?;
                Ok(Self::of_bytes(target.as_os_str().as_bytes()))
            }
            other => Err(TreeStateError::Structural(format!(
                "{} has no content digest (kind {other:?})",
                path.display()
            ))),
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses the lowercase or uppercase hex form.
    pub fn from_hex(text: &[u8]) -> Option<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(text, &mut bytes).ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
