//! Exclusion policy consulted before registering copy sources.

use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::error::{Result, TreeStateError};

/// Decides whether a path is excluded from tracking.
pub trait ExclusionPolicy {
    fn is_excluded(&self, path: &Path, is_dir: bool) -> bool;
}

/// Policy that excludes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExclusions;

impl ExclusionPolicy for NoExclusions {
    fn is_excluded(&self, _path: &Path, _is_dir: bool) -> bool {
        false
    }
}

impl ExclusionPolicy for Gitignore {
    fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        // Paths outside the matcher's root are never excluded.
        path.starts_with(self.path()) && self.matched_path_or_any_parents(path, is_dir).is_ignore()
    }
}

/// Builds a gitignore-style matcher rooted at `root` from pattern lines.
pub fn patterns(root: &Path, lines: &[&str]) -> Result<Gitignore> {
    let mut builder = GitignoreBuilder::new(root);
    for line in lines {
        builder
            .add_line(None, line)
            .map_err(|err| TreeStateError::Config(format!("bad pattern {line:?}: {err}")))?;
    }
    builder
        .build()
        .map_err(|err| TreeStateError::Config(format!("cannot build exclusion patterns: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_excluded_by_default() {
        assert!(!NoExclusions.is_excluded(Path::new("/any/where"), false));
    }

    #[test]
    fn gitignore_patterns_cover_subtrees() {
        let root = Path::new("/srv/data");
        let matcher = patterns(root, &["*.tmp", "build/"]).expect("patterns should build");
        assert!(matcher.is_excluded(&root.join("a/b.tmp"), false));
        assert!(matcher.is_excluded(&root.join("build"), true));
        assert!(matcher.is_excluded(&root.join("build/out.o"), false));
        assert!(!matcher.is_excluded(&root.join("src/main.rs"), false));
        assert!(!matcher.is_excluded(Path::new("/elsewhere/x.tmp"), false));
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let err = patterns(Path::new("/"), &["*.log", "{a,b"]).unwrap_err();
        assert!(matches!(err, TreeStateError::Config(ref message) if message.contains("{a,b")));
    }
}
