// src/kit/mod.rs

//! Kit tree writers
//!
//! Everything that touches a kit checkout outside of ebuilds lives here:
//! `metadata/layout.conf`, the `profiles/` files, eclasses and fixups.
//! Writers compare content before touching disk so re-running a phase on
//! an unchanged tree produces no git changes.

mod eclasses;
mod layout;
mod profiles;

pub use eclasses::{EclassFilter, copy_eclasses};
pub use layout::{LAYOUT_CONF, LayoutConf};
pub use profiles::{
    CATEGORIES_FILE, REPO_NAME_FILE, THIRDPARTYMIRRORS_FILE, parse_thirdpartymirrors,
    render_thirdpartymirrors, write_categories, write_repo_name, write_thirdpartymirrors,
};

use crate::error::{Error, Result};
use crate::hash::{md5, md5_file};
use crate::specs::Fixup;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Write `content` unless the file already holds it
///
/// Returns whether the file changed.
pub fn write_if_changed(path: &Path, content: &[u8]) -> Result<bool> {
    if path.is_file() {
        let current = md5_file(path).map_err(|e| Error::io_at(path, e))?;
        if current == md5(content) {
            return Ok(false);
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
    }
    fs::write(path, content).map_err(|e| Error::io_at(path, e))?;
    debug!("Wrote {}", path.display());
    Ok(true)
}

/// Copy `src` over `dst` when their md5 differ or `dst` is missing
pub fn copy_if_changed(src: &Path, dst: &Path) -> Result<bool> {
    if dst.is_file() {
        let a = md5_file(src).map_err(|e| Error::io_at(src, e))?;
        let b = md5_file(dst).map_err(|e| Error::io_at(dst, e))?;
        if a == b {
            return Ok(false);
        }
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
    }
    fs::copy(src, dst).map_err(|e| Error::io_at(dst, e))?;
    Ok(true)
}

/// Mirror the regular files of `src_dir` into `dst_dir`
///
/// Only files absent at the destination or with a different md5 are
/// copied. Returns the copied paths relative to `dst_dir`.
pub fn copy_tree_changed(src_dir: &Path, dst_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut changed = Vec::new();
    if !src_dir.is_dir() {
        return Ok(changed);
    }
    for entry in WalkDir::new(src_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::IoError(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(|e| Error::IoError(e.to_string()))?;
        if copy_if_changed(entry.path(), &dst_dir.join(rel))? {
            changed.push(rel.to_path_buf());
        }
    }
    Ok(changed)
}

/// Apply one fixup; returns the kit-relative paths that changed
pub fn apply_fixup(spec_dir: &Path, kit_dir: &Path, fixup: &Fixup) -> Result<Vec<PathBuf>> {
    let to = Path::new(&fixup.to);
    if let Some(file) = &fixup.file {
        let src = spec_dir.join(file);
        if !src.is_file() {
            return Err(Error::NotFound(src.display().to_string()));
        }
        return Ok(if copy_if_changed(&src, &kit_dir.join(to))? {
            vec![to.to_path_buf()]
        } else {
            Vec::new()
        });
    }
    if let Some(dir) = &fixup.dir {
        let src = spec_dir.join(dir);
        if !src.is_dir() {
            return Err(Error::NotFound(src.display().to_string()));
        }
        let changed = copy_tree_changed(&src, &kit_dir.join(to))?;
        return Ok(changed.into_iter().map(|p| to.join(p)).collect());
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_if_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/file");
        assert!(write_if_changed(&path, b"one").unwrap());
        assert!(!write_if_changed(&path, b"one").unwrap());
        assert!(write_if_changed(&path, b"two").unwrap());
        assert_eq!(fs::read(&path).unwrap(), b"two");
    }

    #[test]
    fn test_copy_tree_changed_only_differing() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("sub")).unwrap();
        fs::write(src.path().join("same.patch"), "x").unwrap();
        fs::write(src.path().join("sub/new.conf"), "y").unwrap();
        fs::write(dst.path().join("same.patch"), "x").unwrap();

        let changed = copy_tree_changed(src.path(), dst.path()).unwrap();
        assert_eq!(changed, vec![PathBuf::from("sub/new.conf")]);
        assert!(copy_tree_changed(src.path(), dst.path()).unwrap().is_empty());
        assert!(copy_tree_changed(&src.path().join("none"), dst.path()).unwrap().is_empty());
    }

    #[test]
    fn test_apply_fixup_file_and_dir() {
        let spec = tempfile::tempdir().unwrap();
        let kit = tempfile::tempdir().unwrap();
        fs::write(spec.path().join("README"), "hello").unwrap();
        fs::create_dir_all(spec.path().join("sets")).unwrap();
        fs::write(spec.path().join("sets/world"), "dev-lang/go").unwrap();

        let file = Fixup {
            file: Some("README".to_string()),
            to: "README.md".to_string(),
            ..Default::default()
        };
        assert_eq!(apply_fixup(spec.path(), kit.path(), &file).unwrap(), vec![PathBuf::from("README.md")]);
        assert!(apply_fixup(spec.path(), kit.path(), &file).unwrap().is_empty());

        let dir = Fixup {
            dir: Some("sets".to_string()),
            to: "profiles/sets".to_string(),
            ..Default::default()
        };
        assert_eq!(
            apply_fixup(spec.path(), kit.path(), &dir).unwrap(),
            vec![PathBuf::from("profiles/sets/world")]
        );

        let missing = Fixup {
            file: Some("nope".to_string()),
            to: "x".to_string(),
            ..Default::default()
        };
        assert!(matches!(apply_fixup(spec.path(), kit.path(), &missing), Err(Error::NotFound(_))));
    }
}
