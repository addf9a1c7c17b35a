// src/merge/atoms.rs

//! Copying a package version into the target kit

use super::search::Candidate;
use super::workspace::Workspace;
use crate::cache::RepoScanAtom;
use crate::error::{Error, Result};
use crate::kit::{copy_if_changed, copy_tree_changed};
use crate::manifest::Manifest;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const MANIFEST_FILE: &str = "Manifest";

/// Rewrite `<pkg_dir>/Manifest` as the union of the given atoms' files
///
/// A package without distfiles gets no Manifest. Returns whether the file
/// changed.
pub fn write_package_manifest<'a>(
    pkg_dir: &Path,
    atoms: impl IntoIterator<Item = &'a RepoScanAtom>,
) -> Result<bool> {
    let manifest = Manifest::from_files(atoms.into_iter().flat_map(|a| a.files.iter()));
    let path = pkg_dir.join(MANIFEST_FILE);
    if manifest.is_empty() {
        if path.is_file() {
            fs::remove_file(&path).map_err(|e| Error::io_at(&path, e))?;
            return Ok(true);
        }
        return Ok(false);
    }
    manifest.write(&path)
}

/// Copy the candidate's ebuild, Manifest and `files/` into the target kit
///
/// Returns the package directory relative to the kit root.
pub fn merge_atom(ws: &Workspace, candidate: &Candidate) -> Result<PathBuf> {
    let atom = &candidate.atom;
    let source_dir = ws.source_dir(&atom.kit)?;
    let src_ebuild = atom.ebuild_path(source_dir)?;
    if !src_ebuild.is_file() {
        return Err(Error::NotFound(src_ebuild.display().to_string()));
    }

    let dst_pkg = atom.package_dir(&ws.target_dir);
    fs::create_dir_all(&dst_pkg).map_err(|e| Error::io_at(&dst_pkg, e))?;
    if copy_if_changed(&src_ebuild, &atom.ebuild_path(&ws.target_dir)?)? {
        debug!("Copied {}", src_ebuild.display());
    }

    // Versions the target resolver knows about but whose ebuild is gone are
    // not retained and must not contribute DIST lines.
    let mut retained = vec![atom.clone()];
    for existing in ws.target.all_versions(&candidate.catpkg) {
        if existing.atom == atom.atom {
            continue;
        }
        if existing.ebuild_path(&ws.target_dir)?.is_file() {
            retained.push(existing);
        }
    }
    write_package_manifest(&dst_pkg, &retained)?;

    let copied = copy_tree_changed(&atom.package_dir(source_dir).join("files"), &dst_pkg.join("files"))?;
    if !copied.is_empty() {
        debug!("{}: {} files/ entries updated", candidate.catpkg, copied.len());
    }

    Ok(PathBuf::from(&candidate.catpkg))
}
