// src/autogen/archive.rs

//! Source archive unpacking and bundle creation

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

fn decoder(path: &Path) -> Result<Box<dyn Read>> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let file = BufReader::new(File::open(path).map_err(|e| Error::io_at(path, e))?);
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") || name.ends_with(".crate") {
        Ok(Box::new(GzDecoder::new(file)))
    } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
        Ok(Box::new(XzDecoder::new(file)))
    } else if name.ends_with(".tar") {
        Ok(Box::new(file))
    } else {
        Err(Error::Extension {
            name: "archive".to_string(),
            message: format!("unsupported archive {}", path.display()),
        })
    }
}

/// Unpack a tarball into `dest`; returns the top-level source directory
///
/// Upstream tarballs usually hold a single `<name>-<version>/` directory,
/// which is returned in that case; `dest` otherwise.
pub fn unpack(archive: &Path, dest: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dest).map_err(|e| Error::io_at(dest, e))?;
    let mut tarball = tar::Archive::new(decoder(archive)?);
    tarball.unpack(dest).map_err(|e| Error::Extension {
        name: "archive".to_string(),
        message: format!("cannot unpack {}: {}", archive.display(), e),
    })?;
    debug!("Unpacked {} into {}", archive.display(), dest.display());

    let entries: Vec<PathBuf> = fs::read_dir(dest)
        .map_err(|e| Error::io_at(dest, e))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    match entries.as_slice() {
        [single] if single.is_dir() => Ok(single.clone()),
        _ => Ok(dest.to_path_buf()),
    }
}

/// Create `<output>` as an xz tarball of `src_dir`, entries under `prefix`
pub fn create_tar_xz(src_dir: &Path, output: &Path, prefix: &str) -> Result<()> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
    }
    let file = File::create(output).map_err(|e| Error::io_at(output, e))?;
    let mut builder = tar::Builder::new(XzEncoder::new(file, 6));
    builder.follow_symlinks(false);
    builder.mode(tar::HeaderMode::Deterministic);

    for entry in WalkDir::new(src_dir).sort_by_file_name().min_depth(1) {
        let entry = entry.map_err(|e| Error::IoError(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(|e| Error::IoError(e.to_string()))?;
        let name = Path::new(prefix).join(rel);
        if entry.file_type().is_dir() {
            builder.append_dir(&name, entry.path())?;
        } else {
            builder.append_path_with_name(entry.path(), &name)?;
        }
    }

    builder.into_inner()?.finish()?;
    debug!("Created {}", output.display());
    Ok(())
}
