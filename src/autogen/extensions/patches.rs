// src/autogen/extensions/patches.rs

//! Patch application with `-p1` / `-p0` fallback

use crate::error::{Error, Result};
use std::path::Path;
use std::process::Command;
use tracing::debug;

const LEVELS: [&str; 2] = ["-p1", "-p0"];

fn run_patch(src_dir: &Path, patch: &Path, level: &str, dry_run: bool) -> Result<(bool, String)> {
    let mut cmd = Command::new("patch");
    cmd.current_dir(src_dir).arg(level).arg("-s");
    if dry_run {
        cmd.arg("--dry-run");
    }
    let output = cmd.arg("-i").arg(patch).output().map_err(|e| Error::PatchFailed {
        patch: patch.display().to_string(),
        message: format!("cannot run patch: {}", e),
    })?;
    let mut message = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        message.push_str(stderr.trim());
    }
    Ok((output.status.success(), message))
}

/// Apply one patch inside `src_dir`
///
/// Each level is dry-run first; the first level that applies cleanly is
/// used for the real run.
pub fn apply_patch(src_dir: &Path, patch: &Path) -> Result<()> {
    let mut last = String::new();
    for level in LEVELS {
        let (ok, message) = run_patch(src_dir, patch, level, true)?;
        if !ok {
            last = message;
            continue;
        }
        let (ok, message) = run_patch(src_dir, patch, level, false)?;
        if !ok {
            return Err(Error::PatchFailed {
                patch: patch.display().to_string(),
                message,
            });
        }
        debug!("Applied {} with {}", patch.display(), level);
        return Ok(());
    }
    Err(Error::PatchFailed {
        patch: patch.display().to_string(),
        message: last,
    })
}

pub fn apply_patches(src_dir: &Path, patches: &[impl AsRef<Path>]) -> Result<()> {
    for patch in patches {
        apply_patch(src_dir, patch.as_ref())?;
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    fn patch_available() -> bool {
        which::which("patch").is_ok()
    }

    const P1: &str = "--- a/hello.txt\n+++ b/hello.txt\n@@ -1 +1 @@\n-hello\n+hello world\n";
    const P0: &str = "--- hello.txt\n+++ hello.txt\n@@ -1 +1 @@\n-hello\n+hello p0\n";

    #[test]
    fn test_p1_then_p0() {
        if !patch_available() {
            return;
        }
        for (body, expected) in [(P1, "hello world\n"), (P0, "hello p0\n")] {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("hello.txt"), "hello\n").unwrap();
            let patch = dir.path().join("fix.patch");
            fs::write(&patch, body).unwrap();
            apply_patch(dir.path(), &patch).unwrap();
            assert_eq!(fs::read_to_string(dir.path().join("hello.txt")).unwrap(), expected);
        }
    }

    #[test]
    fn test_rejected_patch() {
        if !patch_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hello.txt"), "something else\n").unwrap();
        let patch = dir.path().join("fix.patch");
        fs::write(&patch, P1).unwrap();
        assert!(matches!(apply_patch(dir.path(), &patch), Err(Error::PatchFailed { .. })));
        assert_eq!(fs::read_to_string(dir.path().join("hello.txt")).unwrap(), "something else\n");
    }
}
