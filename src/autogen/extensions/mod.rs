// src/autogen/extensions/mod.rs

//! Post-selection extensions
//!
//! Extensions run after the version is set. Most of them download and
//! unpack the primary artefact, vendor its dependencies and append the
//! resulting bundle as a local artefact. An atom lists extension names;
//! the definition's `extensions` map resolves a name to its kind and
//! options, the name doubling as the kind when no entry exists.

mod custom;
mod go;
mod patches;
mod rust;
mod submodules;

pub use custom::CustomExtension;
pub use go::{GoExtension, escape_module_path, parse_go_sum};
pub use patches::{apply_patch, apply_patches};
pub use rust::{CargoLock, LockPackage, RustExtension, mark_config};
pub use submodules::{GitSubmodulesExtension, parse_gitmodules};

use super::archive;
use super::generators::Elaboration;
use super::values::{Artefact, value_str};
use crate::error::{Error, Result};
use crate::http::{HttpClient, url_basename};
use crate::specs::{AutogenAtom, ExtensionSpec};
use crate::vcs::Vcs;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Mirror used for locally built bundles unless `mirror` is set
pub const DEFAULT_BUNDLE_MIRROR: &str = "mirror://macaroni-dist";

/// Collaborators shared by every extension run
#[derive(Clone)]
pub struct ExtensionContext {
    pub client: HttpClient,
    pub vcs: Arc<dyn Vcs>,
    /// Where artefacts and built bundles are stored
    pub download_dir: PathBuf,
    /// Scratch area; each run creates its own subdirectory
    pub work_dir: PathBuf,
    pub spec_dir: PathBuf,
}

pub trait Extension: Send + Sync {
    fn name(&self) -> &'static str;

    fn elaborate(
        &self,
        ctx: &ExtensionContext,
        atom: &AutogenAtom,
        options: &BTreeMap<String, String>,
        state: &mut Elaboration,
    ) -> Result<()>;
}

/// Extension lookup by kind
pub fn new_extension(kind: &str) -> Result<Box<dyn Extension>> {
    match kind {
        "go" => Ok(Box::new(GoExtension)),
        "rust" => Ok(Box::new(RustExtension)),
        "git-submodules" => Ok(Box::new(GitSubmodulesExtension)),
        "custom" => Ok(Box::new(CustomExtension)),
        other => Err(Error::UnsupportedExtension(other.to_string())),
    }
}

/// Run every extension listed by `atom`, in order
pub fn run_extensions(
    ctx: &ExtensionContext,
    definitions: &BTreeMap<String, ExtensionSpec>,
    atom: &AutogenAtom,
    state: &mut Elaboration,
) -> Result<()> {
    for name in &atom.extensions {
        let (kind, options) = match definitions.get(name) {
            Some(spec) if !spec.name.is_empty() => (spec.name.as_str(), spec.options.clone()),
            Some(spec) => (name.as_str(), spec.options.clone()),
            None => (name.as_str(), BTreeMap::new()),
        };
        let extension = new_extension(kind)?;
        info!("{}: running extension {}", atom.name, extension.name());
        extension
            .elaborate(ctx, atom, &options, state)
            .map_err(|e| match e {
                Error::Extension { .. } | Error::PatchFailed { .. } | Error::ExternalScript { .. } => e,
                other => Error::Extension {
                    name: name.clone(),
                    message: format!("{}: {}", atom.name, other),
                },
            })?;
    }
    Ok(())
}

/// `<pkg>-<ver>-mark-<kind>-bundle[-<sha7>].tar.xz`
pub fn bundle_name(pkg: &str, version: &str, kind: &str, sha: Option<&str>) -> String {
    match sha.filter(|s| !s.is_empty()) {
        Some(sha) => format!(
            "{}-{}-mark-{}-bundle-{}.tar.xz",
            pkg,
            version,
            kind,
            &sha[..sha.len().min(7)]
        ),
        None => format!("{}-{}-mark-{}-bundle.tar.xz", pkg, version, kind),
    }
}

/// Distfile URI of a locally built bundle
pub fn bundle_src_uri(options: &BTreeMap<String, String>, name: &str) -> String {
    let mirror = options
        .get("mirror")
        .map(String::as_str)
        .unwrap_or(DEFAULT_BUNDLE_MIRROR);
    format!("{}/{}", mirror.trim_end_matches('/'), name)
}

/// Name and path of the bundle `kind` for the selected version
pub(crate) fn bundle_target(ctx: &ExtensionContext, atom: &AutogenAtom, state: &Elaboration, kind: &str) -> (String, PathBuf) {
    let version = value_str(&state.values, "version").unwrap_or_default();
    let name = bundle_name(&atom.name, version, kind, value_str(&state.values, "sha"));
    let path = ctx.download_dir.join(&name);
    (name, path)
}

/// Append a bundle built at `path` as a local artefact
pub(crate) fn push_bundle(state: &mut Elaboration, options: &BTreeMap<String, String>, name: &str, path: PathBuf) {
    let uri = bundle_src_uri(options, name);
    state.artefacts.retain(|a| a.name != name);
    state.artefacts.push(Artefact::local(name, &uri, path));
}

/// Scratch directory for one extension run on one atom
pub(crate) fn scratch_dir(ctx: &ExtensionContext, atom: &AutogenAtom, kind: &str) -> Result<PathBuf> {
    let dir = ctx.work_dir.join(format!("{}-{}", atom.name, kind));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).map_err(|e| Error::io_at(&dir, e))?;
    }
    std::fs::create_dir_all(&dir).map_err(|e| Error::io_at(&dir, e))?;
    Ok(dir)
}

/// Patch files listed under the `patches` value, relative to the spec dir
pub(crate) fn patch_list(ctx: &ExtensionContext, atom: &AutogenAtom, state: &Elaboration) -> Vec<PathBuf> {
    let entries: Vec<String> = match state.values.get("patches") {
        Some(Value::Array(list)) => list.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
        _ => Vec::new(),
    };
    let base = if atom.files_dir.is_empty() {
        ctx.spec_dir.clone()
    } else {
        ctx.spec_dir.join(&atom.files_dir)
    };
    entries
        .into_iter()
        .map(|p| {
            let path = Path::new(&p);
            if path.is_absolute() { path.to_path_buf() } else { base.join(path) }
        })
        .collect()
}

/// Download (or reuse) the primary artefact, unpack it and apply patches
///
/// Returns the unpacked source root.
pub(crate) fn prepare_source(
    ctx: &ExtensionContext,
    atom: &AutogenAtom,
    state: &Elaboration,
    scratch: &Path,
) -> Result<PathBuf> {
    let primary = state.artefacts.first().ok_or_else(|| Error::Extension {
        name: "source".to_string(),
        message: format!("{}: no artefact to unpack", atom.name),
    })?;
    let archive_path = match &primary.path {
        Some(path) => path.clone(),
        None => {
            let name = if primary.name.is_empty() {
                url_basename(&primary.src_uri).unwrap_or_else(|| atom.name.clone())
            } else {
                primary.name.clone()
            };
            let dest = ctx.download_dir.join(&name);
            if !dest.exists() {
                ctx.client.download_file(&primary.src_uri, &dest, None)?;
            } else {
                debug!("{}: reusing {}", atom.name, dest.display());
            }
            dest
        }
    };

    let root = archive::unpack(&archive_path, &scratch.join("src"))?;
    let patches = patch_list(ctx, atom, state);
    if !patches.is_empty() {
        apply_patches(&root, &patches)?;
    }
    Ok(root)
}
