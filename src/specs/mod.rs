// src/specs/mod.rs

//! YAML specfiles
//!
//! Three specfile shapes drive the pipeline:
//! - [`MergeKit`]: source kits, target kit and the atoms to carry over
//! - [`DistfilesSpec`]: a merge kit plus fallback mirrors, for the fetcher
//! - [`AutogenSpec`]: upstream-driven recipe generation definitions

mod autogen;
mod merge;

pub use autogen::{
    Asset, AutogenAtom, AutogenDefinition, AutogenSpec, CustomProps, DirProps, ExtensionSpec,
    GithubProps, JsonProps, PythonProps, TemplateSpec, Transform,
};
pub use merge::{
    AtomDefaults, DistfilesSpec, EclassesSpec, Fixup, FixupsSpec, KitMetadata, KitSource,
    MergeKit, TargetAtom, TargetKit, ThirdPartyMirror,
};

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

/// Parse a YAML specfile
pub(crate) fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| Error::SpecParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    serde_yaml::from_str(&content).map_err(|e| Error::SpecParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Directory a specfile lives in; relative paths inside it resolve here
pub(crate) fn spec_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
