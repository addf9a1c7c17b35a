// src/autogen/extensions/submodules.rs

//! Git submodule bundling
//!
//! Release tarballs generated by GitHub do not include submodules. The
//! repository is cloned at the selected commit with its submodules and
//! only the submodule directories are archived, rooted like the upstream
//! tarball so they unpack over the sources.
//!
//! Options: `url` (defaults to the GitHub repository of the atom),
//! `prefix` (defaults to `<repo>-<version>`), `mirror`.

use super::{Extension, ExtensionContext, bundle_target, push_bundle, scratch_dir};
use crate::autogen::archive::create_tar_xz;
use crate::autogen::generators::Elaboration;
use crate::autogen::values::value_str;
use crate::error::{Error, Result};
use crate::specs::AutogenAtom;
use crate::vcs::CloneOptions;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

/// A `[submodule "name"]` section of `.gitmodules`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submodule {
    pub name: String,
    pub path: String,
    pub url: String,
}

pub fn parse_gitmodules(content: &str) -> Vec<Submodule> {
    let mut modules: Vec<Submodule> = Vec::new();
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(header) = line.strip_prefix("[submodule").and_then(|h| h.strip_suffix(']')) {
            modules.push(Submodule {
                name: header.trim().trim_matches('"').to_string(),
                ..Default::default()
            });
            continue;
        }
        let (Some(current), Some((key, value))) = (modules.last_mut(), line.split_once('=')) else {
            continue;
        };
        match key.trim() {
            "path" => current.path = value.trim().to_string(),
            "url" => current.url = value.trim().to_string(),
            _ => {}
        }
    }
    modules.retain(|m| !m.path.is_empty());
    modules
}

fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src).into_iter().filter_entry(|e| e.file_name() != ".git") {
        let entry = entry.map_err(|e| Error::IoError(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::IoError(e.to_string()))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::io_at(&target, e))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).map_err(|e| Error::io_at(&target, e))?;
        }
    }
    Ok(())
}

pub struct GitSubmodulesExtension;

impl Extension for GitSubmodulesExtension {
    fn name(&self) -> &'static str {
        "git-submodules"
    }

    fn elaborate(
        &self,
        ctx: &ExtensionContext,
        atom: &AutogenAtom,
        options: &BTreeMap<String, String>,
        state: &mut Elaboration,
    ) -> Result<()> {
        let user = value_str(&state.values, "github_user").unwrap_or_default();
        let repo = value_str(&state.values, "github_repo").unwrap_or_default();
        let url = match options.get("url") {
            Some(url) => url.clone(),
            None if !user.is_empty() && !repo.is_empty() => format!("https://github.com/{}/{}", user, repo),
            None => {
                return Err(Error::Extension {
                    name: "git-submodules".to_string(),
                    message: format!("{}: no repository url", atom.name),
                });
            }
        };
        let version = value_str(&state.values, "version").unwrap_or_default().to_string();
        let commit = value_str(&state.values, "sha")
            .filter(|s| !s.is_empty())
            .or_else(|| value_str(&state.values, "tag"))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::Extension {
                name: "git-submodules".to_string(),
                message: format!("{}: no commit or tag selected", atom.name),
            })?;
        let repo_name = if repo.is_empty() { atom.name.clone() } else { repo.to_string() };
        let prefix = options
            .get("prefix")
            .cloned()
            .unwrap_or_else(|| format!("{}-{}", repo_name, version));

        let scratch = scratch_dir(ctx, atom, "submodules")?;
        let checkout = scratch.join("repo");
        let opts = CloneOptions {
            recurse_submodules: true,
            ..Default::default()
        };
        ctx.vcs.clone_repo(&url, &checkout, &opts)?;
        ctx.vcs.checkout_commit(&checkout, &commit)?;

        let gitmodules = checkout.join(".gitmodules");
        let content = fs::read_to_string(&gitmodules).map_err(|e| Error::io_at(&gitmodules, e))?;
        let modules = parse_gitmodules(&content);
        info!("{}: bundling {} submodules at {}", atom.name, modules.len(), commit);

        let staged = scratch.join("staged");
        fs::create_dir_all(&staged).map_err(|e| Error::io_at(&staged, e))?;
        for module in &modules {
            let src = checkout.join(&module.path);
            if !src.is_dir() {
                return Err(Error::Extension {
                    name: "git-submodules".to_string(),
                    message: format!("{}: submodule {} was not checked out", atom.name, module.path),
                });
            }
            debug!("{}: adding submodule {}", atom.name, module.path);
            copy_tree(&src, &staged.join(&module.path))?;
        }

        let (name, bundle) = bundle_target(ctx, atom, state, "submodules");
        create_tar_xz(&staged, &bundle, &prefix)?;
        push_bundle(state, options, &name, bundle);
        fs::remove_dir_all(&scratch).map_err(|e| Error::io_at(&scratch, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gitmodules() {
        let content = r#"
[submodule "third_party/zlib"]
	path = third_party/zlib
	url = https://github.com/madler/zlib
[submodule "docs"]
	url = https://example.org/docs.git
	path = docs
; comment
[submodule "broken"]
	url = https://example.org/broken.git
"#;
        let modules = parse_gitmodules(content);
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].name, "third_party/zlib");
        assert_eq!(modules[0].path, "third_party/zlib");
        assert_eq!(modules[1].url, "https://example.org/docs.git");
    }

    #[test]
    fn test_copy_tree_skips_git() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join(".git")).unwrap();
        fs::create_dir_all(src.join("lib")).unwrap();
        fs::write(src.join(".git/HEAD"), "ref").unwrap();
        fs::write(src.join("lib/a.c"), "int a;").unwrap();
        let dest = dir.path().join("dest");
        copy_tree(&src, &dest).unwrap();
        assert!(dest.join("lib/a.c").exists());
        assert!(!dest.join(".git").exists());
    }
}
