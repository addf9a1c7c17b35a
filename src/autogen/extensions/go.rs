// src/autogen/extensions/go.rs

//! Go module vendoring
//!
//! Every module listed in `go.sum` is fetched from the module proxy into a
//! `GOMODCACHE`-shaped tree (`go-mod/cache/download/<module>/@v/...`) which
//! is then bundled as a single xz tarball.
//!
//! Options: `proxy` (default `https://proxy.golang.org`), `dir` (directory
//! of the `go.mod` inside the sources), `mirror`.

use super::{Extension, ExtensionContext, bundle_target, prepare_source, push_bundle, scratch_dir};
use crate::autogen::archive::create_tar_xz;
use crate::autogen::generators::Elaboration;
use crate::error::{Error, Result};
use crate::specs::AutogenAtom;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

pub const DEFAULT_GO_PROXY: &str = "https://proxy.golang.org";
const DOWNLOAD_WORKERS: usize = 8;

/// Module proxy case escaping: `github.com/BurntSushi` → `github.com/!burnt!sushi`
pub fn escape_module_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if c.is_ascii_uppercase() {
            out.push('!');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// A module version referenced by `go.sum`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GoModule {
    pub path: String,
    pub version: String,
    /// Only the `go.mod` file is needed
    pub mod_only: bool,
}

/// Parse `go.sum`; a module with both lines needs its zip
pub fn parse_go_sum(content: &str) -> Vec<GoModule> {
    let mut wanted: BTreeMap<(String, String), bool> = BTreeMap::new();
    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let (Some(path), Some(version)) = (fields.next(), fields.next()) else {
            continue;
        };
        let (version, mod_only) = match version.strip_suffix("/go.mod") {
            Some(v) => (v, true),
            None => (version, false),
        };
        let entry = wanted.entry((path.to_string(), version.to_string())).or_insert(true);
        *entry &= mod_only;
    }
    wanted
        .into_iter()
        .map(|((path, version), mod_only)| GoModule { path, version, mod_only })
        .collect()
}

fn find_go_sum(root: &Path, dir: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = dir {
        let path = root.join(dir).join("go.sum");
        return path.exists().then_some(path).ok_or_else(|| Error::Extension {
            name: "go".to_string(),
            message: format!("no go.sum in {}", dir),
        });
    }
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name() == "go.sum")
        .min_by_key(|e| e.depth())
        .map(|e| e.into_path())
        .ok_or_else(|| Error::Extension {
            name: "go".to_string(),
            message: format!("no go.sum under {}", root.display()),
        })
}

pub struct GoExtension;

impl GoExtension {
    fn download(ctx: &ExtensionContext, proxy: &str, cache: &Path, module: &GoModule) -> Result<()> {
        let escaped = escape_module_path(&module.path);
        let version = escape_module_path(&module.version);
        let dir = cache.join(&escaped).join("@v");
        fs::create_dir_all(&dir).map_err(|e| Error::io_at(&dir, e))?;

        let mut exts = vec!["mod"];
        if !module.mod_only {
            exts.push("zip");
        }
        for ext in exts {
            let dest = dir.join(format!("{}.{}", version, ext));
            if dest.exists() {
                debug!("{} already cached", dest.display());
                continue;
            }
            let url = format!("{}/{}/@v/{}.{}", proxy.trim_end_matches('/'), escaped, version, ext);
            ctx.client.download_file(&url, &dest, None)?;
        }
        Ok(())
    }
}

impl Extension for GoExtension {
    fn name(&self) -> &'static str {
        "go"
    }

    fn elaborate(
        &self,
        ctx: &ExtensionContext,
        atom: &AutogenAtom,
        options: &BTreeMap<String, String>,
        state: &mut Elaboration,
    ) -> Result<()> {
        let scratch = scratch_dir(ctx, atom, "go")?;
        let root = prepare_source(ctx, atom, state, &scratch)?;
        let go_sum = find_go_sum(&root, options.get("dir").map(String::as_str))?;
        let content = fs::read_to_string(&go_sum).map_err(|e| Error::io_at(&go_sum, e))?;
        let modules = parse_go_sum(&content);
        info!("{}: vendoring {} Go modules", atom.name, modules.len());

        let proxy = options.get("proxy").map(String::as_str).unwrap_or(DEFAULT_GO_PROXY);
        let gomod = scratch.join("go-mod");
        let cache = gomod.join("cache").join("download");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(DOWNLOAD_WORKERS)
            .build()
            .map_err(|e| Error::InitError(e.to_string()))?;
        pool.install(|| modules.par_iter().try_for_each(|m| Self::download(ctx, proxy, &cache, m)))?;

        let (name, bundle) = bundle_target(ctx, atom, state, "go");
        create_tar_xz(&gomod, &bundle, "go-mod")?;
        push_bundle(state, options, &name, bundle);
        fs::remove_dir_all(&scratch).map_err(|e| Error::io_at(&scratch, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_module_path() {
        assert_eq!(escape_module_path("github.com/BurntSushi/toml"), "github.com/!burnt!sushi/toml");
        assert_eq!(escape_module_path("golang.org/x/mod"), "golang.org/x/mod");
    }

    #[test]
    fn test_parse_go_sum() {
        let sum = "\
github.com/google/go-cmp v0.6.0 h1:abc=
github.com/google/go-cmp v0.6.0/go.mod h1:def=
golang.org/x/mod v0.14.0/go.mod h1:ghi=

golang.org/x/sync v0.5.0 h1:jkl=
";
        let modules = parse_go_sum(sum);
        assert_eq!(modules.len(), 3);
        assert_eq!(modules[0].path, "github.com/google/go-cmp");
        assert!(!modules[0].mod_only);
        assert_eq!(modules[1].path, "golang.org/x/mod");
        assert!(modules[1].mod_only);
        assert!(!modules[2].mod_only);
    }

    #[test]
    fn test_find_go_sum_prefers_shallowest() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("gopls/internal")).unwrap();
        fs::write(dir.path().join("gopls/go.sum"), "").unwrap();
        fs::write(dir.path().join("gopls/internal/go.sum"), "").unwrap();
        assert_eq!(find_go_sum(dir.path(), None).unwrap(), dir.path().join("gopls/go.sum"));
        assert!(find_go_sum(dir.path(), Some("missing")).is_err());
    }
}
