// src/kit/profiles.rs

//! `profiles/` files: categories, repo_name and thirdpartymirrors

use super::write_if_changed;
use crate::error::{Error, Result};
use crate::specs::ThirdPartyMirror;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const CATEGORIES_FILE: &str = "profiles/categories";
pub const REPO_NAME_FILE: &str = "profiles/repo_name";
pub const THIRDPARTYMIRRORS_FILE: &str = "profiles/thirdpartymirrors";

/// Write the sorted unique categories, one per line
pub fn write_categories<S: AsRef<str>>(kit_dir: &Path, categories: &[S]) -> Result<bool> {
    let mut sorted: Vec<&str> = categories
        .iter()
        .map(|c| c.as_ref().trim())
        .filter(|c| !c.is_empty())
        .collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut content = sorted.join("\n");
    content.push('\n');
    write_if_changed(&kit_dir.join(CATEGORIES_FILE), content.as_bytes())
}

pub fn write_repo_name(kit_dir: &Path, name: &str) -> Result<bool> {
    write_if_changed(&kit_dir.join(REPO_NAME_FILE), format!("{}\n", name).as_bytes())
}

pub fn render_thirdpartymirrors(mirrors: &[ThirdPartyMirror]) -> String {
    let mut out = String::new();
    for mirror in mirrors {
        out.push_str(&format!("{}\t{}\n", mirror.name, mirror.uri.join(" ")));
    }
    out
}

pub fn write_thirdpartymirrors(kit_dir: &Path, mirrors: &[ThirdPartyMirror]) -> Result<bool> {
    write_if_changed(
        &kit_dir.join(THIRDPARTYMIRRORS_FILE),
        render_thirdpartymirrors(mirrors).as_bytes(),
    )
}

/// Read a kit's `profiles/thirdpartymirrors`; a missing file yields no aliases
pub fn parse_thirdpartymirrors(kit_dir: &Path) -> Result<BTreeMap<String, Vec<String>>> {
    let path = kit_dir.join(THIRDPARTYMIRRORS_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(Error::io_at(&path, e)),
    };

    let mut mirrors = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        if let Some(alias) = fields.next() {
            mirrors.insert(alias.to_string(), fields.map(str::to_string).collect());
        }
    }
    Ok(mirrors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_sorted_unique() {
        let dir = tempfile::tempdir().unwrap();
        assert!(write_categories(dir.path(), &["dev-lang", "app-misc", "dev-lang"]).unwrap());
        let content = fs::read_to_string(dir.path().join(CATEGORIES_FILE)).unwrap();
        assert_eq!(content, "app-misc\ndev-lang\n");
        assert!(!write_categories(dir.path(), &["app-misc", "dev-lang"]).unwrap());
    }

    #[test]
    fn test_thirdpartymirrors_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mirrors = vec![ThirdPartyMirror {
            name: "macaroni".to_string(),
            uri: vec!["https://a.example/".to_string(), "https://b.example/".to_string()],
        }];
        assert_eq!(
            render_thirdpartymirrors(&mirrors),
            "macaroni\thttps://a.example/ https://b.example/\n"
        );
        write_thirdpartymirrors(dir.path(), &mirrors).unwrap();
        let parsed = parse_thirdpartymirrors(dir.path()).unwrap();
        assert_eq!(parsed["macaroni"], mirrors[0].uri);
        assert!(parse_thirdpartymirrors(&dir.path().join("none")).unwrap().is_empty());
    }

    #[test]
    fn test_repo_name() {
        let dir = tempfile::tempdir().unwrap();
        write_repo_name(dir.path(), "mark-kit").unwrap();
        assert_eq!(fs::read_to_string(dir.path().join(REPO_NAME_FILE)).unwrap(), "mark-kit\n");
    }
}
