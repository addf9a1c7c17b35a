// src/autogen/generators/pypi.rs

//! `builtin-pypi`: releases from the PyPI JSON API

use super::{Elaboration, Generator, GeneratorContext, asset_artefacts, version_values};
use crate::autogen::selector::Selected;
use crate::autogen::values::{Artefact, set_default, set_str, value_str};
use crate::error::{Error, Result};
use crate::specs::AutogenAtom;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Python minor versions covered by `python3+`
pub const SUPPORTED_PYTHON: [&str; 5] = ["3.9", "3.10", "3.11", "3.12", "3.13"];

#[derive(Debug, Clone, Deserialize)]
struct PypiFile {
    filename: String,
    url: String,
    #[serde(default)]
    packagetype: String,
    #[serde(default)]
    requires_python: Option<String>,
    #[serde(default)]
    yanked: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PypiInfo {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    home_page: Option<String>,
    #[serde(default)]
    project_url: Option<String>,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    requires_dist: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct PypiProject {
    #[serde(default)]
    info: PypiInfo,
    #[serde(default)]
    releases: BTreeMap<String, Vec<PypiFile>>,
}

/// Expand a `python_compat` declaration into `major.minor` versions
///
/// Accepts `python3+`, `python3_11` and `python3_{10..12}` tokens.
pub fn python_versions(compat: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in compat.split_whitespace() {
        if token == "python3+" {
            out.extend(SUPPORTED_PYTHON.iter().map(|s| s.to_string()));
        } else if let Some(range) = token
            .strip_prefix("python3_{")
            .and_then(|r| r.strip_suffix('}'))
        {
            if let Some((lo, hi)) = range.split_once("..")
                && let (Ok(lo), Ok(hi)) = (lo.parse::<u32>(), hi.parse::<u32>())
            {
                out.extend((lo..=hi).map(|minor| format!("3.{}", minor)));
            }
        } else if let Some(minor) = token.strip_prefix("python3_") {
            out.push(format!("3.{}", minor));
        }
    }
    out.dedup();
    out
}

fn parse_release(v: &str) -> Vec<u32> {
    v.split('.').map(|p| p.parse().unwrap_or(0)).collect()
}

fn cmp_release(a: &[u32], b: &[u32]) -> std::cmp::Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let (x, y) = (a.get(i).copied().unwrap_or(0), b.get(i).copied().unwrap_or(0));
        if x != y {
            return x.cmp(&y);
        }
    }
    std::cmp::Ordering::Equal
}

fn clause_admits(clause: &str, python: &str) -> bool {
    let clause = clause.trim();
    let ops = ["~=", "==", "!=", ">=", "<=", ">", "<"];
    let Some(op) = ops.iter().find(|op| clause.starts_with(**op)) else {
        return true;
    };
    let spec = clause[op.len()..].trim();
    let py = parse_release(python);

    if let Some(prefix) = spec.strip_suffix(".*") {
        let prefix = parse_release(prefix);
        let matches = py.len() >= prefix.len() && py[..prefix.len()] == prefix[..];
        return match *op {
            "==" => matches,
            "!=" => !matches,
            _ => true,
        };
    }

    let target = parse_release(spec);
    let ord = cmp_release(&py, &target);
    match *op {
        "==" => ord.is_eq(),
        "!=" => !ord.is_eq(),
        ">=" => ord.is_ge(),
        "<=" => ord.is_le(),
        ">" => ord.is_gt(),
        "<" => ord.is_lt(),
        "~=" => {
            let upper_len = target.len().saturating_sub(1).max(1);
            ord.is_ge() && py.len() >= upper_len && py[..upper_len] == target[..upper_len]
        }
        _ => true,
    }
}

/// Whether a `requires_python` specifier admits any of `pythons`
pub fn requires_python_admits(requires: Option<&str>, pythons: &[String]) -> bool {
    let Some(requires) = requires.map(str::trim).filter(|r| !r.is_empty()) else {
        return true;
    };
    if pythons.is_empty() {
        return true;
    }
    pythons
        .iter()
        .any(|py| requires.split(',').all(|clause| clause_admits(clause, py)))
}

/// Gentoo package name of a Python distribution
fn gentoo_name(dist: &str) -> String {
    dist.to_ascii_lowercase().replace(['_', '.'], "-")
}

/// `py_rdepend` built from `requires_dist`, skipping extras-only entries
fn rdepend_from(requires_dist: &[String]) -> String {
    let mut deps: Vec<String> = requires_dist
        .iter()
        .filter(|r| !r.contains("extra =="))
        .filter_map(|r| {
            let name: String = r
                .trim()
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
                .collect();
            (!name.is_empty()).then(|| format!("dev-python/{}[${{PYTHON_USEDEP}}]", gentoo_name(&name)))
        })
        .collect();
    deps.dedup();
    deps.join("\n\t")
}

pub struct PypiGenerator {
    ctx: GeneratorContext,
}

impl PypiGenerator {
    pub fn new(ctx: GeneratorContext) -> Self {
        Self { ctx }
    }
}

fn pypi_name(atom: &AutogenAtom) -> &str {
    atom.python
        .as_ref()
        .and_then(|p| p.pypi_name.as_deref())
        .unwrap_or(&atom.name)
}

impl Generator for PypiGenerator {
    fn name(&self) -> &'static str {
        "builtin-pypi"
    }

    fn process(&self, atom: &AutogenAtom, state: &mut Elaboration) -> Result<()> {
        let url = format!("{}/{}/json", self.ctx.pypi_url.trim_end_matches('/'), pypi_name(atom));
        let project: PypiProject = self.ctx.client.get_json(&url)?;

        let compat = value_str(&state.values, "python_compat").unwrap_or_default().to_string();
        let compat = if compat.is_empty() { "python3+".to_string() } else { compat };
        let pythons = python_versions(&compat);
        set_default(&mut state.values, "python_compat", compat.as_str());

        for (version, files) in &project.releases {
            let usable: Vec<&PypiFile> = files
                .iter()
                .filter(|f| !f.yanked)
                .filter(|f| requires_python_admits(f.requires_python.as_deref(), &pythons))
                .collect();
            if usable.is_empty() {
                continue;
            }
            let files: Vec<Value> = usable
                .iter()
                .map(|f| serde_json::json!({ "name": f.filename, "url": f.url, "packagetype": f.packagetype }))
                .collect();
            state.upstream.insert(version.clone(), Value::Array(files));
            state.versions.push(version.clone());
        }
        debug!("{}: {} usable PyPI releases", atom.name, state.versions.len());

        let info = &project.info;
        set_default(&mut state.values, "desc", info.summary.clone().unwrap_or_default());
        set_default(
            &mut state.values,
            "homepage",
            info.home_page
                .clone()
                .filter(|h| !h.is_empty())
                .or_else(|| info.project_url.clone())
                .unwrap_or_default(),
        );
        set_default(&mut state.values, "license", info.license.clone().unwrap_or_default());
        if let Some(requires) = &info.requires_dist {
            set_default(&mut state.values, "py_rdepend", rdepend_from(requires));
        }
        Ok(())
    }

    fn set_version(&self, atom: &AutogenAtom, selected: &Selected, state: &mut Elaboration) -> Result<()> {
        let files = state
            .upstream
            .get(&selected.original_version)
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{}: PyPI release {}", atom.name, selected.original_version)))?;
        let candidates: Vec<(String, String, String)> = files
            .iter()
            .filter_map(|f| {
                Some((
                    f["name"].as_str()?.to_string(),
                    f["url"].as_str()?.to_string(),
                    f["packagetype"].as_str().unwrap_or_default().to_string(),
                ))
            })
            .collect();

        let values = version_values(atom, selected, &state.values);
        state.artefacts = if atom.assets.is_empty() {
            let chosen = candidates
                .iter()
                .find(|(_, _, kind)| kind == "sdist")
                .or_else(|| candidates.first())
                .ok_or_else(|| Error::NotFound(format!("{}: no files for {}", atom.name, selected.version)))?;
            set_str(&mut state.values, "pypi_file", chosen.0.as_str());
            vec![Artefact::remote(&chosen.0, &chosen.1)]
        } else {
            let pairs: Vec<(String, String)> = candidates.into_iter().map(|(n, u, _)| (n, u)).collect();
            asset_artefacts(atom, &values, &pairs)?
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_versions() {
        assert_eq!(python_versions("python3+").len(), SUPPORTED_PYTHON.len());
        assert_eq!(python_versions("python3_{10..12}"), vec!["3.10", "3.11", "3.12"]);
        assert_eq!(python_versions("python3_11"), vec!["3.11"]);
    }

    #[test]
    fn test_requires_python() {
        let pythons = python_versions("python3_{10..12}");
        assert!(requires_python_admits(None, &pythons));
        assert!(requires_python_admits(Some(">=3.8"), &pythons));
        assert!(requires_python_admits(Some(">=3.7, <4"), &pythons));
        assert!(!requires_python_admits(Some(">=3.13"), &pythons));
        assert!(!requires_python_admits(Some("<3"), &pythons));
        assert!(requires_python_admits(Some("!=3.10.*"), &pythons));
        assert!(!requires_python_admits(Some("==2.7.*"), &pythons));
        assert!(requires_python_admits(Some("~=3.11"), &pythons));
    }

    #[test]
    fn test_rdepend_from_requires_dist() {
        let requires = vec![
            "requests (>=2.0)".to_string(),
            "typing_extensions>=4; python_version < \"3.11\"".to_string(),
            "pytest; extra == \"test\"".to_string(),
        ];
        assert_eq!(
            rdepend_from(&requires),
            "dev-python/requests[${PYTHON_USEDEP}]\n\tdev-python/typing-extensions[${PYTHON_USEDEP}]"
        );
    }
}
