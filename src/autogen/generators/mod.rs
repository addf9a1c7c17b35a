// src/autogen/generators/mod.rs

//! Upstream version discovery
//!
//! A generator lists the upstream versions of an atom ([`Generator::process`])
//! and, once one is selected, fills the version-specific values and
//! artefacts ([`Generator::set_version`]).

mod custom;
mod dirlisting;
mod github;
mod json;
mod noop;
mod pypi;

pub use custom::CustomGenerator;
pub use dirlisting::DirListingGenerator;
pub use github::GithubGenerator;
pub use json::{JsonGenerator, json_path};
pub use noop::NoopGenerator;
pub use pypi::{PypiGenerator, python_versions, requires_python_admits};

use super::selector::Selected;
use super::template::TemplateEngine;
use super::values::{Artefact, Values, set_str};
use crate::error::{Error, Result};
use crate::http::{HttpClient, url_basename};
use crate::specs::AutogenAtom;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Per-atom generator state
#[derive(Debug, Clone, Default)]
pub struct Elaboration {
    /// Raw upstream versions
    pub versions: Vec<String>,
    /// Generator record per raw version (release, tag, file list, ...)
    pub upstream: BTreeMap<String, Value>,
    /// Whole upstream document when the generator keeps one
    pub document: Value,
    pub values: Values,
    pub artefacts: Vec<Artefact>,
}

pub trait Generator: Send + Sync {
    fn name(&self) -> &'static str;

    /// List upstream versions and version-independent values
    fn process(&self, atom: &AutogenAtom, state: &mut Elaboration) -> Result<()>;

    /// Fill the values and artefacts of the selected version
    fn set_version(&self, atom: &AutogenAtom, selected: &Selected, state: &mut Elaboration) -> Result<()>;
}

/// Shared collaborators of the generators
#[derive(Clone)]
pub struct GeneratorContext {
    pub client: HttpClient,
    pub github_api: String,
    pub github_token: Option<String>,
    pub pypi_url: String,
    /// Directory of the autogen specfile; custom scripts are relative to it
    pub spec_dir: PathBuf,
}

impl GeneratorContext {
    pub fn new(client: HttpClient, spec_dir: PathBuf) -> Self {
        Self {
            client,
            github_api: crate::vcs::GITHUB_API_URL.to_string(),
            github_token: None,
            pypi_url: "https://pypi.org/pypi".to_string(),
            spec_dir,
        }
    }
}

/// Generator lookup by the definition's `generator`
pub fn new_generator(name: &str, ctx: &GeneratorContext) -> Result<Box<dyn Generator>> {
    match name {
        "builtin-github" => Ok(Box::new(GithubGenerator::new(ctx.clone()))),
        "builtin-pypi" => Ok(Box::new(PypiGenerator::new(ctx.clone()))),
        "builtin-dirlisting" => Ok(Box::new(DirListingGenerator::new(ctx.client.clone()))),
        "builtin-json" => Ok(Box::new(JsonGenerator::new(ctx.client.clone()))),
        "builtin-noop" => Ok(Box::new(NoopGenerator)),
        "custom" => Ok(Box::new(CustomGenerator::new(ctx.spec_dir.clone()))),
        other => Err(Error::UnsupportedGenerator(other.to_string())),
    }
}

/// Placeholder engine used for file names and URLs in specfiles
pub(crate) fn inline_engine() -> Result<Box<dyn TemplateEngine>> {
    Ok(Box::new(super::template::PlaceholderEngine::jinja("inline")?))
}

/// Values available to specfile strings after selection
pub(crate) fn version_values(atom: &AutogenAtom, selected: &Selected, values: &Values) -> Values {
    let mut out = values.clone();
    set_str(&mut out, "pn", atom.name.as_str());
    set_str(&mut out, "version", selected.version.as_str());
    set_str(&mut out, "original_version", selected.original_version.as_str());
    out
}

/// Artefacts declared by the atom's `assets`
///
/// `candidates` are upstream `(file name, url)` pairs searched by an
/// asset's `matcher`.
pub(crate) fn asset_artefacts(
    atom: &AutogenAtom,
    values: &Values,
    candidates: &[(String, String)],
) -> Result<Vec<Artefact>> {
    let engine = inline_engine()?;
    let mut artefacts = Vec::new();
    for asset in &atom.assets {
        let url = if let Some(url) = &asset.url {
            engine.render_str(url, values)?
        } else if let Some(key) = &asset.use_value {
            values
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::NotFound(format!("{}: value '{}' for asset", atom.name, key)))?
        } else if let Some(matcher) = &asset.matcher {
            let re = Regex::new(matcher).map_err(|e| Error::ParseError(format!("{}: {}", matcher, e)))?;
            candidates
                .iter()
                .find(|(name, _)| re.is_match(name))
                .map(|(_, url)| url.clone())
                .ok_or_else(|| Error::NotFound(format!("{}: no upstream file matches '{}'", atom.name, matcher)))?
        } else {
            continue;
        };

        let name = if asset.name.is_empty() {
            let base = url_basename(&url).unwrap_or_else(|| atom.name.clone());
            format!("{}{}", asset.prefix.as_deref().unwrap_or_default(), base)
        } else {
            engine.render_str(&asset.name, values)?
        };
        artefacts.push(Artefact::remote(&name, &url));
    }
    Ok(artefacts)
}

/// File name for the atom's main tarball (`tarball` or `<pn>-<version>.tar.gz`)
pub(crate) fn tarball_name(atom: &AutogenAtom, values: &Values, url: &str) -> Result<String> {
    if !atom.tarball.is_empty() {
        return inline_engine()?.render_str(&atom.tarball, values);
    }
    let version = values.get("version").and_then(Value::as_str).unwrap_or_default();
    let ext = [".tar.gz", ".tar.xz", ".tar.bz2", ".zip", ".tgz"]
        .into_iter()
        .find(|ext| url.ends_with(ext))
        .unwrap_or(".tar.gz");
    Ok(format!("{}-{}{}", atom.name, version, ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specs::Asset;

    fn selected(v: &str) -> Selected {
        Selected {
            version: v.to_string(),
            original_version: format!("v{v}"),
        }
    }

    #[test]
    fn test_asset_artefacts() {
        let atom = AutogenAtom {
            name: "foo".to_string(),
            assets: vec![
                Asset {
                    name: "foo-{{ version }}-linux.tar.gz".to_string(),
                    matcher: Some("linux-amd64".to_string()),
                    ..Default::default()
                },
                Asset {
                    url: Some("https://example.org/{{ pn }}/{{ original_version }}.zip".to_string()),
                    prefix: Some("foo-".to_string()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let values = version_values(&atom, &selected("1.0"), &Values::new());
        let upstream = vec![
            ("foo-darwin.tar.gz".to_string(), "https://dl/darwin".to_string()),
            ("foo-linux-amd64.tar.gz".to_string(), "https://dl/linux".to_string()),
        ];
        let artefacts = asset_artefacts(&atom, &values, &upstream).unwrap();
        assert_eq!(artefacts[0].name, "foo-1.0-linux.tar.gz");
        assert_eq!(artefacts[0].src_uri, "https://dl/linux");
        assert_eq!(artefacts[1].name, "foo-v1.0.zip");
        assert_eq!(artefacts[1].src_uri, "https://example.org/foo/v1.0.zip");
    }

    #[test]
    fn test_tarball_name() {
        let mut atom = AutogenAtom {
            name: "foo".to_string(),
            ..Default::default()
        };
        let values = version_values(&atom, &selected("2.1"), &Values::new());
        assert_eq!(tarball_name(&atom, &values, "https://x/v2.1.tar.gz").unwrap(), "foo-2.1.tar.gz");
        atom.tarball = "{{ pn }}-src-{{ version }}.tar.xz".to_string();
        assert_eq!(tarball_name(&atom, &values, "").unwrap(), "foo-src-2.1.tar.xz");
    }

    #[test]
    fn test_unknown_generator() {
        let ctx = GeneratorContext::new(HttpClient::with_defaults().unwrap(), PathBuf::from("."));
        assert!(matches!(new_generator("builtin-cpan", &ctx), Err(Error::UnsupportedGenerator(_))));
        assert_eq!(new_generator("builtin-noop", &ctx).unwrap().name(), "builtin-noop");
    }
}
