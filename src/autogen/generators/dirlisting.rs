// src/autogen/generators/dirlisting.rs

//! `builtin-dirlisting`: versions scraped from an HTTP directory index

use super::{Elaboration, Generator, asset_artefacts, inline_engine, tarball_name, version_values};
use crate::autogen::selector::Selected;
use crate::autogen::values::Artefact;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::specs::{AutogenAtom, DirProps};
use regex::Regex;
use serde_json::json;
use tracing::debug;
use url::Url;

pub struct DirListingGenerator {
    client: HttpClient,
}

impl DirListingGenerator {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

fn props(atom: &AutogenAtom) -> Result<&DirProps> {
    atom.dir
        .as_ref()
        .filter(|p| !p.url.is_empty() && !p.matcher.is_empty())
        .ok_or_else(|| Error::SpecParse {
            path: atom.name.clone(),
            message: "builtin-dirlisting needs dir.url and dir.matcher".to_string(),
        })
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::ParseError(format!("{}: {}", pattern, e)))
}

/// `(file name, absolute url, version)` of every matching link of `page`
///
/// The first capture group of `matcher` is the version; without one the
/// whole match is used.
pub(crate) fn scan_listing(
    page: &str,
    base: &str,
    matcher: &Regex,
    exclude: Option<&Regex>,
) -> Result<Vec<(String, String, String)>> {
    let href = compile(r#"(?i)href\s*=\s*["']([^"'#?]+)["']"#)?;
    let base = Url::parse(base).map_err(|e| Error::ParseError(format!("{}: {}", base, e)))?;
    let mut found = Vec::new();
    for caps in href.captures_iter(page) {
        let Some(link) = caps.get(1).map(|m| m.as_str()) else {
            continue;
        };
        let name = link.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
        if name.is_empty() || exclude.is_some_and(|re| re.is_match(name)) {
            continue;
        }
        let Some(m) = matcher.captures(name) else {
            continue;
        };
        let version = m.get(1).or_else(|| m.get(0)).map(|v| v.as_str().to_string()).unwrap_or_default();
        let url = base
            .join(link)
            .map_err(|e| Error::ParseError(format!("{}: {}", link, e)))?;
        if found.iter().any(|(n, _, _): &(String, String, String)| n == name) {
            continue;
        }
        found.push((name.to_string(), url.to_string(), version));
    }
    Ok(found)
}

impl Generator for DirListingGenerator {
    fn name(&self) -> &'static str {
        "builtin-dirlisting"
    }

    fn process(&self, atom: &AutogenAtom, state: &mut Elaboration) -> Result<()> {
        let props = props(atom)?;
        let url = inline_engine()?.render_str(&props.url, &state.values)?;
        let base = if url.ends_with('/') { url.clone() } else { format!("{}/", url) };
        let matcher = compile(&props.matcher)?;
        let exclude = props.excludes_matcher.as_deref().map(compile).transpose()?;

        let page = self.client.get_text(&base)?;
        for (name, link, version) in scan_listing(&page, &base, &matcher, exclude.as_ref())? {
            if state.upstream.contains_key(&version) {
                continue;
            }
            state.upstream.insert(version.clone(), json!({ "name": name, "url": link }));
            state.versions.push(version);
        }
        debug!("{}: {} versions listed at {}", atom.name, state.versions.len(), base);
        Ok(())
    }

    fn set_version(&self, atom: &AutogenAtom, selected: &Selected, state: &mut Elaboration) -> Result<()> {
        let record = state
            .upstream
            .get(&selected.original_version)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{}: listed version {}", atom.name, selected.original_version)))?;
        let name = record["name"].as_str().unwrap_or_default().to_string();
        let url = record["url"].as_str().unwrap_or_default().to_string();

        let values = version_values(atom, selected, &state.values);
        state.artefacts = if atom.assets.is_empty() {
            let file = if atom.tarball.is_empty() { name } else { tarball_name(atom, &values, &url)? };
            vec![Artefact::remote(&file, &url)]
        } else {
            asset_artefacts(atom, &values, &[(name, url)])?
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
<a href="../">../</a>
<a href="pkg-1.0.tar.gz">pkg-1.0.tar.gz</a>
<a href="pkg-1.1.tar.gz">pkg-1.1.tar.gz</a>
<a href="pkg-1.2-rc1.tar.gz">pkg-1.2-rc1.tar.gz</a>
<a href="/mirror/pkg/pkg-1.1.tar.gz.sig">sig</a>
<a href='other-3.0.tar.gz'>other</a>
</body></html>"#;

    #[test]
    fn test_scan_listing() {
        let matcher = Regex::new(r"^pkg-([0-9.]+(?:-rc[0-9]+)?)\.tar\.gz$").unwrap();
        let exclude = Regex::new("-rc").unwrap();
        let found = scan_listing(PAGE, "https://dl.example.org/pkg/", &matcher, Some(&exclude)).unwrap();
        let versions: Vec<&str> = found.iter().map(|(_, _, v)| v.as_str()).collect();
        assert_eq!(versions, vec!["1.0", "1.1"]);
        assert_eq!(found[1].1, "https://dl.example.org/pkg/pkg-1.1.tar.gz");
    }

    #[test]
    fn test_absolute_links() {
        let matcher = Regex::new(r"\.sig$").unwrap();
        let found = scan_listing(PAGE, "https://dl.example.org/pkg/", &matcher, None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, "https://dl.example.org/mirror/pkg/pkg-1.1.tar.gz.sig");
        assert_eq!(found[0].2, ".sig");
    }
}
