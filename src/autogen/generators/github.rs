// src/autogen/generators/github.rs

//! `builtin-github`: releases and tags of a GitHub repository

use super::{Elaboration, Generator, GeneratorContext, asset_artefacts, tarball_name, version_values};
use crate::autogen::selector::Selected;
use crate::autogen::values::{Artefact, set_default, set_str};
use crate::error::{Error, Result};
use crate::specs::{AutogenAtom, GithubProps};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

const DEFAULT_PER_PAGE: usize = 100;
const DEFAULT_PAGE_LIMIT: usize = 3;

#[derive(Debug, Clone, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    tarball_url: Option<String>,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
struct TagCommit {
    sha: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Tag {
    name: String,
    commit: TagCommit,
    #[serde(default)]
    tarball_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Repository {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
}

/// `v1.2.3` → `1.2.3`
pub fn normalize_tag(tag: &str) -> String {
    match tag.strip_prefix('v') {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest.to_string(),
        _ => tag.to_string(),
    }
}

pub struct GithubGenerator {
    ctx: GeneratorContext,
}

impl GithubGenerator {
    pub fn new(ctx: GeneratorContext) -> Self {
        Self { ctx }
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("Accept".to_string(), "application/vnd.github+json".to_string())];
        if let Some(token) = &self.ctx.github_token {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
        headers
    }

    fn paged<T: serde::de::DeserializeOwned>(&self, props: &GithubProps, what: &str) -> Result<Vec<T>> {
        let per_page = props.per_page.unwrap_or(DEFAULT_PER_PAGE);
        let page_limit = props.page_limit.unwrap_or(DEFAULT_PAGE_LIMIT).max(1);
        let headers = self.headers();
        let mut items = Vec::new();
        for page in 1..=page_limit {
            let url = format!(
                "{}/repos/{}/{}/{}?per_page={}&page={}",
                self.ctx.github_api.trim_end_matches('/'),
                props.user,
                props.repo,
                what,
                per_page,
                page
            );
            let batch: Vec<T> = self.ctx.client.get_json_with(&url, &headers)?;
            let done = batch.len() < per_page;
            items.extend(batch);
            if done {
                break;
            }
        }
        Ok(items)
    }
}

fn props(atom: &AutogenAtom) -> Result<&GithubProps> {
    atom.github
        .as_ref()
        .filter(|p| !p.user.is_empty() && !p.repo.is_empty())
        .ok_or_else(|| Error::SpecParse {
            path: atom.name.clone(),
            message: "builtin-github needs github.user and github.repo".to_string(),
        })
}

struct TagFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl TagFilter {
    fn new(props: &GithubProps) -> Result<Self> {
        let compile = |p: &Option<String>| -> Result<Option<Regex>> {
            p.as_deref()
                .map(|p| Regex::new(p).map_err(|e| Error::ParseError(format!("{}: {}", p, e))))
                .transpose()
        };
        Ok(Self {
            include: compile(&props.tag_match)?,
            exclude: compile(&props.exclude)?,
        })
    }

    fn accepts(&self, tag: &str) -> bool {
        self.include.as_ref().is_none_or(|re| re.is_match(tag))
            && !self.exclude.as_ref().is_some_and(|re| re.is_match(tag))
    }
}

impl Generator for GithubGenerator {
    fn name(&self) -> &'static str {
        "builtin-github"
    }

    fn process(&self, atom: &AutogenAtom, state: &mut Elaboration) -> Result<()> {
        let props = props(atom)?;
        let filter = TagFilter::new(props)?;
        let query = props.query.as_deref().unwrap_or("releases");

        let tags: Vec<Tag> = self.paged(props, "tags")?;
        let shas: std::collections::BTreeMap<&str, &str> =
            tags.iter().map(|t| (t.name.as_str(), t.commit.sha.as_str())).collect();

        match query {
            "releases" => {
                let releases: Vec<Release> = self.paged(props, "releases")?;
                for release in releases {
                    if release.draft || (release.prerelease && !props.prerelease) {
                        continue;
                    }
                    if !filter.accepts(&release.tag_name) {
                        continue;
                    }
                    let version = normalize_tag(&release.tag_name);
                    let assets: Vec<Value> = release
                        .assets
                        .iter()
                        .map(|a| json!({ "name": a.name, "url": a.browser_download_url }))
                        .collect();
                    state.upstream.insert(
                        version.clone(),
                        json!({
                            "tag": release.tag_name,
                            "sha": shas.get(release.tag_name.as_str()).copied().unwrap_or_default(),
                            "tarball_url": release.tarball_url,
                            "assets": assets,
                        }),
                    );
                    state.versions.push(version);
                }
            }
            "tags" => {
                for tag in &tags {
                    if !filter.accepts(&tag.name) {
                        continue;
                    }
                    let version = normalize_tag(&tag.name);
                    state.upstream.insert(
                        version.clone(),
                        json!({
                            "tag": tag.name,
                            "sha": tag.commit.sha,
                            "tarball_url": tag.tarball_url,
                            "assets": [],
                        }),
                    );
                    state.versions.push(version);
                }
            }
            other => {
                return Err(Error::SpecParse {
                    path: atom.name.clone(),
                    message: format!("unknown github query '{}'", other),
                });
            }
        }
        debug!("{}: {} upstream versions", atom.name, state.versions.len());

        let repo_url = format!(
            "{}/repos/{}/{}",
            self.ctx.github_api.trim_end_matches('/'),
            props.user,
            props.repo
        );
        let repo: Repository = self.ctx.client.get_json_with(&repo_url, &self.headers()).unwrap_or_default();
        set_default(&mut state.values, "desc", repo.description.unwrap_or_default());
        set_default(
            &mut state.values,
            "homepage",
            repo.html_url
                .unwrap_or_else(|| format!("https://github.com/{}/{}", props.user, props.repo)),
        );
        set_str(&mut state.values, "github_user", props.user.as_str());
        set_str(&mut state.values, "github_repo", props.repo.as_str());
        Ok(())
    }

    fn set_version(&self, atom: &AutogenAtom, selected: &Selected, state: &mut Elaboration) -> Result<()> {
        let props = props(atom)?;
        let record = state
            .upstream
            .get(&selected.original_version)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{}: release {}", atom.name, selected.original_version)))?;
        let tag = record["tag"].as_str().unwrap_or(&selected.original_version).to_string();

        set_str(&mut state.values, "tag", tag.as_str());
        set_str(&mut state.values, "sha", record["sha"].as_str().unwrap_or_default());
        if let Some(url) = record["tarball_url"].as_str() {
            set_str(&mut state.values, "tarball_url", url);
        }

        let values = version_values(atom, selected, &state.values);
        let candidates: Vec<(String, String)> = record["assets"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|a| Some((a["name"].as_str()?.to_string(), a["url"].as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        state.artefacts = if atom.assets.is_empty() {
            let url = format!(
                "https://github.com/{}/{}/archive/refs/tags/{}.tar.gz",
                props.user, props.repo, tag
            );
            vec![Artefact::remote(&tarball_name(atom, &values, &url)?, &url)]
        } else {
            asset_artefacts(atom, &values, &candidates)?
        };
        Ok(())
    }
}
