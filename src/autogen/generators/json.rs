// src/autogen/generators/json.rs

//! `builtin-json`: versions selected from an arbitrary JSON API
//!
//! Paths use a small JSONPath subset: `$`, `.key`, `[n]`, `*` and `[*]`.
//! `src_uri_filter` is templated with the selected version before it is
//! evaluated, e.g. `$.releases[*].{{ version }}.url`.

use super::{Elaboration, Generator, asset_artefacts, inline_engine, tarball_name, version_values};
use crate::autogen::selector::Selected;
use crate::autogen::values::{Artefact, set_str};
use crate::error::{Error, Result};
use crate::http::{HttpClient, url_basename};
use crate::specs::{AutogenAtom, JsonProps};
use serde_json::Value;
use tracing::debug;

enum Step {
    Key(String),
    Index(usize),
    Wildcard,
}

fn parse_path(path: &str) -> Result<Vec<Step>> {
    let path = path.trim();
    let rest = path.strip_prefix('$').unwrap_or(path);
    let mut steps = Vec::new();
    let mut chars = rest.chars();
    let mut key = String::new();

    let flush = |key: &mut String, steps: &mut Vec<Step>| {
        if !key.is_empty() {
            let step = if key.as_str() == "*" { Step::Wildcard } else { Step::Key(key.clone()) };
            steps.push(step);
            key.clear();
        }
    };

    while let Some(c) = chars.next() {
        match c {
            '.' => flush(&mut key, &mut steps),
            '[' => {
                flush(&mut key, &mut steps);
                let mut inner = String::new();
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    inner.push(c);
                }
                let inner = inner.trim().trim_matches(|c| c == '\'' || c == '"');
                if inner == "*" {
                    steps.push(Step::Wildcard);
                } else if let Ok(index) = inner.parse::<usize>() {
                    steps.push(Step::Index(index));
                } else if !inner.is_empty() {
                    steps.push(Step::Key(inner.to_string()));
                } else {
                    return Err(Error::ParseError(format!("empty subscript in '{}'", path)));
                }
            }
            c => key.push(c),
        }
    }
    flush(&mut key, &mut steps);
    Ok(steps)
}

/// Every value of `doc` selected by `path`
pub fn json_path<'a>(doc: &'a Value, path: &str) -> Result<Vec<&'a Value>> {
    let mut current = vec![doc];
    for step in parse_path(path)? {
        let mut next = Vec::new();
        for value in current {
            match (&step, value) {
                (Step::Key(key), Value::Object(map)) => next.extend(map.get(key)),
                (Step::Index(i), Value::Array(list)) => next.extend(list.get(*i)),
                (Step::Wildcard, Value::Array(list)) => next.extend(list.iter()),
                (Step::Wildcard, Value::Object(map)) => next.extend(map.values()),
                _ => {}
            }
        }
        current = next;
    }
    Ok(current)
}

fn as_version(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub struct JsonGenerator {
    client: HttpClient,
}

impl JsonGenerator {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

fn props(atom: &AutogenAtom) -> Result<&JsonProps> {
    atom.json
        .as_ref()
        .filter(|p| !p.url.is_empty() && !p.filter.is_empty())
        .ok_or_else(|| Error::SpecParse {
            path: atom.name.clone(),
            message: "builtin-json needs json.url and json.filter".to_string(),
        })
}

impl Generator for JsonGenerator {
    fn name(&self) -> &'static str {
        "builtin-json"
    }

    fn process(&self, atom: &AutogenAtom, state: &mut Elaboration) -> Result<()> {
        let props = props(atom)?;
        let engine = inline_engine()?;
        let url = engine.render_str(&props.url, &state.values)?;
        let params = props
            .params
            .iter()
            .map(|(k, v)| -> Result<String> {
                let v = engine.render_str(v, &state.values)?;
                Ok(format!("{}={}", urlencoding::encode(k), urlencoding::encode(&v)))
            })
            .collect::<Result<Vec<_>>>()?;
        let url = if params.is_empty() {
            url
        } else {
            let sep = if url.contains('?') { '&' } else { '?' };
            format!("{}{}{}", url, sep, params.join("&"))
        };

        let document: Value = self.client.get_json(&url)?;
        for version in json_path(&document, &props.filter)?.into_iter().filter_map(as_version) {
            if !state.versions.contains(&version) {
                state.versions.push(version);
            }
        }
        debug!("{}: {} versions from {}", atom.name, state.versions.len(), url);
        state.document = document;
        Ok(())
    }

    fn set_version(&self, atom: &AutogenAtom, selected: &Selected, state: &mut Elaboration) -> Result<()> {
        let props = props(atom)?;
        let mut values = version_values(atom, selected, &state.values);

        if let Some(filter) = &props.src_uri_filter {
            let filter = inline_engine()?.render_str(filter, &values)?;
            let url = json_path(&state.document, &filter)?
                .into_iter()
                .find_map(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::NotFound(format!("{}: no download url at '{}'", atom.name, filter)))?;
            set_str(&mut state.values, "download_url", url.as_str());
            set_str(&mut values, "download_url", url.as_str());
            state.artefacts = if atom.assets.is_empty() {
                let name = if atom.tarball.is_empty() {
                    url_basename(&url).unwrap_or_else(|| format!("{}-{}", atom.name, selected.version))
                } else {
                    tarball_name(atom, &values, &url)?
                };
                vec![Artefact::remote(&name, &url)]
            } else {
                asset_artefacts(atom, &values, &[])?
            };
        } else {
            state.artefacts = asset_artefacts(atom, &values, &[])?;
        }
        Ok(())
    }
}
