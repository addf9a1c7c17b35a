// src/specs/autogen.rs

//! Autogen specfiles
//!
//! ```yaml
//! version: "1"
//! go-tools:
//!   generator: builtin-github
//!   template:
//!     engine: helm
//!   defaults:
//!     category: dev-go
//!     template: templates/go.tmpl
//!     extensions: [go]
//!   packages:
//!     - gopls:
//!         github:
//!           user: golang
//!           repo: tools
//!         selector: [">=0.15"]
//! ```

use super::{load_yaml, spec_dir};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutogenSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub definitions: BTreeMap<String, AutogenDefinition>,

    #[serde(skip)]
    pub spec_dir: PathBuf,
}

impl AutogenSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let mut spec: AutogenSpec = load_yaml(path)?;
        spec.spec_dir = spec_dir(path);
        for (name, def) in &spec.definitions {
            if def.generator.is_empty() {
                return Err(Error::SpecParse {
                    path: path.display().to_string(),
                    message: format!("definition '{}' has no generator", name),
                });
            }
        }
        Ok(spec)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutogenDefinition {
    pub generator: String,
    #[serde(default)]
    pub template: TemplateSpec,
    #[serde(default)]
    pub defaults: AutogenAtom,
    #[serde(default)]
    pub packages: Vec<BTreeMap<String, AutogenAtom>>,
    #[serde(default)]
    pub extensions: BTreeMap<String, ExtensionSpec>,
}

impl AutogenDefinition {
    /// Package atoms in specfile order with defaults merged in
    pub fn atoms(&self) -> Vec<AutogenAtom> {
        let mut atoms = Vec::new();
        for entry in &self.packages {
            for (name, atom) in entry {
                let mut atom = atom.clone();
                if atom.name.is_empty() {
                    atom.name = name.clone();
                }
                atom.merge_defaults(&self.defaults);
                atoms.push(atom);
            }
        }
        atoms
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateSpec {
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub opts: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtensionSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// `kind: string` replaces every `match` with `replace`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transform {
    pub kind: String,
    #[serde(rename = "match")]
    pub pattern: String,
    #[serde(default)]
    pub replace: String,
}

/// An upstream file to ship with the package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Local file name (templated); defaults to the URL basename
    #[serde(default)]
    pub name: String,
    /// Regex over upstream file names (GitHub release assets, PyPI files)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    /// Value key holding the download URL (e.g. `tarball_url`)
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Explicit download URL (templated)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubProps {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub repo: String,
    /// `releases` (default) or `tags`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_page: Option<usize>,
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub tag_match: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirProps {
    pub url: String,
    pub matcher: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excludes_matcher: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonProps {
    pub url: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Path selecting the version strings
    pub filter: String,
    /// Path selecting the download URL of the selected version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_uri_filter: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PythonProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pypi_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_compat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub py_depend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub py_bdepend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub py_rdepend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub py_pdepend: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomProps {
    pub script: String,
}

/// One package entry of a definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutogenAtom {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tarball: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub files_dir: String,
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,
    #[serde(default)]
    pub selector: Vec<String>,
    #[serde(default)]
    pub transforms: Vec<Transform>,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GithubProps>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<DirProps>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<JsonProps>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python: Option<PythonProps>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<CustomProps>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_artefacts: Option<bool>,
    /// Fixed version; skips upstream selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

fn fill_string(target: &mut String, default: &str) {
    if target.is_empty() {
        target.push_str(default);
    }
}

fn fill_vec<T: Clone>(target: &mut Vec<T>, default: &[T]) {
    if target.is_empty() {
        target.extend_from_slice(default);
    }
}

fn fill_option<T: Clone>(target: &mut Option<T>, default: &Option<T>) {
    if target.is_none() {
        *target = default.clone();
    }
}

impl AutogenAtom {
    /// Fill every unset field from `defaults`; `vars` are merged key by key
    pub fn merge_defaults(&mut self, defaults: &AutogenAtom) {
        fill_string(&mut self.tarball, &defaults.tarball);
        fill_string(&mut self.category, &defaults.category);
        fill_string(&mut self.template, &defaults.template);
        fill_string(&mut self.files_dir, &defaults.files_dir);
        for (key, value) in &defaults.vars {
            self.vars.entry(key.clone()).or_insert_with(|| value.clone());
        }
        fill_vec(&mut self.selector, &defaults.selector);
        fill_vec(&mut self.transforms, &defaults.transforms);
        fill_vec(&mut self.assets, &defaults.assets);
        fill_vec(&mut self.extensions, &defaults.extensions);
        fill_option(&mut self.github, &defaults.github);
        fill_option(&mut self.dir, &defaults.dir);
        fill_option(&mut self.json, &defaults.json);
        fill_option(&mut self.python, &defaults.python);
        fill_option(&mut self.custom, &defaults.custom);
        fill_option(&mut self.ignore_artefacts, &defaults.ignore_artefacts);
    }

    /// `category/name`
    pub fn catpkg(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }

    pub fn ignore_artefacts(&self) -> bool {
        self.ignore_artefacts.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SPEC: &str = r#"
version: "1"
go-tools:
  generator: builtin-github
  template:
    engine: helm
  defaults:
    category: dev-go
    template: templates/go.tmpl
    extensions: [go]
    vars:
      license: BSD
  extensions:
    go:
      name: go
      options:
        mirror: mirror://macaroni
  packages:
    - gopls:
        github:
          user: golang
          repo: tools
          query: tags
          match: "^gopls/"
        selector: [">=0.15"]
        transforms:
          - kind: string
            match: "gopls/v"
            replace: ""
        vars:
          license: Apache-2.0
    - delve:
        category: dev-util
"#;

    #[test]
    fn test_load_and_merge_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autogen.yml");
        fs::write(&path, SPEC).unwrap();

        let spec = AutogenSpec::load(&path).unwrap();
        assert_eq!(spec.version.as_deref(), Some("1"));
        let def = &spec.definitions["go-tools"];
        assert_eq!(def.template.engine, "helm");
        assert_eq!(def.extensions["go"].options["mirror"], "mirror://macaroni");

        let atoms = def.atoms();
        assert_eq!(atoms.len(), 2);
        assert_eq!(atoms[0].name, "gopls");
        assert_eq!(atoms[0].catpkg(), "dev-go/gopls");
        assert_eq!(atoms[0].extensions, vec!["go".to_string()]);
        assert_eq!(atoms[0].vars["license"], Value::from("Apache-2.0"));
        assert_eq!(atoms[0].transforms[0].pattern, "gopls/v");
        assert_eq!(atoms[0].github.as_ref().unwrap().tag_match.as_deref(), Some("^gopls/"));
        assert_eq!(atoms[1].catpkg(), "dev-util/delve");
        assert_eq!(atoms[1].vars["license"], Value::from("BSD"));
    }

    #[test]
    fn test_definition_without_generator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autogen.yml");
        fs::write(&path, "broken:\n  generator: \"\"\n").unwrap();
        assert!(matches!(AutogenSpec::load(&path), Err(Error::SpecParse { .. })));
    }
}
