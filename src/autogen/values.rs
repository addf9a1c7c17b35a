// src/autogen/values.rs

//! Template values and artefacts of an elaborated atom

use crate::specs::AutogenAtom;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Value map handed to templates
pub type Values = BTreeMap<String, Value>;

/// Keys every template can rely on
pub const TEMPLATE_KEYS: [&str; 15] = [
    "pn",
    "category",
    "version",
    "original_version",
    "artefacts",
    "src_uri",
    "sha",
    "desc",
    "homepage",
    "license",
    "python_compat",
    "py_depend",
    "py_bdepend",
    "py_rdepend",
    "py_pdepend",
];

/// A distfile of the generated package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artefact {
    /// Distfile name
    pub name: String,
    /// Download URL (or `mirror://` URI for locally built bundles)
    pub src_uri: String,
    /// Built locally by an extension; `path` holds the file
    #[serde(default)]
    pub local: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Artefact {
    pub fn remote(name: &str, src_uri: &str) -> Self {
        Self {
            name: name.to_string(),
            src_uri: src_uri.to_string(),
            local: false,
            path: None,
        }
    }

    pub fn local(name: &str, src_uri: &str, path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            src_uri: src_uri.to_string(),
            local: true,
            path: Some(path),
        }
    }

    /// `SRC_URI` line; the `->` rename is only emitted when needed
    pub fn src_uri_line(&self) -> String {
        let basename = self.src_uri.rsplit('/').next().unwrap_or_default();
        if basename == self.name {
            self.src_uri.clone()
        } else {
            format!("{} -> {}", self.src_uri, self.name)
        }
    }
}

/// Read a value as a string; `None` for missing or non-scalar values
pub fn value_str<'a>(values: &'a Values, key: &str) -> Option<&'a str> {
    values.get(key).and_then(Value::as_str)
}

pub fn set_str(values: &mut Values, key: &str, value: impl Into<String>) {
    values.insert(key.to_string(), Value::String(value.into()));
}

/// Set `key` only when it is absent or empty
pub fn set_default(values: &mut Values, key: &str, value: impl Into<String>) {
    let empty = match values.get(key) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    };
    if empty {
        set_str(values, key, value);
    }
}

/// Initial values for an atom: identity keys plus its `vars`
pub fn initial_values(atom: &AutogenAtom) -> Values {
    let mut values = Values::new();
    for key in TEMPLATE_KEYS {
        values.insert(key.to_string(), Value::String(String::new()));
    }
    values.insert("artefacts".to_string(), Value::Array(Vec::new()));
    set_str(&mut values, "pn", atom.name.as_str());
    set_str(&mut values, "category", atom.category.as_str());
    if let Some(python) = &atom.python {
        let fields = [
            ("python_compat", &python.python_compat),
            ("py_depend", &python.py_depend),
            ("py_bdepend", &python.py_bdepend),
            ("py_rdepend", &python.py_rdepend),
            ("py_pdepend", &python.py_pdepend),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                set_str(&mut values, key, value.as_str());
            }
        }
    }
    for (key, value) in &atom.vars {
        values.insert(key.clone(), value.clone());
    }
    values
}

/// Publish the artefact list as `artefacts` and `src_uri`
pub fn set_artefacts(values: &mut Values, artefacts: &[Artefact]) {
    let list = artefacts
        .iter()
        .map(|a| serde_json::json!({ "name": a.name, "src_uri": a.src_uri }))
        .collect();
    values.insert("artefacts".to_string(), Value::Array(list));
    let lines: Vec<String> = artefacts.iter().map(Artefact::src_uri_line).collect();
    set_str(values, "src_uri", lines.join("\n\t"));
}
