// src/autogen/template.rs

//! Ebuild template engines
//!
//! - `helm`: `{{ .Values.key }}` placeholders
//! - `jinja2` / `pongo2`: `{{ key }}` placeholders
//! - `j2cli`: the external `j2` renderer, for templates that need loops
//!   or filters
//!
//! The built-in engines substitute placeholders only. Missing keys are an
//! error.

use super::values::Values;
use crate::error::{Error, Result};
use crate::specs::TemplateSpec;
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

pub trait TemplateEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Render a template string
    fn render_str(&self, template: &str, values: &Values) -> Result<String>;

    /// Render `template` into `target`
    fn render(&self, template: &Path, values: &Values, target: &Path) -> Result<()> {
        let source = fs::read_to_string(template).map_err(|e| Error::io_at(template, e))?;
        let rendered = self
            .render_str(&source, values)
            .map_err(|e| Error::TemplateRender(format!("{}: {}", template.display(), e)))?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
        }
        fs::write(target, rendered).map_err(|e| Error::io_at(target, e))
    }
}

fn scalar(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(scalar)
            .collect::<Result<Vec<_>>>()?
            .join(" "),
        Value::Object(_) => {
            return Err(Error::TemplateRender("cannot substitute a mapping".to_string()));
        }
    })
}

/// Placeholder substitution engine
pub struct PlaceholderEngine {
    name: String,
    pattern: Regex,
}

impl PlaceholderEngine {
    /// `{{ .Values.key }}` placeholders
    pub fn helm() -> Result<Self> {
        Self::with_pattern("helm", r"\{\{-?\s*\.Values\.([A-Za-z0-9_]+)\s*-?\}\}")
    }

    /// `{{ key }}` placeholders
    pub fn jinja(name: &str) -> Result<Self> {
        Self::with_pattern(name, r"\{\{-?\s*([A-Za-z0-9_]+)\s*-?\}\}")
    }

    fn with_pattern(name: &str, pattern: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            pattern: Regex::new(pattern).map_err(|e| Error::InitError(e.to_string()))?,
        })
    }
}

impl TemplateEngine for PlaceholderEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn render_str(&self, template: &str, values: &Values) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in self.pattern.captures_iter(template) {
            let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = values
                .get(key.as_str())
                .ok_or_else(|| Error::TemplateRender(format!("undefined value '{}'", key.as_str())))?;
            out.push_str(&template[last..whole.start()]);
            out.push_str(&scalar(value)?);
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Ok(out)
    }
}

/// `j2` subprocess engine
pub struct J2Cli {
    binary: PathBuf,
    opts: Vec<String>,
    fallback: PlaceholderEngine,
}

impl J2Cli {
    pub fn new(opts: &[String]) -> Result<Self> {
        Ok(Self {
            binary: PathBuf::from("j2"),
            opts: opts.to_vec(),
            fallback: PlaceholderEngine::jinja("j2cli")?,
        })
    }
}

impl TemplateEngine for J2Cli {
    fn name(&self) -> &str {
        "j2cli"
    }

    /// Short strings (file names, URLs) never need the full renderer
    fn render_str(&self, template: &str, values: &Values) -> Result<String> {
        self.fallback.render_str(template, values)
    }

    fn render(&self, template: &Path, values: &Values, target: &Path) -> Result<()> {
        let scratch = tempfile::tempdir()?;
        let data = scratch.path().join("values.json");
        let json = serde_json::to_vec(values).map_err(|e| Error::TemplateRender(e.to_string()))?;
        fs::write(&data, json).map_err(|e| Error::io_at(&data, e))?;

        debug!("j2 {} {}", template.display(), data.display());
        let output = Command::new(&self.binary)
            .arg("--format=json")
            .args(&self.opts)
            .arg(template)
            .arg(&data)
            .output()
            .map_err(|e| Error::TemplateRender(format!("Failed to run j2: {}", e)))?;
        if !output.status.success() {
            return Err(Error::TemplateRender(format!(
                "{}: {}",
                template.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
        }
        fs::write(target, &output.stdout).map_err(|e| Error::io_at(target, e))
    }
}

/// Engine lookup by the definition's `template.engine`
pub fn new_engine(spec: &TemplateSpec) -> Result<Box<dyn TemplateEngine>> {
    match spec.engine.as_str() {
        "" | "helm" => Ok(Box::new(PlaceholderEngine::helm()?)),
        "jinja2" | "pongo2" => Ok(Box::new(PlaceholderEngine::jinja(&spec.engine)?)),
        "j2cli" => Ok(Box::new(J2Cli::new(&spec.opts)?)),
        other => Err(Error::UnsupportedEngine(other.to_string())),
    }
}
