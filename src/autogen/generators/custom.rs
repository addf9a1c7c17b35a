// src/autogen/generators/custom.rs

//! `custom`: an external script acting as a generator
//!
//! The script is called as `<script> <phase> <input.yml> <output.yml>`
//! with `phase` being `process` or `set-version`. The input holds the atom
//! and its current values (plus `version` / `original_version` for
//! `set-version`); the output may carry `values`, `versions` and
//! `artefacts`.

use super::{Elaboration, Generator};
use crate::autogen::selector::Selected;
use crate::autogen::values::{Artefact, Values};
use crate::error::{Error, Result};
use crate::specs::AutogenAtom;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

#[derive(Serialize)]
struct ScriptInput<'a> {
    atom: &'a AutogenAtom,
    values: &'a Values,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_version: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
struct ScriptOutput {
    #[serde(default)]
    values: Values,
    #[serde(default)]
    versions: Vec<String>,
    #[serde(default)]
    artefacts: Option<Vec<Artefact>>,
}

pub struct CustomGenerator {
    spec_dir: PathBuf,
}

impl CustomGenerator {
    pub fn new(spec_dir: PathBuf) -> Self {
        Self { spec_dir }
    }

    fn script(&self, atom: &AutogenAtom) -> Result<PathBuf> {
        let script = atom
            .custom
            .as_ref()
            .map(|c| c.script.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::SpecParse {
                path: atom.name.clone(),
                message: "custom generator needs custom.script".to_string(),
            })?;
        let path = Path::new(script);
        Ok(if path.is_absolute() { path.to_path_buf() } else { self.spec_dir.join(path) })
    }

    fn call(&self, script: &Path, phase: &str, input: &ScriptInput<'_>) -> Result<ScriptOutput> {
        let failed = |message: String| Error::ExternalScript {
            script: script.display().to_string(),
            message,
        };
        let scratch = tempfile::tempdir()?;
        let input_path = scratch.path().join("input.yml");
        let output_path = scratch.path().join("output.yml");
        let data = serde_yaml::to_string(input).map_err(|e| failed(e.to_string()))?;
        fs::write(&input_path, data).map_err(|e| Error::io_at(&input_path, e))?;

        debug!("{} {} {}", script.display(), phase, input_path.display());
        let output = Command::new(script)
            .arg(phase)
            .arg(&input_path)
            .arg(&output_path)
            .current_dir(&self.spec_dir)
            .output()
            .map_err(|e| failed(e.to_string()))?;
        if !output.status.success() {
            return Err(failed(format!(
                "{} exited with {}: {}",
                phase,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if !output_path.exists() {
            return Ok(ScriptOutput::default());
        }
        let content = fs::read_to_string(&output_path).map_err(|e| Error::io_at(&output_path, e))?;
        serde_yaml::from_str(&content).map_err(|e| failed(format!("invalid output: {}", e)))
    }
}

impl Generator for CustomGenerator {
    fn name(&self) -> &'static str {
        "custom"
    }

    fn process(&self, atom: &AutogenAtom, state: &mut Elaboration) -> Result<()> {
        let script = self.script(atom)?;
        let input = ScriptInput {
            atom,
            values: &state.values,
            version: None,
            original_version: None,
        };
        let output = self.call(&script, "process", &input)?;
        state.values.extend(output.values);
        state.versions.extend(output.versions);
        if let Some(artefacts) = output.artefacts {
            state.artefacts = artefacts;
        }
        Ok(())
    }

    fn set_version(&self, atom: &AutogenAtom, selected: &Selected, state: &mut Elaboration) -> Result<()> {
        let script = self.script(atom)?;
        let input = ScriptInput {
            atom,
            values: &state.values,
            version: Some(&selected.version),
            original_version: Some(&selected.original_version),
        };
        let output = self.call(&script, "set-version", &input)?;
        state.values.extend(output.values);
        if let Some(artefacts) = output.artefacts {
            state.artefacts = artefacts;
        }
        Ok(())
    }
}
