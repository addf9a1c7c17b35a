// src/autogen/extensions/custom.rs

//! `custom` extension: `<script> <input.yml> <output.yml>`
//!
//! The input carries the atom and its values; the output may add `values`
//! and `artefacts`. Relative artefact paths resolve against the download
//! directory.

use super::{Extension, ExtensionContext};
use crate::autogen::generators::Elaboration;
use crate::autogen::values::{Artefact, Values};
use crate::error::{Error, Result};
use crate::specs::AutogenAtom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::debug;

#[derive(Serialize)]
struct ScriptInput<'a> {
    atom: &'a AutogenAtom,
    values: &'a Values,
    artefacts: &'a [Artefact],
    download_dir: &'a Path,
}

#[derive(Debug, Default, Deserialize)]
struct ScriptOutput {
    #[serde(default)]
    values: Values,
    #[serde(default)]
    artefacts: Vec<Artefact>,
}

pub struct CustomExtension;

impl Extension for CustomExtension {
    fn name(&self) -> &'static str {
        "custom"
    }

    fn elaborate(
        &self,
        ctx: &ExtensionContext,
        atom: &AutogenAtom,
        options: &BTreeMap<String, String>,
        state: &mut Elaboration,
    ) -> Result<()> {
        let script = options.get("script").ok_or_else(|| Error::Extension {
            name: "custom".to_string(),
            message: format!("{}: missing script option", atom.name),
        })?;
        let script = if Path::new(script).is_absolute() {
            Path::new(script).to_path_buf()
        } else {
            ctx.spec_dir.join(script)
        };
        let failed = |message: String| Error::ExternalScript {
            script: script.display().to_string(),
            message,
        };

        let scratch = tempfile::tempdir_in(&ctx.work_dir)?;
        let input_path = scratch.path().join("input.yml");
        let output_path = scratch.path().join("output.yml");
        let input = ScriptInput {
            atom,
            values: &state.values,
            artefacts: &state.artefacts,
            download_dir: &ctx.download_dir,
        };
        let data = serde_yaml::to_string(&input).map_err(|e| failed(e.to_string()))?;
        fs::write(&input_path, data).map_err(|e| Error::io_at(&input_path, e))?;

        debug!("{} {}", script.display(), input_path.display());
        let output = Command::new(&script)
            .arg(&input_path)
            .arg(&output_path)
            .current_dir(&ctx.spec_dir)
            .output()
            .map_err(|e| failed(e.to_string()))?;
        if !output.status.success() {
            return Err(failed(format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if !output_path.exists() {
            return Ok(());
        }

        let content = fs::read_to_string(&output_path).map_err(|e| Error::io_at(&output_path, e))?;
        let result: ScriptOutput = serde_yaml::from_str(&content).map_err(|e| failed(format!("invalid output: {}", e)))?;
        state.values.extend(result.values);
        for mut artefact in result.artefacts {
            if let Some(path) = &artefact.path
                && path.is_relative()
            {
                artefact.path = Some(ctx.download_dir.join(path));
            }
            artefact.local = artefact.path.is_some();
            state.artefacts.retain(|a| a.name != artefact.name);
            state.artefacts.push(artefact);
        }
        Ok(())
    }
}
