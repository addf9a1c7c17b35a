// src/autogen/generators/noop.rs

//! `builtin-noop`: a single version declared in the specfile

use super::{Elaboration, Generator, asset_artefacts, version_values};
use crate::autogen::selector::Selected;
use crate::autogen::values::value_str;
use crate::error::{Error, Result};
use crate::specs::AutogenAtom;

pub struct NoopGenerator;

impl Generator for NoopGenerator {
    fn name(&self) -> &'static str {
        "builtin-noop"
    }

    fn process(&self, atom: &AutogenAtom, state: &mut Elaboration) -> Result<()> {
        let version = atom
            .version
            .clone()
            .or_else(|| value_str(&state.values, "version").filter(|v| !v.is_empty()).map(str::to_string))
            .ok_or_else(|| Error::SpecParse {
                path: atom.name.clone(),
                message: "builtin-noop needs a version".to_string(),
            })?;
        state.versions.push(version);
        Ok(())
    }

    fn set_version(&self, atom: &AutogenAtom, selected: &Selected, state: &mut Elaboration) -> Result<()> {
        let values = version_values(atom, selected, &state.values);
        state.artefacts = asset_artefacts(atom, &values, &[])?;
        Ok(())
    }
}
