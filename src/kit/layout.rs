// src/kit/layout.rs

//! `metadata/layout.conf`

use super::write_if_changed;
use crate::error::Result;
use crate::specs::TargetKit;
use std::fmt;
use std::path::Path;

pub const LAYOUT_CONF: &str = "metadata/layout.conf";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutConf {
    pub repo_name: String,
    pub masters: Vec<String>,
    pub aliases: Vec<String>,
}

impl LayoutConf {
    pub fn from_target(target: &TargetKit) -> Self {
        Self {
            repo_name: target.name.clone(),
            masters: target.metadata.masters.clone(),
            aliases: target.metadata.aliases.clone(),
        }
    }

    /// Write the file under `kit_dir`; returns whether it changed
    pub fn write(&self, kit_dir: &Path) -> Result<bool> {
        write_if_changed(&kit_dir.join(LAYOUT_CONF), self.to_string().as_bytes())
    }
}

impl fmt::Display for LayoutConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "repo_name = {}", self.repo_name)?;
        writeln!(f, "thin-manifests = true")?;
        writeln!(f, "sign-manifests = false")?;
        writeln!(f, "profile-formats = portage-2")?;
        writeln!(f, "cache-formats = md5-dict")?;
        if !self.masters.is_empty() {
            writeln!(f, "masters = {}", self.masters.join(" "))?;
        }
        if !self.aliases.is_empty() {
            writeln!(f, "aliases = {}", self.aliases.join(" "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_minimal() {
        let layout = LayoutConf {
            repo_name: "core-kit".to_string(),
            masters: vec![],
            aliases: vec![],
        };
        assert_eq!(
            layout.to_string(),
            "repo_name = core-kit\nthin-manifests = true\nsign-manifests = false\n\
             profile-formats = portage-2\ncache-formats = md5-dict\n"
        );
    }

    #[test]
    fn test_render_masters_aliases_and_write() {
        let layout = LayoutConf {
            repo_name: "mark-kit".to_string(),
            masters: vec!["core-kit".to_string()],
            aliases: vec!["mark".to_string(), "macaroni".to_string()],
        };
        let text = layout.to_string();
        assert!(text.ends_with("masters = core-kit\naliases = mark macaroni\n"));

        let dir = tempfile::tempdir().unwrap();
        assert!(layout.write(dir.path()).unwrap());
        assert!(!layout.write(dir.path()).unwrap());
    }
}
