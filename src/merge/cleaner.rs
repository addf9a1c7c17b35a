// src/merge/cleaner.rs

//! Pruning of old package versions
//!
//! For every target atom the newest version is always kept, along with
//! the `max_versions` newest and any version pinned under `versions`.
//! Everything else is removed from the target kit and its DIST lines
//! dropped from the Manifest unless a retained version still uses them.
//!
//! A failing package is recorded and the run moves on to the next one.

use super::{MergeBot, MergeOptions, open_pr_branch, pr_branch, write_package_manifest};
use crate::cache::RepoScanAtom;
use crate::error::{Error, Result};
use crate::fetcher::{FetchReport, StatsRecorder};
use crate::notify::{Event, EventKind};
use crate::resolver::{RepoScanResolver, ResolveOptions};
use crate::specs::{MergeKit, TargetAtom};
use crate::version::GentooPackage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Outcome of a clean run
#[derive(Debug, Clone)]
pub struct CleanSummary {
    /// Removed atoms
    pub removed: Vec<String>,
    /// Commit messages, in order
    pub commits: Vec<String>,
    /// PR branches already present on origin
    pub pending: Vec<String>,
    pub report: FetchReport,
}

fn is_pinned(atom: &RepoScanAtom, pinned: &[String]) -> Result<bool> {
    let pvr = atom.pvr()?;
    let pv = GentooPackage::parse(&atom.atom)?
        .version
        .map(|v| v.base().to_string())
        .unwrap_or_default();
    Ok(pinned.iter().any(|p| *p == pvr || *p == pv))
}

/// Versions to drop from `versions` (ascending), oldest first
pub fn plan_removals(versions: &[RepoScanAtom], keep: usize, pinned: &[String]) -> Result<Vec<RepoScanAtom>> {
    let keep = keep.max(1);
    if versions.len() <= keep {
        return Ok(Vec::new());
    }
    let mut removed = Vec::new();
    for atom in &versions[..versions.len() - keep] {
        if !is_pinned(atom, pinned)? {
            removed.push(atom.clone());
        }
    }
    Ok(removed)
}

fn commit_message(catpkg: &str, removed: &[RepoScanAtom]) -> Result<String> {
    let mut message = format!("{}: Remove old versions\n", catpkg);
    for atom in removed {
        message.push_str(&format!("\n  * Removed v{}", atom.pvr()?));
    }
    Ok(message)
}

impl MergeBot {
    /// Remove old versions of every target atom
    pub fn clean(&self, spec: &MergeKit, opts: &MergeOptions) -> Result<CleanSummary> {
        let mut target_only = spec.clone();
        target_only.sources.clear();
        let ws = self.prepare(&target_only, opts)?;

        let recorder = StatsRecorder::new();
        let mut summary = CleanSummary {
            removed: Vec::new(),
            commits: Vec::new(),
            pending: Vec::new(),
            report: recorder.report("clean"),
        };

        for entry in spec.target.atoms.iter().filter(|a| a.matches_filter(&opts.atoms_filter)) {
            recorder.atom_started();
            match self.clean_atom(spec, &ws.target_dir, &ws.target, entry, opts, &mut summary) {
                Ok(()) => recorder.atom_done(0),
                Err(e) => {
                    error!("{}: {}", entry.pkg, e);
                    recorder.atom_failed(&entry.pkg, &e);
                }
            }
        }

        if opts.push && !opts.pull_request && !opts.dry_run && !summary.commits.is_empty() {
            self.vcs().push(&ws.target_dir, &spec.target.branch)?;
        }

        summary.report = recorder.report("clean");
        self.notifier().notify(&Event::new(
            &spec.target.name,
            EventKind::RunSummary {
                command: "clean".to_string(),
                changes: summary.commits.len(),
                errors: summary.report.tot_errors,
            },
        ));

        if !opts.keep_workdir {
            ws.cleanup()?;
        }
        Ok(summary)
    }

    fn clean_atom(
        &self,
        spec: &MergeKit,
        kit_dir: &Path,
        target: &RepoScanResolver,
        entry: &TargetAtom,
        opts: &MergeOptions,
        summary: &mut CleanSummary,
    ) -> Result<()> {
        let defaults = &spec.target.atoms_defaults;
        let resolve = ResolveOptions {
            conditions: entry.conditions(defaults).to_vec(),
            ignore_slot: entry.ignore_slot(defaults),
        };
        let versions = match target.get_valid(&entry.pkg, &resolve) {
            Ok(versions) => versions,
            Err(Error::NotFound(catpkg)) => {
                info!("{}: not in target kit", catpkg);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let removed = plan_removals(&versions, entry.max_versions(defaults), &entry.versions)?;
        if removed.is_empty() {
            return Ok(());
        }
        let catpkg = entry.catpkg()?;

        if opts.dry_run {
            for atom in &removed {
                info!("[dry-run] would remove {}", atom.atom);
            }
            return Ok(());
        }

        let branch = pr_branch(&spec.target.branch, "purge", &catpkg);
        if opts.pull_request {
            match open_pr_branch(self.vcs(), &spec.target.url, kit_dir, &branch) {
                Err(Error::VcsBranchExists(_)) => {
                    info!("{} already on origin, skipping", branch);
                    summary.pending.push(branch);
                    return Ok(());
                }
                other => other?,
            }
        }

        let all = target.all_versions(&catpkg);
        let result = self.remove_versions(kit_dir, &catpkg, &all, &removed, opts);
        if opts.pull_request {
            if let Ok(Some(_)) = &result
                && opts.push
            {
                self.vcs().push_branch(kit_dir, &branch)?;
            }
            self.vcs().checkout(kit_dir, &spec.target.branch, false)?;
        }

        if let Some(message) = result? {
            summary.removed.extend(removed.iter().map(|a| a.atom.clone()));
            summary.commits.push(message);
            self.notifier().notify(&Event::new(
                &spec.target.name,
                EventKind::Purge {
                    catpkg,
                    removed: removed.iter().map(|a| a.pvr()).collect::<std::result::Result<_, _>>()?,
                },
            ));
        }
        Ok(())
    }

    /// Delete the ebuilds, rewrite the Manifest and commit
    fn remove_versions(
        &self,
        kit_dir: &Path,
        catpkg: &str,
        all: &[RepoScanAtom],
        removed: &[RepoScanAtom],
        opts: &MergeOptions,
    ) -> Result<Option<String>> {
        for atom in removed {
            let ebuild = atom.ebuild_path(kit_dir)?;
            if ebuild.is_file() {
                fs::remove_file(&ebuild).map_err(|e| Error::io_at(&ebuild, e))?;
                info!("Removed {}", atom.atom);
            }
        }

        let retained = all
            .iter()
            .filter(|v| !removed.iter().any(|r| r.atom == v.atom));
        let pkg_dir = kit_dir.join(catpkg);
        write_package_manifest(&pkg_dir, retained)?;

        let message = commit_message(catpkg, removed)?;
        let committed = self
            .vcs()
            .commit(kit_dir, &[PathBuf::from(catpkg)], &message, &opts.signature)?;
        Ok(committed.then_some(message))
    }
}
