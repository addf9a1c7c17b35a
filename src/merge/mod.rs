// src/merge/mod.rs

//! Kit merge engine
//!
//! Merges the newest admitted version of every target atom from the
//! source kits into the target kit, then keeps the kit's metadata in sync:
//!
//! 1. clone sources and target, generate kit caches, load resolvers
//! 2. search candidates (see [`search`])
//! 3. copy ebuilds, Manifests and `files/`, one commit per package
//! 4. eclasses, `metadata/layout.conf`, `profiles/`, fixups
//! 5. push the target branch, or push PR branches and open pull requests
//!
//! In pull request mode every change group lives on its own
//! `autobot/<branch>/...` branch. A branch already present on origin means
//! the change is pending review and is not recreated.

mod atoms;
pub mod cleaner;
mod search;
mod workspace;

pub use atoms::{MANIFEST_FILE, merge_atom, write_package_manifest};
pub use cleaner::{CleanSummary, plan_removals};
pub use search::{Candidate, SkipReason, check_candidate, search};
pub use workspace::{Workspace, prepare};

use crate::cache::CacheGenerator;
use crate::error::{Error, Result};
use crate::kit::{
    EclassFilter, LayoutConf, apply_fixup, copy_eclasses, write_categories, write_repo_name,
    write_thirdpartymirrors, CATEGORIES_FILE, LAYOUT_CONF, REPO_NAME_FILE, THIRDPARTYMIRRORS_FILE,
};
use crate::notify::{Event, EventKind, LogNotifier, Notifier};
use crate::specs::MergeKit;
use crate::vcs::{PullRequest, ReviewProvider, Signature, Vcs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Default number of concurrent clones
pub const DEFAULT_CLONE_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub work_dir: PathBuf,
    /// Push the target branch (or PR branches) to origin
    pub push: bool,
    /// Put every change group on its own branch and open pull requests
    pub pull_request: bool,
    /// Log decisions without touching the target kit
    pub dry_run: bool,
    /// Restrict the run to these catpkgs / package names
    pub atoms_filter: Vec<String>,
    /// Shallow clone depth; full history when `None`
    pub git_depth: Option<u32>,
    pub signature: Signature,
    pub concurrency: usize,
    pub scanner_concurrency: usize,
    /// Keep the staging directories after the run
    pub keep_workdir: bool,
    pub disabled_keywords: Vec<String>,
    pub allow_empty_keywords: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("workdir"),
            push: false,
            pull_request: false,
            dry_run: false,
            atoms_filter: Vec::new(),
            git_depth: Some(5),
            signature: Signature::default(),
            concurrency: DEFAULT_CLONE_CONCURRENCY,
            scanner_concurrency: 10,
            keep_workdir: false,
            disabled_keywords: Vec::new(),
            allow_empty_keywords: false,
        }
    }
}

/// What a merge run did
#[derive(Debug, Clone, Default)]
pub struct MergeSummary {
    /// Atoms merged, in commit order
    pub bumped: Vec<String>,
    /// Commit messages, in order
    pub commits: Vec<String>,
    /// Pull request URLs
    pub pull_requests: Vec<String>,
    /// PR branches already present on origin
    pub pending: Vec<String>,
}

impl MergeSummary {
    pub fn changes(&self) -> usize {
        self.commits.len()
    }
}

/// `autobot/<branch>/<cat>_<pkg>`-style branch names
pub fn pr_branch(base: &str, kind: &str, catpkg: &str) -> String {
    format!("autobot/{}/{}-{}", base, kind, catpkg.replace('/', "_"))
}

pub struct MergeBot {
    vcs: Arc<dyn Vcs>,
    scanner: Arc<dyn CacheGenerator>,
    review: Option<Arc<dyn ReviewProvider>>,
    notifier: Arc<dyn Notifier>,
}

/// Changes applied on a PR branch or directly on the target branch
struct ChangeSet<'a> {
    spec: &'a MergeKit,
    ws: &'a Workspace,
    opts: &'a MergeOptions,
    summary: MergeSummary,
}

impl MergeBot {
    pub fn new(vcs: Arc<dyn Vcs>, scanner: Arc<dyn CacheGenerator>) -> Self {
        Self {
            vcs,
            scanner,
            review: None,
            notifier: Arc::new(LogNotifier),
        }
    }

    pub fn with_review(mut self, review: Arc<dyn ReviewProvider>) -> Self {
        self.review = Some(review);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn vcs(&self) -> &dyn Vcs {
        self.vcs.as_ref()
    }

    /// Shared handle for collaborators that outlive a borrow (extensions)
    pub fn vcs_handle(&self) -> Arc<dyn Vcs> {
        Arc::clone(&self.vcs)
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    /// Clone kits, generate caches and load resolvers
    pub fn prepare(&self, spec: &MergeKit, opts: &MergeOptions) -> Result<Workspace> {
        prepare(spec, opts, self.vcs.as_ref(), self.scanner.as_ref())
    }

    /// Full merge run
    pub fn run(&self, spec: &MergeKit, opts: &MergeOptions) -> Result<MergeSummary> {
        let ws = self.prepare(spec, opts)?;
        let summary = self.merge(spec, &ws, opts)?;
        if !opts.keep_workdir {
            ws.cleanup()?;
        }
        Ok(summary)
    }

    /// Search and apply on a prepared workspace
    pub fn merge(&self, spec: &MergeKit, ws: &Workspace, opts: &MergeOptions) -> Result<MergeSummary> {
        let candidates = search(&spec.target, &ws.sources, &ws.target, &opts.atoms_filter)?;
        info!("{} candidates for {}", candidates.len(), spec.target.name);

        let mut changes = ChangeSet {
            spec,
            ws,
            opts,
            summary: MergeSummary::default(),
        };

        if opts.dry_run {
            for candidate in &candidates {
                info!("[dry-run] would bump {} to {}", candidate.catpkg, candidate.atom.atom);
                changes.summary.bumped.push(candidate.atom.atom.clone());
            }
            return Ok(changes.summary);
        }

        for candidate in &candidates {
            self.bump(&mut changes, candidate)?;
        }
        self.update_eclasses(&mut changes)?;
        self.update_metadata(&mut changes, &candidates)?;
        self.apply_fixups(&mut changes)?;

        if opts.push && !opts.pull_request && !changes.summary.commits.is_empty() {
            self.vcs.push(&ws.target_dir, &spec.target.branch)?;
        }

        let summary = changes.summary;
        self.notifier.notify(&Event::new(
            &spec.target.name,
            EventKind::RunSummary {
                command: "merge".to_string(),
                changes: summary.changes(),
                errors: 0,
            },
        ));
        Ok(summary)
    }

    fn bump(&self, changes: &mut ChangeSet<'_>, candidate: &Candidate) -> Result<()> {
        let branch = pr_branch(&changes.spec.target.branch, "bump", &candidate.catpkg);
        let title = format!("mark-devkit: Bump {}", candidate.catpkg);
        let message = format!("Bump {}", candidate.catpkg);
        let ws = changes.ws;

        let committed = self.on_branch(changes, &branch, &title, |bot, changes| {
            let dir = merge_atom(ws, candidate)?;
            bot.commit(changes, &[dir], &message)
        })?;

        if committed {
            changes.summary.bumped.push(candidate.atom.atom.clone());
            self.notifier.notify(&Event::new(
                &changes.spec.target.name,
                EventKind::Bump {
                    catpkg: candidate.catpkg.clone(),
                    version: candidate.atom.pvr()?,
                },
            ));
        }
        Ok(())
    }

    fn update_eclasses(&self, changes: &mut ChangeSet<'_>) -> Result<()> {
        let spec = changes.spec;
        let include = &spec.target.eclasses.include;
        if include.is_empty() {
            return Ok(());
        }
        let branch = format!("autobot/{}/eclasses", spec.target.branch);
        let ws = changes.ws;

        self.on_branch(changes, &branch, "mark-devkit: Update eclasses", |bot, changes| {
            let mut files = Vec::new();
            for (kit, patterns) in include {
                let filter = EclassFilter::new(patterns)?;
                files.extend(copy_eclasses(ws.source_dir(kit)?, &ws.target_dir, &filter)?);
            }
            bot.commit(changes, &files, "Update/Add eclasses")
        })?;
        Ok(())
    }

    fn update_metadata(&self, changes: &mut ChangeSet<'_>, candidates: &[Candidate]) -> Result<()> {
        let spec = changes.spec;
        let target = &spec.target;
        let branch = format!("autobot/{}/metadata", target.branch);
        let ws = changes.ws;

        let mut categories = ws.target.categories();
        categories.extend(candidates.iter().map(|c| c.category().to_string()));

        self.on_branch(changes, &branch, "mark-devkit: Update kit metadata", |bot, changes| {
            let mut committed = false;
            if LayoutConf::from_target(target).write(&ws.target_dir)? {
                committed |= bot.commit(changes, &[PathBuf::from(LAYOUT_CONF)], "Update metadata/layout.conf")?;
            }
            if write_categories(&ws.target_dir, &categories)? {
                committed |= bot.commit(changes, &[PathBuf::from(CATEGORIES_FILE)], "Update profiles/categories")?;
            }
            if write_repo_name(&ws.target_dir, &target.name)? {
                committed |= bot.commit(changes, &[PathBuf::from(REPO_NAME_FILE)], "Update profiles/repo_name")?;
            }
            if !target.thirdpartymirrors.is_empty()
                && write_thirdpartymirrors(&ws.target_dir, &target.thirdpartymirrors)?
            {
                committed |= bot.commit(
                    changes,
                    &[PathBuf::from(THIRDPARTYMIRRORS_FILE)],
                    "Update profiles/thirdpartymirrors",
                )?;
            }
            Ok(committed)
        })?;
        Ok(())
    }

    fn apply_fixups(&self, changes: &mut ChangeSet<'_>) -> Result<()> {
        let spec = changes.spec;
        if spec.target.fixups.include.is_empty() {
            return Ok(());
        }
        let branch = format!("autobot/{}/fixups", spec.target.branch);
        let ws = changes.ws;

        self.on_branch(changes, &branch, "mark-devkit: Apply fixups", |bot, changes| {
            let mut committed = false;
            for fixup in &spec.target.fixups.include {
                let files = apply_fixup(&spec.spec_dir, &ws.target_dir, fixup)?;
                committed |= bot.commit(changes, &files, &fixup.commit_message())?;
            }
            Ok(committed)
        })?;
        Ok(())
    }

    fn commit(&self, changes: &mut ChangeSet<'_>, files: &[PathBuf], message: &str) -> Result<bool> {
        let committed = self
            .vcs
            .commit(&changes.ws.target_dir, files, message, &changes.opts.signature)?;
        if committed {
            info!("Committed '{}'", message.lines().next().unwrap_or_default());
            changes.summary.commits.push(message.to_string());
        }
        Ok(committed)
    }

    /// Run `apply` on `branch` in PR mode, on the target branch otherwise
    ///
    /// Returns whether `apply` committed anything.
    fn on_branch<F>(&self, changes: &mut ChangeSet<'_>, branch: &str, title: &str, apply: F) -> Result<bool>
    where
        F: FnOnce(&Self, &mut ChangeSet<'_>) -> Result<bool>,
    {
        if !changes.opts.pull_request {
            return apply(self, changes);
        }

        let spec = changes.spec;
        let target = &spec.target;
        let repo = changes.ws.target_dir.clone();
        match open_pr_branch(self.vcs.as_ref(), &target.url, &repo, branch) {
            Err(Error::VcsBranchExists(_)) => {
                info!("{} already on origin, skipping", branch);
                changes.summary.pending.push(branch.to_string());
                return Ok(false);
            }
            other => other?,
        }

        let result = apply(self, changes);
        let committed = match result {
            Ok(committed) => committed,
            Err(e) => {
                if let Err(checkout) = self.vcs.checkout(&repo, &target.branch, false) {
                    warn!("Cannot return to {}: {}", target.branch, checkout);
                }
                return Err(e);
            }
        };

        if committed && changes.opts.push {
            self.vcs.push_branch(&repo, branch)?;
            self.open_pull_request(changes, branch, title)?;
        }
        self.vcs.checkout(&repo, &target.branch, false)?;
        Ok(committed)
    }

    fn open_pull_request(&self, changes: &mut ChangeSet<'_>, branch: &str, title: &str) -> Result<()> {
        let spec = changes.spec;
        let target = &spec.target;
        let Some(review) = &self.review else {
            warn!("No review provider configured, {} pushed without pull request", branch);
            return Ok(());
        };
        let url = review.create_pull_request(
            &target.url,
            &PullRequest {
                title: title.to_string(),
                head: branch.to_string(),
                base: target.branch.clone(),
                body: format!("Automated change for {}.", target.name),
            },
        )?;
        self.notifier.notify(&Event::new(
            &target.name,
            EventKind::PullRequestCreated {
                branch: branch.to_string(),
                url: url.clone(),
            },
        ));
        changes.summary.pull_requests.push(url);
        Ok(())
    }
}

/// Create `branch` from the current HEAD unless it already exists on origin
pub(crate) fn open_pr_branch(vcs: &dyn Vcs, url: &str, repo: &Path, branch: &str) -> Result<()> {
    if vcs.branch_exists(url, branch)? {
        return Err(Error::VcsBranchExists(branch.to_string()));
    }
    vcs.checkout(repo, branch, true)
}
