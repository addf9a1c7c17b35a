// tests/merge_workflow.rs

//! Merge runs against local "origin" kits

mod common;

use common::{LocalVcs, TreeScanner, distfile, init_kit, manifest_names, write_ebuild};
use mark_devkit::specs::MergeKit;
use mark_devkit::{MergeBot, MergeOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _tmp: TempDir,
    source: PathBuf,
    target: PathBuf,
    spec: MergeKit,
    work_dir: PathBuf,
}

/// core-kit carries foo 1.0, 1.1 and 1.2; mark-kit only foo 1.0
fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("origin/core-kit");
    let target = tmp.path().join("origin/mark-kit");
    init_kit(&source, "core-kit");
    init_kit(&target, "mark-kit");

    for pv in ["1.0", "1.1", "1.2"] {
        let name = format!("foo-{}.tar.gz", pv);
        let file = distfile(&name, &format!("https://foo.example/{}", name), pv.as_bytes());
        write_ebuild(&source, "dev-lang/foo", pv, "~amd64", &[file]);
    }
    write_ebuild(&target, "dev-lang/foo", "1.0", "~amd64", &[]);

    let spec_path = tmp.path().join("mark-kit.yml");
    fs::write(
        &spec_path,
        format!(
            "sources:\n  - name: core-kit\n    url: {}\n    branch: next\ntarget:\n  name: mark-kit\n  url: {}\n  branch: mark-v1\n  atoms:\n    - pkg: dev-lang/foo\n",
            source.display(),
            target.display()
        ),
    )
    .unwrap();
    let spec = MergeKit::load(&spec_path).unwrap();

    Fixture {
        work_dir: tmp.path().join("work"),
        source,
        target,
        spec,
        _tmp: tmp,
    }
}

fn options(work_dir: &Path) -> MergeOptions {
    MergeOptions {
        work_dir: work_dir.to_path_buf(),
        push: true,
        concurrency: 2,
        ..Default::default()
    }
}

fn bot(vcs: &Arc<LocalVcs>) -> MergeBot {
    MergeBot::new(vcs.clone(), Arc::new(TreeScanner::new()))
}

#[test]
fn test_version_bump() {
    let fx = fixture();
    let vcs = Arc::new(LocalVcs::new());
    vcs.add_branch(&fx.target, "mark-v1");

    let summary = bot(&vcs).run(&fx.spec, &options(&fx.work_dir)).unwrap();

    assert_eq!(summary.bumped, vec!["dev-lang/foo-1.2".to_string()]);
    let bumps: Vec<_> = summary.commits.iter().filter(|c| c.starts_with("Bump ")).collect();
    assert_eq!(bumps, vec!["Bump dev-lang/foo"]);

    let pkg_dir = fx.target.join("dev-lang/foo");
    assert!(pkg_dir.join("foo-1.2.ebuild").is_file());
    assert!(pkg_dir.join("foo-1.0.ebuild").is_file());
    assert_eq!(manifest_names(&pkg_dir), vec!["foo-1.2.tar.gz".to_string()]);
    assert!(fx.target.join("metadata/layout.conf").is_file());

    // staging directories are gone
    assert!(!fx.work_dir.join("sources").exists());
    assert!(fx.source.join("dev-lang/foo/foo-1.1.ebuild").is_file());
}

#[test]
fn test_second_run_is_idempotent() {
    let fx = fixture();
    let vcs = Arc::new(LocalVcs::new());
    vcs.add_branch(&fx.target, "mark-v1");
    let bot = bot(&vcs);
    let opts = options(&fx.work_dir);

    let first = bot.run(&fx.spec, &opts).unwrap();
    assert!(first.changes() > 0);
    let ebuild = fs::read_to_string(fx.target.join("dev-lang/foo/foo-1.2.ebuild")).unwrap();

    let second = bot.run(&fx.spec, &opts).unwrap();
    assert_eq!(second.changes(), 0);
    assert!(second.bumped.is_empty());
    assert_eq!(
        fs::read_to_string(fx.target.join("dev-lang/foo/foo-1.2.ebuild")).unwrap(),
        ebuild
    );
}

#[test]
fn test_dry_run_leaves_target_untouched() {
    let fx = fixture();
    let vcs = Arc::new(LocalVcs::new());
    vcs.add_branch(&fx.target, "mark-v1");
    let opts = MergeOptions {
        dry_run: true,
        ..options(&fx.work_dir)
    };

    let summary = bot(&vcs).run(&fx.spec, &opts).unwrap();
    assert_eq!(summary.bumped, vec!["dev-lang/foo-1.2".to_string()]);
    assert!(summary.commits.is_empty());
    assert!(vcs.commits().is_empty());
    assert!(!fx.target.join("dev-lang/foo/foo-1.2.ebuild").exists());
}

#[test]
fn test_pr_branch_is_not_recreated() {
    let fx = fixture();
    let vcs = Arc::new(LocalVcs::new());
    vcs.add_branch(&fx.target, "mark-v1");
    let bot = bot(&vcs);
    let opts = MergeOptions {
        pull_request: true,
        ..options(&fx.work_dir)
    };

    let first = bot.run(&fx.spec, &opts).unwrap();
    assert!(first.commits.iter().any(|c| c == "Bump dev-lang/foo"));
    assert!(
        vcs.pushed_branches()
            .contains(&"autobot/mark-v1/bump-dev-lang_foo".to_string())
    );

    vcs.clear_commits();
    let second = bot.run(&fx.spec, &opts).unwrap();
    assert!(second.commits.is_empty());
    assert!(vcs.commits().is_empty());
    assert!(second.pending.contains(&"autobot/mark-v1/bump-dev-lang_foo".to_string()));
    assert_eq!(
        vcs.pushed_branches()
            .iter()
            .filter(|b| *b == "autobot/mark-v1/bump-dev-lang_foo")
            .count(),
        1
    );
}

#[test]
fn test_atom_filter_skips_other_packages() {
    let fx = fixture();
    let vcs = Arc::new(LocalVcs::new());
    vcs.add_branch(&fx.target, "mark-v1");
    let opts = MergeOptions {
        atoms_filter: vec!["bar".to_string()],
        ..options(&fx.work_dir)
    };

    let summary = bot(&vcs).run(&fx.spec, &opts).unwrap();
    assert!(summary.bumped.is_empty());
    assert!(!fx.target.join("dev-lang/foo/foo-1.2.ebuild").exists());
}
