// src/merge/search.rs

//! Candidate selection
//!
//! For every target atom the newest admitted source atom is compared with
//! the versions already in the target kit. It becomes a candidate unless
//! the target already carries the same version with the same ebuild, or a
//! newer one.

use crate::cache::RepoScanAtom;
use crate::error::Result;
use crate::resolver::{RepoScanResolver, ResolveOptions};
use crate::specs::{TargetAtom, TargetKit};
use crate::version::GentooPackage;
use tracing::{debug, info};

/// A source atom to merge into the target kit
#[derive(Debug, Clone)]
pub struct Candidate {
    pub catpkg: String,
    pub atom: RepoScanAtom,
}

impl Candidate {
    pub fn category(&self) -> &str {
        &self.atom.category
    }

    pub fn package(&self) -> &str {
        &self.atom.package
    }
}

/// Why a target atom produced no candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Same version with the same ebuild md5
    Unchanged,
    /// The target carries a newer version
    Newer(String),
}

fn resolve_options(entry: &TargetAtom, target: &TargetKit) -> ResolveOptions {
    ResolveOptions {
        conditions: entry.conditions(&target.atoms_defaults).to_vec(),
        ignore_slot: entry.ignore_slot(&target.atoms_defaults),
    }
}

/// Compare one source winner with the target's versions of its CatPkg
pub fn check_candidate(
    candidate: &RepoScanAtom,
    target: &RepoScanResolver,
    ignore_slot: bool,
) -> Result<Option<SkipReason>> {
    let pkg = candidate.to_gentoo_package()?;
    for existing in target.all_versions(&candidate.catpkg()) {
        let current = existing.to_gentoo_package()?;
        if !ignore_slot && current.slot.as_deref().unwrap_or("0") != pkg.slot.as_deref().unwrap_or("0") {
            continue;
        }
        if current.equal_version(&pkg) && existing.md5 == candidate.md5 {
            return Ok(Some(SkipReason::Unchanged));
        }
        if current.greater_than(&pkg) {
            return Ok(Some(SkipReason::Newer(existing.atom.clone())));
        }
    }
    Ok(None)
}

/// Candidates for every target atom selected by `filter`, in specfile order
pub fn search(
    target_kit: &TargetKit,
    sources: &RepoScanResolver,
    target: &RepoScanResolver,
    filter: &[String],
) -> Result<Vec<Candidate>> {
    let mut candidates = Vec::new();
    for entry in target_kit.atoms.iter().filter(|a| a.matches_filter(filter)) {
        let opts = resolve_options(entry, target_kit);
        let last = sources.get_last(&entry.pkg, &opts)?;

        match check_candidate(&last, target, opts.ignore_slot)? {
            Some(SkipReason::Unchanged) => debug!("{}: already up to date", last.atom),
            Some(SkipReason::Newer(atom)) => {
                info!("{}: target already has newer {}", last.atom, atom)
            }
            None => {
                info!("{}: candidate for merge", last.atom);
                candidates.push(Candidate {
                    catpkg: GentooPackage::parse(&last.atom)?.catpkg(),
                    atom: last,
                });
            }
        }
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn atom(kit: &str, pv: &str, md5: &str) -> RepoScanAtom {
        let mut a = RepoScanAtom {
            atom: format!("dev-lang/foo-{pv}"),
            category: "dev-lang".to_string(),
            package: "foo".to_string(),
            kit: kit.to_string(),
            md5: md5.to_string(),
            ..Default::default()
        };
        a.metadata.insert("KEYWORDS".to_string(), "~amd64".to_string());
        a.metadata.insert("SLOT".to_string(), "0".to_string());
        a
    }

    fn resolver(atoms: Vec<RepoScanAtom>) -> RepoScanResolver {
        let mut r = RepoScanResolver::new();
        r.add_atoms(atoms);
        r
    }

    fn target_kit(pkg: &str) -> TargetKit {
        TargetKit {
            name: "mark-kit".to_string(),
            branch: "mark-v1".to_string(),
            atoms: vec![TargetAtom::new(pkg)],
            ..Default::default()
        }
    }

    #[test]
    fn test_newer_source_version_is_candidate() {
        let sources = resolver(vec![
            atom("core-kit", "1.0", "a"),
            atom("core-kit", "1.1", "b"),
            atom("core-kit", "1.2", "c"),
        ]);
        let target = resolver(vec![atom("mark-kit", "1.0", "a")]);
        let found = search(&target_kit("dev-lang/foo"), &sources, &target, &[]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].atom.atom, "dev-lang/foo-1.2");
        assert_eq!(found[0].catpkg, "dev-lang/foo");
    }

    #[test]
    fn test_unchanged_and_newer_are_skipped() {
        let sources = resolver(vec![atom("core-kit", "1.2", "c")]);

        let same = resolver(vec![atom("mark-kit", "1.2", "c")]);
        assert!(search(&target_kit("dev-lang/foo"), &sources, &same, &[]).unwrap().is_empty());

        let newer = resolver(vec![atom("mark-kit", "1.3", "z")]);
        assert!(search(&target_kit("dev-lang/foo"), &sources, &newer, &[]).unwrap().is_empty());

        let changed = resolver(vec![atom("mark-kit", "1.2", "old")]);
        assert_eq!(search(&target_kit("dev-lang/foo"), &sources, &changed, &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_other_slot_does_not_block() {
        let sources = resolver(vec![atom("core-kit", "1.2", "c")]);
        let mut slotted = atom("mark-kit", "2.0", "z");
        slotted.metadata.insert("SLOT".to_string(), "2".to_string());
        let target = resolver(vec![slotted]);

        let kit = target_kit("dev-lang/foo");
        assert_eq!(search(&kit, &sources, &target, &[]).unwrap().len(), 1);

        let mut ignoring = target_kit("dev-lang/foo");
        ignoring.atoms[0].cond_ignore_slot = Some(true);
        assert!(search(&ignoring, &sources, &target, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_source_order_does_not_change_winner() {
        let a = vec![atom("core-kit", "1.1", "x"), atom("dev-kit", "1.2", "y")];
        let mut b = a.clone();
        b.reverse();
        let target = RepoScanResolver::new();
        let kit = target_kit("dev-lang/foo");
        let first = search(&kit, &resolver(a), &target, &[]).unwrap();
        let second = search(&kit, &resolver(b), &target, &[]).unwrap();
        assert_eq!(first[0].atom.atom, second[0].atom.atom);
    }

    #[test]
    fn test_missing_source_fails() {
        let sources = resolver(vec![atom("core-kit", "1.2", "c")]);
        let err = search(&target_kit("dev-lang/bar"), &sources, &RepoScanResolver::new(), &[]).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_filter_limits_atoms() {
        let sources = resolver(vec![atom("core-kit", "1.2", "c")]);
        let mut kit = target_kit("dev-lang/foo");
        kit.atoms.push(TargetAtom::new("dev-lang/bar"));
        let found = search(&kit, &sources, &RepoScanResolver::new(), &["foo".to_string()]).unwrap();
        assert_eq!(found.len(), 1);
    }
}
