// src/resolver/mod.rs

//! Version resolution over kit caches
//!
//! A resolver owns the atoms of one or more kit caches, indexed by
//! `category/package`, plus a set of global constraints and a keyword
//! mask. It answers two questions for a constraint expression such as
//! `>=dev-lang/foo-1.0:3`:
//!
//! - [`RepoScanResolver::get_valid`]: every admitted atom, ascending
//! - [`RepoScanResolver::get_last`]: the newest admitted atom
//!
//! Resolvers are built once per phase and read-only afterwards.

use crate::cache::{AtomMap, RepoScanAtom, RepoScanSpec};
use crate::error::{Error, Result};
use crate::version::{GentooPackage, keywords_admitted};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Filtering policy for a single lookup
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Extra constraints every candidate must satisfy
    pub conditions: Vec<String>,
    /// Force each condition's slot to the candidate's slot
    pub ignore_slot: bool,
}

impl ResolveOptions {
    pub fn with_conditions(conditions: &[String]) -> Self {
        Self {
            conditions: conditions.to_vec(),
            ignore_slot: false,
        }
    }
}

/// Resolver over kit cache atoms
#[derive(Debug, Clone, Default)]
pub struct RepoScanResolver {
    atoms: AtomMap,
    constraints: BTreeMap<String, Vec<GentooPackage>>,
    disabled_keywords: Vec<String>,
    allow_empty_keywords: bool,
}

impl RepoScanResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keywords that must not be the only enabled ones of a candidate
    pub fn with_disabled_keywords(mut self, keywords: Vec<String>) -> Self {
        self.disabled_keywords = keywords;
        self
    }

    pub fn with_allow_empty_keywords(mut self, allow: bool) -> Self {
        self.allow_empty_keywords = allow;
        self
    }

    /// Load every given cache file into the resolver
    pub fn load_files(&mut self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            debug!("Loading kit cache {}", path.display());
            for spec in RepoScanSpec::load_file(path)? {
                self.atoms.add_spec(spec);
            }
        }
        Ok(())
    }

    /// Install the global constraint list
    ///
    /// A candidate for a CatPkg with global constraints is admitted iff at
    /// least one of them admits it.
    pub fn set_constraints(&mut self, constraints: &[String]) -> Result<()> {
        self.constraints.clear();
        for raw in constraints {
            let pkg = GentooPackage::parse(raw)?;
            self.constraints.entry(pkg.catpkg()).or_default().push(pkg);
        }
        Ok(())
    }

    /// Append synthesised atoms (autogen output) to the map
    pub fn add_atoms(&mut self, atoms: impl IntoIterator<Item = RepoScanAtom>) {
        for atom in atoms {
            self.atoms.add_atom(atom);
        }
    }

    pub fn atoms(&self) -> &AtomMap {
        &self.atoms
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn categories(&self) -> Vec<String> {
        self.atoms.categories()
    }

    /// Every atom of a CatPkg ascending by version, without any filtering
    pub fn all_versions(&self, catpkg: &str) -> Vec<RepoScanAtom> {
        let mut atoms: Vec<(GentooPackage, RepoScanAtom)> = self
            .atoms
            .get(catpkg)
            .unwrap_or(&[])
            .iter()
            .filter_map(|a| match a.to_gentoo_package() {
                Ok(pkg) => Some((pkg, a.clone())),
                Err(e) => {
                    warn!("Ignoring atom {}: {}", a.atom, e);
                    None
                }
            })
            .collect();
        atoms.sort_by(|a, b| a.0.compare_version(&b.0));
        atoms.into_iter().map(|(_, a)| a).collect()
    }

    /// Every atom admitted by `pkg` and `opts`, ascending by version
    pub fn get_valid(&self, pkg: &str, opts: &ResolveOptions) -> Result<Vec<RepoScanAtom>> {
        let constraint = GentooPackage::parse(pkg)?;
        let catpkg = constraint.catpkg();

        let atoms = self
            .atoms
            .get(&catpkg)
            .ok_or_else(|| Error::NotFound(catpkg.clone()))?;

        let conditions = opts
            .conditions
            .iter()
            .map(|c| GentooPackage::parse(c))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let globals = self.constraints.get(&catpkg);

        let mut valid: Vec<(GentooPackage, &RepoScanAtom)> = Vec::new();
        for atom in atoms {
            if let Some(repo) = &constraint.repository
                && repo != &atom.kit
            {
                continue;
            }

            if !keywords_admitted(
                atom.keywords(),
                &self.disabled_keywords,
                self.allow_empty_keywords,
            ) {
                debug!("{}: masked by keywords '{}'", atom.atom, atom.keywords());
                continue;
            }

            let candidate = atom.to_gentoo_package()?;
            if !constraint.admit(&candidate) {
                continue;
            }

            if let Some(globals) = globals
                && !globals.iter().any(|g| g.admit(&candidate))
            {
                continue;
            }

            let admitted = conditions.iter().all(|cond| {
                if opts.ignore_slot {
                    let mut cond = cond.clone();
                    cond.slot = candidate.slot.clone();
                    cond.subslot = None;
                    cond.admit(&candidate)
                } else {
                    cond.admit(&candidate)
                }
            });
            if admitted {
                valid.push((candidate, atom));
            }
        }

        valid.sort_by(|a, b| a.0.compare_version(&b.0));
        Ok(valid.into_iter().map(|(_, a)| a.clone()).collect())
    }

    /// Newest admitted atom
    pub fn get_last(&self, pkg: &str, opts: &ResolveOptions) -> Result<RepoScanAtom> {
        self.get_valid(pkg, opts)?
            .pop()
            .ok_or_else(|| Error::NoCandidate(pkg.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(pv: &str, slot: &str, keywords: &str, kit: &str) -> RepoScanAtom {
        let pkg = GentooPackage::parse(&format!("dev-lang/foo-{pv}")).unwrap();
        let mut a = RepoScanAtom {
            atom: pkg.atom(),
            category: pkg.category,
            package: pkg.name,
            kit: kit.to_string(),
            ..Default::default()
        };
        a.metadata.insert("SLOT".to_string(), slot.to_string());
        a.metadata.insert("KEYWORDS".to_string(), keywords.to_string());
        a
    }

    fn resolver() -> RepoScanResolver {
        let mut r = RepoScanResolver::new();
        r.add_atoms([
            atom("1.2", "0", "~amd64", "core-kit"),
            atom("1.0", "0", "amd64", "core-kit"),
            atom("2.0_rc1", "2", "~amd64", "dev-kit"),
            atom("1.1", "0", "", "core-kit"),
        ]);
        r
    }

    fn pvrs(atoms: &[RepoScanAtom]) -> Vec<String> {
        atoms.iter().map(|a| a.pvr().unwrap()).collect()
    }

    #[test]
    fn test_get_valid_sorted_and_keyword_filtered() {
        let r = resolver();
        let valid = r.get_valid("dev-lang/foo", &ResolveOptions::default()).unwrap();
        assert_eq!(pvrs(&valid), vec!["1.0", "1.2", "2.0_rc1"]);

        let r = resolver().with_allow_empty_keywords(true);
        let valid = r.get_valid("dev-lang/foo", &ResolveOptions::default()).unwrap();
        assert_eq!(pvrs(&valid), vec!["1.0", "1.1", "1.2", "2.0_rc1"]);
    }

    #[test]
    fn test_get_last_returns_max() {
        let r = resolver();
        let last = r.get_last("dev-lang/foo", &ResolveOptions::default()).unwrap();
        assert_eq!(last.pvr().unwrap(), "2.0_rc1");

        let last = r.get_last("dev-lang/foo:0", &ResolveOptions::default()).unwrap();
        assert_eq!(last.pvr().unwrap(), "1.2");
    }

    #[test]
    fn test_disabled_keywords() {
        let r = resolver().with_disabled_keywords(vec!["~amd64".to_string()]);
        let last = r.get_last("dev-lang/foo", &ResolveOptions::default()).unwrap();
        assert_eq!(last.pvr().unwrap(), "1.0");
    }

    #[test]
    fn test_repository_filter() {
        let r = resolver();
        let valid = r.get_valid("dev-lang/foo::dev-kit", &ResolveOptions::default()).unwrap();
        assert_eq!(pvrs(&valid), vec!["2.0_rc1"]);
    }

    #[test]
    fn test_conditions_and_ignore_slot() {
        let r = resolver();
        let opts = ResolveOptions::with_conditions(&["<dev-lang/foo-2.0:0".to_string()]);
        assert_eq!(r.get_last("dev-lang/foo", &opts).unwrap().pvr().unwrap(), "1.2");

        let mut opts = ResolveOptions::with_conditions(&[">=dev-lang/foo-2.0_rc1:0".to_string()]);
        assert!(matches!(r.get_last("dev-lang/foo", &opts), Err(Error::NoCandidate(_))));
        opts.ignore_slot = true;
        assert_eq!(r.get_last("dev-lang/foo", &opts).unwrap().pvr().unwrap(), "2.0_rc1");
    }

    #[test]
    fn test_global_constraints() {
        let mut r = resolver();
        r.set_constraints(&["<dev-lang/foo-1.2".to_string(), "=dev-lang/foo-2*".to_string()])
            .unwrap();
        let valid = r.get_valid("dev-lang/foo", &ResolveOptions::default()).unwrap();
        assert_eq!(pvrs(&valid), vec!["1.0", "2.0_rc1"]);
    }

    #[test]
    fn test_not_found_and_bad_constraint() {
        let r = resolver();
        assert!(matches!(
            r.get_valid("dev-lang/bar", &ResolveOptions::default()),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            r.get_valid(">=dev-lang/foo", &ResolveOptions::default()),
            Err(Error::Version(_))
        ));
    }

    #[test]
    fn test_all_versions_unfiltered() {
        let r = resolver();
        assert_eq!(pvrs(&r.all_versions("dev-lang/foo")), vec!["1.0", "1.1", "1.2", "2.0_rc1"]);
        assert!(r.all_versions("dev-lang/bar").is_empty());
    }
}
