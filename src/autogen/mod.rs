// src/autogen/mod.rs

//! Autogen bot
//!
//! Generates ebuilds from upstream release data and merges them into a
//! target kit. Per atom of every definition:
//!
//! 1. the generator lists the upstream versions
//! 2. transforms map them to Gentoo spelling and the selectors pick one
//! 3. the generator fills the values of the selected version
//! 4. extensions vendor dependencies into local bundles
//! 5. versions already present (or older than the target's) are skipped
//! 6. the ebuild is rendered into the staging kit with its Manifest
//!
//! The staging kit is then appended to the source resolver and the merge
//! engine runs as usual. New distfiles are finally synced through the
//! configured fetcher.
//!
//! Steps 1 to 4 run concurrently; rendering and merging are serial.

pub mod archive;
pub mod extensions;
pub mod generators;
pub mod selector;
pub mod staging;
pub mod template;
pub mod values;

use crate::error::{Error, Result};
use crate::fetcher::{FetchOptions, FetchReport, Fetcher};
use crate::http::HttpClient;
use crate::merge::{MergeBot, MergeOptions, MergeSummary, Workspace};
use crate::resolver::RepoScanResolver;
use crate::specs::{AutogenAtom, AutogenDefinition, AutogenSpec, MergeKit, TargetAtom};
use crate::version::GentooPackage;
use extensions::{ExtensionContext, run_extensions};
use generators::{Elaboration, Generator, GeneratorContext, new_generator};
use parking_lot::Mutex;
use rayon::prelude::*;
use selector::{Selected, VersionMap, select};
use staging::{STAGING_KIT, Staging};
use std::fs;
use std::sync::Arc;
use template::new_engine;
use tracing::{debug, info, warn};
use values::{Artefact, Values, initial_values, set_str};

/// Default number of atoms elaborated concurrently
pub const DEFAULT_AUTOGEN_CONCURRENCY: usize = 3;

#[derive(Debug, Clone)]
pub struct AutogenOptions {
    /// Workspace, git and push settings shared with the merge engine
    pub merge: MergeOptions,
    pub concurrency: usize,
    /// Restrict the run to these package names / catpkgs
    pub atoms_filter: Vec<String>,
    /// Sync the distfiles of bumped atoms after the merge
    pub sync_distfiles: bool,
}

impl Default for AutogenOptions {
    fn default() -> Self {
        Self {
            merge: MergeOptions::default(),
            concurrency: DEFAULT_AUTOGEN_CONCURRENCY,
            atoms_filter: Vec::new(),
            sync_distfiles: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct AutogenSummary {
    /// Atoms written to the staging kit
    pub generated: Vec<String>,
    /// Atoms skipped because the target already carries them
    pub skipped: Vec<String>,
    pub merge: MergeSummary,
    pub fetch: Option<FetchReport>,
}

/// An atom after generator, selection and extensions
struct Elaborated {
    atom: AutogenAtom,
    selected: Selected,
    values: Values,
    artefacts: Vec<Artefact>,
}

pub struct AutogenBot {
    merge: MergeBot,
    client: HttpClient,
    generators: GeneratorContext,
    fetcher: Option<Arc<dyn Fetcher>>,
}

fn atom_matches(atom: &AutogenAtom, filter: &[String]) -> bool {
    filter.is_empty() || filter.iter().any(|f| *f == atom.name || *f == atom.catpkg())
}

/// Whether `version` of `catpkg` is newer than every version in the target
pub fn is_version_to_add(target: &RepoScanResolver, catpkg: &str, version: &str) -> Result<bool> {
    let candidate = GentooPackage::parse(&format!("{}-{}", catpkg, version))?;
    for existing in target.all_versions(catpkg) {
        let existing = existing.to_gentoo_package()?;
        if existing.equal_version(&candidate) || existing.greater_than(&candidate) {
            debug!("{}: target has {}", catpkg, existing.pvr());
            return Ok(false);
        }
    }
    Ok(true)
}

impl AutogenBot {
    pub fn new(merge: MergeBot, generators: GeneratorContext) -> Self {
        Self {
            merge,
            client: generators.client.clone(),
            generators,
            fetcher: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn merge_bot(&self) -> &MergeBot {
        &self.merge
    }

    /// Generate every atom of `spec` and merge the new versions into `kit`
    pub fn run(&self, spec: &AutogenSpec, kit: &MergeKit, opts: &AutogenOptions) -> Result<AutogenSummary> {
        let mut merge_opts = opts.merge.clone();
        // Generated ebuilds may carry no KEYWORDS
        merge_opts.allow_empty_keywords = true;

        let mut ws = self.merge.prepare(kit, &merge_opts)?;
        let result = self.run_on(spec, kit, &mut ws, opts, &merge_opts);
        if !merge_opts.keep_workdir {
            ws.cleanup()?;
        }
        result
    }

    fn run_on(
        &self,
        spec: &AutogenSpec,
        kit: &MergeKit,
        ws: &mut Workspace,
        opts: &AutogenOptions,
        merge_opts: &MergeOptions,
    ) -> Result<AutogenSummary> {
        let staging = Staging::new(
            ws.sources_dir().join(STAGING_KIT),
            ws.downloads_dir(),
            self.client.clone(),
        )?;
        let scratch = ws.work_dir.join("autogen");
        fs::create_dir_all(&scratch).map_err(|e| Error::io_at(&scratch, e))?;
        let ext_ctx = ExtensionContext {
            client: self.client.clone(),
            vcs: self.merge.vcs_handle(),
            download_dir: ws.downloads_dir(),
            work_dir: scratch.clone(),
            spec_dir: spec.spec_dir.clone(),
        };
        let mut gen_ctx = self.generators.clone();
        gen_ctx.spec_dir = spec.spec_dir.clone();

        let mut summary = AutogenSummary::default();
        let mut generated = Vec::new();
        for (name, definition) in &spec.definitions {
            let atoms: Vec<AutogenAtom> = definition
                .atoms()
                .into_iter()
                .filter(|a| atom_matches(a, &opts.atoms_filter))
                .collect();
            if atoms.is_empty() {
                continue;
            }
            info!("{}: {} atoms with {}", name, atoms.len(), definition.generator);

            let generator = new_generator(&definition.generator, &gen_ctx)?;
            let elaborated = elaborate_all(generator.as_ref(), definition, &ext_ctx, &atoms, opts.concurrency)?;

            let engine = new_engine(&definition.template)?;
            for item in elaborated {
                let catpkg = item.atom.catpkg();
                if !is_version_to_add(&ws.target, &catpkg, &item.selected.version)? {
                    info!("{}-{}: already in {}", catpkg, item.selected.version, kit.target.name);
                    summary.skipped.push(format!("{}-{}", catpkg, item.selected.version));
                    continue;
                }
                let atom = staging.generate(&item.atom, engine.as_ref(), &spec.spec_dir, &item.values, &item.artefacts)?;
                summary.generated.push(atom.atom.clone());
                generated.push(atom);
            }
        }

        if let Err(e) = fs::remove_dir_all(&scratch) {
            warn!("Failed to remove {}: {}", scratch.display(), e);
        }
        if generated.is_empty() {
            info!("Nothing to generate for {}", kit.target.name);
            return Ok(summary);
        }

        let kit = with_generated_targets(kit, &generated);
        ws.add_source_kit(STAGING_KIT, staging.kit_dir(), generated.clone());
        summary.merge = self.merge.merge(&kit, ws, merge_opts)?;

        if opts.sync_distfiles && !merge_opts.dry_run
            && let Some(fetcher) = &self.fetcher
        {
            let bumped: Vec<_> = generated
                .into_iter()
                .filter(|a| summary.merge.bumped.contains(&a.atom))
                .collect();
            if !bumped.is_empty() {
                let fetch_opts = FetchOptions {
                    concurrency: opts.concurrency,
                    ..Default::default()
                };
                summary.fetch = Some(fetcher.sync_atoms(&bumped, &fetch_opts)?);
            }
        }
        Ok(summary)
    }
}

/// Generator, selection and extensions for every atom of a definition
///
/// Results keep the specfile order. The first failure aborts the run.
fn elaborate_all(
    generator: &dyn Generator,
    definition: &AutogenDefinition,
    ctx: &ExtensionContext,
    atoms: &[AutogenAtom],
    concurrency: usize,
) -> Result<Vec<Elaborated>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency.max(1))
        .build()
        .map_err(|e| Error::InitError(format!("Failed to create worker pool: {e}")))?;

    let done: Mutex<Vec<(usize, Elaborated)>> = Mutex::new(Vec::new());
    pool.install(|| {
        atoms.par_iter().enumerate().try_for_each(|(index, atom)| {
            if let Some(item) = elaborate(generator, definition, ctx, atom)? {
                done.lock().push((index, item));
            }
            Ok::<(), Error>(())
        })
    })?;

    let mut done = done.into_inner();
    done.sort_by_key(|(index, _)| *index);
    Ok(done.into_iter().map(|(_, item)| item).collect())
}

fn elaborate(
    generator: &dyn Generator,
    definition: &AutogenDefinition,
    ctx: &ExtensionContext,
    atom: &AutogenAtom,
) -> Result<Option<Elaborated>> {
    let catpkg = atom.catpkg();
    let mut state = Elaboration {
        values: initial_values(atom),
        ..Default::default()
    };
    generator.process(atom, &mut state)?;

    let map = VersionMap::build(&state.versions, &atom.transforms)?;
    let selected = match &atom.version {
        Some(pinned) => pinned_version(&map, pinned),
        None => select(&catpkg, &map, &atom.selector)?,
    };
    let Some(selected) = selected else {
        warn!("{}: no upstream version selected", catpkg);
        return Ok(None);
    };
    debug!("{}: selected {} ({})", catpkg, selected.version, selected.original_version);
    set_str(&mut state.values, "version", selected.version.as_str());
    set_str(&mut state.values, "original_version", selected.original_version.as_str());

    generator.set_version(atom, &selected, &mut state)?;
    run_extensions(ctx, &definition.extensions, atom, &mut state)?;

    Ok(Some(Elaborated {
        atom: atom.clone(),
        selected,
        values: state.values,
        artefacts: state.artefacts,
    }))
}

/// A version fixed by the specfile, in either spelling
fn pinned_version(map: &VersionMap, pinned: &str) -> Option<Selected> {
    if let Some(raw) = map.raw(pinned) {
        return Some(Selected {
            version: pinned.to_string(),
            original_version: raw.to_string(),
        });
    }
    map.transformed(pinned).map(|version| Selected {
        version: version.to_string(),
        original_version: pinned.to_string(),
    })
}

/// `kit` with a target atom for every generated package it lacks
fn with_generated_targets(kit: &MergeKit, generated: &[crate::cache::RepoScanAtom]) -> MergeKit {
    let mut kit = kit.clone();
    for atom in generated {
        let catpkg = atom.catpkg();
        let known = kit.target.atoms.iter().any(|t| {
            GentooPackage::parse(&t.pkg)
                .map(|p| p.catpkg() == catpkg)
                .unwrap_or(false)
        });
        if !known {
            kit.target.atoms.push(TargetAtom::new(&catpkg));
        }
    }
    kit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RepoScanAtom;
    use crate::autogen::template::PlaceholderEngine;
    use crate::autogen::values::value_str;
    use crate::specs::Transform;
    use crate::vcs::GitCli;
    use std::path::Path;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn target_with(versions: &[&str]) -> RepoScanResolver {
        let mut target = RepoScanResolver::new().with_allow_empty_keywords(true);
        target.add_atoms(versions.iter().map(|v| RepoScanAtom {
            atom: format!("dev-util/foo-{v}"),
            category: "dev-util".to_string(),
            package: "foo".to_string(),
            ..Default::default()
        }));
        target
    }

    #[test]
    fn test_version_to_add_on_empty_target() {
        let target = RepoScanResolver::new();
        assert!(is_version_to_add(&target, "dev-util/foo", "1.0").unwrap());
    }

    #[test]
    fn test_version_to_add_compares_with_target() {
        let target = target_with(&["1.2.0", "1.1.0"]);
        assert!(!is_version_to_add(&target, "dev-util/foo", "1.2.0").unwrap());
        assert!(!is_version_to_add(&target, "dev-util/foo", "1.1.5").unwrap());
        assert!(is_version_to_add(&target, "dev-util/foo", "1.3.0").unwrap());
    }

    #[test]
    fn test_atom_filter() {
        let atom = AutogenAtom {
            name: "foo".to_string(),
            category: "dev-util".to_string(),
            ..Default::default()
        };
        assert!(atom_matches(&atom, &[]));
        assert!(atom_matches(&atom, &strings(&["foo"])));
        assert!(atom_matches(&atom, &strings(&["dev-util/foo"])));
        assert!(!atom_matches(&atom, &strings(&["bar"])));
    }

    #[test]
    fn test_pinned_version_in_both_spellings() {
        let transforms = vec![Transform {
            kind: "string".to_string(),
            pattern: "v".to_string(),
            replace: String::new(),
        }];
        let map = VersionMap::build(&strings(&["v1.0", "v2.0"]), &transforms).unwrap();
        let by_gentoo = pinned_version(&map, "1.0").unwrap();
        assert_eq!(by_gentoo.original_version, "v1.0");
        let by_raw = pinned_version(&map, "v2.0").unwrap();
        assert_eq!(by_raw.version, "2.0");
        assert!(pinned_version(&map, "3.0").is_none());
    }

    fn noop_generator(ctx: &ExtensionContext) -> Box<dyn Generator> {
        new_generator("builtin-noop", &GeneratorContext::new(ctx.client.clone(), ctx.spec_dir.clone())).unwrap()
    }

    fn extension_context(dir: &Path) -> ExtensionContext {
        ExtensionContext {
            client: HttpClient::with_defaults().unwrap(),
            vcs: Arc::new(GitCli::new(None)),
            download_dir: dir.join("downloads"),
            work_dir: dir.join("work"),
            spec_dir: dir.join("spec"),
        }
    }

    #[test]
    fn test_elaborate_records_selected_version() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = extension_context(dir.path());
        let atom = AutogenAtom {
            name: "foo".to_string(),
            category: "dev-util".to_string(),
            template: "templates/foo.tmpl".to_string(),
            version: Some("1.2".to_string()),
            ..Default::default()
        };

        let item = elaborate(noop_generator(&ctx).as_ref(), &AutogenDefinition::default(), &ctx, &atom)
            .unwrap()
            .unwrap();
        assert_eq!(item.selected.version, "1.2");
        assert_eq!(value_str(&item.values, "version"), Some("1.2"));
        assert_eq!(value_str(&item.values, "original_version"), Some("1.2"));
    }

    #[test]
    fn test_elaborated_atom_renders_in_staging() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = extension_context(dir.path());
        fs::create_dir_all(ctx.spec_dir.join("templates")).unwrap();
        fs::write(
            ctx.spec_dir.join("templates/foo.tmpl"),
            "EAPI=8\nMY_PV=\"{{ .Values.original_version }}\"\n",
        )
        .unwrap();
        let mut atom = AutogenAtom {
            name: "foo".to_string(),
            category: "dev-util".to_string(),
            template: "templates/foo.tmpl".to_string(),
            ignore_artefacts: Some(true),
            ..Default::default()
        };
        atom.vars.insert("version".to_string(), serde_json::Value::from("v2.0"));
        atom.transforms.push(Transform {
            kind: "string".to_string(),
            pattern: "v".to_string(),
            replace: String::new(),
        });

        let item = elaborate(noop_generator(&ctx).as_ref(), &AutogenDefinition::default(), &ctx, &atom)
            .unwrap()
            .unwrap();
        let staging = Staging::new(dir.path().join("kit"), ctx.download_dir.clone(), ctx.client.clone()).unwrap();
        let engine = PlaceholderEngine::helm().unwrap();
        let generated = staging
            .generate(&item.atom, &engine, &ctx.spec_dir, &item.values, &item.artefacts)
            .unwrap();

        assert_eq!(generated.atom, "dev-util/foo-2.0");
        let ebuild = fs::read_to_string(dir.path().join("kit/dev-util/foo/foo-2.0.ebuild")).unwrap();
        assert!(ebuild.contains("MY_PV=\"v2.0\""));
    }

    #[test]
    fn test_generated_targets_added_once() {
        let mut kit = MergeKit::default();
        kit.target.atoms.push(TargetAtom::new("dev-util/foo"));
        let generated = vec![
            RepoScanAtom {
                atom: "dev-util/foo-1.0".to_string(),
                category: "dev-util".to_string(),
                package: "foo".to_string(),
                ..Default::default()
            },
            RepoScanAtom {
                atom: "dev-util/bar-2.0".to_string(),
                category: "dev-util".to_string(),
                package: "bar".to_string(),
                ..Default::default()
            },
        ];
        let kit = with_generated_targets(&kit, &generated);
        let pkgs: Vec<&str> = kit.target.atoms.iter().map(|a| a.pkg.as_str()).collect();
        assert_eq!(pkgs, vec!["dev-util/foo", "dev-util/bar"]);
    }
}
