// src/lib.rs

//! Mark Devkit
//!
//! Maintenance pipeline for Gentoo-style kits (overlays).
//!
//! # Architecture
//!
//! - Kit caches: JSONL snapshots of every ebuild's metadata and distfiles
//! - Resolver: version, slot and keyword rules over the caches
//! - Merge engine: carries the newest admitted versions into a target kit,
//!   directly or through pull requests
//! - Autogen: renders ebuilds from upstream release data, then merges them
//! - Fetcher: mirrors and verifies distfiles into a directory or object store
//! - Cleaner: prunes old versions of target atoms

pub mod autogen;
pub mod cache;
pub mod config;
mod error;
pub mod fetcher;
pub mod hash;
pub mod http;
pub mod kit;
pub mod manifest;
pub mod merge;
pub mod notify;
pub mod resolver;
pub mod specs;
pub mod vcs;
pub mod version;

pub use autogen::{AutogenBot, AutogenOptions, AutogenSummary};
pub use cache::{RepoScanAtom, RepoScanFile};
pub use config::DevkitConfig;
pub use error::{Error, Result};
pub use hash::{FileDigests, HashAlgorithm};
pub use manifest::Manifest;
pub use merge::{MergeBot, MergeOptions, MergeSummary};
pub use resolver::{RepoScanResolver, ResolveOptions};
pub use version::{GentooPackage, Version, VersionError};
