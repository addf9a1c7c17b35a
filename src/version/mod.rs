// src/version/mod.rs

//! Gentoo version algebra
//!
//! This module provides version parsing and comparison for Gentoo-style
//! versions (`1.2.3b_rc1_p2-r1`), package atoms with comparison operators
//! and slot/repository restrictions, and KEYWORDS masking.
//!
//! Ordering follows PMS: numeric components (the first one compared as an
//! integer, later ones compared as decimal fractions when they carry a
//! leading zero), then the optional letter, then the suffix stream
//! (`_alpha < _beta < _pre < _rc < (none) < _p`), then the revision.

mod atom;
mod keywords;

pub use atom::{GentooPackage, Operator};
pub use keywords::{enabled_keywords, keywords_admitted};

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Category of a version/atom parse failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionErrorKind {
    InvalidVersion,
    InvalidOperator,
    MalformedAtom,
}

impl fmt::Display for VersionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidVersion => write!(f, "invalid version"),
            Self::InvalidOperator => write!(f, "invalid operator"),
            Self::MalformedAtom => write!(f, "malformed atom"),
        }
    }
}

/// Version or atom parse error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} '{input}'")]
pub struct VersionError {
    pub kind: VersionErrorKind,
    pub input: String,
}

impl VersionError {
    pub(crate) fn new(kind: VersionErrorKind, input: impl Into<String>) -> Self {
        Self {
            kind,
            input: input.into(),
        }
    }
}

/// Version suffix kinds, in ascending order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SuffixKind {
    Alpha,
    Beta,
    Pre,
    Rc,
    P,
}

impl SuffixKind {
    fn parse(s: &str) -> Option<(Self, &str)> {
        // `pre` must be tried before `p`
        for (tag, kind) in [
            ("alpha", Self::Alpha),
            ("beta", Self::Beta),
            ("pre", Self::Pre),
            ("rc", Self::Rc),
            ("p", Self::P),
        ] {
            if let Some(rest) = s.strip_prefix(tag) {
                return Some((kind, rest));
            }
        }
        None
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Alpha => "alpha",
            Self::Beta => "beta",
            Self::Pre => "pre",
            Self::Rc => "rc",
            Self::P => "p",
        }
    }
}

/// One `_suffix[N]` element
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Suffix {
    pub kind: SuffixKind,
    pub number: String,
}

/// A parsed Gentoo version
#[derive(Debug, Clone, Eq)]
pub struct Version {
    numbers: Vec<String>,
    letter: Option<char>,
    suffixes: Vec<Suffix>,
    revision: String,
    raw: String,
}

impl Version {
    /// Parse a version string
    ///
    /// Examples:
    /// - "1.2.3" → numbers=[1,2,3]
    /// - "1.2b_rc1" → numbers=[1,2], letter=b, suffixes=[rc1]
    /// - "2.0_p20240101-r3" → suffixes=[p20240101], revision=3
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let invalid = || VersionError::new(VersionErrorKind::InvalidVersion, s);

        let (body, revision) = match s.rfind("-r") {
            Some(pos) if is_digits(&s[pos + 2..]) => (&s[..pos], s[pos + 2..].to_string()),
            _ => (s, String::new()),
        };

        let (head, suffix_part) = match body.find('_') {
            Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
            None => (body, None),
        };

        let (num_part, letter) = match head.chars().last() {
            Some(c) if c.is_ascii_lowercase() => (&head[..head.len() - 1], Some(c)),
            _ => (head, None),
        };

        let numbers: Vec<String> = num_part.split('.').map(str::to_string).collect();
        if numbers.iter().any(|n| !is_digits(n)) {
            return Err(invalid());
        }

        let mut suffixes = Vec::new();
        if let Some(part) = suffix_part {
            for token in part.split('_') {
                let (kind, number) = SuffixKind::parse(token).ok_or_else(invalid)?;
                if !number.is_empty() && !is_digits(number) {
                    return Err(invalid());
                }
                suffixes.push(Suffix {
                    kind,
                    number: number.to_string(),
                });
            }
        }

        Ok(Self {
            numbers,
            letter,
            suffixes,
            revision,
            raw: s.to_string(),
        })
    }

    /// The version string exactly as parsed
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Revision number (0 when absent)
    pub fn revision(&self) -> u64 {
        self.revision.parse().unwrap_or(0)
    }

    /// Version without the `-rN` part
    pub fn base(&self) -> &str {
        if self.revision.is_empty() {
            &self.raw
        } else {
            &self.raw[..self.raw.len() - self.revision.len() - 2]
        }
    }

    /// Compare ignoring the revision
    pub fn cmp_base(&self, other: &Self) -> Ordering {
        compare_numbers(&self.numbers, &other.numbers)
            .then_with(|| self.letter.cmp(&other.letter))
            .then_with(|| compare_suffixes(&self.suffixes, &other.suffixes))
    }

    /// PMS glob match: `self` is the candidate, `pattern` the `=ver*` prefix
    pub fn glob_matches(&self, pattern: &Version) -> bool {
        if self.numbers.len() < pattern.numbers.len() {
            return false;
        }
        let numbers_match = self
            .numbers
            .iter()
            .zip(&pattern.numbers)
            .enumerate()
            .all(|(i, (a, b))| compare_component(i, a, b) == Ordering::Equal);
        if !numbers_match {
            return false;
        }
        if pattern.letter.is_some()
            && (self.numbers.len() != pattern.numbers.len() || self.letter != pattern.letter)
        {
            return false;
        }
        if !pattern.suffixes.is_empty() {
            if self.numbers.len() != pattern.numbers.len()
                || self.letter != pattern.letter
                || self.suffixes.len() < pattern.suffixes.len()
                || self.suffixes[..pattern.suffixes.len()] != pattern.suffixes[..]
            {
                return false;
            }
        }
        if !pattern.revision.is_empty() {
            return self.cmp_base(pattern) == Ordering::Equal
                && self.revision() == pattern.revision();
        }
        true
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Compare two digit strings as unbounded integers
fn compare_integers(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_component(index: usize, a: &str, b: &str) -> Ordering {
    if index > 0 && (a.starts_with('0') || b.starts_with('0')) {
        a.trim_end_matches('0').cmp(b.trim_end_matches('0'))
    } else {
        compare_integers(a, b)
    }
}

fn compare_numbers(a: &[String], b: &[String]) -> Ordering {
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        match compare_component(i, x, y) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }
    a.len().cmp(&b.len())
}

fn compare_suffixes(a: &[Suffix], b: &[Suffix]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = x
            .kind
            .cmp(&y.kind)
            .then_with(|| compare_integers(&x.number, &y.number));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    match a.len().cmp(&b.len()) {
        Ordering::Equal => Ordering::Equal,
        Ordering::Greater => {
            if a[b.len()].kind == SuffixKind::P {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        Ordering::Less => {
            if b[a.len()].kind == SuffixKind::P {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_base(other)
            .then_with(|| compare_integers(&self.revision, &other.revision))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl std::str::FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Compare two version strings, failing on malformed input
pub fn compare(a: &str, b: &str) -> Result<Ordering, VersionError> {
    Ok(Version::parse(a)?.cmp(&Version::parse(b)?))
}
