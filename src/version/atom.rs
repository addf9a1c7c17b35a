// src/version/atom.rs

//! Package atom parsing and matching
//!
//! Implements Gentoo-style package atoms like:
//! - `category/package`
//! - `>=category/package-1.0:2/2.1::kit`
//! - `=category/package-1.2*`
//! - `!<category/package-3`

use super::{Version, VersionError, VersionErrorKind};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Version comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Operator {
    /// No version constraint (an atom with a bare version means `=`)
    #[default]
    None,
    Less,
    LessOrEqual,
    Equal,
    /// `~`: same version ignoring revision
    AnyRevision,
    GreaterOrEqual,
    Greater,
    /// `=cat/pkg-1.2*`
    Glob,
    NotEqual,
    NotLess,
    NotGreater,
}

impl Operator {
    /// Split a leading operator off `s`
    fn split(s: &str) -> Result<(Self, &str), VersionError> {
        const TABLE: [(&str, Operator); 10] = [
            ("!<", Operator::NotLess),
            ("!>", Operator::NotGreater),
            ("!=", Operator::NotEqual),
            ("=*", Operator::Glob),
            (">=", Operator::GreaterOrEqual),
            ("<=", Operator::LessOrEqual),
            (">", Operator::Greater),
            ("<", Operator::Less),
            ("=", Operator::Equal),
            ("~", Operator::AnyRevision),
        ];
        for (tag, op) in TABLE {
            if let Some(rest) = s.strip_prefix(tag) {
                return Ok((op, rest));
            }
        }
        if s.starts_with(['!', '*']) {
            return Err(VersionError::new(VersionErrorKind::InvalidOperator, s));
        }
        Ok((Operator::None, s))
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Equal | Self::Glob => "=",
            Self::AnyRevision => "~",
            Self::GreaterOrEqual => ">=",
            Self::Greater => ">",
            Self::NotEqual => "!=",
            Self::NotLess => "!<",
            Self::NotGreater => "!>",
        }
    }

    /// Whether `candidate op constraint` holds
    pub fn matches(&self, candidate: &Version, constraint: &Version) -> bool {
        match self {
            Self::None | Self::Equal => candidate == constraint,
            Self::Less => candidate < constraint,
            Self::LessOrEqual => candidate <= constraint,
            Self::AnyRevision => candidate.cmp_base(constraint) == Ordering::Equal,
            Self::GreaterOrEqual => candidate >= constraint,
            Self::Greater => candidate > constraint,
            Self::Glob => candidate.glob_matches(constraint),
            Self::NotEqual => candidate != constraint,
            Self::NotLess => candidate >= constraint,
            Self::NotGreater => candidate <= constraint,
        }
    }
}

/// A parsed package atom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GentooPackage {
    pub category: String,
    pub name: String,
    pub version: Option<Version>,
    pub slot: Option<String>,
    pub subslot: Option<String>,
    pub repository: Option<String>,
    pub condition: Operator,
}

impl GentooPackage {
    /// Create an unversioned atom
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            version: None,
            slot: None,
            subslot: None,
            repository: None,
            condition: Operator::None,
        }
    }

    /// Parse an atom string
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let input = s.trim();
        let malformed = || VersionError::new(VersionErrorKind::MalformedAtom, input);

        let (mut condition, rest) = Operator::split(input)?;

        let (rest, repository) = match rest.split_once("::") {
            Some((r, repo)) if !repo.is_empty() => (r, Some(repo.to_string())),
            Some(_) => return Err(malformed()),
            None => (rest, None),
        };

        let (rest, slot, subslot) = match rest.split_once(':') {
            Some((r, slot_part)) => {
                let (slot, sub) = match slot_part.split_once('/') {
                    Some((s, sub)) => (s, Some(sub.to_string())),
                    None => (slot_part, None),
                };
                if slot.is_empty() {
                    return Err(malformed());
                }
                (r, Some(slot.to_string()), sub)
            }
            None => (rest, None, None),
        };

        let (rest, glob) = match rest.strip_suffix('*') {
            Some(r) => (r, true),
            None => (rest, false),
        };
        if glob {
            match condition {
                Operator::Equal | Operator::Glob => condition = Operator::Glob,
                _ => return Err(VersionError::new(VersionErrorKind::InvalidOperator, input)),
            }
        }

        let (category, pn_ver) = rest.split_once('/').ok_or_else(malformed)?;
        if category.is_empty() || pn_ver.is_empty() || pn_ver.contains('/') {
            return Err(malformed());
        }

        let (name, version) = split_name_version(pn_ver);
        if name.is_empty() {
            return Err(malformed());
        }

        let version = match version {
            Some(ver) => Some(Version::parse(ver)?),
            None => None,
        };
        if version.is_none() && condition != Operator::None {
            return Err(malformed());
        }

        Ok(Self {
            category: category.to_string(),
            name: name.to_string(),
            version,
            slot,
            subslot,
            repository,
            condition,
        })
    }

    /// `category/name`
    pub fn catpkg(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }

    /// Version including revision, or empty
    pub fn pvr(&self) -> String {
        self.version
            .as_ref()
            .map(|v| v.as_str().to_string())
            .unwrap_or_default()
    }

    /// `category/name-version[-rN]`
    pub fn atom(&self) -> String {
        match &self.version {
            Some(v) => format!("{}/{}-{}", self.category, self.name, v),
            None => self.catpkg(),
        }
    }

    /// Set the slot from a raw `SLOT` value (`slot[/sub]`)
    pub fn with_raw_slot(mut self, raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return self;
        }
        match raw.split_once('/') {
            Some((slot, sub)) => {
                self.slot = Some(slot.to_string());
                self.subslot = Some(sub.to_string());
            }
            None => {
                self.slot = Some(raw.to_string());
                self.subslot = None;
            }
        }
        self
    }

    /// Compare versions; unversioned atoms sort first
    pub fn compare_version(&self, other: &Self) -> Ordering {
        match (&self.version, &other.version) {
            (Some(a), Some(b)) => a.cmp(b),
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
        }
    }

    pub fn equal_version(&self, other: &Self) -> bool {
        self.compare_version(other) == Ordering::Equal
    }

    pub fn greater_than(&self, other: &Self) -> bool {
        self.compare_version(other) == Ordering::Greater
    }

    /// Whether `self` (used as a constraint) admits `candidate`
    ///
    /// Category and name must match. A slot named by the constraint must
    /// match exactly; the sub-slot only when the constraint names one.
    pub fn admit(&self, candidate: &GentooPackage) -> bool {
        if self.category != candidate.category || self.name != candidate.name {
            return false;
        }

        if let Some(slot) = &self.slot {
            let candidate_slot = candidate.slot.as_deref().unwrap_or("0");
            if slot != "*" && slot != candidate_slot {
                return false;
            }
            if let Some(sub) = &self.subslot
                && candidate.subslot.as_ref() != Some(sub)
            {
                return false;
            }
        }

        match (&self.version, &candidate.version) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(constraint), Some(version)) => self.condition.matches(version, constraint),
        }
    }
}

/// Split `pn-ver` at the first hyphen whose tail is a valid version
fn split_name_version(s: &str) -> (&str, Option<&str>) {
    for (idx, _) in s.match_indices('-') {
        let tail = &s[idx + 1..];
        if tail.starts_with(|c: char| c.is_ascii_digit()) && Version::parse(tail).is_ok() {
            return (&s[..idx], Some(tail));
        }
    }
    (s, None)
}

impl fmt::Display for GentooPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.condition.as_str(), self.atom())?;
        if self.condition == Operator::Glob {
            write!(f, "*")?;
        }
        if let Some(slot) = &self.slot {
            write!(f, ":{}", slot)?;
            if let Some(sub) = &self.subslot {
                write!(f, "/{}", sub)?;
            }
        }
        if let Some(repo) = &self.repository {
            write!(f, "::{}", repo)?;
        }
        Ok(())
    }
}

impl FromStr for GentooPackage {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> GentooPackage {
        GentooPackage::parse(s).unwrap()
    }

    #[test]
    fn test_parse_plain() {
        let pkg = p("dev-lang/go");
        assert_eq!(pkg.category, "dev-lang");
        assert_eq!(pkg.name, "go");
        assert!(pkg.version.is_none());
        assert_eq!(pkg.condition, Operator::None);
    }

    #[test]
    fn test_parse_full_atom() {
        let pkg = p(">=dev-libs/openssl-3.0.1-r2:0/3::core-kit");
        assert_eq!(pkg.condition, Operator::GreaterOrEqual);
        assert_eq!(pkg.name, "openssl");
        assert_eq!(pkg.pvr(), "3.0.1-r2");
        assert_eq!(pkg.slot.as_deref(), Some("0"));
        assert_eq!(pkg.subslot.as_deref(), Some("3"));
        assert_eq!(pkg.repository.as_deref(), Some("core-kit"));
        assert_eq!(pkg.to_string(), ">=dev-libs/openssl-3.0.1-r2:0/3::core-kit");
    }

    #[test]
    fn test_parse_hyphenated_name() {
        let pkg = p("=app-misc/foo-bar-2-1.0");
        assert_eq!(pkg.name, "foo-bar-2");
        assert_eq!(pkg.pvr(), "1.0");

        let pkg = p("x11-libs/gtk-3");
        assert_eq!(pkg.name, "gtk");
        assert_eq!(pkg.pvr(), "3");
    }

    #[test]
    fn test_parse_glob_and_negations() {
        assert_eq!(p("=dev-lang/rust-1.75*").condition, Operator::Glob);
        assert_eq!(p("!=dev-lang/rust-1.75").condition, Operator::NotEqual);
        assert_eq!(p("!<dev-lang/rust-1.75").condition, Operator::NotLess);
        assert_eq!(p("!>dev-lang/rust-1.75").condition, Operator::NotGreater);
        assert_eq!(p("~dev-lang/rust-1.75").condition, Operator::AnyRevision);
    }

    #[test]
    fn test_parse_errors() {
        let err = GentooPackage::parse(">=dev-lang/go").unwrap_err();
        assert_eq!(err.kind, VersionErrorKind::MalformedAtom);

        let err = GentooPackage::parse("go-1.0").unwrap_err();
        assert_eq!(err.kind, VersionErrorKind::MalformedAtom);

        let err = GentooPackage::parse("!!dev-lang/go-1").unwrap_err();
        assert_eq!(err.kind, VersionErrorKind::InvalidOperator);

        let err = GentooPackage::parse(">=dev-lang/go-1*").unwrap_err();
        assert_eq!(err.kind, VersionErrorKind::InvalidOperator);
    }

    #[test]
    fn test_admit_operators() {
        let cand = p("dev-lang/go-1.21.3");
        assert!(p(">=dev-lang/go-1.21").admit(&cand));
        assert!(!p("<dev-lang/go-1.21").admit(&cand));
        assert!(p("=dev-lang/go-1.21*").admit(&cand));
        assert!(p("!=dev-lang/go-1.20").admit(&cand));
        assert!(!p("!<dev-lang/go-1.22").admit(&cand));
        assert!(p("!>dev-lang/go-1.22").admit(&cand));
        assert!(p("dev-lang/go").admit(&cand));
        assert!(!p("dev-lang/rust").admit(&cand));
    }

    #[test]
    fn test_admit_any_revision() {
        let cand = p("dev-lang/go-1.21-r3");
        assert!(p("~dev-lang/go-1.21").admit(&cand));
        assert!(!p("=dev-lang/go-1.21").admit(&cand));
    }

    #[test]
    fn test_admit_slot_rules() {
        let cand = p("dev-lang/python-3.11.4").with_raw_slot("3.11/3.11");
        assert!(p("dev-lang/python:3.11").admit(&cand));
        assert!(!p("dev-lang/python:3.12").admit(&cand));
        assert!(p("dev-lang/python:3.11/3.11").admit(&cand));
        assert!(!p("dev-lang/python:3.11/3.10").admit(&cand));
    }
}
