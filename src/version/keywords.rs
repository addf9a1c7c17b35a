// src/version/keywords.rs

//! KEYWORDS masking
//!
//! An atom's enabled keywords are its non-negated tokens. `-*` disables
//! everything not explicitly listed and `-arch` removes `arch`. The atom is
//! admitted unless the caller's disabled set removes every enabled keyword.

/// Enabled keywords of a KEYWORDS value, in declaration order
pub fn enabled_keywords(keywords: &str) -> Vec<&str> {
    let tokens: Vec<&str> = keywords.split_whitespace().collect();
    let negated: Vec<&str> = tokens
        .iter()
        .filter_map(|t| t.strip_prefix('-'))
        .filter(|t| *t != "*")
        .collect();

    let mut enabled: Vec<&str> = Vec::new();
    for token in tokens {
        if token.starts_with('-') || negated.contains(&token) || enabled.contains(&token) {
            continue;
        }
        enabled.push(token);
    }
    enabled
}

/// Whether an atom with `keywords` survives the `disabled` mask
///
/// Empty KEYWORDS are only accepted with `allow_empty`. A `~*` entry in the
/// disabled set masks every testing keyword.
pub fn keywords_admitted(keywords: &str, disabled: &[String], allow_empty: bool) -> bool {
    if keywords.trim().is_empty() {
        return allow_empty;
    }

    let mask_testing = disabled.iter().any(|d| d == "~*");
    enabled_keywords(keywords).iter().any(|kw| {
        if mask_testing && kw.starts_with('~') {
            return false;
        }
        !disabled.iter().any(|d| d == kw)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_enabled_keywords() {
        assert_eq!(enabled_keywords("amd64 ~arm64"), vec!["amd64", "~arm64"]);
        assert_eq!(enabled_keywords("-* amd64"), vec!["amd64"]);
        assert_eq!(enabled_keywords("amd64 -amd64 x86"), vec!["x86"]);
        assert!(enabled_keywords("-*").is_empty());
    }

    #[test]
    fn test_admitted_without_mask() {
        assert!(keywords_admitted("~amd64", &[], false));
        assert!(!keywords_admitted("", &[], false));
        assert!(keywords_admitted("  ", &[], true));
    }

    #[test]
    fn test_admitted_with_mask() {
        let disabled = set(&["~amd64"]);
        assert!(!keywords_admitted("~amd64", &disabled, false));
        assert!(keywords_admitted("amd64 ~amd64", &disabled, false));
        assert!(keywords_admitted("~amd64 ~arm64", &disabled, false));
    }

    #[test]
    fn test_star_negation_reenables_exact_match() {
        let disabled = set(&["~arm64"]);
        assert!(keywords_admitted("-* amd64", &disabled, false));
        assert!(!keywords_admitted("-* ~arm64", &disabled, false));
        assert!(!keywords_admitted("-*", &[], false));
    }

    #[test]
    fn test_testing_wildcard() {
        let disabled = set(&["~*"]);
        assert!(!keywords_admitted("~amd64 ~arm64", &disabled, false));
        assert!(keywords_admitted("~amd64 arm64", &disabled, false));
    }
}
