//! Dotted-path wildcard matching (spec §4.10): `*` at any position matches
//! exactly one path segment; a pattern whose *last* segment is `*` matches
//! that prefix plus any number of descendant segments (including zero).

/// Splits a dotted path (`"profile.expertise.rust"`) into segments.
pub fn split_path(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}

/// Whether `pattern` (already split into segments) matches `path`.
pub fn matches(pattern: &[String], path: &[String]) -> bool {
    match pattern.split_last() {
        None => path.is_empty(),
        Some((last, prefix)) if last == "*" => {
            path.len() >= prefix.len() && prefix.iter().zip(path).all(|(p, s)| p == "*" || p == s)
        }
        Some(_) => {
            pattern.len() == path.len() && pattern.iter().zip(path).all(|(p, s)| p == "*" || p == s)
        }
    }
}

/// A specificity score used to pick the winning rule among several that
/// match the same path within one precedence tier (spec §9: ties at equal
/// specificity are broken by deny-beats-allow, so this only needs to
/// order *unequal* specificity correctly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    /// A pattern ending in a descendant wildcard (`.*`) is less specific
    /// than one requiring an exact segment count.
    is_exact_length: bool,
    /// More literal (non-`*`) segments is more specific.
    literal_segments: usize,
    /// Among exact-length patterns, a longer path is more specific.
    depth: usize,
}

pub fn specificity(pattern: &[String]) -> Specificity {
    let is_exact_length = pattern.last().map(|s| s != "*").unwrap_or(true);
    let literal_segments = pattern.iter().filter(|s| s.as_str() != "*").count();
    Specificity { is_exact_length, literal_segments, depth: pattern.len() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Vec<String> {
        split_path(s)
    }

    #[test]
    fn exact_pattern_requires_exact_length() {
        assert!(matches(&p("profile.name"), &p("profile.name")));
        assert!(!matches(&p("profile.name"), &p("profile.name.extra")));
        assert!(!matches(&p("profile.name"), &p("profile")));
    }

    #[test]
    fn single_star_matches_one_segment_only() {
        assert!(matches(&p("profile.*"), &p("profile.name")));
        assert!(!matches(&p("devices.*.status"), &p("devices.status")));
        assert!(matches(&p("devices.*.status"), &p("devices.phone.status")));
        assert!(!matches(&p("devices.*.status"), &p("devices.phone.battery.status")));
    }

    #[test]
    fn trailing_star_matches_descendants_including_the_prefix_itself() {
        let pattern = p("knowledge.*");
        assert!(matches(&pattern, &p("knowledge")));
        assert!(matches(&pattern, &p("knowledge.rust")));
        assert!(matches(&pattern, &p("knowledge.rust.entries")));
        assert!(!matches(&pattern, &p("profile")));
    }

    #[test]
    fn exact_length_is_more_specific_than_descendant_wildcard() {
        assert!(specificity(&p("profile.name")) > specificity(&p("profile.*")));
    }

    #[test]
    fn more_literal_segments_is_more_specific() {
        assert!(specificity(&p("devices.phone.status")) > specificity(&p("devices.*.status")));
    }
}
