//! Candidate selection

use crate::constraint::Constraint;
use crate::error::{ConstraintError, Result};
use pkgi_types::{PrereleasePolicy, VersionSelection};
use semver::Version;
use std::cmp::Ordering;
use std::fmt;

/// Number of available versions listed in a [`NoMatch`]
const NEAREST_LIMIT: usize = 5;

/// Outcome of resolving a selection against the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The winning candidate, spelled exactly as it appeared in the input
    Selected { version: String },
    NoMatch(NoMatch),
}

impl Resolution {
    pub fn selected(&self) -> Option<&str> {
        match self {
            Resolution::Selected { version } => Some(version),
            Resolution::NoMatch(_) => None,
        }
    }
}

/// No candidate satisfied the constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoMatch {
    pub constraints: String,

    /// Highest valid candidates, highest first
    pub nearest: Vec<String>,
}

impl fmt::Display for NoMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no version satisfies '{}'", self.constraints)?;
        if self.nearest.is_empty() {
            write!(f, " (no valid versions available)")
        } else {
            write!(f, " (available: {})", self.nearest.join(", "))
        }
    }
}

/// Parse a candidate version, tolerating a leading `v`
pub fn parse_version(raw: &str) -> Option<Version> {
    let raw = raw.trim();
    let raw = raw.strip_prefix(['v', 'V']).unwrap_or(raw);
    Version::parse(raw).ok()
}

/// Pick the best candidate for `selection`
///
/// Candidates that are not valid semantic versions are skipped. The result
/// does not depend on candidate order.
pub fn resolve<S: AsRef<str>>(
    selection: &VersionSelection,
    candidates: &[S],
) -> Result<Resolution> {
    let constraint = Constraint::parse(&selection.constraints)?;
    let policy = selection.prereleases.as_ref();

    let mut parsed: Vec<(Version, &str)> = candidates
        .iter()
        .filter_map(|c| {
            let raw = c.as_ref();
            parse_version(raw).map(|v| (v, raw))
        })
        .collect();
    parsed.sort_by(|(a, a_raw), (b, b_raw)| selection_order(a, b).then_with(|| a_raw.cmp(b_raw)));

    let winner = parsed
        .iter()
        .rev()
        .find(|(version, _)| admits(&constraint, policy, version));

    Ok(match winner {
        Some((_, raw)) => Resolution::Selected {
            version: raw.to_string(),
        },
        None => Resolution::NoMatch(NoMatch {
            constraints: constraint.to_string(),
            nearest: parsed
                .iter()
                .rev()
                .take(NEAREST_LIMIT)
                .map(|(_, raw)| raw.to_string())
                .collect(),
        }),
    })
}

/// Check a single version against a constraint, prereleases included
///
/// Used for cluster and controller compatibility checks, where the running
/// version is whatever it is and no prerelease policy applies.
pub fn satisfies(constraints: &str, version: &str) -> Result<bool> {
    let constraint = Constraint::parse(constraints)?;
    let parsed = parse_version(version).ok_or_else(|| ConstraintError::InvalidVersion {
        constraint: constraints.to_string(),
        version: version.to_string(),
        reason: "not a semantic version".into(),
    })?;
    Ok(constraint.matches(&parsed))
}

fn admits(constraint: &Constraint, policy: Option<&PrereleasePolicy>, version: &Version) -> bool {
    if !version.pre.is_empty() {
        match policy {
            Some(policy) if !prerelease_allowed(policy, version) => return false,
            None if constraint.is_unconstrained() => return false,
            _ => {}
        }
    }
    constraint.matches(version)
}

fn prerelease_allowed(policy: &PrereleasePolicy, version: &Version) -> bool {
    policy.identifiers.is_empty()
        || version
            .pre
            .as_str()
            .split('.')
            .any(|id| policy.identifiers.iter().any(|allowed| allowed == id))
}

/// Ascending order; the last admitted element wins
fn selection_order(a: &Version, b: &Version) -> Ordering {
    a.cmp_precedence(b)
        .then_with(|| build_identifiers(a).cmp(&build_identifiers(b)))
        .then_with(|| a.build.as_str().cmp(b.build.as_str()))
}

fn build_identifiers(v: &Version) -> usize {
    if v.build.is_empty() {
        0
    } else {
        v.build.as_str().split('.').count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pick(constraints: &str, candidates: &[&str]) -> Resolution {
        resolve(&VersionSelection::new(constraints), candidates).unwrap()
    }

    fn with_prereleases(constraints: &str, identifiers: &[&str]) -> VersionSelection {
        VersionSelection {
            constraints: constraints.into(),
            prereleases: Some(PrereleasePolicy {
                identifiers: identifiers.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }

    #[test]
    fn test_range_picks_highest_inside() {
        let got = pick(">=1.0.0 <2.0.0", &["1.0.0", "1.2.0", "2.0.0", "0.9.0"]);
        assert_eq!(got.selected(), Some("1.2.0"));
    }

    #[test]
    fn test_latest_skips_prereleases() {
        let got = pick("", &["1.0.0", "1.1.0-rc.1"]);
        assert_eq!(got.selected(), Some("1.0.0"));

        let got = pick("latest", &["1.0.0", "1.1.0-rc.1"]);
        assert_eq!(got.selected(), Some("1.0.0"));
    }

    #[test]
    fn test_range_admits_prerelease() {
        let got = pick(">=1.0.0-0", &["1.0.0", "1.1.0-rc.1"]);
        assert_eq!(got.selected(), Some("1.1.0-rc.1"));
    }

    #[test]
    fn test_prerelease_policy_opts_latest_in() {
        let candidates = ["1.0.0", "1.1.0-rc.1", "1.2.0-beta.1"];

        let any = resolve(&with_prereleases("", &[]), &candidates).unwrap();
        assert_eq!(any.selected(), Some("1.2.0-beta.1"));

        let rc_only = resolve(&with_prereleases("", &["rc"]), &candidates).unwrap();
        assert_eq!(rc_only.selected(), Some("1.1.0-rc.1"));

        let in_range = resolve(&with_prereleases(">=1.0.0-0", &["rc"]), &candidates).unwrap();
        assert_eq!(in_range.selected(), Some("1.1.0-rc.1"));
    }

    #[test]
    fn test_pin_selects_exact_version() {
        let got = pick("1.1.0", &["1.0.0", "1.1.0", "1.2.0"]);
        assert_eq!(got.selected(), Some("1.1.0"));
    }

    #[test]
    fn test_more_build_identifiers_win_ties() {
        let got = pick("1.0.0", &["1.0.0+b.2", "1.0.0+a", "1.0.0"]);
        assert_eq!(got.selected(), Some("1.0.0+b.2"));

        let got = pick("1.0.0", &["1.0.0+b", "1.0.0+a"]);
        assert_eq!(got.selected(), Some("1.0.0+b"));
    }

    #[test]
    fn test_invalid_candidates_are_ignored() {
        let got = pick("1.x", &["banana", "1.0.0", "1.0", "v1.3.0"]);
        assert_eq!(got.selected(), Some("v1.3.0"));
    }

    #[test]
    fn test_no_match_lists_nearest_highest_first() {
        let candidates = ["0.1.0", "0.2.0", "0.3.0", "0.4.0", "0.5.0", "0.6.0", "nope"];
        let Resolution::NoMatch(miss) = pick(">=1.0.0", &candidates) else {
            panic!("expected no match");
        };
        assert_eq!(miss.constraints, ">=1.0.0");
        assert_eq!(miss.nearest, vec!["0.6.0", "0.5.0", "0.4.0", "0.3.0", "0.2.0"]);
        assert_eq!(
            miss.to_string(),
            "no version satisfies '>=1.0.0' (available: 0.6.0, 0.5.0, 0.4.0, 0.3.0, 0.2.0)"
        );
    }

    #[test]
    fn test_no_candidates() {
        let empty: [&str; 0] = [];
        let Resolution::NoMatch(miss) = pick("latest", &empty) else {
            panic!("expected no match");
        };
        assert!(miss.nearest.is_empty());
        assert!(miss.to_string().contains("no valid versions"));
    }

    #[test]
    fn test_malformed_constraint_is_an_error() {
        let err = resolve(&VersionSelection::new(">>1.0"), &["1.0.0"]).unwrap_err();
        assert!(matches!(err, ConstraintError::InvalidOperator { .. }));
    }

    #[test]
    fn test_satisfies_accepts_prereleases_and_v_prefix() {
        assert!(satisfies(">=1.25.0", "v1.27.3+k3s1").unwrap());
        assert!(satisfies(">=0.40.0-0", "0.41.0-rc.2").unwrap());
        assert!(!satisfies("<1.25.0", "1.27.3").unwrap());
        assert!(satisfies("", "2.0.0-alpha").unwrap());
        assert!(satisfies(">=1.0.0", "not-a-version").is_err());
    }

    fn version_strings() -> impl Strategy<Value = Vec<String>> {
        let one = (0u64..3, 0u64..3, 0u64..3, prop::option::of(0u8..3), prop::option::of(0u8..3))
            .prop_map(|(major, minor, patch, pre, build)| {
                let mut s = format!("{}.{}.{}", major, minor, patch);
                if let Some(pre) = pre {
                    s.push_str(&format!("-rc.{}", pre));
                }
                if let Some(build) = build {
                    s.push_str(&format!("+b{}", build));
                }
                s
            });
        prop::collection::vec(one, 0..10)
    }

    fn constraints() -> impl Strategy<Value = &'static str> {
        prop::sample::select(vec![
            "", "latest", "1.x", ">=1.0.0 <2.0.0", ">=0.0.0-0", "~1.1", "^0.2.0", "1.1.1",
            "0.x || 2.x", "!=1.1.1 >=1.0.0",
        ])
    }

    proptest! {
        #[test]
        fn resolution_ignores_candidate_order(
            (original, shuffled) in version_strings()
                .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
            expr in constraints(),
        ) {
            let selection = VersionSelection::new(expr);
            prop_assert_eq!(
                resolve(&selection, &original).unwrap(),
                resolve(&selection, &shuffled).unwrap()
            );
        }

        #[test]
        fn selected_version_is_a_matching_candidate(
            candidates in version_strings(),
            expr in constraints(),
        ) {
            let selection = VersionSelection::new(expr);
            if let Resolution::Selected { version } = resolve(&selection, &candidates).unwrap() {
                prop_assert!(candidates.contains(&version));
                let parsed = parse_version(&version).unwrap();
                prop_assert!(Constraint::parse(expr).unwrap().matches(&parsed));
                let beats_all = candidates
                    .iter()
                    .filter_map(|c| parse_version(c))
                    .filter(|c| Constraint::parse(expr).unwrap().matches(c))
                    .filter(|c| c.pre.is_empty() || (!expr.is_empty() && expr != "latest"))
                    .all(|c| c.cmp_precedence(&parsed) != Ordering::Greater);
                prop_assert!(beats_all);
            }
        }
    }
}
