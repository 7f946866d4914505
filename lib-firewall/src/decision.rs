//! The `can_access` decision algorithm (spec §4.10): gather rules
//! applicable to the requester by node, by group, and by `[hub]`; a more
//! specific tier always overrides a less specific one; within a tier,
//! the most specific matching pattern wins, and equal specificity is
//! resolved deny-beats-allow (spec §9's open question, resolved
//! conservatively as the spec itself suggests).

use crate::matcher::{self, specificity, Specificity};
use crate::rules::{AccessRules, FileKind, RuleAtom};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}

/// Who is asking. The Hub is a distinct requester kind (spec §3.6's
/// `[hub]` section) rather than a NodeId, since it never belongs to a
/// node group.
#[derive(Debug, Clone)]
pub enum Requester<'a> {
    Node(&'a str),
    Hub,
}

/// Folds a tier's candidate rules down to one verdict, or `None` if
/// nothing in this tier matches `kind:path`.
fn best_in_tier(atoms: &[RuleAtom], kind: FileKind, path: &[String]) -> Option<(Specificity, Verdict)> {
    let mut best: Option<(Specificity, Verdict)> = None;
    for atom in atoms {
        if atom.kind != kind || !matcher::matches(&atom.path, path) {
            continue;
        }
        let score = specificity(&atom.path);
        let verdict = atom.verdict;
        best = Some(match best {
            None => (score, verdict),
            Some((best_score, best_verdict)) if score > best_score => (score, verdict),
            Some((best_score, _)) if score == best_score => (best_score, Verdict::Deny),
            Some(existing) => existing,
        });
    }
    best
}

/// `can_access(requester, "<kind>:<dotted_path>")` (spec §4.10). The
/// node tier is tried first, then every group the requester belongs to
/// (combined into one tier — group-vs-group ties also resolve
/// deny-beats-allow), then `[hub]`. Absence of any matching rule in any
/// tier is default-deny (spec §8 item 10).
pub fn can_access(rules: &AccessRules, requester: &Requester, kind: FileKind, path: &str) -> Verdict {
    let path_segments = matcher::split_path(path);

    if let Requester::Node(node_id) = requester {
        if let Some(atoms) = rules.node_rules.get(*node_id) {
            if let Some((_, verdict)) = best_in_tier(atoms, kind, &path_segments) {
                return verdict;
            }
        }

        let groups = rules.groups_for(node_id);
        if !groups.is_empty() {
            let mut group_best: Option<(Specificity, Verdict)> = None;
            for group in groups {
                if let Some(atoms) = rules.group_rules.get(group) {
                    if let Some((score, verdict)) = best_in_tier(atoms, kind, &path_segments) {
                        group_best = Some(match group_best {
                            None => (score, verdict),
                            Some((best_score, _)) if score > best_score => (score, verdict),
                            Some((best_score, _)) if score == best_score => (best_score, Verdict::Deny),
                            Some(existing) => existing,
                        });
                    }
                }
            }
            if let Some((_, verdict)) = group_best {
                return verdict;
            }
        }
    }

    if matches!(requester, Requester::Hub) {
        if let Some((_, verdict)) = best_in_tier(&rules.hub_rules, kind, &path_segments) {
            return verdict;
        }
    }

    Verdict::Deny
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::AccessRules;

    fn rules_text() -> &'static str {
        r#"
[node_groups]
friends = dpc-node-bbbb
rivals = dpc-node-bbbb

[node:dpc-node-aaaa]
personal.json:profile.* = allow

[group:friends]
personal.json:profile.name = allow

[group:rivals]
personal.json:profile.name = deny

[hub]
personal.json:profile.name = allow
"#
    }

    #[test]
    fn node_specific_rule_wins_over_group_and_hub() {
        let rules = AccessRules::parse(rules_text()).unwrap();
        assert_eq!(
            can_access(&rules, &Requester::Node("dpc-node-aaaa"), FileKind::Personal, "profile.name"),
            Verdict::Allow
        );
    }

    #[test]
    fn conflicting_group_membership_resolves_deny_beats_allow() {
        let rules = AccessRules::parse(rules_text()).unwrap();
        assert_eq!(
            can_access(&rules, &Requester::Node("dpc-node-bbbb"), FileKind::Personal, "profile.name"),
            Verdict::Deny
        );
    }

    #[test]
    fn falls_back_to_hub_section_for_hub_requester() {
        let rules = AccessRules::parse(rules_text()).unwrap();
        assert_eq!(can_access(&rules, &Requester::Hub, FileKind::Personal, "profile.name"), Verdict::Allow);
    }

    #[test]
    fn default_is_deny_on_no_matching_rule() {
        let rules = AccessRules::parse(rules_text()).unwrap();
        assert_eq!(
            can_access(&rules, &Requester::Node("dpc-node-cccc"), FileKind::Personal, "profile.name"),
            Verdict::Deny
        );
        assert_eq!(
            can_access(&rules, &Requester::Node("dpc-node-aaaa"), FileKind::Device, "battery"),
            Verdict::Deny
        );
    }
}
