//! JSON-tree filtering for disclosure to a peer (spec §4.10): walk the
//! document, require `can_access(peer, "<kind>:<dotted_path>") == allow`
//! at every key, and prune denied subtrees wholesale rather than
//! recursing into them.

use serde_json::{Map, Value};

use crate::decision::{can_access, Requester, Verdict};
use crate::matcher::split_path;
use crate::rules::{AccessRules, FileKind};

/// Filters `document` for disclosure to `requester`. A key is retained
/// only if its dotted path is explicitly allowed; a denied key's entire
/// subtree is dropped without being inspected further. Because a key is
/// only ever inserted when its own path was allowed, an empty object or
/// array left after pruning its children is retained exactly when the
/// spec requires — it was itself explicitly allowed (spec §4.10: "empty
/// objects/arrays after pruning are retained only if they were
/// explicitly allowed").
pub fn filter_document(rules: &AccessRules, requester: &Requester, kind: FileKind, document: &Value) -> Value {
    filter_node(rules, requester, kind, &[], document)
}

fn filter_node(rules: &AccessRules, requester: &Requester, kind: FileKind, path: &[String], value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, child) in map {
                let mut child_path = path.to_vec();
                child_path.push(key.clone());
                let dotted = child_path.join(".");
                if can_access(rules, requester, kind, &dotted) == Verdict::Allow {
                    out.insert(key.clone(), filter_node(rules, requester, kind, &child_path, child));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| filter_node(rules, requester, kind, path, item)).collect())
        }
        scalar => scalar.clone(),
    }
}

/// Convenience overload taking an already-dotted path instead of a JSON
/// document, for callers that just want a single-field decision (used by
/// `can_access` call sites outside this crate that don't want to depend
/// on `matcher::split_path` directly).
pub fn path_segments(path: &str) -> Vec<String> {
    split_path(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules() -> AccessRules {
        AccessRules::parse(
            r#"
[node:dpc-node-aaaa]
personal.json:profile.* = allow
personal.json:profile.secret = deny
personal.json:knowledge = allow
"#,
        )
        .unwrap()
    }

    #[test]
    fn prunes_denied_keys_and_keeps_allowed_ones() {
        let rules = rules();
        let doc = json!({
            "profile": {"name": "Ada", "secret": "shh", "bio": "loves math"},
            "knowledge": {},
            "private_notes": "never",
        });
        let filtered = filter_document(&rules, &Requester::Node("dpc-node-aaaa"), FileKind::Personal, &doc);
        assert_eq!(
            filtered,
            json!({
                "profile": {"name": "Ada", "bio": "loves math"},
                "knowledge": {},
            })
        );
    }

    #[test]
    fn a_more_specific_deny_overrides_a_broader_allow() {
        let rules = rules();
        let doc = json!({"profile": {"secret": "shh"}});
        let filtered = filter_document(&rules, &Requester::Node("dpc-node-aaaa"), FileKind::Personal, &doc);
        assert_eq!(filtered, json!({"profile": {}}));
    }

    #[test]
    fn default_deny_produces_an_empty_document() {
        let rules = rules();
        let doc = json!({"unrelated": "value"});
        let filtered = filter_document(&rules, &Requester::Node("dpc-node-zzzz"), FileKind::Personal, &doc);
        assert_eq!(filtered, json!({}));
    }
}
