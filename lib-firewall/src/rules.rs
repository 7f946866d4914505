//! Parsing of the INI-like `.dpc_access` rules file (spec §4.10, §6).

use std::collections::HashMap;

use crate::compute::ComputeConfig;
use crate::decision::Verdict;
use crate::matcher::split_path;
use crate::FirewallError;

/// The two disclosable document kinds a rule atom can govern (spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Personal,
    Device,
}

impl FileKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "personal.json" => Some(FileKind::Personal),
            "device_context.json" => Some(FileKind::Device),
            _ => None,
        }
    }
}

/// One `kind:dotted.path[.*] = allow|deny` line.
#[derive(Debug, Clone)]
pub struct RuleAtom {
    pub kind: FileKind,
    pub path: Vec<String>,
    pub verdict: Verdict,
}

/// The fully parsed rules file: named groups, per-node/per-group/hub rule
/// lists, and the compute-sharing section (spec §3.6).
#[derive(Debug, Clone, Default)]
pub struct AccessRules {
    /// group name -> member NodeIds.
    pub node_groups: HashMap<String, Vec<String>>,
    pub node_rules: HashMap<String, Vec<RuleAtom>>,
    pub group_rules: HashMap<String, Vec<RuleAtom>>,
    pub hub_rules: Vec<RuleAtom>,
    pub compute: ComputeConfig,
}

impl AccessRules {
    /// The groups `node_id` is a member of, in no particular order.
    pub fn groups_for(&self, node_id: &str) -> Vec<&str> {
        self.node_groups
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m == node_id))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn parse(text: &str) -> Result<Self, FirewallError> {
        let mut rules = AccessRules::default();
        let mut section = Section::None;

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with('[') {
                section = Section::parse(line, line_no)?;
                continue;
            }

            let (key, value) = split_kv(line, line_no)?;

            match &section {
                Section::None => {
                    return Err(FirewallError::Malformed { line: line_no, reason: "content before any section header".into() })
                }
                Section::NodeGroups => {
                    let members = value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
                    rules.node_groups.insert(key.to_string(), members);
                }
                Section::Node(node_id) => {
                    let atom = parse_rule_atom(key, value, line_no)?;
                    rules.node_rules.entry(node_id.clone()).or_default().push(atom);
                }
                Section::Group(name) => {
                    let atom = parse_rule_atom(key, value, line_no)?;
                    rules.group_rules.entry(name.clone()).or_default().push(atom);
                }
                Section::Hub => {
                    let atom = parse_rule_atom(key, value, line_no)?;
                    rules.hub_rules.push(atom);
                }
                Section::Compute => apply_compute_kv(&mut rules.compute, key, value, line_no)?,
            }
        }

        Ok(rules)
    }
}

enum Section {
    None,
    NodeGroups,
    Node(String),
    Group(String),
    Hub,
    Compute,
}

impl Section {
    fn parse(line: &str, line_no: usize) -> Result<Self, FirewallError> {
        let inner = line
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| FirewallError::Malformed { line: line_no, reason: "unterminated section header".into() })?
            .trim();

        if inner == "node_groups" {
            return Ok(Section::NodeGroups);
        }
        if inner == "hub" {
            return Ok(Section::Hub);
        }
        if inner == "compute" {
            return Ok(Section::Compute);
        }
        if let Some(id) = inner.strip_prefix("node:") {
            return Ok(Section::Node(id.trim().to_string()));
        }
        if let Some(name) = inner.strip_prefix("group:") {
            return Ok(Section::Group(name.trim().to_string()));
        }
        Err(FirewallError::Malformed { line: line_no, reason: format!("unknown section [{inner}]") })
    }
}

fn split_kv(line: &str, line_no: usize) -> Result<(&str, &str), FirewallError> {
    let (key, value) = line
        .split_once('=')
        .ok_or_else(|| FirewallError::Malformed { line: line_no, reason: "expected 'key = value'".into() })?;
    Ok((key.trim(), value.trim()))
}

fn parse_rule_atom(key: &str, value: &str, line_no: usize) -> Result<RuleAtom, FirewallError> {
    let (kind_str, path_str) = key
        .split_once(':')
        .ok_or_else(|| FirewallError::Malformed { line: line_no, reason: format!("expected 'kind:path', got '{key}'") })?;
    let kind = FileKind::parse(kind_str.trim())
        .ok_or_else(|| FirewallError::Malformed { line: line_no, reason: format!("unknown file kind '{kind_str}'") })?;
    let verdict = match value {
        "allow" => Verdict::Allow,
        "deny" => Verdict::Deny,
        other => return Err(FirewallError::Malformed { line: line_no, reason: format!("verdict must be allow/deny, got '{other}'") }),
    };
    Ok(RuleAtom { kind, path: split_path(path_str.trim()), verdict })
}

fn apply_compute_kv(compute: &mut ComputeConfig, key: &str, value: &str, line_no: usize) -> Result<(), FirewallError> {
    let list = || value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect::<Vec<_>>();
    match key {
        "enabled" => {
            compute.enabled = match value {
                "true" => true,
                "false" => false,
                other => return Err(FirewallError::Malformed { line: line_no, reason: format!("enabled must be true/false, got '{other}'") }),
            }
        }
        "allow_nodes" => compute.allow_nodes = list(),
        "allow_groups" => compute.allow_groups = list(),
        "allowed_models" => compute.allowed_models = list(),
        other => return Err(FirewallError::Malformed { line: line_no, reason: format!("unknown [compute] key '{other}'") }),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[node_groups]
friends = dpc-node-aaaa, dpc-node-bbbb

[node:dpc-node-aaaa]
personal.json:profile.* = allow
device_context.json:* = deny

[group:friends]
personal.json:knowledge.* = allow

[hub]
personal.json:profile.name = allow

[compute]
enabled = true
allow_nodes = dpc-node-aaaa
allow_groups = friends
allowed_models = gpt-4, llama3
"#;

    #[test]
    fn parses_every_section() {
        let rules = AccessRules::parse(SAMPLE).unwrap();
        assert_eq!(rules.node_groups.get("friends").unwrap(), &vec!["dpc-node-aaaa".to_string(), "dpc-node-bbbb".to_string()]);
        assert_eq!(rules.node_rules.get("dpc-node-aaaa").unwrap().len(), 2);
        assert_eq!(rules.group_rules.get("friends").unwrap().len(), 1);
        assert_eq!(rules.hub_rules.len(), 1);
        assert!(rules.compute.enabled);
        assert_eq!(rules.compute.allowed_models, vec!["gpt-4".to_string(), "llama3".to_string()]);
        assert_eq!(rules.groups_for("dpc-node-aaaa"), vec!["friends"]);
    }

    #[test]
    fn rejects_content_before_any_section() {
        assert!(AccessRules::parse("personal.json:a = allow\n").is_err());
    }

    #[test]
    fn rejects_unknown_verdict() {
        let text = "[hub]\npersonal.json:a = maybe\n";
        assert!(AccessRules::parse(text).is_err());
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let text = "# a comment\n\n[hub]\n# another\npersonal.json:a = allow\n";
        let rules = AccessRules::parse(text).unwrap();
        assert_eq!(rules.hub_rules.len(), 1);
    }
}
