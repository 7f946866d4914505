//! Compute-sharing gate (spec §4.10's `[compute]` section): whether a peer
//! may request local inference, and which models it may choose from.

use crate::rules::AccessRules;

#[derive(Debug, Clone, Default)]
pub struct ComputeConfig {
    pub enabled: bool,
    pub allow_nodes: Vec<String>,
    pub allow_groups: Vec<String>,
    pub allowed_models: Vec<String>,
}

impl AccessRules {
    fn peer_is_allowed_to_compute(&self, peer: &str) -> bool {
        if self.compute.allow_nodes.iter().any(|n| n == peer) {
            return true;
        }
        self.groups_for(peer).iter().any(|g| self.compute.allow_groups.iter().any(|a| a == g))
    }

    /// `can_request_inference` (spec §4.10): true iff compute sharing is
    /// enabled, `peer` (or one of its groups) is allow-listed, and — when
    /// a specific `model` is requested — that model is in `allowed_models`.
    pub fn can_request_inference(&self, peer: &str, model: Option<&str>) -> bool {
        if !self.compute.enabled || !self.peer_is_allowed_to_compute(peer) {
            return false;
        }
        match model {
            Some(m) => self.compute.allowed_models.iter().any(|a| a == m),
            None => true,
        }
    }

    /// The subset of `all_models` this peer may choose from; empty if the
    /// peer isn't allowed to share compute at all.
    pub fn available_models_for_peer(&self, peer: &str, all_models: &[String]) -> Vec<String> {
        if !self.compute.enabled || !self.peer_is_allowed_to_compute(peer) {
            return Vec::new();
        }
        all_models.iter().filter(|m| self.compute.allowed_models.iter().any(|a| a == *m)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> AccessRules {
        let mut rules = AccessRules::default();
        rules.node_groups.insert("friends".into(), vec!["dpc-node-bbbb".into()]);
        rules.compute = ComputeConfig {
            enabled: true,
            allow_nodes: vec!["dpc-node-aaaa".into()],
            allow_groups: vec!["friends".into()],
            allowed_models: vec!["gpt-4".into(), "llama3".into()],
        };
        rules
    }

    #[test]
    fn allows_directly_listed_node() {
        let rules = rules();
        assert!(rules.can_request_inference("dpc-node-aaaa", None));
        assert!(rules.can_request_inference("dpc-node-aaaa", Some("gpt-4")));
        assert!(!rules.can_request_inference("dpc-node-aaaa", Some("claude")));
    }

    #[test]
    fn allows_a_node_via_group_membership() {
        let rules = rules();
        assert!(rules.can_request_inference("dpc-node-bbbb", None));
    }

    #[test]
    fn denies_unlisted_node() {
        let rules = rules();
        assert!(!rules.can_request_inference("dpc-node-cccc", None));
    }

    #[test]
    fn denies_everything_when_disabled() {
        let mut rules = rules();
        rules.compute.enabled = false;
        assert!(!rules.can_request_inference("dpc-node-aaaa", None));
    }

    #[test]
    fn available_models_is_the_intersection() {
        let rules = rules();
        let all = vec!["gpt-4".to_string(), "claude".to_string(), "llama3".to_string()];
        assert_eq!(rules.available_models_for_peer("dpc-node-aaaa", &all), vec!["gpt-4".to_string(), "llama3".to_string()]);
        assert!(rules.available_models_for_peer("dpc-node-cccc", &all).is_empty());
    }
}
