//! Context (organization scope) resolution.
//!
//! Picks the `org_id` sent with each request, in order of preference:
//!
//! 1. the project-level override, when present and well-formed
//! 2. a named context whose name matches the workspace display name
//! 3. the global default
//!
//! Resolution is pure and infallible; anything unusable falls through to the
//! next rule.

use std::collections::HashMap;

use tracing::debug;

use crate::config::CoreConfig;
use crate::constants::MAX_CONTEXT_ID_LEN;

/// What the host knows about the current workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceInfo {
    /// Display name of the open workspace, if any.
    pub name: Option<String>,
    /// `org_id` from the project configuration, unvalidated.
    pub project_context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ContextResolver {
    default_context: String,
    /// Keyed by lowercased, trimmed workspace name.
    named: HashMap<String, String>,
}

impl ContextResolver {
    pub fn new(default_context: impl Into<String>, named: &HashMap<String, String>) -> Self {
        Self {
            default_context: default_context.into(),
            named: named
                .iter()
                .map(|(name, id)| (normalize_name(name), id.clone()))
                .collect(),
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config.default_context.clone(), &config.named_contexts)
    }

    pub fn resolve(&self, workspace: &WorkspaceInfo) -> String {
        if let Some(explicit) = workspace.project_context.as_deref().map(str::trim) {
            if is_well_formed(explicit) {
                return explicit.to_string();
            }
            debug!(value = %explicit, "ignoring malformed project context");
        }

        if let Some(id) = workspace
            .name
            .as_deref()
            .and_then(|name| self.named.get(&normalize_name(name)))
        {
            return id.clone();
        }

        self.default_context.clone()
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// 1..=64 characters of `[A-Za-z0-9_.-]`.
pub fn is_well_formed(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_CONTEXT_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ContextResolver {
        let mut named = HashMap::new();
        named.insert("Payments Platform".to_string(), "payments".to_string());
        named.insert("checkout-web".to_string(), "checkout".to_string());
        ContextResolver::new("global", &named)
    }

    fn workspace(name: Option<&str>, project: Option<&str>) -> WorkspaceInfo {
        WorkspaceInfo {
            name: name.map(String::from),
            project_context: project.map(String::from),
        }
    }

    #[test]
    fn test_project_override_wins() {
        let ws = workspace(Some("Payments Platform"), Some("acme-corp"));
        assert_eq!(resolver().resolve(&ws), "acme-corp");
    }

    #[test]
    fn test_malformed_override_falls_back_to_name() {
        let ws = workspace(Some("payments platform "), Some("acme corp!"));
        assert_eq!(resolver().resolve(&ws), "payments");

        let too_long = "x".repeat(65);
        let ws = workspace(Some("checkout-web"), Some(&too_long));
        assert_eq!(resolver().resolve(&ws), "checkout");

        let ws = workspace(Some("checkout-web"), Some("   "));
        assert_eq!(resolver().resolve(&ws), "checkout");
    }

    #[test]
    fn test_unknown_workspace_uses_default() {
        assert_eq!(resolver().resolve(&workspace(Some("scratch"), None)), "global");
        assert_eq!(resolver().resolve(&WorkspaceInfo::default()), "global");
    }

    #[test]
    fn test_well_formed() {
        assert!(is_well_formed("acme_corp.eu-1"));
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("a/b"));
        assert!(!is_well_formed("ünï"));
    }
}
