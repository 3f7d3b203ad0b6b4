use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Role every actor implicitly holds, authenticated or not.
pub const PUBLIC_ROLE: &str = "public";

/// Declared role with its inheritance edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    description: String,
    parents: Vec<String>,
}

impl RoleDefinition {
    /// Creates a role definition.
    #[must_use]
    pub fn new(description: impl Into<String>, parents: Vec<String>) -> Self {
        Self {
            description: description.into(),
            parents,
        }
    }

    /// Returns the human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        self.description.as_str()
    }

    /// Returns the parent role names.
    #[must_use]
    pub fn parents(&self) -> &[String] {
        &self.parents
    }
}

/// Role inheritance graph keyed by role name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGraph {
    roles: BTreeMap<String, RoleDefinition>,
}

impl RoleGraph {
    /// Creates a role graph from declared role definitions.
    #[must_use]
    pub fn new(roles: BTreeMap<String, RoleDefinition>) -> Self {
        Self { roles }
    }

    /// Returns whether the role is declared.
    #[must_use]
    pub fn contains(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    /// Returns the declared role definitions.
    #[must_use]
    pub fn roles(&self) -> &BTreeMap<String, RoleDefinition> {
        &self.roles
    }

    /// Returns the full inheritance closure of a role.
    ///
    /// The closure is reflexive and follows parent edges depth-first. The
    /// visited set doubles as the cycle guard: a cyclic declaration is
    /// absorbed silently rather than raised. Roles absent from the graph
    /// contribute only themselves.
    #[must_use]
    pub fn closure(&self, role: &str) -> BTreeSet<String> {
        let mut visited = BTreeSet::new();
        let mut stack = vec![role.to_owned()];

        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }

            if let Some(definition) = self.roles.get(current.as_str()) {
                for parent in definition.parents() {
                    if !visited.contains(parent) {
                        stack.push(parent.clone());
                    }
                }
            }
        }

        visited
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::{PUBLIC_ROLE, RoleDefinition, RoleGraph};

    fn sample_graph() -> RoleGraph {
        let mut roles = BTreeMap::new();
        roles.insert(
            PUBLIC_ROLE.to_owned(),
            RoleDefinition::new("everyone", Vec::new()),
        );
        roles.insert(
            "member".to_owned(),
            RoleDefinition::new("signed-up user", vec![PUBLIC_ROLE.to_owned()]),
        );
        roles.insert(
            "editor".to_owned(),
            RoleDefinition::new("content editor", vec!["member".to_owned()]),
        );
        roles.insert(
            "admin".to_owned(),
            RoleDefinition::new("administrator", vec!["editor".to_owned()]),
        );
        RoleGraph::new(roles)
    }

    #[test]
    fn closure_is_reflexive_and_transitive() {
        let graph = sample_graph();
        let closure = graph.closure("admin");

        assert!(closure.contains("admin"));
        assert!(closure.contains("editor"));
        assert!(closure.contains("member"));
        assert!(closure.contains(PUBLIC_ROLE));
    }

    #[test]
    fn closure_of_unknown_role_is_the_role_itself() {
        let graph = sample_graph();
        let closure = graph.closure("ghost");

        assert_eq!(closure.len(), 1);
        assert!(closure.contains("ghost"));
    }

    #[test]
    fn cyclic_inheritance_is_absorbed() {
        let mut roles = BTreeMap::new();
        roles.insert(
            "a".to_owned(),
            RoleDefinition::new("", vec!["b".to_owned()]),
        );
        roles.insert(
            "b".to_owned(),
            RoleDefinition::new("", vec!["a".to_owned()]),
        );
        let graph = RoleGraph::new(roles);

        let closure = graph.closure("a");
        assert_eq!(closure.len(), 2);
    }

    proptest! {
        #[test]
        fn closure_is_a_fixed_point(start in "[a-d]") {
            let graph = sample_graph();
            let first = graph.closure(&start);

            let mut expanded = std::collections::BTreeSet::new();
            for role in &first {
                expanded.extend(graph.closure(role));
            }

            prop_assert_eq!(first, expanded);
        }
    }
}
