use std::collections::BTreeSet;
use std::sync::Arc;

use rowgate_core::Actor;
use rowgate_domain::{PUBLIC_ROLE, Schema};

/// Resolves an actor's raw role claims to its effective role set.
#[derive(Clone)]
pub struct ActorRoleResolver {
    schema: Arc<Schema>,
}

impl ActorRoleResolver {
    /// Creates a resolver over the schema's role graph.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    /// Returns the union of inheritance closures over all claims, always
    /// including `public`. Anonymous actors resolve to `{public}`.
    #[must_use]
    pub fn effective_roles(&self, actor: &Actor) -> BTreeSet<String> {
        let mut roles = BTreeSet::new();
        roles.insert(PUBLIC_ROLE.to_owned());

        for claim in actor.role_claims() {
            roles.extend(self.schema.roles().closure(claim));
        }

        roles
    }
}
