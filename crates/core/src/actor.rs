use serde::{Deserialize, Serialize};

/// The authenticated or anonymous party a permission decision is made for.
///
/// Anonymous actors carry no subject and resolve to the `public` role only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    subject: Option<String>,
    role_claims: Vec<String>,
}

impl Actor {
    /// Creates an authenticated actor from a subject and raw role claims.
    ///
    /// Claims are accepted as provided by the session layer: a space-separated
    /// string where each token may carry an `@` prefix, or an already-split
    /// list. Tokens are normalized here so downstream role resolution never
    /// sees prefixes or blanks.
    #[must_use]
    pub fn authenticated(subject: impl Into<String>, raw_roles: &str) -> Self {
        Self {
            subject: Some(subject.into()),
            role_claims: parse_role_claims(raw_roles),
        }
    }

    /// Creates an authenticated actor from an already-split role list.
    #[must_use]
    pub fn with_role_list(subject: impl Into<String>, roles: Vec<String>) -> Self {
        let role_claims = roles
            .iter()
            .flat_map(|claim| parse_role_claims(claim))
            .collect();

        Self {
            subject: Some(subject.into()),
            role_claims,
        }
    }

    /// Creates an anonymous actor.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            subject: None,
            role_claims: Vec::new(),
        }
    }

    /// Returns the stable subject identifier, if authenticated.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Returns whether the actor is authenticated.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.subject.is_some()
    }

    /// Returns the normalized role claims.
    #[must_use]
    pub fn role_claims(&self) -> &[String] {
        &self.role_claims
    }
}

fn parse_role_claims(raw: &str) -> Vec<String> {
    raw.split_whitespace()
        .map(|token| token.trim_start_matches('@'))
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}
