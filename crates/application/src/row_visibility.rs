use std::collections::BTreeSet;
use std::sync::Arc;

use rowgate_core::Actor;
use rowgate_domain::{EntityRow, GrantState, Schema, TableAction, TableDef};
use serde_json::Value;

use crate::permission_engine::grants_allow;
use crate::role_resolver::ActorRoleResolver;

/// A parameterized SQL boolean expression. Literal values travel as `?`
/// placeholders with positional parameters; the fragment text itself only
/// ever names fixed physical columns.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCondition {
    fragment: String,
    params: Vec<Value>,
}

impl SqlCondition {
    /// Creates a condition from a fragment and its positional parameters.
    #[must_use]
    pub fn new(fragment: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            fragment: fragment.into(),
            params,
        }
    }

    /// Returns the SQL fragment with `?` placeholders.
    #[must_use]
    pub fn fragment(&self) -> &str {
        self.fragment.as_str()
    }

    /// Returns the positional parameters.
    #[must_use]
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Conjoins another condition, keeping parameter order left-to-right.
    #[must_use]
    pub fn and(self, other: SqlCondition) -> Self {
        let mut params = self.params;
        params.extend(other.params);
        Self {
            fragment: format!("({}) AND ({})", self.fragment, other.fragment),
            params,
        }
    }
}

/// Which rows of one table an actor may see, resolved once per request.
///
/// The same rule set has two faces: [`VisibilityFilter::to_sql`] for
/// predicate push-down and [`VisibilityFilter::allows`] for the in-memory
/// check applied to an already-fetched row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityFilter {
    owner_subject: Option<String>,
    roles: BTreeSet<String>,
    table_read: bool,
}

impl VisibilityFilter {
    /// Returns whether the actor may see the row.
    ///
    /// A `published @<role>` state checks closure membership only; it never
    /// re-verifies table-level read, so publishing can widen access beyond
    /// the table grants.
    #[must_use]
    pub fn allows(&self, row: &EntityRow) -> bool {
        match row.grant_state() {
            GrantState::Draft => match (self.owner_subject.as_deref(), row.owner_subject()) {
                (Some(actor_subject), Some(owner)) => actor_subject == owner,
                _ => false,
            },
            GrantState::Shared => self.table_read,
            GrantState::Published(role) => self.roles.contains(role),
            GrantState::Public => true,
        }
    }

    /// Builds the SQL form of the rule set, optionally prefixed with a
    /// caller-supplied base condition.
    #[must_use]
    pub fn to_sql(&self, base: Option<SqlCondition>) -> SqlCondition {
        self.render("", base)
    }

    /// Like [`VisibilityFilter::to_sql`] but qualifies every column with a
    /// table alias, for queries that join the storage table to itself.
    #[must_use]
    pub fn to_sql_qualified(&self, alias: &str, base: Option<SqlCondition>) -> SqlCondition {
        let prefix = format!("{alias}.");
        self.render(prefix.as_str(), base)
    }

    fn render(&self, prefix: &str, base: Option<SqlCondition>) -> SqlCondition {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if let Some(owner_subject) = &self.owner_subject {
            clauses.push(format!(
                "({prefix}granted = 'draft' AND {prefix}owner_subject = ?)"
            ));
            params.push(Value::String(owner_subject.clone()));
        }

        if self.table_read {
            clauses.push(format!("{prefix}granted = 'shared'"));
        }

        for role in &self.roles {
            clauses.push(format!("{prefix}granted = ?"));
            params.push(Value::String(format!("published @{role}")));
        }

        clauses.push(format!("{prefix}granted IS NULL"));
        clauses.push(format!("{prefix}granted = ''"));

        let visibility = SqlCondition::new(format!("({})", clauses.join(" OR ")), params);
        match base {
            Some(base) => base.and(visibility),
            None => visibility,
        }
    }
}

/// Builds per-table visibility filters for an actor.
#[derive(Clone)]
pub struct RowVisibilityPredicate {
    resolver: ActorRoleResolver,
}

impl RowVisibilityPredicate {
    /// Creates a predicate builder over the schema's role graph.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            resolver: ActorRoleResolver::new(schema),
        }
    }

    /// Resolves the visibility filter for an actor on one table.
    #[must_use]
    pub fn filter(&self, actor: &Actor, table: &TableDef) -> VisibilityFilter {
        let roles = self.resolver.effective_roles(actor);
        let table_read = grants_allow(table.grants(), &roles, TableAction::Read);

        VisibilityFilter {
            owner_subject: actor.subject().map(str::to_owned),
            roles,
            table_read,
        }
    }

    /// Returns whether the actor may see one already-fetched row.
    #[must_use]
    pub fn can_access_row(&self, actor: &Actor, table: &TableDef, row: &EntityRow) -> bool {
        self.filter(actor, table).allows(row)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rowgate_core::Actor;
    use rowgate_domain::{EntityRow, Schema};
    use serde_json::{Value, json};
    use uuid::Uuid;

    use super::{RowVisibilityPredicate, SqlCondition};

    fn schema() -> Arc<Schema> {
        let raw = r#"
        {
            "roles": {
                "public": {"description": "everyone"},
                "member": {"description": "member", "parents": ["public"]}
            },
            "tables": {
                "MusicAlbum": {
                    "fields": {"name": {"type": "text"}},
                    "grants": {"member": ["read"]}
                }
            }
        }
        "#;
        match Schema::from_json_str(raw) {
            Ok(schema) => Arc::new(schema),
            Err(error) => panic!("schema should load: {error}"),
        }
    }

    fn row(granted: Option<&str>, owner: Option<&str>) -> EntityRow {
        let row = EntityRow::from_stored(
            Uuid::new_v4(),
            "MusicAlbum",
            owner.map(str::to_owned),
            granted,
            Utc::now(),
            Utc::now(),
            json!({"name": "Blue Train"}),
        );
        match row {
            Ok(row) => row,
            Err(error) => panic!("row should build: {error}"),
        }
    }

    fn album_table(schema: &Schema) -> &rowgate_domain::TableDef {
        match schema.tables().get("MusicAlbum") {
            Some(table) => table,
            None => panic!("table should exist"),
        }
    }

    #[test]
    fn draft_rows_are_visible_only_to_their_owner() {
        let schema = schema();
        let predicate = RowVisibilityPredicate::new(schema.clone());
        let table = album_table(&schema);
        let row = row(Some("draft"), Some("user-42"));

        let owner = Actor::authenticated("user-42", "member");
        let stranger = Actor::authenticated("user-7", "member");

        assert!(predicate.can_access_row(&owner, table, &row));
        assert!(!predicate.can_access_row(&stranger, table, &row));
        assert!(!predicate.can_access_row(&Actor::anonymous(), table, &row));
    }

    #[test]
    fn shared_rows_require_table_level_read() {
        let schema = schema();
        let predicate = RowVisibilityPredicate::new(schema.clone());
        let table = album_table(&schema);
        let row = row(Some("shared"), None);

        assert!(predicate.can_access_row(&Actor::authenticated("user-7", "member"), table, &row));
        assert!(!predicate.can_access_row(&Actor::anonymous(), table, &row));
    }

    #[test]
    fn published_rows_bypass_table_level_read() {
        let schema = schema();
        let predicate = RowVisibilityPredicate::new(schema.clone());
        let table = album_table(&schema);
        let row = row(Some("published @public"), None);

        // Anonymous actors lack table read here, yet the published role wins.
        assert!(predicate.can_access_row(&Actor::anonymous(), table, &row));
    }

    #[test]
    fn published_rows_respect_role_inheritance() {
        let schema = schema();
        let predicate = RowVisibilityPredicate::new(schema.clone());
        let table = album_table(&schema);
        let row = row(Some("published @member"), None);

        assert!(predicate.can_access_row(&Actor::authenticated("user-7", "member"), table, &row));
        assert!(!predicate.can_access_row(&Actor::anonymous(), table, &row));
    }

    #[test]
    fn unmarked_rows_are_visible_to_everyone() {
        let schema = schema();
        let predicate = RowVisibilityPredicate::new(schema.clone());
        let table = album_table(&schema);

        assert!(predicate.can_access_row(&Actor::anonymous(), table, &row(None, None)));
        assert!(predicate.can_access_row(&Actor::anonymous(), table, &row(Some(""), None)));
    }

    #[test]
    fn sql_form_parameterizes_every_literal() {
        let schema = schema();
        let predicate = RowVisibilityPredicate::new(schema.clone());
        let table = album_table(&schema);
        let actor = Actor::authenticated("user-7", "member");

        let condition = predicate.filter(&actor, table).to_sql(None);

        assert!(condition.fragment().contains("granted = 'draft' AND owner_subject = ?"));
        assert!(condition.fragment().contains("granted = 'shared'"));
        assert!(condition.fragment().contains("granted IS NULL"));
        assert_eq!(
            condition.fragment().matches('?').count(),
            condition.params().len()
        );
        assert!(
            condition
                .params()
                .contains(&Value::String("published @member".to_owned()))
        );
    }

    #[test]
    fn qualified_sql_form_prefixes_every_column() {
        let schema = schema();
        let predicate = RowVisibilityPredicate::new(schema.clone());
        let table = album_table(&schema);
        let actor = Actor::authenticated("user-7", "member");

        let condition = predicate
            .filter(&actor, table)
            .to_sql_qualified("entity_root", None);

        assert!(condition.fragment().contains("entity_root.granted = 'shared'"));
        assert!(
            condition
                .fragment()
                .contains("entity_root.owner_subject = ?")
        );
        assert!(!condition.fragment().contains(" granted"));
    }

    #[test]
    fn anonymous_sql_form_omits_the_draft_clause() {
        let schema = schema();
        let predicate = RowVisibilityPredicate::new(schema.clone());
        let table = album_table(&schema);

        let condition = predicate.filter(&Actor::anonymous(), table).to_sql(None);
        assert!(!condition.fragment().contains("draft"));
    }

    #[test]
    fn base_condition_is_prefixed_conjunctively() {
        let schema = schema();
        let predicate = RowVisibilityPredicate::new(schema.clone());
        let table = album_table(&schema);
        let base = SqlCondition::new("data ->> ? = ?", vec![json!("name"), json!("Blue Train")]);

        let condition = predicate
            .filter(&Actor::anonymous(), table)
            .to_sql(Some(base));

        assert!(condition.fragment().starts_with("(data ->> ? = ?) AND ("));
        assert_eq!(condition.params()[0], json!("name"));
    }
}
