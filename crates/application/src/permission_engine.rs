use std::collections::BTreeSet;

use rowgate_core::{Actor, AppError, AppResult};
use rowgate_domain::{EntityRow, FieldDef, GrantMap, TableAction, TableDef};

use crate::role_resolver::ActorRoleResolver;
use crate::table_catalog::TableCatalog;

/// Returns whether any of the roles is listed in the grant map with the
/// action included.
pub(crate) fn grants_allow(
    grants: &GrantMap,
    roles: &BTreeSet<String>,
    action: TableAction,
) -> bool {
    grants
        .iter()
        .any(|(role, actions)| actions.contains(&action) && roles.contains(role))
}

/// Table-action and field-level checks over the declared grant maps.
#[derive(Clone)]
pub struct PermissionEngine {
    catalog: TableCatalog,
    resolver: ActorRoleResolver,
}

impl PermissionEngine {
    /// Creates a permission engine over the catalog and role resolver.
    #[must_use]
    pub fn new(catalog: TableCatalog, resolver: ActorRoleResolver) -> Self {
        Self { catalog, resolver }
    }

    /// Returns whether the actor may perform a table-level action.
    pub fn can_perform(&self, actor: &Actor, table: &str, action: TableAction) -> AppResult<bool> {
        let table = self.catalog.table(table)?;
        let roles = self.resolver.effective_roles(actor);
        Ok(grants_allow(table.grants(), &roles, action))
    }

    /// Ensures the actor holds a table-level action grant.
    pub fn require(&self, actor: &Actor, table: &str, action: TableAction) -> AppResult<()> {
        if self.can_perform(actor, table, action)? {
            return Ok(());
        }

        Err(AppError::Forbidden(format!(
            "actor is missing '{}' on table '{table}'",
            action.as_str()
        )))
    }

    /// Returns whether the actor may read a declared field.
    ///
    /// A field with no grant map is readable by anyone who can see the row.
    #[must_use]
    pub fn field_readable(&self, actor: &Actor, field: &FieldDef) -> bool {
        self.field_allows(actor, field, TableAction::Read)
    }

    /// Returns whether the actor may write a declared field through the
    /// given mutating action.
    #[must_use]
    pub fn field_writable(&self, actor: &Actor, field: &FieldDef, action: TableAction) -> bool {
        self.field_allows(actor, field, action)
    }

    /// Strips fields the actor may not read from the row's data.
    ///
    /// Unknown keys (synthetic fields not declared on the table) pass through
    /// unfiltered. Idempotent.
    pub fn filter_fields(&self, actor: &Actor, table: &TableDef, row: &mut EntityRow) {
        let roles = self.resolver.effective_roles(actor);
        row.retain_fields(|name| match table.field(name) {
            Some(field) => match field.grant() {
                Some(grant) => grants_allow(grant, &roles, TableAction::Read),
                None => true,
            },
            None => true,
        });
    }

    /// Ensures every payload key the table declares is writable by the actor
    /// through the given mutating action.
    pub fn require_fields_writable<'a>(
        &self,
        actor: &Actor,
        table: &TableDef,
        field_names: impl Iterator<Item = &'a str>,
        action: TableAction,
    ) -> AppResult<()> {
        for name in field_names {
            let Some(field) = table.field(name) else {
                continue;
            };
            if !self.field_writable(actor, field, action) {
                return Err(AppError::Forbidden(format!(
                    "field '{}.{name}' is not writable by the actor",
                    table.name()
                )));
            }
        }

        Ok(())
    }

    fn field_allows(&self, actor: &Actor, field: &FieldDef, action: TableAction) -> bool {
        match field.grant() {
            Some(grant) => {
                let roles = self.resolver.effective_roles(actor);
                grants_allow(grant, &roles, action)
            }
            None => true,
        }
    }
}
