use std::sync::Arc;

use rowgate_core::{Actor, AppError, AppResult};
use rowgate_domain::{EntityRow, GrantState, TableAction, TableDef};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::permission_engine::PermissionEngine;
use crate::row_visibility::RowVisibilityPredicate;
use crate::store_ports::{EntityStore, NewRow, RowFilter, RowQuery};
use crate::table_catalog::{OneToManyRelation, TableCatalog};

/// Outcome of cloning one requested child collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationCloneOutcome {
    /// Exposed relation name.
    pub relation: String,
    /// Children cloned successfully.
    pub cloned: usize,
    /// Children that failed to clone.
    pub failed: usize,
}

/// Outcome of a deep duplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicationOutcome {
    /// Identity of the new parent row.
    pub new_id: Uuid,
    /// Per-relation clone results, in request order.
    pub relations: Vec<RelationCloneOutcome>,
}

/// Clones an entity with fresh identity and reset ownership/visibility,
/// optionally cloning selected 1:N child collections with re-pointed
/// foreign keys.
#[derive(Clone)]
pub struct DuplicationService {
    catalog: TableCatalog,
    permissions: PermissionEngine,
    visibility: RowVisibilityPredicate,
    store: Arc<dyn EntityStore>,
}

impl DuplicationService {
    /// Creates the duplication service.
    #[must_use]
    pub fn new(
        catalog: TableCatalog,
        permissions: PermissionEngine,
        visibility: RowVisibilityPredicate,
        store: Arc<dyn EntityStore>,
    ) -> Self {
        Self {
            catalog,
            permissions,
            visibility,
            store,
        }
    }

    /// Duplicates a row and the requested child collections.
    ///
    /// Only the parent copy decides overall success: each relation is
    /// attempted independently and reported, so one failing collection
    /// neither aborts the parent nor the remaining collections.
    pub async fn duplicate(
        &self,
        actor: &Actor,
        table: &str,
        id: Uuid,
        child_relations: &[String],
    ) -> AppResult<DuplicationOutcome> {
        let table = self.catalog.table(table)?;
        self.permissions
            .require(actor, table.name(), TableAction::Read)?;
        self.permissions
            .require(actor, table.name(), TableAction::Create)?;

        let source = self
            .store
            .find_row(table.name(), id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("row '{id}' does not exist in '{}'", table.name()))
            })?;
        if !self.visibility.can_access_row(actor, table, &source) {
            return Err(AppError::Forbidden(format!(
                "row '{id}' in '{}' is not visible to the actor",
                table.name()
            )));
        }

        let table_relations = self.catalog.relations_of(table.name())?;
        let mut requested: Vec<&OneToManyRelation> = Vec::with_capacity(child_relations.len());
        for name in child_relations {
            let relation = table_relations.one_to_many.get(name).ok_or_else(|| {
                AppError::Validation(format!(
                    "unknown child relation '{name}' on table '{}'",
                    table.name()
                ))
            })?;
            requested.push(relation);
        }

        let parent_copy = NewRow {
            owner_subject: actor.subject().map(str::to_owned),
            grant_state: GrantState::Draft,
            data: physical_data(table, &source),
        };
        let new_parent = self.store.insert_row(table.name(), parent_copy).await?;

        let mut relations = Vec::with_capacity(requested.len());
        for relation in requested {
            relations.push(
                self.clone_collection(actor, relation, id, new_parent.id())
                    .await,
            );
        }

        Ok(DuplicationOutcome {
            new_id: new_parent.id(),
            relations,
        })
    }

    /// Clones every visible child of one collection, re-pointing the foreign
    /// key to the new parent. Failures are reported, never propagated.
    async fn clone_collection(
        &self,
        actor: &Actor,
        relation: &OneToManyRelation,
        source_id: Uuid,
        new_parent_id: Uuid,
    ) -> RelationCloneOutcome {
        match self
            .try_clone_collection(actor, relation, source_id, new_parent_id)
            .await
        {
            Ok(cloned) => RelationCloneOutcome {
                relation: relation.name.clone(),
                cloned,
                failed: 0,
            },
            Err((attempted, _error)) => RelationCloneOutcome {
                relation: relation.name.clone(),
                cloned: 0,
                failed: attempted,
            },
        }
    }

    async fn try_clone_collection(
        &self,
        actor: &Actor,
        relation: &OneToManyRelation,
        source_id: Uuid,
        new_parent_id: Uuid,
    ) -> Result<usize, (usize, AppError)> {
        let child_table = self
            .catalog
            .table(&relation.source_table)
            .map_err(|error| (0, error))?;

        let query = RowQuery {
            visibility: Some(self.visibility.filter(actor, child_table)),
            filters: vec![RowFilter::eq(
                relation.source_field.clone(),
                Value::String(source_id.to_string()),
            )],
            ..RowQuery::default()
        };
        let children = self
            .store
            .query_rows(child_table.name(), &query)
            .await
            .map_err(|error| (0, error))?;
        if children.is_empty() {
            return Ok(0);
        }

        let copies: Vec<NewRow> = children
            .iter()
            .map(|child| {
                let mut data = physical_data(child_table, child);
                data.insert(
                    relation.source_field.clone(),
                    Value::String(new_parent_id.to_string()),
                );
                NewRow {
                    owner_subject: actor.subject().map(str::to_owned),
                    grant_state: GrantState::Draft,
                    data,
                }
            })
            .collect();

        let attempted = copies.len();
        self.store
            .insert_rows(child_table.name(), copies)
            .await
            .map_err(|error| (attempted, error))?;
        Ok(attempted)
    }
}

/// Copies the physical fields of a row: computed fields have no column and
/// are dropped.
fn physical_data(table: &TableDef, row: &EntityRow) -> Map<String, Value> {
    row.data()
        .iter()
        .filter(|(name, _)| {
            table
                .field(name)
                .map(|field| !field.computed())
                .unwrap_or(true)
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
