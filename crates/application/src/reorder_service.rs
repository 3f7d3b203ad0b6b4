use std::collections::BTreeSet;
use std::sync::Arc;

use rowgate_core::{Actor, AppError, AppResult};
use rowgate_domain::TableAction;
use serde_json::Value;
use uuid::Uuid;

use crate::permission_engine::PermissionEngine;
use crate::store_ports::{EntityStore, RowFilter, RowQuery};
use crate::table_catalog::TableCatalog;

/// Transactionally reassigns explicit ordering positions to the sibling rows
/// under one parent. This is the only writer of orderable columns.
#[derive(Clone)]
pub struct ReorderService {
    catalog: TableCatalog,
    permissions: PermissionEngine,
    store: Arc<dyn EntityStore>,
}

impl ReorderService {
    /// Creates the reorder service.
    #[must_use]
    pub fn new(
        catalog: TableCatalog,
        permissions: PermissionEngine,
        store: Arc<dyn EntityStore>,
    ) -> Self {
        Self {
            catalog,
            permissions,
            store,
        }
    }

    /// Writes the array index of every id into the relation's orderable
    /// column, inside one transaction.
    ///
    /// The ordered id set must match the current sibling set exactly; any
    /// superset or subset mismatch fails validation and writes nothing. The
    /// sibling set is read without the visibility filter on purpose: a
    /// reorder must account for every sibling, visible to the actor or not.
    pub async fn reorder(
        &self,
        actor: &Actor,
        table: &str,
        relation_field: &str,
        parent_id: Uuid,
        ordered_ids: &[Uuid],
    ) -> AppResult<()> {
        let table = self.catalog.table(table)?;

        let orderable = table
            .field(relation_field)
            .and_then(|field| field.kind().relation())
            .and_then(|relation| relation.orderable())
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "field '{}.{relation_field}' does not declare an orderable column",
                    table.name()
                ))
            })?
            .to_owned();

        self.permissions
            .require(actor, table.name(), TableAction::Update)?;

        let query = RowQuery {
            filters: vec![RowFilter::eq(
                relation_field.to_owned(),
                Value::String(parent_id.to_string()),
            )],
            ..RowQuery::default()
        };
        let siblings: BTreeSet<Uuid> = self
            .store
            .query_rows(table.name(), &query)
            .await?
            .iter()
            .map(|row| row.id())
            .collect();

        let requested: BTreeSet<Uuid> = ordered_ids.iter().copied().collect();
        if requested.len() != ordered_ids.len() || requested != siblings {
            return Err(AppError::Validation(format!(
                "ordered ids do not match the sibling set of parent '{parent_id}' in '{}'",
                table.name()
            )));
        }

        let assignments: Vec<(Uuid, i64)> = ordered_ids
            .iter()
            .enumerate()
            .map(|(index, id)| (*id, index as i64))
            .collect();

        self.store
            .write_positions(table.name(), orderable.as_str(), &assignments)
            .await
    }
}
