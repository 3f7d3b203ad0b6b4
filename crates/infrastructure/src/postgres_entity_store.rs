use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rowgate_application::{EntityStore, NewRow, RowPatch, RowQuery};
use rowgate_core::{AppError, AppResult};
use rowgate_domain::EntityRow;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

mod order;
mod query;
mod write;


/// PostgreSQL-backed entity store over the shared `entity_rows` table.
///
/// Every declared table shares one physical table; the declared name lives
/// in the `table_name` column and field values in the `data` JSONB column,
/// so field names only ever travel as bound parameters.
#[derive(Clone)]
pub struct PostgresEntityStore {
    pool: PgPool,
}

impl PostgresEntityStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct StoredRow {
    id: Uuid,
    table_name: String,
    owner_subject: Option<String>,
    granted: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    data: Value,
}

fn entity_row_from_stored(row: StoredRow) -> AppResult<EntityRow> {
    EntityRow::from_stored(
        row.id,
        row.table_name,
        row.owner_subject,
        row.granted.as_deref(),
        row.created_at,
        row.updated_at,
        row.data,
    )
}

#[async_trait]
impl EntityStore for PostgresEntityStore {
    async fn find_row(&self, table: &str, id: Uuid) -> AppResult<Option<EntityRow>> {
        self.find_row_impl(table, id).await
    }

    async fn query_rows(&self, table: &str, query: &RowQuery) -> AppResult<Vec<EntityRow>> {
        self.query_rows_impl(table, query).await
    }

    async fn count_rows(&self, table: &str, query: &RowQuery) -> AppResult<u64> {
        self.count_rows_impl(table, query).await
    }

    async fn insert_row(&self, table: &str, row: NewRow) -> AppResult<EntityRow> {
        self.insert_row_impl(table, row).await
    }

    async fn insert_rows(&self, table: &str, rows: Vec<NewRow>) -> AppResult<Vec<EntityRow>> {
        self.insert_rows_impl(table, rows).await
    }

    async fn update_row(&self, table: &str, id: Uuid, patch: RowPatch) -> AppResult<EntityRow> {
        self.update_row_impl(table, id, patch).await
    }

    async fn delete_row(&self, table: &str, id: Uuid) -> AppResult<()> {
        self.delete_row_impl(table, id).await
    }

    async fn write_positions(
        &self,
        table: &str,
        order_field: &str,
        assignments: &[(Uuid, i64)],
    ) -> AppResult<()> {
        self.write_positions_impl(table, order_field, assignments).await
    }
}
