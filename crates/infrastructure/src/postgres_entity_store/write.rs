use sqlx::{Postgres, QueryBuilder};

use super::*;

impl PostgresEntityStore {
    pub(super) async fn insert_row_impl(&self, table: &str, row: NewRow) -> AppResult<EntityRow> {
        let NewRow {
            owner_subject,
            grant_state,
            data,
        } = row;

        let created = sqlx::query_as::<_, StoredRow>(
            r#"
            INSERT INTO entity_rows (table_name, owner_subject, granted, data)
            VALUES ($1, $2, $3, $4)
            RETURNING id, table_name, owner_subject, granted, created_at, updated_at, data
            "#,
        )
        .bind(table)
        .bind(owner_subject)
        .bind(grant_state.as_stored())
        .bind(Value::Object(data))
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to insert row into table '{table}': {error}"
            ))
        })?;

        entity_row_from_stored(created)
    }

    pub(super) async fn insert_rows_impl(
        &self,
        table: &str,
        rows: Vec<NewRow>,
    ) -> AppResult<Vec<EntityRow>> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Transaction(format!(
                "failed to start batch insert transaction for table '{table}': {error}"
            ))
        })?;

        let mut created = Vec::with_capacity(rows.len());
        for row in rows {
            let NewRow {
                owner_subject,
                grant_state,
                data,
            } = row;

            let stored = sqlx::query_as::<_, StoredRow>(
                r#"
                INSERT INTO entity_rows (table_name, owner_subject, granted, data)
                VALUES ($1, $2, $3, $4)
                RETURNING id, table_name, owner_subject, granted, created_at, updated_at, data
                "#,
            )
            .bind(table)
            .bind(owner_subject)
            .bind(grant_state.as_stored())
            .bind(Value::Object(data))
            .fetch_one(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Transaction(format!(
                    "failed to insert batch row into table '{table}': {error}"
                ))
            })?;
            created.push(entity_row_from_stored(stored)?);
        }

        transaction.commit().await.map_err(|error| {
            AppError::Transaction(format!(
                "failed to commit batch insert transaction for table '{table}': {error}"
            ))
        })?;

        tracing::debug!(table, count = created.len(), "inserted row batch");
        Ok(created)
    }

    pub(super) async fn update_row_impl(
        &self,
        table: &str,
        id: Uuid,
        patch: RowPatch,
    ) -> AppResult<EntityRow> {
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("UPDATE entity_rows SET updated_at = now(), data = data || ");
        builder.push_bind(Value::Object(patch.data));

        if let Some(grant_state) = &patch.grant_state {
            builder.push(", granted = ");
            builder.push_bind(grant_state.as_stored());
        }

        builder.push(" WHERE table_name = ");
        builder.push_bind(table.to_owned());
        builder.push(" AND id = ");
        builder.push_bind(id);
        builder.push(
            " RETURNING id, table_name, owner_subject, granted, created_at, updated_at, data",
        );

        let updated = builder
            .build_query_as::<StoredRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to update row '{id}' in table '{table}': {error}"
                ))
            })?
            .ok_or_else(|| {
                AppError::NotFound(format!("row '{id}' does not exist in '{table}'"))
            })?;

        entity_row_from_stored(updated)
    }

    pub(super) async fn delete_row_impl(&self, table: &str, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM entity_rows WHERE table_name = $1 AND id = $2")
            .bind(table)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to delete row '{id}' from table '{table}': {error}"
                ))
            })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "row '{id}' does not exist in '{table}'"
            )));
        }

        Ok(())
    }
}
