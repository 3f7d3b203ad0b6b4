use super::*;

impl PostgresEntityStore {
    pub(super) async fn write_positions_impl(
        &self,
        table: &str,
        order_field: &str,
        assignments: &[(Uuid, i64)],
    ) -> AppResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Transaction(format!(
                "failed to start position write transaction for table '{table}': {error}"
            ))
        })?;

        for (id, position) in assignments {
            let result = sqlx::query(
                r#"
                UPDATE entity_rows
                SET data = jsonb_set(data, ARRAY[$1]::TEXT[], to_jsonb($2::BIGINT), true),
                    updated_at = now()
                WHERE table_name = $3 AND id = $4
                "#,
            )
            .bind(order_field)
            .bind(position)
            .bind(table)
            .bind(id)
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Transaction(format!(
                    "failed to write position of row '{id}' in table '{table}': {error}"
                ))
            })?;

            // A vanished row rolls back the whole batch.
            if result.rows_affected() != 1 {
                return Err(AppError::Transaction(format!(
                    "row '{id}' disappeared while writing positions in '{table}'"
                )));
            }
        }

        transaction.commit().await.map_err(|error| {
            AppError::Transaction(format!(
                "failed to commit position write transaction for table '{table}': {error}"
            ))
        })?;

        tracing::debug!(table, order_field, count = assignments.len(), "wrote positions");
        Ok(())
    }
}
