//! [`EngineStore`] backed by PostgreSQL.

use async_trait::async_trait;
use casework_engine::job::Job;
use casework_engine::model::{CaseInstance, EventSubscription, ProcessInstance};
use casework_engine::store::{EngineStore, JobQuery, Write, WriteBatch};
use casework_engine::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgQueryResult;
use sqlx::PgConnection;
use uuid::Uuid;

use super::pool::DbPool;
use super::rows::{into_jobs, DocumentRow, JobRow, SubscriptionRow, JOB_COLUMNS, SUBSCRIPTION_COLUMNS};

const UNIQUE_VIOLATION: &str = "23505";

/// Map a database error onto the engine taxonomy. Duplicate keys mean a
/// concurrent writer inserted the same row first.
pub fn store_error(e: sqlx::Error) -> EngineError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return EngineError::OptimisticLock(db.message().to_string());
        }
    }
    EngineError::Store(e.to_string())
}

fn expect_one(result: PgQueryResult, what: &str) -> EngineResult<()> {
    if result.rows_affected() == 1 {
        Ok(())
    } else {
        Err(EngineError::OptimisticLock(format!(
            "{} changed concurrently",
            what
        )))
    }
}

/// PostgreSQL implementation of the engine store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    /// Create a store over an existing pool.
    ///
    /// # Arguments
    ///
    /// * `pool` - Database connection pool; the schema must already exist,
    ///   see [`ensure_schema`](super::ensure_schema)
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn query_jobs(&self, condition: &str, query: &JobQuery) -> EngineResult<Vec<Job>> {
        let sql = format!(
            "SELECT {} FROM casework.job WHERE {} AND ($2::text IS NULL OR tenant_id = $2) \
             ORDER BY due_date NULLS FIRST, created_at LIMIT $3",
            JOB_COLUMNS, condition
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(query.now)
            .bind(query.tenant_id.as_deref())
            .bind(query.limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        into_jobs(rows)
    }

    async fn load_document(&self, table: &str, id: Uuid) -> EngineResult<Option<DocumentRow>> {
        let sql = format!("SELECT data, version FROM casework.{} WHERE id = $1", table);
        sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)
    }
}

#[async_trait]
impl EngineStore for PgStore {
    async fn find_due_jobs(&self, query: &JobQuery) -> EngineResult<Vec<Job>> {
        self.query_jobs(
            "state = 'executable' AND NOT suspended \
             AND (due_date IS NULL OR due_date <= $1) \
             AND (lock_owner IS NULL OR lock_expiration <= $1)",
            query,
        )
        .await
    }

    async fn claim_job(
        &self,
        id: Uuid,
        expected_version: u64,
        lock_owner: &str,
        lock_expiration: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE casework.job
            SET lock_owner = $3, lock_expiration = $4, version = version + 1
            WHERE id = $1 AND version = $2 AND state = 'executable' AND NOT suspended
            "#,
        )
        .bind(id)
        .bind(expected_version as i64)
        .bind(lock_owner)
        .bind(lock_expiration)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn unacquire_job(&self, id: Uuid, lock_owner: &str) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE casework.job
            SET lock_owner = NULL, lock_expiration = NULL, version = version + 1
            WHERE id = $1 AND lock_owner = $2
            "#,
        )
        .bind(id)
        .bind(lock_owner)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_due_timers(&self, query: &JobQuery) -> EngineResult<Vec<Job>> {
        self.query_jobs(
            "state = 'timer' AND NOT suspended AND (due_date IS NULL OR due_date <= $1)",
            query,
        )
        .await
    }

    async fn find_expired_jobs(&self, query: &JobQuery) -> EngineResult<Vec<Job>> {
        self.query_jobs(
            "state = 'executable' AND lock_owner IS NOT NULL AND lock_expiration <= $1",
            query,
        )
        .await
    }

    async fn reset_expired_job(&self, id: Uuid, expected_version: u64) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE casework.job
            SET lock_owner = NULL, lock_expiration = NULL, version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(id)
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_job(&self, id: Uuid) -> EngineResult<Option<Job>> {
        let sql = format!("SELECT {} FROM casework.job WHERE id = $1", JOB_COLUMNS);
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
        row.map(Job::try_from).transpose()
    }

    async fn find_dead_letter_jobs(&self, tenant_id: Option<&str>) -> EngineResult<Vec<Job>> {
        let sql = format!(
            "SELECT {} FROM casework.job WHERE state = 'dead_letter' \
             AND ($1::text IS NULL OR tenant_id = $1) ORDER BY due_date NULLS FIRST, created_at",
            JOB_COLUMNS
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        into_jobs(rows)
    }

    async fn find_jobs_for_process(&self, process_instance_id: Uuid) -> EngineResult<Vec<Job>> {
        let sql = format!(
            "SELECT {} FROM casework.job WHERE process_instance_id = $1 \
             ORDER BY due_date NULLS FIRST, created_at",
            JOB_COLUMNS
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(process_instance_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        into_jobs(rows)
    }

    async fn load_process(&self, id: Uuid) -> EngineResult<Option<ProcessInstance>> {
        let Some(document) = self.load_document("process_instance", id).await? else {
            return Ok(None);
        };
        let (mut process, version): (ProcessInstance, u64) = document.decode()?;
        process.version = version;
        Ok(Some(process))
    }

    async fn load_case(&self, id: Uuid) -> EngineResult<Option<CaseInstance>> {
        let Some(document) = self.load_document("case_instance", id).await? else {
            return Ok(None);
        };
        let (mut case, version): (CaseInstance, u64) = document.decode()?;
        case.version = version;
        Ok(Some(case))
    }

    async fn find_subscriptions(
        &self,
        event_name: &str,
        correlation_keys: &[String],
        tenant_id: Option<&str>,
    ) -> EngineResult<Vec<EventSubscription>> {
        let sql = format!(
            "SELECT {} FROM casework.event_subscription WHERE event_name = $1 \
             AND (correlation_key IS NULL OR correlation_key = ANY($2)) \
             AND ($3::text IS NULL OR tenant_id = $3) ORDER BY created_at",
            SUBSCRIPTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(event_name)
            .bind(correlation_keys)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(rows.into_iter().map(EventSubscription::from).collect())
    }

    async fn commit(&self, batch: WriteBatch) -> EngineResult<()> {
        let writes = batch.len();
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        for write in batch {
            let description = write.describe();
            if let Err(e) = apply(&mut tx, write).await {
                tracing::debug!(write = %description, error = %e, "Commit rejected");
                // Dropping the transaction rolls it back.
                return Err(e);
            }
        }
        tx.commit().await.map_err(store_error)?;
        tracing::trace!(writes, "Batch committed");
        Ok(())
    }
}

async fn apply(conn: &mut PgConnection, write: Write) -> EngineResult<()> {
    match write {
        Write::InsertProcess(process) => {
            let data = serde_json::to_value(&process)?;
            insert_document(
                conn,
                "process_instance",
                process.id,
                &process.definition_key,
                process.tenant_id.as_deref(),
                data,
            )
            .await
        }
        Write::UpdateProcess(process) => {
            let data = serde_json::to_value(&process)?;
            update_document(conn, "process_instance", process.id, process.version, data).await
        }
        Write::InsertCase(case) => {
            let data = serde_json::to_value(&case)?;
            insert_document(
                conn,
                "case_instance",
                case.id,
                &case.definition_key,
                case.tenant_id.as_deref(),
                data,
            )
            .await
        }
        Write::UpdateCase(case) => {
            let data = serde_json::to_value(&case)?;
            update_document(conn, "case_instance", case.id, case.version, data).await
        }
        Write::InsertJob(job) => insert_job(conn, &job).await,
        Write::UpdateJob(job) => update_job(conn, &job).await,
        Write::DeleteJob { id, version } => {
            let result = sqlx::query("DELETE FROM casework.job WHERE id = $1 AND version = $2")
                .bind(id)
                .bind(version as i64)
                .execute(&mut *conn)
                .await
                .map_err(store_error)?;
            expect_one(result, &format!("job {}", id))
        }
        Write::InsertSubscription(subscription) => {
            sqlx::query(
                r#"
                INSERT INTO casework.event_subscription
                    (id, event_name, correlation_key, process_instance_id, activity_id, tenant_id, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(subscription.id)
            .bind(&subscription.event_name)
            .bind(subscription.correlation_key.as_deref())
            .bind(subscription.process_instance_id)
            .bind(&subscription.activity_id)
            .bind(subscription.tenant_id.as_deref())
            .bind(subscription.created_at)
            .execute(&mut *conn)
            .await
            .map_err(store_error)?;
            Ok(())
        }
        Write::DeleteSubscription(id) => {
            let result = sqlx::query("DELETE FROM casework.event_subscription WHERE id = $1")
                .bind(id)
                .execute(&mut *conn)
                .await
                .map_err(store_error)?;
            expect_one(result, &format!("subscription {}", id))
        }
    }
}

async fn insert_document(
    conn: &mut PgConnection,
    table: &str,
    id: Uuid,
    definition_key: &str,
    tenant_id: Option<&str>,
    data: serde_json::Value,
) -> EngineResult<()> {
    let sql = format!(
        "INSERT INTO casework.{} (id, definition_key, tenant_id, version, data) \
         VALUES ($1, $2, $3, 0, $4)",
        table
    );
    sqlx::query(&sql)
        .bind(id)
        .bind(definition_key)
        .bind(tenant_id)
        .bind(data)
        .execute(&mut *conn)
        .await
        .map_err(store_error)?;
    Ok(())
}

async fn update_document(
    conn: &mut PgConnection,
    table: &str,
    id: Uuid,
    expected_version: u64,
    data: serde_json::Value,
) -> EngineResult<()> {
    let sql = format!(
        "UPDATE casework.{} SET data = $2, version = version + 1, updated_at = now() \
         WHERE id = $1 AND version = $3",
        table
    );
    let result = sqlx::query(&sql)
        .bind(id)
        .bind(data)
        .bind(expected_version as i64)
        .execute(&mut *conn)
        .await
        .map_err(store_error)?;
    expect_one(result, &format!("{} {}", table, id))
}

async fn insert_job(conn: &mut PgConnection, job: &Job) -> EngineResult<()> {
    sqlx::query(
        r#"
        INSERT INTO casework.job
            (id, kind, state, suspended, handler_type, handler_config, process_instance_id,
             case_instance_id, due_date, lock_owner, lock_expiration, retries,
             exception_message, tenant_id, version, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 0, $15)
        "#,
    )
    .bind(job.id)
    .bind(job.kind.as_str())
    .bind(job.state.as_str())
    .bind(job.suspended)
    .bind(&job.handler_type)
    .bind(&job.handler_config)
    .bind(job.process_instance_id)
    .bind(job.case_instance_id)
    .bind(job.due_date)
    .bind(job.lock_owner.as_deref())
    .bind(job.lock_expiration)
    .bind(job.retries as i32)
    .bind(job.exception_message.as_deref())
    .bind(job.tenant_id.as_deref())
    .bind(job.created_at)
    .execute(&mut *conn)
    .await
    .map_err(store_error)?;
    Ok(())
}

async fn update_job(conn: &mut PgConnection, job: &Job) -> EngineResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE casework.job
        SET state = $3, suspended = $4, due_date = $5, lock_owner = $6, lock_expiration = $7,
            retries = $8, exception_message = $9, version = version + 1
        WHERE id = $1 AND version = $2
        "#,
    )
    .bind(job.id)
    .bind(job.version as i64)
    .bind(job.state.as_str())
    .bind(job.suspended)
    .bind(job.due_date)
    .bind(job.lock_owner.as_deref())
    .bind(job.lock_expiration)
    .bind(job.retries as i32)
    .bind(job.exception_message.as_deref())
    .execute(&mut *conn)
    .await
    .map_err(store_error)?;
    expect_one(result, &format!("job {}", job.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_map_to_store() {
        let err = store_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, EngineError::Store(_)));
    }

    #[test]
    fn test_job_columns_match_row() {
        for column in ["lock_expiration", "exception_message", "handler_config", "version"] {
            assert!(JOB_COLUMNS.contains(column));
        }
    }
}
