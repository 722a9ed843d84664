use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use bioqueue_core::{SchedulerError, SchedulerResult};
use bioqueue_domain::{
    JobRecord, JobRecordRepository, JobStatus, NewJobRecord, OutputFile, Request,
    RequestOption, RequestRepository, RequestStatus, SchedulerStore, StoreChange,
};
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, instrument};

const REQUEST_COLUMNS: &str = "id, uuid, service, status, created_at";
const JOB_COLUMNS: &str =
    "id, request_id, service, configuration, job_ref, working_dir, status, return_code";

/// 请求与作业记录的 SQLite 存储
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_request_status(raw: &str) -> SchedulerResult<RequestStatus> {
        raw.parse().map_err(SchedulerError::DatabaseOperation)
    }

    fn row_to_request(
        row: &sqlx::sqlite::SqliteRow,
        options: Vec<RequestOption>,
    ) -> SchedulerResult<Request> {
        let status: String = row.try_get("status")?;
        Ok(Request {
            id: row.try_get("id")?,
            uuid: row.try_get("uuid")?,
            service: row.try_get("service")?,
            status: Self::parse_request_status(&status)?,
            options,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        })
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow, files: Vec<OutputFile>) -> SchedulerResult<JobRecord> {
        Ok(JobRecord {
            id: row.try_get("id")?,
            request_id: row.try_get("request_id")?,
            service: row.try_get("service")?,
            configuration: row.try_get("configuration")?,
            job_ref: row.try_get("job_ref")?,
            working_dir: row.try_get("working_dir")?,
            status: row.try_get("status")?,
            return_code: row.try_get("return_code")?,
            files,
        })
    }

    async fn load_options(&self, request_id: i64) -> SchedulerResult<Vec<RequestOption>> {
        let rows = sqlx::query(
            "SELECT name, value FROM request_options WHERE request_id = $1 ORDER BY position",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(RequestOption {
                    name: row.try_get("name")?,
                    value: row.try_get("value")?,
                })
            })
            .collect()
    }

    async fn load_files(&self, job_id: i64) -> SchedulerResult<Vec<OutputFile>> {
        let rows = sqlx::query("SELECT id, title, path FROM files WHERE job_id = $1 ORDER BY path")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(OutputFile {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    path: row.try_get("path")?,
                })
            })
            .collect()
    }

    async fn insert_job(tx: &mut Transaction<'_, Sqlite>, job: &NewJobRecord) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (request_id, service, configuration, job_ref, working_dir, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(job.request_id)
        .bind(&job.service)
        .bind(&job.configuration)
        .bind(&job.job_ref)
        .bind(&job.working_dir)
        .bind(job.status)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn advance_request(
        tx: &mut Transaction<'_, Sqlite>,
        request_id: i64,
        status: RequestStatus,
    ) -> SchedulerResult<()> {
        let current: Option<String> = sqlx::query_scalar("SELECT status FROM requests WHERE id = $1")
            .bind(request_id)
            .fetch_optional(&mut **tx)
            .await?;
        let current = current.ok_or(SchedulerError::RequestNotFound { id: request_id })?;
        let current = Self::parse_request_status(&current)?;

        if !current.can_transition_to(status) {
            debug!(request_id, from = %current, to = %status, "忽略非前进的请求状态变更");
            return Ok(());
        }

        sqlx::query("UPDATE requests SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(request_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn current_job(
        tx: &mut Transaction<'_, Sqlite>,
        request_id: i64,
    ) -> SchedulerResult<(i64, JobStatus)> {
        let row = sqlx::query("SELECT id, status FROM jobs WHERE request_id = $1")
            .bind(request_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(SchedulerError::JobNotFound { request_id })?;
        Ok((row.try_get("id")?, row.try_get("status")?))
    }

    async fn advance_job(
        tx: &mut Transaction<'_, Sqlite>,
        request_id: i64,
        status: JobStatus,
    ) -> SchedulerResult<()> {
        let (job_id, current) = Self::current_job(tx, request_id).await?;
        if current == status || !current.can_advance_to(status) {
            debug!(request_id, from = %current, to = %status, "忽略非前进的作业状态变更");
            return Ok(());
        }

        sqlx::query("UPDATE jobs SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(job_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn finish_job(
        tx: &mut Transaction<'_, Sqlite>,
        request_id: i64,
        status: JobStatus,
        return_code: Option<i32>,
        files: &[String],
    ) -> SchedulerResult<()> {
        let (job_id, current) = Self::current_job(tx, request_id).await?;
        if current.is_finished() {
            debug!(request_id, status = %current, "作业已处于终态，忽略重复的完成记录");
            return Ok(());
        }

        sqlx::query("UPDATE jobs SET status = $1, return_code = $2 WHERE id = $3")
            .bind(status)
            .bind(return_code)
            .bind(job_id)
            .execute(&mut **tx)
            .await?;

        for path in files {
            let title = Path::new(path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone());
            sqlx::query("INSERT INTO files (id, job_id, title, path) VALUES ($1, $2, $3, $4)")
                .bind(uuid::Uuid::new_v4().simple().to_string())
                .bind(job_id)
                .bind(title)
                .bind(path)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RequestRepository for SqliteStore {
    #[instrument(skip(self, options), fields(service = %service, option_count = options.len()))]
    async fn create_request(
        &self,
        service: &str,
        options: &[RequestOption],
    ) -> SchedulerResult<Request> {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        let created_at = Utc::now();

        let mut tx = self.pool.begin().await?;
        let id = sqlx::query(
            "INSERT INTO requests (uuid, service, status, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&uuid)
        .bind(service)
        .bind(RequestStatus::Pending.as_str())
        .bind(created_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (position, option) in options.iter().enumerate() {
            sqlx::query(
                "INSERT INTO request_options (request_id, position, name, value) VALUES ($1, $2, $3, $4)",
            )
            .bind(id)
            .bind(position as i64)
            .bind(&option.name)
            .bind(&option.value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(request_id = id, "请求已创建");
        Ok(Request {
            id,
            uuid,
            service: service.to_string(),
            status: RequestStatus::Pending,
            options: options.to_vec(),
            created_at,
        })
    }

    async fn find_request_by_id(&self, id: i64) -> SchedulerResult<Option<Request>> {
        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let options = self.load_options(id).await?;
                Ok(Some(Self::row_to_request(&row, options)?))
            }
            None => Ok(None),
        }
    }

    async fn find_request_by_uuid(&self, uuid: &str) -> SchedulerResult<Option<Request>> {
        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE uuid = $1"))
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                let options = self.load_options(id).await?;
                Ok(Some(Self::row_to_request(&row, options)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn find_pending_requests(&self) -> SchedulerResult<Vec<Request>> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE status = $1 ORDER BY id"
        ))
        .bind(RequestStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await?;

        let option_rows = sqlx::query(
            r#"
            SELECT o.request_id, o.name, o.value
            FROM request_options o
            JOIN requests r ON r.id = o.request_id
            WHERE r.status = $1
            ORDER BY o.request_id, o.position
            "#,
        )
        .bind(RequestStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut options: HashMap<i64, Vec<RequestOption>> = HashMap::new();
        for row in &option_rows {
            options
                .entry(row.try_get("request_id")?)
                .or_default()
                .push(RequestOption {
                    name: row.try_get("name")?,
                    value: row.try_get("value")?,
                });
        }

        rows.iter()
            .map(|row| {
                let id: i64 = row.try_get("id")?;
                Self::row_to_request(row, options.remove(&id).unwrap_or_default())
            })
            .collect()
    }
}

#[async_trait]
impl JobRecordRepository for SqliteStore {
    async fn find_job_by_request(&self, request_id: i64) -> SchedulerResult<Option<JobRecord>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE request_id = $1"))
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let files = self.load_files(row.try_get("id")?).await?;
                Ok(Some(Self::row_to_job(&row, files)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn find_active_jobs(&self) -> SchedulerResult<Vec<JobRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status IN ($1, $2) ORDER BY id"
        ))
        .bind(JobStatus::Queued)
        .bind(JobStatus::Running)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Self::row_to_job(row, Vec::new()))
            .collect()
    }
}

#[async_trait]
impl SchedulerStore for SqliteStore {
    #[instrument(skip(self, changes), fields(change_count = changes.len()))]
    async fn commit(&self, changes: Vec<StoreChange>) -> SchedulerResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for change in &changes {
            match change {
                StoreChange::CreateJob(job) => Self::insert_job(&mut tx, job).await?,
                StoreChange::RequestStatus { request_id, status } => {
                    Self::advance_request(&mut tx, *request_id, *status).await?
                }
                StoreChange::JobStatus { request_id, status } => {
                    Self::advance_job(&mut tx, *request_id, *status).await?
                }
                StoreChange::FinishJob {
                    request_id,
                    status,
                    return_code,
                    files,
                } => Self::finish_job(&mut tx, *request_id, *status, *return_code, files).await?,
            }
        }
        tx.commit().await?;

        debug!("已提交 {} 条存储变更", changes.len());
        Ok(())
    }
}
