//! `sqlx`-backed `BacktestJobRepository` over `backtest_jobs` +
//! `backtest_job_results`.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::repositories::{BacktestJob, BacktestJobRepository, JobStatus};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn status_from_str(s: &str) -> JobStatus {
    match s {
        "RUNNING" => JobStatus::Running,
        "COMPLETED" => JobStatus::Completed,
        "FAILED" => JobStatus::Failed,
        _ => JobStatus::Pending,
    }
}

pub struct SqliteBacktestJobRepository {
    pool: SqlitePool,
}

impl SqliteBacktestJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BacktestJobRepository for SqliteBacktestJobRepository {
    async fn create(&self, total_tasks: u32) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        let now = chrono::Utc::now().naive_utc();
        sqlx::query(
            "INSERT INTO backtest_jobs (id, status, total_tasks, completed_tasks, failed_tasks, error_message, started_at, finished_at)
             VALUES (?1, 'PENDING', ?2, 0, 0, NULL, ?3, NULL)",
        )
        .bind(id.to_string())
        .bind(total_tasks)
        .bind(now.format(TS_FORMAT).to_string())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get(&self, job_id: Uuid) -> anyhow::Result<Option<BacktestJob>> {
        let row = sqlx::query(
            "SELECT id, status, total_tasks, completed_tasks, failed_tasks, error_message, started_at, finished_at
             FROM backtest_jobs WHERE id = ?1",
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let started_at: String = row.try_get("started_at")?;
        let finished_at: Option<String> = row.try_get("finished_at")?;
        let status: String = row.try_get("status")?;

        Ok(Some(BacktestJob {
            id: job_id,
            status: status_from_str(&status),
            total_tasks: row.try_get::<i64, _>("total_tasks")? as u32,
            completed_tasks: row.try_get::<i64, _>("completed_tasks")? as u32,
            failed_tasks: row.try_get::<i64, _>("failed_tasks")? as u32,
            error_message: row.try_get("error_message")?,
            started_at: NaiveDateTime::parse_from_str(&started_at, TS_FORMAT)?,
            finished_at: finished_at.map(|s| NaiveDateTime::parse_from_str(&s, TS_FORMAT)).transpose()?,
        }))
    }

    async fn mark_task_completed(&self, job_id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE backtest_jobs SET completed_tasks = completed_tasks + 1,
                status = CASE WHEN completed_tasks + failed_tasks + 1 >= total_tasks THEN 'COMPLETED' ELSE 'RUNNING' END,
                finished_at = CASE WHEN completed_tasks + failed_tasks + 1 >= total_tasks THEN ?2 ELSE finished_at END
             WHERE id = ?1",
        )
        .bind(job_id.to_string())
        .bind(chrono::Utc::now().naive_utc().format(TS_FORMAT).to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_task_failed(&self, job_id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE backtest_jobs SET failed_tasks = failed_tasks + 1,
                status = CASE WHEN completed_tasks + failed_tasks + 1 >= total_tasks THEN 'COMPLETED' ELSE 'RUNNING' END,
                finished_at = CASE WHEN completed_tasks + failed_tasks + 1 >= total_tasks THEN ?2 ELSE finished_at END
             WHERE id = ?1",
        )
        .bind(job_id.to_string())
        .bind(chrono::Utc::now().naive_utc().format(TS_FORMAT).to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, message: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE backtest_jobs SET status = 'FAILED', error_message = ?2, finished_at = ?3 WHERE id = ?1")
            .bind(job_id.to_string())
            .bind(message)
            .bind(chrono::Utc::now().naive_utc().format(TS_FORMAT).to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn store_result(&self, job_id: Uuid, fold: u32, model: &str, result_json: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO backtest_job_results (job_id, fold, model, result_json) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(job_id, fold, model) DO UPDATE SET result_json = excluded.result_json",
        )
        .bind(job_id.to_string())
        .bind(fold)
        .bind(model)
        .bind(result_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_results(&self, job_id: Uuid) -> anyhow::Result<Vec<(u32, String, String)>> {
        let rows = sqlx::query("SELECT fold, model, result_json FROM backtest_job_results WHERE job_id = ?1 ORDER BY fold ASC, model ASC")
            .bind(job_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get::<i64, _>("fold")? as u32,
                    row.try_get::<String, _>("model")?,
                    row.try_get::<String, _>("result_json")?,
                ))
            })
            .collect()
    }
}
