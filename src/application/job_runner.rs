//! Async backtest job runner: `submit_batch` returns a job id immediately,
//! a background task works through that job's tasks sequentially, and
//! `get_status`/`get_results` let a caller poll without blocking on
//! completion. A bounded semaphore caps how many jobs run concurrently;
//! within one job, tasks always run one at a time, in submission order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info};
use uuid::Uuid;

use crate::application::orchestrators::BacktestReport;
use crate::domain::repositories::{BacktestJob, BacktestJobRepository, JobStatus};

/// One unit of work within a batch: a (fold, model) pair to backtest.
#[derive(Debug, Clone)]
pub struct BacktestTask {
    pub fold: u32,
    pub model: String,
}

pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<BacktestReport>> + Send>>;
pub type TaskExecutor = Arc<dyn Fn(BacktestTask) -> TaskFuture + Send + Sync>;

#[derive(Debug, Clone)]
pub struct JobStatusView {
    pub job: BacktestJob,
    /// `floor(100 * completed_tasks / total_tasks)`. 100 for a job with no
    /// tasks (nothing to do is vacuously done).
    pub progress_pct: u32,
}

pub struct JobRunner {
    jobs: Arc<dyn BacktestJobRepository>,
    semaphore: Arc<Semaphore>,
}

impl JobRunner {
    pub fn new(jobs: Arc<dyn BacktestJobRepository>, concurrency: usize) -> Self {
        Self {
            jobs,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Creates the job row, spawns its executor in the background, and
    /// returns the job id without waiting for any task to run.
    pub async fn submit_batch(&self, tasks: Vec<BacktestTask>, executor: TaskExecutor) -> anyhow::Result<Uuid> {
        let job_id = self.jobs.create(tasks.len() as u32).await?;
        let jobs_repo = self.jobs.clone();
        let semaphore = self.semaphore.clone();

        tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            if let Err(err) = run_tasks(&*jobs_repo, job_id, &tasks, &executor).await {
                error!(%job_id, error = %err, "backtest job failed");
                if let Err(mark_err) = jobs_repo.mark_failed(job_id, &err.to_string()).await {
                    error!(%job_id, error = %mark_err, "failed to record job failure");
                }
            }
            drop(permit);
        });

        Ok(job_id)
    }

    pub async fn get_status(&self, job_id: Uuid) -> anyhow::Result<Option<JobStatusView>> {
        let Some(job) = self.jobs.get(job_id).await? else {
            return Ok(None);
        };
        let progress_pct = if job.total_tasks == 0 { 100 } else { (100 * job.completed_tasks) / job.total_tasks };
        Ok(Some(JobStatusView { job, progress_pct }))
    }

    pub async fn get_results(&self, job_id: Uuid) -> anyhow::Result<Vec<(u32, String, String)>> {
        self.jobs.get_results(job_id).await
    }
}

async fn run_tasks(jobs: &dyn BacktestJobRepository, job_id: Uuid, tasks: &[BacktestTask], executor: &TaskExecutor) -> anyhow::Result<()> {
    for task in tasks {
        match executor(task.clone()).await {
            Ok(report) => {
                let result_json = serde_json::to_string(&SerializableReport::from(&report))?;
                jobs.store_result(job_id, task.fold, &task.model, &result_json).await?;
                jobs.mark_task_completed(job_id).await?;
            }
            Err(err) => {
                info!(%job_id, fold = task.fold, model = %task.model, error = %err, "task failed");
                jobs.mark_task_failed(job_id).await?;
            }
        }
    }
    Ok(())
}

/// `BacktestReport` carries `PositionSizer`-free domain types that already
/// derive `Serialize`; this thin wrapper picks the subset worth persisting
/// per task result rather than re-serializing the whole report verbatim.
#[derive(serde::Serialize)]
struct SerializableReport {
    market: String,
    fold: u32,
    model: Option<String>,
    strategy: Option<String>,
    trade_count: usize,
    skipped_count: usize,
    initial_capital: rust_decimal::Decimal,
    final_capital: rust_decimal::Decimal,
    total_return_pct: rust_decimal::Decimal,
    average_holding_days: rust_decimal::Decimal,
    win_rate_pct: rust_decimal::Decimal,
    max_drawdown_pct: rust_decimal::Decimal,
    sharpe: rust_decimal::Decimal,
}

impl From<&BacktestReport> for SerializableReport {
    fn from(report: &BacktestReport) -> Self {
        Self {
            market: report.market.clone(),
            fold: report.fold,
            model: report.model.clone(),
            strategy: report.strategy.clone(),
            trade_count: report.trades.len(),
            skipped_count: report.skipped.len(),
            initial_capital: report.initial_capital,
            final_capital: report.final_capital,
            total_return_pct: report.total_return_pct,
            average_holding_days: report.average_holding_days,
            win_rate_pct: report.stats.win_rate_pct,
            max_drawdown_pct: report.stats.max_drawdown_pct,
            sharpe: report.stats.sharpe,
        }
    }
}

pub fn is_terminal(status: JobStatus) -> bool {
    matches!(status, JobStatus::Completed | JobStatus::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeJobRepository {
        jobs: Mutex<Vec<BacktestJob>>,
        results: Mutex<Vec<(Uuid, u32, String, String)>>,
    }

    #[async_trait]
    impl BacktestJobRepository for FakeJobRepository {
        async fn create(&self, total_tasks: u32) -> anyhow::Result<Uuid> {
            let id = Uuid::new_v4();
            self.jobs.lock().unwrap().push(BacktestJob {
                id,
                status: JobStatus::Pending,
                total_tasks,
                completed_tasks: 0,
                failed_tasks: 0,
                error_message: None,
                started_at: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
                finished_at: None,
            });
            Ok(id)
        }

        async fn get(&self, job_id: Uuid) -> anyhow::Result<Option<BacktestJob>> {
            Ok(self.jobs.lock().unwrap().iter().find(|j| j.id == job_id).cloned())
        }

        async fn mark_task_completed(&self, job_id: Uuid) -> anyhow::Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.iter_mut().find(|j| j.id == job_id).expect("job exists");
            job.completed_tasks += 1;
            if job.completed_tasks + job.failed_tasks >= job.total_tasks {
                job.status = JobStatus::Completed;
            } else {
                job.status = JobStatus::Running;
            }
            Ok(())
        }

        async fn mark_task_failed(&self, job_id: Uuid) -> anyhow::Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.iter_mut().find(|j| j.id == job_id).expect("job exists");
            job.failed_tasks += 1;
            if job.completed_tasks + job.failed_tasks >= job.total_tasks {
                job.status = JobStatus::Completed;
            } else {
                job.status = JobStatus::Running;
            }
            Ok(())
        }

        async fn mark_failed(&self, job_id: Uuid, message: &str) -> anyhow::Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.iter_mut().find(|j| j.id == job_id).expect("job exists");
            job.status = JobStatus::Failed;
            job.error_message = Some(message.to_string());
            Ok(())
        }

        async fn store_result(&self, job_id: Uuid, fold: u32, model: &str, result_json: &str) -> anyhow::Result<()> {
            self.results.lock().unwrap().push((job_id, fold, model.to_string(), result_json.to_string()));
            Ok(())
        }

        async fn get_results(&self, job_id: Uuid) -> anyhow::Result<Vec<(u32, String, String)>> {
            Ok(self
                .results
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, ..)| *id == job_id)
                .map(|(_, fold, model, json)| (*fold, model.clone(), json.clone()))
                .collect())
        }
    }

    fn empty_report(fold: u32, model: &str) -> BacktestReport {
        BacktestReport::new("KRW-ETH", fold, Some(model.to_string()), None, Vec::new(), Vec::new(), dec!(10000), dec!(10000))
    }

    #[tokio::test]
    async fn completes_all_tasks_and_reaches_100_percent() {
        let repo = Arc::new(FakeJobRepository::default());
        let runner = JobRunner::new(repo.clone(), 2);
        let tasks = vec![BacktestTask { fold: 1, model: "gru".to_string() }, BacktestTask { fold: 2, model: "gru".to_string() }];

        let executor: TaskExecutor = Arc::new(|task| Box::pin(async move { Ok(empty_report(task.fold, &task.model)) }));
        let job_id = runner.submit_batch(tasks, executor).await.unwrap();

        for _ in 0..50 {
            let status = runner.get_status(job_id).await.unwrap().unwrap();
            if is_terminal(status.job.status) {
                assert_eq!(status.progress_pct, 100);
                assert_eq!(status.job.status, JobStatus::Completed);
                let results = runner.get_results(job_id).await.unwrap();
                assert_eq!(results.len(), 2);
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("job did not complete in time");
    }

    #[tokio::test]
    async fn a_failing_task_still_lets_the_job_complete() {
        let repo = Arc::new(FakeJobRepository::default());
        let runner = JobRunner::new(repo.clone(), 1);
        let tasks = vec![BacktestTask { fold: 1, model: "gru".to_string() }];

        let executor: TaskExecutor = Arc::new(|_task| Box::pin(async move { Err(anyhow::anyhow!("candle store unreachable")) }));
        let job_id = runner.submit_batch(tasks, executor).await.unwrap();

        for _ in 0..50 {
            let status = runner.get_status(job_id).await.unwrap().unwrap();
            if is_terminal(status.job.status) {
                assert_eq!(status.job.failed_tasks, 1);
                assert_eq!(status.job.completed_tasks, 0);
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("job did not complete in time");
    }
}
