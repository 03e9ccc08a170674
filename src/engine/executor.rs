//! ワークフロー実行エンジン
//!
//! # 責務
//!
//! このモジュールは、ワークフローの実行を制御する [`Orchestrator`] を提供します。
//! ワーカーとワークフローを登録し、依存関係に従ってタスクを並行にディスパッチし、
//! ジョブの状態と結果を管理します。
//!
//! # 実行フロー
//!
//! 1. ワークフローを検索し、`running` 状態のジョブを作成
//! 2. 未実行タスクのうち、依存先がすべて完了したもの（レディセット）を求める
//!    - レディセットが空なら `UnresolvedDependency` でジョブ失敗
//! 3. レディセットの各タスクについて参照を解決し、ワーカーを選び、検証してから並行実行
//! 4. ラウンド内のタスクがすべて終わるまで待つ（バリア）
//!    - 成功: 結果を記録して完了扱い
//!    - 失敗: `continue_on_failure` なら失敗を記録して完了扱い、そうでなければジョブ失敗
//!      （実行中の兄弟タスクは切り離され、結果は破棄されます）
//! 5. 全タスク完了でジョブを `completed` にし、最終レポートを生成
//!
//! # 使用例
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use mdflow::config::Settings;
//! use mdflow::engine::Orchestrator;
//! use mdflow::provider::create_provider;
//! use mdflow::worker::WorkerRegistry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::load(None)?;
//!     let client = Arc::from(create_provider(settings.inference())?);
//!     let registry = WorkerRegistry::bundled(client, &settings);
//!     let orchestrator = Orchestrator::new(registry, settings.engine().clone());
//!
//!     let workflow = orchestrator.load_workflow("workflows/basic-recon.md")?;
//!     let params = BTreeMap::from([("target".to_string(), serde_json::json!("example.com"))]);
//!     let job = orchestrator.execute_workflow(workflow.id(), params).await?;
//!
//!     println!("{}: {}", job.id, job.status);
//!     Ok(())
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineSettings;
use crate::error::WorkflowError;
use crate::worker::{Task, Worker, WorkerRegistry};
use crate::workflow::task::DEFAULT_TIMEOUT_MS;
use crate::workflow::{validate, Action, TaskDefinition, WorkerKind, Workflow, WorkflowParser};
use super::context::ExecutionContext;
use super::event::JobEvent;
use super::result::{ExecutionError, Job, JobStatus, TaskFailure};

/// 最終レポート用の合成タスク名
pub const FINAL_REPORT_TASK: &str = "final_workflow_report";

/// ワーカーの稼働状況
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub kind: WorkerKind,
    pub capabilities: Vec<String>,
    /// このオーケストレーター経由で実行したタスク数
    pub tasks_executed: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// ディレクトリ内のワークフローファイル
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct WorkerActivity {
    tasks_executed: u64,
    last_activity: Option<DateTime<Utc>>,
}

enum RunOutcome {
    Completed,
    Stopped,
}

/// ディスパッチ可能な状態まで準備したタスク
struct PreparedTask {
    task: Task,
    worker: Arc<dyn Worker>,
    timeout: Option<Duration>,
    retry: u32,
    continue_on_failure: bool,
}

struct TaskOutcome {
    name: String,
    worker: WorkerKind,
    continue_on_failure: bool,
    result: Result<Value, ExecutionError>,
}

/// ワークフロー実行エンジン
///
/// 複数のジョブを並行に実行できます。`stop_job` を別タスクから呼べるよう、
/// 通常は `Arc<Orchestrator>` として共有します。
pub struct Orchestrator {
    workers: RwLock<WorkerRegistry>,
    workflows: RwLock<HashMap<String, Arc<Workflow>>>,
    jobs: Mutex<HashMap<String, Job>>,
    activity: Mutex<HashMap<WorkerKind, WorkerActivity>>,
    settings: EngineSettings,
    events: Option<UnboundedSender<JobEvent>>,
}

impl Orchestrator {
    /// 新しいオーケストレーターを生成
    pub fn new(registry: WorkerRegistry, settings: EngineSettings) -> Self {
        let missing = registry.missing_kinds();
        if !missing.is_empty() {
            debug!(?missing, "ワーカーが登録されていない種別があります");
        }

        Self {
            workers: RwLock::new(registry),
            workflows: RwLock::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
            activity: Mutex::new(HashMap::new()),
            settings,
            events: None,
        }
    }

    /// 進行イベントの送信先を設定
    pub fn with_events(mut self, sender: UnboundedSender<JobEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// ワークフローを検証して登録する
    ///
    /// # エラー
    ///
    /// - [`WorkflowError::Validation`] - 未知の依存先、循環依存など
    pub fn register_workflow(&self, workflow: Workflow) -> Result<Arc<Workflow>, WorkflowError> {
        let report = validate(&workflow);
        for warning in &report.warnings {
            warn!(workflow_id = %workflow.id(), "{}", warning);
        }
        report.into_result()?;

        let workflow = Arc::new(workflow);
        write(&self.workflows).insert(workflow.id().to_string(), Arc::clone(&workflow));
        info!(
            workflow_id = %workflow.id(),
            tasks = workflow.tasks().len(),
            "ワークフロー '{}' を登録しました",
            workflow.name()
        );
        Ok(workflow)
    }

    /// ファイルからワークフローを読み込み、検証して登録する
    pub fn load_workflow(&self, path: impl AsRef<Path>) -> Result<Arc<Workflow>, WorkflowError> {
        let path = path.as_ref();
        info!(path = %path.display(), "ワークフローを読み込みます");
        let workflow = WorkflowParser::new().parse_file(path)?;
        self.register_workflow(workflow)
    }

    /// ディレクトリ内の `*.md` ファイルを列挙する（名前順）
    ///
    /// ディレクトリが存在しない場合は空のリストを返します。
    pub fn list_available_workflows(dir: impl AsRef<Path>) -> std::io::Result<Vec<WorkflowFile>> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            files.push(WorkflowFile {
                name,
                path,
                size: metadata.len(),
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    pub fn workflow(&self, id: &str) -> Option<Arc<Workflow>> {
        read(&self.workflows).get(id).cloned()
    }

    /// 登録済みのワークフロー（ID順）
    pub fn workflows(&self) -> Vec<Arc<Workflow>> {
        let mut workflows: Vec<_> = read(&self.workflows).values().cloned().collect();
        workflows.sort_by(|a, b| a.id().cmp(b.id()));
        workflows
    }

    /// すべてのジョブのスナップショット（開始順）
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = lock(&self.jobs).values().cloned().collect();
        jobs.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// 実行中のジョブ
    pub fn active_jobs(&self) -> Vec<Job> {
        self.jobs()
            .into_iter()
            .filter(|job| job.status == JobStatus::Running)
            .collect()
    }

    pub fn job_status(&self, job_id: &str) -> Option<Job> {
        lock(&self.jobs).get(job_id).cloned()
    }

    /// 登録済みワーカーの稼働状況
    pub fn worker_status(&self) -> Vec<WorkerStatus> {
        let workers = read(&self.workers).clone();
        let activity = lock(&self.activity).clone();

        workers
            .kinds()
            .into_iter()
            .filter_map(|kind| {
                let worker = workers.get(kind)?;
                let activity = activity.get(&kind).copied().unwrap_or_default();
                Some(WorkerStatus {
                    kind,
                    capabilities: worker.capabilities(),
                    tasks_executed: activity.tasks_executed,
                    last_activity: activity.last_activity,
                })
            })
            .collect()
    }

    /// 実行中のジョブを停止する
    ///
    /// 実行中のタスクは中断されません。スケジューリングループは次のタスク完了時に
    /// 停止を検知し、以降のラウンドを開始しません。
    ///
    /// # エラー
    ///
    /// - [`ExecutionError::JobNotFound`] - ジョブが存在しない
    /// - [`ExecutionError::InvalidJobState`] - ジョブが実行中でない
    pub fn stop_job(&self, job_id: &str) -> Result<Job, ExecutionError> {
        let snapshot = {
            let mut jobs = lock(&self.jobs);
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| ExecutionError::JobNotFound(job_id.to_string()))?;
            if !job.finish(JobStatus::Stopped) {
                return Err(ExecutionError::InvalidJobState {
                    job_id: job_id.to_string(),
                    status: job.status,
                });
            }
            job.clone()
        };

        info!(job_id, "ジョブを停止しました");
        self.emit(JobEvent::JobStopped {
            job_id: job_id.to_string(),
        });
        Ok(snapshot)
    }

    /// ワークフローを実行する
    ///
    /// # 戻り値
    ///
    /// - `Ok(Job)`: 完了または停止したジョブのスナップショット
    /// - `Err(ExecutionError)`: ワークフローが見つからない、またはジョブが失敗した
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        parameters: BTreeMap<String, Value>,
    ) -> Result<Job, ExecutionError> {
        let workflow = self
            .workflow(workflow_id)
            .ok_or_else(|| ExecutionError::WorkflowNotFound(workflow_id.to_string()))?;

        let job = Job::new(format!("job-{}", Uuid::new_v4()), &workflow, parameters);
        let job_id = job.id.clone();
        lock(&self.jobs).insert(job_id.clone(), job);

        info!(job_id = %job_id, workflow_id = %workflow.id(), "ジョブを開始しました");
        self.emit(JobEvent::JobStarted {
            job_id: job_id.clone(),
            workflow_id: workflow.id().to_string(),
        });

        match self.run_tasks(&job_id, &workflow).await {
            Ok(RunOutcome::Completed) => {
                let duration = self.update_job(&job_id, |job| {
                    job.finish(JobStatus::Completed).then(|| job.duration_ms.unwrap_or_default())
                })?;
                if let Some(duration_ms) = duration {
                    info!(job_id = %job_id, duration_ms, "ワークフロー '{}' が完了しました", workflow.name());
                    self.emit(JobEvent::JobCompleted {
                        job_id: job_id.clone(),
                        duration_ms,
                    });
                    if self.settings.generate_report {
                        self.generate_final_report(&job_id).await;
                    }
                }
                self.snapshot(&job_id)
            }
            Ok(RunOutcome::Stopped) => {
                info!(job_id = %job_id, "停止されたジョブのスケジューリングを終了しました");
                self.snapshot(&job_id)
            }
            Err(err) => {
                let message = err.to_string();
                let failed = self.update_job(&job_id, |job| {
                    let failed = job.finish(JobStatus::Failed);
                    if failed {
                        job.error = Some(message.clone());
                    }
                    failed
                })?;
                if failed {
                    error!(job_id = %job_id, error = %message, "ワークフロー '{}' が失敗しました", workflow.name());
                    self.emit(JobEvent::JobFailed {
                        job_id: job_id.clone(),
                        error: message,
                    });
                }
                Err(err)
            }
        }
    }

    /// スケジューリングループ
    async fn run_tasks(&self, job_id: &str, workflow: &Workflow) -> Result<RunOutcome, ExecutionError> {
        let mut pending: Vec<&TaskDefinition> = workflow.tasks().iter().collect();
        let mut round = 0usize;

        while !pending.is_empty() {
            let (status, completed, parameters, results) = self.update_job(job_id, |job| {
                (
                    job.status,
                    job.completed_tasks.clone(),
                    job.parameters.clone(),
                    job.results.clone(),
                )
            })?;
            if status.is_terminal() {
                return Ok(RunOutcome::Stopped);
            }

            let (ready, blocked): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .partition(|task| task.dependencies().iter().all(|dep| completed.contains(dep)));
            pending = blocked;

            if ready.is_empty() {
                return Err(ExecutionError::UnresolvedDependency {
                    remaining: pending.iter().map(|task| task.name().to_string()).collect(),
                });
            }

            round += 1;
            debug!(job_id, round, tasks = ready.len(), "ラウンドを開始します");

            let context = ExecutionContext::new(&parameters, &results);
            let mut prepared = Vec::with_capacity(ready.len());
            for definition in &ready {
                match self.prepare_task(job_id, definition, &context) {
                    Ok(task) => prepared.push(task),
                    Err(err) => {
                        self.record_failure(job_id, definition.name(), definition.worker(), &err, false)?;
                        return Err(err);
                    }
                }
            }

            let mut set = JoinSet::new();
            let mut spawned = HashMap::new();
            for task in prepared {
                let name = task.task.name.clone();
                let worker = task.task.worker;
                self.update_job(job_id, |job| {
                    job.current_tasks.insert(name.clone());
                })?;

                info!(job_id, task = %name, %worker, "タスクを開始します");
                self.emit(JobEvent::TaskStarted {
                    job_id: job_id.to_string(),
                    task: name.clone(),
                    worker,
                });

                let handle = set.spawn(run_prepared(task, self.settings.retry_backoff));
                spawned.insert(handle.id(), (name, worker));
            }

            while let Some(joined) = set.join_next().await {
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(join_error) => {
                        let (name, worker) = spawned
                            .get(&join_error.id())
                            .cloned()
                            .unwrap_or_else(|| (String::new(), WorkerKind::General));
                        TaskOutcome {
                            result: Err(ExecutionError::TaskPanicked {
                                task: name.clone(),
                                message: join_error.to_string(),
                            }),
                            name,
                            worker,
                            continue_on_failure: false,
                        }
                    }
                };

                self.record_activity(outcome.worker);
                let terminal = self.update_job(job_id, |job| {
                    if job.is_terminal() {
                        return true;
                    }
                    job.current_tasks.remove(&outcome.name);
                    false
                })?;
                if terminal {
                    debug!(job_id, task = %outcome.name, detached = set.len(), "終了したジョブの結果を破棄します");
                    set.detach_all();
                    return Ok(RunOutcome::Stopped);
                }

                let TaskOutcome {
                    name,
                    worker,
                    continue_on_failure,
                    result,
                } = outcome;

                match result {
                    Ok(value) => {
                        self.update_job(job_id, |job| {
                            job.results.insert(name.clone(), value.clone());
                            job.completed_tasks.insert(name.clone());
                        })?;
                        info!(job_id, task = %name, %worker, "タスクが完了しました");
                        self.emit(JobEvent::TaskCompleted {
                            job_id: job_id.to_string(),
                            task: name,
                            worker,
                            result: value,
                        });
                    }
                    Err(err) => {
                        let continued = continue_on_failure && err.is_continuable();
                        self.record_failure(job_id, &name, worker, &err, continued)?;
                        if continued {
                            warn!(job_id, task = %name, error = %err, "タスクが失敗しましたが、ワークフローを継続します");
                        } else {
                            error!(job_id, task = %name, error = %err, detached = set.len(), "タスクが失敗しました");
                            set.detach_all();
                            return Err(err);
                        }
                    }
                }
            }
        }

        Ok(RunOutcome::Completed)
    }

    /// 参照を解決し、ワーカーを選び、検証する
    fn prepare_task(
        &self,
        job_id: &str,
        definition: &TaskDefinition,
        context: &ExecutionContext<'_>,
    ) -> Result<PreparedTask, ExecutionError> {
        let resolved = context.resolve_parameters(definition);
        for reference in resolved.unresolved {
            if self.settings.strict_references {
                return Err(ExecutionError::UnresolvedReference {
                    task: definition.name().to_string(),
                    reference,
                });
            }
            warn!(job_id, task = %definition.name(), %reference, "参照を解決できません。null として扱います");
        }

        let worker = read(&self.workers)
            .get(definition.worker())
            .ok_or_else(|| ExecutionError::WorkerNotFound {
                task: definition.name().to_string(),
                worker: definition.worker(),
            })?;

        let task = Task {
            job_id: job_id.to_string(),
            name: definition.name().to_string(),
            worker: definition.worker(),
            action: definition.action(),
            parameters: resolved.values,
            code: definition.code().map(str::to_string),
            output: definition.output().map(str::to_string),
            critical: definition.is_critical(),
        };

        let validation = worker.validate_task(&task);
        if !validation.valid {
            return Err(ExecutionError::TaskValidation {
                task: task.name,
                errors: validation.errors,
            });
        }

        Ok(PreparedTask {
            task,
            worker,
            timeout: self.settings.enforce_timeouts.then(|| definition.timeout()),
            retry: definition.retry(),
            continue_on_failure: definition.continue_on_failure(),
        })
    }

    /// レポートワーカーで最終レポートを生成する
    ///
    /// 失敗してもジョブの状態は変わりません。
    async fn generate_final_report(&self, job_id: &str) {
        let worker = read(&self.workers).get(WorkerKind::Report);
        let Some(worker) = worker else {
            warn!(job_id, "レポートワーカーが登録されていないため、最終レポートを生成できません");
            self.emit(JobEvent::ReportFailed {
                job_id: job_id.to_string(),
                error: "レポートワーカーが登録されていません".to_string(),
            });
            return;
        };
        let Ok(job) = self.snapshot(job_id) else {
            return;
        };

        info!(job_id, "最終レポートを生成します");
        let task = final_report_task(&job);
        let timeout = self
            .settings
            .enforce_timeouts
            .then(|| Duration::from_millis(DEFAULT_TIMEOUT_MS));

        match execute_with_timeout(worker.as_ref(), &task, timeout).await {
            Ok(report) => {
                self.record_activity(WorkerKind::Report);
                if self
                    .update_job(job_id, |job| job.final_report = Some(report.clone()))
                    .is_ok()
                {
                    info!(job_id, "最終レポートを生成しました");
                    self.emit(JobEvent::ReportGenerated {
                        job_id: job_id.to_string(),
                        report,
                    });
                }
            }
            Err(err) => {
                self.record_activity(WorkerKind::Report);
                warn!(job_id, error = %err, "最終レポートを生成できませんでした");
                self.emit(JobEvent::ReportFailed {
                    job_id: job_id.to_string(),
                    error: err.to_string(),
                });
            }
        }
    }

    fn record_failure(
        &self,
        job_id: &str,
        task: &str,
        worker: WorkerKind,
        err: &ExecutionError,
        continued: bool,
    ) -> Result<(), ExecutionError> {
        let message = err.to_string();
        let recorded = self.update_job(job_id, |job| {
            if job.is_terminal() {
                return false;
            }
            job.failed_tasks.insert(task.to_string());
            job.failures.insert(
                task.to_string(),
                TaskFailure {
                    worker,
                    error: message.clone(),
                    timestamp: Utc::now(),
                },
            );
            if continued {
                job.completed_tasks.insert(task.to_string());
            }
            true
        })?;

        if recorded {
            self.emit(JobEvent::TaskFailed {
                job_id: job_id.to_string(),
                task: task.to_string(),
                worker,
                error: message,
                continued,
            });
        }
        Ok(())
    }

    fn record_activity(&self, kind: WorkerKind) {
        let mut activity = lock(&self.activity);
        let entry = activity.entry(kind).or_default();
        entry.tasks_executed += 1;
        entry.last_activity = Some(Utc::now());
    }

    fn update_job<R>(&self, job_id: &str, f: impl FnOnce(&mut Job) -> R) -> Result<R, ExecutionError> {
        let mut jobs = lock(&self.jobs);
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| ExecutionError::JobNotFound(job_id.to_string()))?;
        Ok(f(job))
    }

    fn snapshot(&self, job_id: &str) -> Result<Job, ExecutionError> {
        self.job_status(job_id)
            .ok_or_else(|| ExecutionError::JobNotFound(job_id.to_string()))
    }

    fn emit(&self, event: JobEvent) {
        if let Some(sender) = &self.events {
            // 受信側が閉じていても実行は継続する
            let _ = sender.send(event);
        }
    }
}

async fn run_prepared(prepared: PreparedTask, backoff: Duration) -> TaskOutcome {
    let PreparedTask {
        task,
        worker,
        timeout,
        retry,
        continue_on_failure,
    } = prepared;

    let result = execute_with_retry(worker.as_ref(), &task, timeout, retry, backoff).await;
    TaskOutcome {
        name: task.name,
        worker: task.worker,
        continue_on_failure,
        result,
    }
}

/// リトライ付きでタスクを実行
///
/// 失敗した試行は `retry` 回まで、`backoff` だけ待ってから再試行します。
async fn execute_with_retry(
    worker: &dyn Worker,
    task: &Task,
    timeout: Option<Duration>,
    retry: u32,
    backoff: Duration,
) -> Result<Value, ExecutionError> {
    let mut attempt = 0;
    loop {
        match execute_with_timeout(worker, task, timeout).await {
            Ok(value) => {
                if attempt > 0 {
                    info!(task = %task.name, retries = attempt, "再試行で成功しました");
                }
                return Ok(value);
            }
            Err(err) if attempt < retry => {
                attempt += 1;
                warn!(task = %task.name, attempt, error = %err, "タスクを再試行します");
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// タイムアウト付きでタスクを実行
async fn execute_with_timeout(
    worker: &dyn Worker,
    task: &Task,
    timeout: Option<Duration>,
) -> Result<Value, ExecutionError> {
    let execution = worker.execute_task(task);
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, execution).await {
            Ok(result) => result,
            Err(_) => {
                return Err(ExecutionError::TaskTimeout {
                    task: task.name.clone(),
                    timeout_ms: limit.as_millis() as u64,
                });
            }
        },
        None => execution.await,
    };

    result.map_err(|source| ExecutionError::TaskExecution {
        task: task.name.clone(),
        source,
    })
}

fn final_report_task(job: &Job) -> Task {
    Task::new(&job.id, FINAL_REPORT_TASK, WorkerKind::Report, Action::Report)
        .with_parameter("type", json!("workflow"))
        .with_parameter("scope", json!("full"))
        .with_parameter("workflow_id", json!(job.workflow_id))
        .with_parameter("workflow_name", json!(job.workflow_name))
        .with_parameter("job_id", json!(job.id))
        .with_parameter("results", json!(job.results))
        .with_parameter("failures", json!(job.failures))
        .with_parameter("completed_tasks", json!(job.completed_tasks))
        .with_parameter("failed_tasks", json!(job.failed_tasks))
        .with_parameter("duration_ms", json!(job.duration_ms))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{TaskValidation, WorkerError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 指定回数だけ失敗してから成功するモックワーカー
    struct FlakyWorker {
        kind: WorkerKind,
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyWorker {
        fn new(kind: WorkerKind, failures: u32) -> Self {
            Self {
                kind,
                failures_left: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Worker for FlakyWorker {
        fn kind(&self) -> WorkerKind {
            self.kind
        }

        fn capabilities(&self) -> Vec<String> {
            vec!["flaky".to_string()]
        }

        async fn execute_task(&self, task: &Task) -> Result<Value, WorkerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(WorkerError::Failed("flaky".to_string()));
            }
            Ok(json!({"task": task.name}))
        }
    }

    /// 完了しないモックワーカー
    struct HangingWorker;

    #[async_trait]
    impl Worker for HangingWorker {
        fn kind(&self) -> WorkerKind {
            WorkerKind::Monitor
        }

        fn capabilities(&self) -> Vec<String> {
            Vec::new()
        }

        async fn execute_task(&self, _task: &Task) -> Result<Value, WorkerError> {
            std::future::pending::<()>().await;
            Ok(Value::Null)
        }
    }

    /// 常に検証に失敗するモックワーカー
    struct RejectingWorker;

    #[async_trait]
    impl Worker for RejectingWorker {
        fn kind(&self) -> WorkerKind {
            WorkerKind::General
        }

        fn capabilities(&self) -> Vec<String> {
            Vec::new()
        }

        fn validate_task(&self, _task: &Task) -> TaskValidation {
            TaskValidation::invalid(vec!["rejected".to_string()])
        }

        async fn execute_task(&self, _task: &Task) -> Result<Value, WorkerError> {
            Ok(Value::Null)
        }
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            retry_backoff: Duration::from_millis(1),
            generate_report: false,
            ..EngineSettings::default()
        }
    }

    fn orchestrator_with(workers: Vec<Arc<dyn Worker>>, settings: EngineSettings) -> Orchestrator {
        let mut registry = WorkerRegistry::new();
        for worker in workers {
            registry.register(worker);
        }
        Orchestrator::new(registry, settings)
    }

    fn register(orchestrator: &Orchestrator, text: &str) -> Arc<Workflow> {
        orchestrator
            .register_workflow(WorkflowParser::new().parse(text))
            .unwrap()
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let worker = Arc::new(FlakyWorker::new(WorkerKind::General, 2));
        let orchestrator = orchestrator_with(vec![worker.clone()], settings());
        let workflow = register(&orchestrator, "# Retry\n### Do Things\nRetry: 2\n");

        let job = orchestrator
            .execute_workflow(workflow.id(), BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(worker.calls.load(Ordering::SeqCst), 3);
        assert_eq!(job.results["Do Things"], json!({"task": "Do Things"}));
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let worker = Arc::new(FlakyWorker::new(WorkerKind::General, 5));
        let orchestrator = orchestrator_with(vec![worker.clone()], settings());
        let workflow = register(&orchestrator, "# Retry\n### Do Things\nRetry: 1\n");

        let result = orchestrator.execute_workflow(workflow.id(), BTreeMap::new()).await;

        assert!(matches!(result, Err(ExecutionError::TaskExecution { .. })));
        assert_eq!(worker.calls.load(Ordering::SeqCst), 2);

        let job = &orchestrator.jobs()[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.is_some());
        assert!(job.failed_tasks.contains("Do Things"));
    }

    #[tokio::test]
    async fn test_timeout_is_enforced() {
        let orchestrator = orchestrator_with(vec![Arc::new(HangingWorker)], settings());
        let workflow = register(&orchestrator, "# Hang\n### Monitor Logs\nTimeout: 1\n");

        let result = orchestrator.execute_workflow(workflow.id(), BTreeMap::new()).await;

        match result {
            Err(ExecutionError::TaskTimeout { task, timeout_ms }) => {
                assert_eq!(task, "Monitor Logs");
                assert_eq!(timeout_ms, 1_000);
            }
            other => panic!("Expected TaskTimeout, got {:?}", other.map(|job| job.status)),
        }
    }

    #[tokio::test]
    async fn test_validation_failure_is_not_retried() {
        let orchestrator = orchestrator_with(vec![Arc::new(RejectingWorker)], settings());
        let workflow = register(&orchestrator, "# Reject\n### Do Things\nRetry: 3\nContinue: true\n");

        let result = orchestrator.execute_workflow(workflow.id(), BTreeMap::new()).await;

        assert!(matches!(result, Err(ExecutionError::TaskValidation { .. })));
    }

    #[tokio::test]
    async fn test_missing_worker() {
        let orchestrator = orchestrator_with(Vec::new(), settings());
        let workflow = register(&orchestrator, "# Empty\n### Scan Ports\nTarget: 10.0.0.5\n");

        let result = orchestrator.execute_workflow(workflow.id(), BTreeMap::new()).await;

        assert!(matches!(
            result,
            Err(ExecutionError::WorkerNotFound { worker: WorkerKind::Scan, .. })
        ));
    }

    #[tokio::test]
    async fn test_strict_references() {
        let worker = Arc::new(FlakyWorker::new(WorkerKind::Scan, 0));
        let strict = EngineSettings {
            strict_references: true,
            ..settings()
        };
        let orchestrator = orchestrator_with(vec![worker.clone()], strict);
        let workflow = register(&orchestrator, "# Strict\n### Scan Ports\nTarget: ${job.target}\n");

        let result = orchestrator.execute_workflow(workflow.id(), BTreeMap::new()).await;

        assert!(matches!(result, Err(ExecutionError::UnresolvedReference { .. })));
        assert_eq!(worker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unresolvable_dependency_fails_job() {
        let worker = Arc::new(FlakyWorker::new(WorkerKind::General, 0));
        let orchestrator = orchestrator_with(vec![worker.clone()], settings());
        // 検証を経ずに登録し、実行時の依存解決だけを確認する
        let workflow = WorkflowParser::new().parse("# Stuck\n### Fast\nDepends: Missing\n");
        let workflow_id = workflow.id().to_string();
        write(&orchestrator.workflows).insert(workflow_id.clone(), Arc::new(workflow));

        let result = orchestrator.execute_workflow(&workflow_id, BTreeMap::new()).await;

        match result {
            Err(ExecutionError::UnresolvedDependency { remaining }) => {
                assert_eq!(remaining, vec!["Fast".to_string()]);
            }
            other => panic!("Expected UnresolvedDependency, got {:?}", other.map(|job| job.status)),
        }
        assert_eq!(worker.calls.load(Ordering::SeqCst), 0);

        let job = &orchestrator.jobs()[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("Fast"));
    }

    #[tokio::test]
    async fn test_unknown_workflow() {
        let orchestrator = orchestrator_with(Vec::new(), settings());
        let result = orchestrator.execute_workflow("nope", BTreeMap::new()).await;

        assert!(matches!(result, Err(ExecutionError::WorkflowNotFound(id)) if id == "nope"));
        assert!(orchestrator.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_worker_status_tracks_activity() {
        let worker = Arc::new(FlakyWorker::new(WorkerKind::General, 0));
        let orchestrator = orchestrator_with(vec![worker], settings());
        let workflow = register(&orchestrator, "# Two\n### First Thing\n### Second Thing\nDepends: First Thing\n");

        let before = orchestrator.worker_status();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].tasks_executed, 0);
        assert!(before[0].last_activity.is_none());

        orchestrator
            .execute_workflow(workflow.id(), BTreeMap::new())
            .await
            .unwrap();

        let after = orchestrator.worker_status();
        assert_eq!(after[0].kind, WorkerKind::General);
        assert_eq!(after[0].tasks_executed, 2);
        assert!(after[0].last_activity.is_some());
    }

    #[test]
    fn test_stop_unknown_job() {
        let orchestrator = orchestrator_with(Vec::new(), settings());
        assert!(matches!(
            orchestrator.stop_job("job-missing"),
            Err(ExecutionError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_list_available_workflows() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b-scan.md"), "# B").unwrap();
        std::fs::write(dir.path().join("a-recon.md"), "# A").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let files = Orchestrator::list_available_workflows(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|file| file.name.as_str()).collect();

        assert_eq!(names, vec!["a-recon", "b-scan"]);
        assert_eq!(files[0].size, 3);
        assert!(Orchestrator::list_available_workflows(dir.path().join("missing")).unwrap().is_empty());
    }
}
