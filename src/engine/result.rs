//! ジョブの状態と実行エラーの型定義
//!
//! # 責務
//!
//! - ジョブ（ワークフローの1回の実行）[`Job`] とその状態 [`JobStatus`] の型定義
//! - タスク失敗の記録 [`TaskFailure`] の型定義
//! - 実行エラー [`ExecutionError`] の型定義
//!
//! # 状態遷移
//!
//! ```text
//! running ──▶ completed
//!    │ ├────▶ failed
//!    │ └────▶ stopped
//! ```
//!
//! 終了状態（completed / failed / stopped）からは遷移しません。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::worker::WorkerError;
use crate::workflow::{WorkerKind, Workflow};

/// ジョブの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        })
    }
}

/// タスク失敗の記録
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskFailure {
    pub worker: WorkerKind,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// ジョブ（ワークフローの1回の実行）
///
/// ジョブはスケジューリングループのみが更新します（`stop_job` による
/// running → stopped の遷移を除く）。呼び出し側が受け取るのは常にスナップショットです。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub parameters: BTreeMap<String, Value>,
    pub status: JobStatus,
    /// 完了したタスク（`continue_on_failure` で失敗したタスクを含む）
    pub completed_tasks: BTreeSet<String>,
    pub failed_tasks: BTreeSet<String>,
    /// 実行中のタスク
    pub current_tasks: BTreeSet<String>,
    pub results: BTreeMap<String, Value>,
    pub failures: BTreeMap<String, TaskFailure>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub final_report: Option<Value>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(id: impl Into<String>, workflow: &Workflow, parameters: BTreeMap<String, Value>) -> Self {
        Self {
            id: id.into(),
            workflow_id: workflow.id().to_string(),
            workflow_name: workflow.name().to_string(),
            parameters,
            status: JobStatus::Running,
            completed_tasks: BTreeSet::new(),
            failed_tasks: BTreeSet::new(),
            current_tasks: BTreeSet::new(),
            results: BTreeMap::new(),
            failures: BTreeMap::new(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            final_report: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 終了状態に遷移し、終了時刻と所要時間を記録する
    ///
    /// 既に終了状態の場合は何もせず `false` を返します。
    pub(crate) fn finish(&mut self, status: JobStatus) -> bool {
        if self.is_terminal() || !status.is_terminal() {
            return false;
        }
        let end = Utc::now();
        self.status = status;
        self.end_time = Some(end);
        self.duration_ms = Some((end - self.start_time).num_milliseconds().max(0) as u64);
        true
    }

    /// 結果をJSON形式でシリアライズ
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// ワークフロー実行時のエラー
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("ワークフローが見つかりません: {0}")]
    WorkflowNotFound(String),

    #[error("ジョブが見つかりません: {0}")]
    JobNotFound(String),

    #[error("タスク '{task}' を担当するワーカー ({worker}) が登録されていません")]
    WorkerNotFound { task: String, worker: WorkerKind },

    #[error("タスク '{task}' のバリデーションに失敗しました: {}", .errors.join(", "))]
    TaskValidation { task: String, errors: Vec<String> },

    #[error("タスク '{task}' の実行に失敗しました: {source}")]
    TaskExecution {
        task: String,
        #[source]
        source: WorkerError,
    },

    #[error("タスク '{task}' がタイムアウトしました（{timeout_ms}ms）")]
    TaskTimeout { task: String, timeout_ms: u64 },

    #[error("タスク '{task}' の参照 '${{{reference}}}' を解決できません")]
    UnresolvedReference { task: String, reference: String },

    #[error("依存関係を満たせるタスクがありません。残り: {}", .remaining.join(", "))]
    UnresolvedDependency { remaining: Vec<String> },

    #[error("ジョブ {job_id} は {status} 状態のため操作できません")]
    InvalidJobState { job_id: String, status: JobStatus },

    #[error("タスク '{task}' が異常終了しました: {message}")]
    TaskPanicked { task: String, message: String },
}

impl ExecutionError {
    /// `continue_on_failure` のタスクで握りつぶせる失敗か
    ///
    /// 実行そのものの失敗とタイムアウトのみが該当します。
    pub fn is_continuable(&self) -> bool {
        matches!(
            self,
            ExecutionError::TaskExecution { .. } | ExecutionError::TaskTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_is_sticky() {
        let workflow = Workflow::new("wf", "wf");
        let mut job = Job::new("job-1", &workflow, BTreeMap::new());

        assert!(!job.finish(JobStatus::Running));
        assert!(job.finish(JobStatus::Completed));
        assert!(job.end_time.is_some());
        assert!(job.duration_ms.is_some());

        assert!(!job.finish(JobStatus::Stopped));
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(JobStatus::Stopped).unwrap(), serde_json::json!("stopped"));
    }

    #[test]
    fn test_continuable_errors() {
        let timeout = ExecutionError::TaskTimeout {
            task: "Scan Ports".to_string(),
            timeout_ms: 10,
        };
        let validation = ExecutionError::TaskValidation {
            task: "Scan Ports".to_string(),
            errors: vec!["Target missing".to_string()],
        };

        assert!(timeout.is_continuable());
        assert!(!validation.is_continuable());
        assert_eq!(
            validation.to_string(),
            "タスク 'Scan Ports' のバリデーションに失敗しました: Target missing"
        );
    }

    #[test]
    fn test_unresolved_reference_message() {
        let err = ExecutionError::UnresolvedReference {
            task: "Scan Ports".to_string(),
            reference: "job.target".to_string(),
        };
        assert_eq!(err.to_string(), "タスク 'Scan Ports' の参照 '${job.target}' を解決できません");
    }
}
