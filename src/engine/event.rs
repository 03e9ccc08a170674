//! ジョブの進行イベント
//!
//! オーケストレーターは、生成時に渡された `mpsc::UnboundedSender` に
//! [`JobEvent`] を送ります。1つのジョブのイベントはスケジューリング順に届きます。
//! 受信側がいなくなっても実行には影響しません。

use serde::Serialize;
use serde_json::Value;

use crate::workflow::WorkerKind;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    JobStarted {
        job_id: String,
        workflow_id: String,
    },
    TaskStarted {
        job_id: String,
        task: String,
        worker: WorkerKind,
    },
    TaskCompleted {
        job_id: String,
        task: String,
        worker: WorkerKind,
        result: Value,
    },
    TaskFailed {
        job_id: String,
        task: String,
        worker: WorkerKind,
        error: String,
        /// `continue_on_failure` によりジョブが継続したか
        continued: bool,
    },
    JobCompleted {
        job_id: String,
        duration_ms: u64,
    },
    JobFailed {
        job_id: String,
        error: String,
    },
    JobStopped {
        job_id: String,
    },
    ReportGenerated {
        job_id: String,
        report: Value,
    },
    ReportFailed {
        job_id: String,
        error: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::JobStarted { job_id, .. }
            | JobEvent::TaskStarted { job_id, .. }
            | JobEvent::TaskCompleted { job_id, .. }
            | JobEvent::TaskFailed { job_id, .. }
            | JobEvent::JobCompleted { job_id, .. }
            | JobEvent::JobFailed { job_id, .. }
            | JobEvent::JobStopped { job_id }
            | JobEvent::ReportGenerated { job_id, .. }
            | JobEvent::ReportFailed { job_id, .. } => job_id,
        }
    }
}
