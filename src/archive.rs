//! タスク結果のファイル保存
//!
//! 成功したタスクは `result-<worker>-<task>-<timestamp>.json`、
//! 失敗したタスクは `failure-<worker>-<task>-<timestamp>.json` として
//! 結果ディレクトリに保存します。`<timestamp>` はエポックからのミリ秒です。

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::engine::JobEvent;
use crate::error::ArchiveError;
use crate::workflow::WorkerKind;

#[derive(Debug, Serialize)]
struct ResultRecord<'a> {
    worker: WorkerKind,
    task: &'a str,
    result: &'a Value,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct FailureRecord<'a> {
    worker: WorkerKind,
    task: &'a str,
    error: &'a str,
    timestamp: String,
}

#[derive(Debug, Clone)]
pub struct ResultArchive {
    dir: PathBuf,
}

impl ResultArchive {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn save_result(&self, worker: WorkerKind, task: &str, result: &Value) -> Result<PathBuf, ArchiveError> {
        let record = ResultRecord {
            worker,
            task,
            result,
            timestamp: Utc::now().to_rfc3339(),
        };
        self.write("result", worker, task, &record)
    }

    pub fn save_failure(&self, worker: WorkerKind, task: &str, error: &str) -> Result<PathBuf, ArchiveError> {
        let record = FailureRecord {
            worker,
            task,
            error,
            timestamp: Utc::now().to_rfc3339(),
        };
        self.write("failure", worker, task, &record)
    }

    /// タスクの完了・失敗イベントを保存する（それ以外のイベントは無視）
    pub fn record(&self, event: &JobEvent) -> Result<Option<PathBuf>, ArchiveError> {
        match event {
            JobEvent::TaskCompleted {
                task, worker, result, ..
            } => self.save_result(*worker, task, result).map(Some),
            JobEvent::TaskFailed {
                task, worker, error, ..
            } => self.save_failure(*worker, task, error).map(Some),
            _ => Ok(None),
        }
    }

    fn save_json<T: Serialize>(&self, file_name: &str, value: &T) -> Result<PathBuf, ArchiveError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(file_name);
        std::fs::write(&path, serde_json::to_vec_pretty(value)?)?;
        Ok(path)
    }

    fn write<T: Serialize>(
        &self,
        prefix: &str,
        worker: WorkerKind,
        task: &str,
        record: &T,
    ) -> Result<PathBuf, ArchiveError> {
        let file_name = format!(
            "{}-{}-{}-{}.json",
            prefix,
            worker,
            sanitize(task),
            Utc::now().timestamp_millis()
        );
        let path = self.save_json(&file_name, record)?;
        debug!(path = %path.display(), "結果を保存しました");
        Ok(path)
    }
}

/// パス区切り文字を `_` に置き換える
fn sanitize(task: &str) -> String {
    task.replace(['/', '\\'], "_")
}
