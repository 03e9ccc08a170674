//! ワーカーの共通インターフェース定義
//!
//! # 責務
//!
//! - ワーカーの共通トレイト [`Worker`] を定義
//! - 参照解決済みのタスク [`Task`] と、バリデーション結果 [`TaskValidation`] を提供
//! - ワーカー実行時のエラー [`WorkerError`] を定義

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::error::ProviderError;
use crate::workflow::task::{Action, WorkerKind};

/// ワーカーの共通インターフェース
///
/// 1つのワーカーは1つの [`WorkerKind`] を担当し、
/// [`WorkerRegistry`](super::WorkerRegistry) に種別をキーとして登録されます。
///
/// # 実装要件
///
/// - `Send + Sync`: 同じワーカーが複数のタスクから並行に呼び出されます
/// - 非同期実行対応（`async_trait`を使用）
#[async_trait]
pub trait Worker: Send + Sync {
    /// 担当するワーカー種別
    fn kind(&self) -> WorkerKind;

    /// 対応できるアクションなどの説明用ラベル
    fn capabilities(&self) -> Vec<String>;

    /// 実行前にパラメーターを検証する
    ///
    /// デフォルト実装はタスク名が空でないことのみを確認します。
    fn validate_task(&self, task: &Task) -> TaskValidation {
        if task.name.trim().is_empty() {
            TaskValidation::invalid(vec!["タスク名は必須です".to_string()])
        } else {
            TaskValidation::ok()
        }
    }

    /// タスクを実行し、結果を JSON で返す
    async fn execute_task(&self, task: &Task) -> Result<Value, WorkerError>;
}

/// ワーカーに渡されるタスク
///
/// [`TaskDefinition`](crate::workflow::TaskDefinition) の参照を解決したものです。
/// 解決できなかった参照は `Value::Null` になります。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub job_id: String,
    pub name: String,
    pub worker: WorkerKind,
    pub action: Action,
    pub parameters: BTreeMap<String, Value>,
    pub code: Option<String>,
    pub output: Option<String>,
    pub critical: bool,
}

impl Task {
    pub fn new(job_id: impl Into<String>, name: impl Into<String>, worker: WorkerKind, action: Action) -> Self {
        Self {
            job_id: job_id.into(),
            name: name.into(),
            worker,
            action,
            parameters: BTreeMap::new(),
            code: None,
            output: None,
            critical: false,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// `null` 以外のパラメーター
    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key).filter(|value| !value.is_null())
    }

    /// パラメーターをプロンプト等に埋め込む文字列として取り出す
    ///
    /// 文字列はそのまま、それ以外の値は JSON 表現になります。
    /// 空文字列は `None` として扱います。
    pub fn parameter_text(&self, key: &str) -> Option<String> {
        match self.parameter(key)? {
            Value::String(text) if text.trim().is_empty() => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// タスクのバリデーション結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl TaskValidation {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// ワーカー実行時のエラー
#[derive(Debug, Error)]
pub enum WorkerError {
    /// 推論サービスの呼び出しに失敗
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// 入力が処理できない
    #[error("入力が不正です: {0}")]
    InvalidInput(String),

    /// その他の実行失敗
    #[error("{0}")]
    Failed(String),
}
