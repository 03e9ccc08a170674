//! 推論サービスを使う汎用ワーカー
//!
//! # 責務
//!
//! - タスクのアクションとパラメーターから専門家向けのプロンプトを組み立てる
//! - `schema` パラメーターで指定された JSON スキーマを読み込み、レスポンス形式として渡す
//! - 推論サービスのレスポンス（JSON）をそのままタスク結果として返す
//!
//! 種別ごとに1インスタンスを生成し、[`WorkerRegistry`](super::WorkerRegistry) に登録します。

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::provider::{InferenceClient, InferenceRequest};
use crate::workflow::task::{Action, WorkerKind};
use super::traits::{Task, TaskValidation, Worker, WorkerError};

/// 対象（`target`）が必須のアクション
const TARGETED_ACTIONS: [Action; 4] = [Action::Recon, Action::Scan, Action::Exploit, Action::Enumerate];

const RESULT_REQUIREMENTS: &str = "\n\nProvide detailed results including:\
\n1. Summary of actions performed\
\n2. Key findings and observations\
\n3. Potential security implications\
\n4. Recommended next steps\
\n5. Technical details and evidence";

pub struct PromptWorker {
    kind: WorkerKind,
    client: Arc<dyn InferenceClient>,
    schemas_dir: PathBuf,
    add_context_from_internet: bool,
}

impl PromptWorker {
    pub fn new(kind: WorkerKind, client: Arc<dyn InferenceClient>) -> Self {
        Self {
            kind,
            client,
            schemas_dir: PathBuf::from("./schemas"),
            add_context_from_internet: true,
        }
    }

    /// 相対パスのスキーマを探すディレクトリ
    pub fn with_schemas_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.schemas_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_internet_context(mut self, enabled: bool) -> Self {
        self.add_context_from_internet = enabled;
        self
    }

    /// タスクからプロンプトを組み立てる
    pub fn build_prompt(&self, task: &Task) -> String {
        let target = task.parameter_text("target");
        let mut prompt = format!("As a professional {} specialist, ", specialist(self.kind));

        match task.action {
            Action::Recon => {
                let target = target.as_deref().unwrap_or("unknown target");
                let _ = write!(prompt, "perform reconnaissance on target: {}. ", target);
            }
            Action::Exploit => {
                let subject = target
                    .or_else(|| task.parameter_text("vulnerability"))
                    .unwrap_or_else(|| "target".to_string());
                let _ = write!(prompt, "generate exploit code for: {}. ", subject);
            }
            Action::Analyze => {
                let data = task
                    .parameter_text("data")
                    .or_else(|| task.parameter_text("input"))
                    .unwrap_or_else(|| "data".to_string());
                let _ = write!(prompt, "analyze the provided data: {}. ", data);
            }
            Action::Scan | Action::Enumerate => {
                let target = target.as_deref().unwrap_or("target");
                let _ = write!(prompt, "perform {} on: {}. ", scan_verb(task.action), target);
            }
            _ => {
                let _ = write!(prompt, "execute the following task: {}. ", task.name);
                if let Some(target) = target {
                    let _ = write!(prompt, "Target: {}. ", target);
                }
            }
        }

        if let Some(tool) = task.parameter_text("tool") {
            let _ = write!(prompt, "Use tool: {}. ", tool);
        }
        if let Some(command) = task.parameter_text("command") {
            let _ = write!(prompt, "Execute command: {}. ", command);
        }
        if let Some(options) = task.parameter_text("options") {
            let _ = write!(prompt, "Parameters: {}. ", options);
        }
        if let Some(code) = &task.code {
            let _ = write!(prompt, "\n\nCode to execute or analyze:\n{}\n", code);
        }
        if let Some(output) = &task.output {
            let _ = write!(prompt, "\n\nExpected output: {}.", output);
        }

        prompt.push_str(RESULT_REQUIREMENTS);
        prompt
    }

    /// `schema` パラメーターの JSON スキーマを読み込む
    ///
    /// 読み込みに失敗した場合は警告を出してスキーマなしで続行します。
    fn load_schema(&self, task: &Task) -> Option<Value> {
        let name = task.parameter_text("schema")?;
        let path = Path::new(&name);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.schemas_dir.join(path)
        };

        let loaded = std::fs::read(&path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).map_err(|e| e.to_string()));
        match loaded {
            Ok(schema) => Some(schema),
            Err(error) => {
                warn!(task = %task.name, path = %path.display(), %error, "スキーマを読み込めませんでした");
                None
            }
        }
    }
}

#[async_trait]
impl Worker for PromptWorker {
    fn kind(&self) -> WorkerKind {
        self.kind
    }

    fn capabilities(&self) -> Vec<String> {
        capabilities(self.kind).iter().map(|c| c.to_string()).collect()
    }

    fn validate_task(&self, task: &Task) -> TaskValidation {
        let mut errors = Vec::new();
        if task.name.trim().is_empty() {
            errors.push("タスク名は必須です".to_string());
        }
        if TARGETED_ACTIONS.contains(&task.action) && task.parameter_text("target").is_none() {
            errors.push(format!("アクション {} には Target の指定が必要です", task.action));
        }
        TaskValidation::invalid(errors)
    }

    async fn execute_task(&self, task: &Task) -> Result<Value, WorkerError> {
        let prompt = self.build_prompt(task);
        let schema = self.load_schema(task);
        debug!(worker = %self.kind, task = %task.name, "プロンプトを送信します");

        let request = InferenceRequest::new(prompt)
            .with_internet_context(self.add_context_from_internet)
            .with_schema(schema);
        Ok(self.client.invoke(&request).await?)
    }
}

fn specialist(kind: WorkerKind) -> &'static str {
    match kind {
        WorkerKind::Recon => "Recon",
        WorkerKind::Exploit => "Exploit",
        WorkerKind::Scan => "Scan",
        WorkerKind::Analysis => "Analysis",
        WorkerKind::Report => "Report",
        WorkerKind::Monitor => "Monitor",
        WorkerKind::General => "security",
    }
}

fn scan_verb(action: Action) -> &'static str {
    match action {
        Action::Enumerate => "enumeration",
        _ => "scanning",
    }
}

fn capabilities(kind: WorkerKind) -> &'static [&'static str] {
    match kind {
        WorkerKind::Recon => &["recon", "discover", "enumerate", "osint", "scan"],
        WorkerKind::Exploit => &["exploit", "payload", "test", "validate"],
        WorkerKind::Scan => &["scan", "enumerate", "discover", "fingerprint", "probe"],
        WorkerKind::Analysis => &["analyze", "report", "interpret", "correlate", "assess"],
        WorkerKind::Report => &["report", "document", "summarize"],
        WorkerKind::Monitor => &["monitor", "alert", "track", "watch", "notify"],
        WorkerKind::General => &["execute"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use serde_json::json;
    use std::sync::Mutex;

    /// 受け取ったリクエストを記録するモッククライアント
    #[derive(Default)]
    struct RecordingClient {
        requests: Mutex<Vec<InferenceRequest>>,
    }

    #[async_trait]
    impl InferenceClient for RecordingClient {
        async fn invoke(&self, request: &InferenceRequest) -> Result<Value, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(json!({"findings": {"dns": ["ns1.example.com"]}}))
        }
    }

    fn recon_task() -> Task {
        Task::new("job-1", "Resolve Host", WorkerKind::Recon, Action::Recon)
            .with_parameter("target", json!("example.com"))
            .with_parameter("tool", json!("dig"))
    }

    #[test]
    fn test_build_prompt_for_recon() {
        let worker = PromptWorker::new(WorkerKind::Recon, Arc::new(RecordingClient::default()));
        let prompt = worker.build_prompt(&recon_task());

        assert!(prompt.starts_with("As a professional Recon specialist, perform reconnaissance on target: example.com. "));
        assert!(prompt.contains("Use tool: dig. "));
        assert!(prompt.contains("5. Technical details and evidence"));
    }

    #[test]
    fn test_build_prompt_default_action_includes_code() {
        let worker = PromptWorker::new(WorkerKind::General, Arc::new(RecordingClient::default()));
        let mut task = Task::new("job-1", "Do Things", WorkerKind::General, Action::Execute);
        task.code = Some("echo hi".to_string());

        let prompt = worker.build_prompt(&task);
        assert!(prompt.contains("execute the following task: Do Things. "));
        assert!(prompt.contains("Code to execute or analyze:\necho hi\n"));
    }

    #[test]
    fn test_validate_requires_target_for_scan() {
        let worker = PromptWorker::new(WorkerKind::Scan, Arc::new(RecordingClient::default()));
        let task = Task::new("job-1", "Scan Ports", WorkerKind::Scan, Action::Scan)
            .with_parameter("target", Value::Null);

        let validation = worker.validate_task(&task);
        assert!(!validation.valid);
        assert_eq!(validation.errors.len(), 1);

        let validation = worker.validate_task(&task.with_parameter("target", json!("10.0.0.5")));
        assert!(validation.valid);
    }

    #[test]
    fn test_validate_analyze_without_target() {
        let worker = PromptWorker::new(WorkerKind::Analysis, Arc::new(RecordingClient::default()));
        let task = Task::new("job-1", "Analyze Findings", WorkerKind::Analysis, Action::Analyze);
        assert!(worker.validate_task(&task).valid);
    }

    #[tokio::test]
    async fn test_execute_forwards_schema() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("recon.json"), r#"{"type": "object"}"#).unwrap();

        let client = Arc::new(RecordingClient::default());
        let worker = PromptWorker::new(WorkerKind::Recon, client.clone())
            .with_schemas_dir(dir.path())
            .with_internet_context(false);
        let task = recon_task().with_parameter("schema", json!("recon.json"));

        let result = worker.execute_task(&task).await.unwrap();
        assert_eq!(result["findings"]["dns"][0], json!("ns1.example.com"));

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].response_json_schema, Some(json!({"type": "object"})));
        assert!(!requests[0].add_context_from_internet);
    }

    #[tokio::test]
    async fn test_missing_schema_is_not_fatal() {
        let client = Arc::new(RecordingClient::default());
        let worker = PromptWorker::new(WorkerKind::Recon, client.clone()).with_schemas_dir("/nonexistent");
        let task = recon_task().with_parameter("schema", json!("missing.json"));

        assert!(worker.execute_task(&task).await.is_ok());
        assert!(client.requests.lock().unwrap()[0].response_json_schema.is_none());
    }
}
