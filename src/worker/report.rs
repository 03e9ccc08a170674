//! レポート作成ワーカー
//!
//! # 責務
//!
//! - タスクのパラメーター（最終レポートの場合はジョブの結果と失敗）から構造化レポートを作る
//! - 推論クライアントがあれば、経営層向けの要約文を推論サービスに書かせる
//!
//! 最終レポートでは次のパラメーターを受け取ります:
//! `type`, `scope`, `workflow_id`, `workflow_name`, `job_id`,
//! `results`, `failures`, `completed_tasks`, `failed_tasks`, `duration_ms`。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::provider::{InferenceClient, InferenceRequest};
use crate::workflow::task::WorkerKind;
use super::traits::{Task, Worker, WorkerError};

pub struct ReportWorker {
    client: Option<Arc<dyn InferenceClient>>,
}

impl ReportWorker {
    /// `client` が `None` の場合は構造化レポートのみを作ります
    pub fn new(client: Option<Arc<dyn InferenceClient>>) -> Self {
        Self { client }
    }

    /// 推論サービスを使わずに作れる部分のレポート
    pub fn summarize(&self, task: &Task) -> Value {
        let results = object_param(task, "results");
        let failures = object_param(task, "failures");

        let mut inputs = Map::new();
        for (key, value) in &task.parameters {
            if !REPORT_KEYS.contains(&key.as_str()) {
                inputs.insert(key.clone(), value.clone());
            }
        }

        json!({
            "report_type": task.parameter_text("type").unwrap_or_else(|| "technical".to_string()),
            "scope": task.parameter_text("scope").unwrap_or_else(|| "full".to_string()),
            "task": task.name,
            "job_id": task.job_id,
            "workflow_id": task.parameter("workflow_id"),
            "workflow_name": task.parameter("workflow_name"),
            "generated": Utc::now().to_rfc3339(),
            "summary": {
                "tasks_succeeded": results.len(),
                "tasks_failed": failures.len(),
                "completed_tasks": task.parameter("completed_tasks"),
                "failed_tasks": task.parameter("failed_tasks"),
                "duration_ms": task.parameter("duration_ms"),
            },
            "results": results,
            "failures": failures,
            "inputs": inputs,
        })
    }

    fn narrative_prompt(report: &Value) -> String {
        format!(
            "Generate a concise executive summary for the following {} security assessment.\n\
             Cover the high-level risk assessment, key findings, business impact and \
             prioritized recommendations.\n\nAssessment data:\n{}",
            report["report_type"].as_str().unwrap_or("technical"),
            report
        )
    }
}

/// 構造化レポートの専用パラメーター（`inputs` には含めない）
const REPORT_KEYS: [&str; 10] = [
    "type",
    "scope",
    "workflow_id",
    "workflow_name",
    "job_id",
    "results",
    "failures",
    "completed_tasks",
    "failed_tasks",
    "duration_ms",
];

fn object_param(task: &Task, key: &str) -> Map<String, Value> {
    task.parameter(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

#[async_trait]
impl Worker for ReportWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Report
    }

    fn capabilities(&self) -> Vec<String> {
        ["report", "document", "summarize"]
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    async fn execute_task(&self, task: &Task) -> Result<Value, WorkerError> {
        let mut report = self.summarize(task);

        if let Some(client) = &self.client {
            debug!(task = %task.name, "レポートの要約を生成します");
            let request = InferenceRequest::new(Self::narrative_prompt(&report)).with_internet_context(false);
            let narrative = client.invoke(&request).await?;
            if let Some(object) = report.as_object_mut() {
                object.insert("narrative".to_string(), narrative);
            }
        }

        Ok(report)
    }
}
