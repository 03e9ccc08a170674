//! ワークフロー定義（ドメインモデル）
//!
//! # 責務
//!
//! パース済みのワークフロー全体を表す [`Workflow`] と、
//! 表示用のグループである [`Phase`] を提供します。
//! フェーズは実行順序に影響しません（順序は依存関係のみで決まります）。

use std::collections::BTreeMap;

use serde::Serialize;

use super::task::TaskDefinition;

/// フェーズ（タスクの表示上のグループ）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Phase {
    /// フェーズ名（`## Name` 見出し）
    pub name: String,
    /// 1始まりの出現順
    pub order: usize,
    /// このフェーズに属するタスク名（出現順）
    pub tasks: Vec<String>,
}

impl Phase {
    pub fn new(name: impl Into<String>, order: usize) -> Self {
        Self {
            name: name.into(),
            order,
            tasks: Vec::new(),
        }
    }
}

/// ワークフロー定義
///
/// [`WorkflowParser`](super::parser::WorkflowParser) が生成し、
/// [`validate`](super::validation::validate) で検証された後に
/// [`Orchestrator`](crate::engine::Orchestrator) へ登録されます。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Workflow {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) metadata: BTreeMap<String, String>,
    pub(crate) phases: Vec<Phase>,
    pub(crate) tasks: Vec<TaskDefinition>,
    pub(crate) warnings: Vec<String>,
}

impl Workflow {
    /// 空のワークフローを生成
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            metadata: BTreeMap::new(),
            phases: Vec::new(),
            tasks: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// オーケストレーターでの登録キー
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 表示名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 最初の `# ` 見出しの内容
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    /// パース時に検出した警告（タスク外のプロパティ行など）
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// 名前でタスクを検索
    pub fn task(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|task| task.name() == name)
    }

    /// タスクを追加し、所属フェーズにも名前を登録する
    pub fn push_task(&mut self, task: TaskDefinition) {
        if let Some(phase) = self.phases.iter_mut().rev().find(|phase| phase.name == task.phase()) {
            phase.tasks.push(task.name().to_string());
        }
        self.tasks.push(task);
    }

    /// JSON形式でシリアライズ
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::task::{Action, WorkerKind};

    #[test]
    fn test_push_task_registers_in_phase() {
        let mut workflow = Workflow::new("wf", "wf");
        workflow.phases.push(Phase::new("Discovery", 1));

        workflow.push_task(TaskDefinition::new("Resolve Host", "Discovery", WorkerKind::Recon, Action::Recon));
        workflow.push_task(TaskDefinition::new("Orphan", "default", WorkerKind::General, Action::Execute));

        assert_eq!(workflow.tasks().len(), 2);
        assert_eq!(workflow.phases()[0].tasks, vec!["Resolve Host"]);
        assert!(workflow.task("Orphan").is_some());
        assert!(workflow.task("missing").is_none());
    }
}
