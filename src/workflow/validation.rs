//! ワークフロー定義のバリデーション
//!
//! パース済みの [`Workflow`] が実行可能かを検査します。
//!
//! - 名前が空でないこと
//! - タスクが1つ以上あること
//! - タスク名が重複していないこと
//! - 依存先がすべて同じワークフロー内のタスクであること
//! - 依存関係グラフに循環がないこと（再帰スタック付きの深さ優先探索）

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::error::WorkflowError;
use super::definition::Workflow;

/// バリデーション結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// エラーがあれば [`WorkflowError::Validation`] に変換する
    pub fn into_result(self) -> Result<(), WorkflowError> {
        if self.valid {
            Ok(())
        } else {
            Err(WorkflowError::Validation(self.errors))
        }
    }
}

/// ワークフローを検証する
///
/// # 例
///
/// ```rust
/// use mdflow::workflow::parser::WorkflowParser;
/// use mdflow::workflow::validation::validate;
///
/// let workflow = WorkflowParser::new().parse("# Loop\n### A\nDepends: B\n### B\nDepends: A\n");
/// let report = validate(&workflow);
///
/// assert!(!report.valid);
/// ```
pub fn validate(workflow: &Workflow) -> ValidationReport {
    let mut errors = Vec::new();

    if workflow.name().trim().is_empty() {
        errors.push("ワークフロー名は必須です".to_string());
    }
    if workflow.tasks().is_empty() {
        errors.push("ワークフローには1つ以上のタスクが必要です".to_string());
    }

    let mut names = HashSet::new();
    for task in workflow.tasks() {
        if !names.insert(task.name()) {
            errors.push(format!("タスク名 \"{}\" が重複しています", task.name()));
        }
    }

    for task in workflow.tasks() {
        for dependency in task.dependencies() {
            if !names.contains(dependency.as_str()) {
                errors.push(format!(
                    "タスク \"{}\" が未知のタスク \"{}\" に依存しています",
                    task.name(),
                    dependency
                ));
            }
        }
    }

    if let Some(task) = find_cycle(workflow) {
        errors.push(format!("循環依存が検出されました（タスク \"{}\"）", task));
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings: workflow.warnings().to_vec(),
    }
}

/// 循環依存を探し、見つかった場合は循環上のタスク名を返す
fn find_cycle(workflow: &Workflow) -> Option<String> {
    let graph: HashMap<&str, Vec<&str>> = workflow
        .tasks()
        .iter()
        .map(|task| {
            (
                task.name(),
                task.dependencies().iter().map(String::as_str).collect(),
            )
        })
        .collect();

    let mut visited = HashSet::new();
    let mut stack = HashSet::new();

    workflow
        .tasks()
        .iter()
        .find_map(|task| cycle_dfs(task.name(), &graph, &mut visited, &mut stack))
}

fn cycle_dfs<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    stack: &mut HashSet<&'a str>,
) -> Option<String> {
    if stack.contains(node) {
        return Some(node.to_string());
    }
    if visited.contains(node) {
        return None;
    }

    visited.insert(node);
    stack.insert(node);

    // 未知の依存先はグラフに存在しないため辿らない
    if let Some(dependencies) = graph.get(node) {
        for dependency in dependencies {
            if let Some(found) = cycle_dfs(dependency, graph, visited, stack) {
                return Some(found);
            }
        }
    }

    stack.remove(node);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::parser::WorkflowParser;

    fn parse(text: &str) -> Workflow {
        WorkflowParser::new().parse(text)
    }

    #[test]
    fn test_valid_workflow() {
        let workflow = parse("# Ok\n### Recon Host\n### Scan Host\nDepends: Recon Host\n");
        let report = validate(&workflow);

        assert!(report.valid, "{:?}", report.errors);
        assert!(report.errors.is_empty());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_empty_name_and_no_tasks() {
        let workflow = parse("");
        let report = validate(&workflow);

        assert!(!report.valid);
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_unknown_dependency() {
        let workflow = parse("# Deps\n### Scan Host\nDepends: Ghost\n");
        let report = validate(&workflow);

        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("Ghost"));
    }

    #[test]
    fn test_two_node_cycle() {
        let workflow = parse("# Loop\n### A\nDepends: B\n### B\nDepends: A\n");
        let report = validate(&workflow);

        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("循環依存")));
        assert!(matches!(report.into_result(), Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn test_self_cycle() {
        let workflow = parse("# Self\n### A\nDepends: A\n");
        assert!(!validate(&workflow).valid);
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let workflow = parse(
            "# Diamond\n### A\n### B\nDepends: A\n### C\nDepends: A\n### D\nDepends: B, C\n",
        );
        assert!(validate(&workflow).valid);
    }

    #[test]
    fn test_duplicate_task_names() {
        let workflow = parse("# Dup\n### A\n### A\n");
        let report = validate(&workflow);

        assert!(!report.valid);
        assert!(report.errors[0].contains("重複"));
    }

    #[test]
    fn test_parse_warnings_are_reported() {
        let workflow = parse("# Warn\nTarget: nowhere\n### A\n");
        let report = validate(&workflow);

        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
    }
}
