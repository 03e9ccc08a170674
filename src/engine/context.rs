//! パラメーター参照の解決
//!
//! # 責務
//!
//! ディスパッチ直前に、タスクのパラメーターに含まれる `${expression}` 参照を
//! ジョブの入力パラメーターと、完了済みタスクの結果から解決します。
//!
//! # 参照の形式
//!
//! - `job.<name>`: ジョブの入力パラメーター（`job.<name>.<path>` で入れ子も参照可）
//! - `<task>.<path>`: タスク結果の入れ子の値（オブジェクトはキー、配列は添字で辿る）
//! - `<task>`: タスク結果全体
//!
//! 途中のキーが見つからない場合は解決できないものとして扱います。
//!
//! # 使用例
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use mdflow::engine::context::ExecutionContext;
//! use serde_json::json;
//!
//! let parameters = BTreeMap::from([("target".to_string(), json!("10.0.0.5"))]);
//! let results = BTreeMap::from([("reconTask".to_string(), json!({"findings": {"dns": ["ns1"]}}))]);
//! let ctx = ExecutionContext::new(&parameters, &results);
//!
//! assert_eq!(ctx.resolve("job.target"), Some(json!("10.0.0.5")));
//! assert_eq!(ctx.resolve("reconTask.findings.dns.0"), Some(json!("ns1")));
//! assert_eq!(ctx.resolve("reconTask.findings.whois"), None);
//! ```

use std::collections::BTreeMap;

use serde_json::Value;

use crate::workflow::{ParamValue, TaskDefinition};

/// 参照解決のコンテキスト
///
/// ラウンド開始時点のジョブのスナップショットを借用します。
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    parameters: &'a BTreeMap<String, Value>,
    results: &'a BTreeMap<String, Value>,
}

/// パラメーター解決の結果
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedParameters {
    /// 解決済みの値（未解決の参照は `Value::Null`）
    pub values: BTreeMap<String, Value>,
    /// 解決できなかった参照式
    pub unresolved: Vec<String>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(parameters: &'a BTreeMap<String, Value>, results: &'a BTreeMap<String, Value>) -> Self {
        Self { parameters, results }
    }

    /// 参照式を解決する
    pub fn resolve(&self, expression: &str) -> Option<Value> {
        let expression = expression.trim();

        if let Some(rest) = expression.strip_prefix("job.") {
            return lookup_prefixed(self.parameters, rest);
        }

        lookup_prefixed(self.results, expression)
    }

    /// タスク定義のすべてのパラメーターを解決する
    pub fn resolve_parameters(&self, task: &TaskDefinition) -> ResolvedParameters {
        let mut resolved = ResolvedParameters::default();

        for (key, value) in task.parameters() {
            let value = match value {
                ParamValue::Literal(text) => Value::String(text.clone()),
                ParamValue::Reference(expression) => match self.resolve(expression) {
                    Some(value) => value,
                    None => {
                        resolved.unresolved.push(expression.clone());
                        Value::Null
                    }
                },
            };
            resolved.values.insert(key.clone(), value);
        }

        resolved
    }
}

/// `<key>.<path>` を解決する
///
/// キー自体が `.` を含む場合に備え、最も長く一致するキーを優先します。
fn lookup_prefixed(map: &BTreeMap<String, Value>, expression: &str) -> Option<Value> {
    if let Some(value) = map.get(expression) {
        return Some(value.clone());
    }

    expression
        .rmatch_indices('.')
        .find_map(|(index, _)| {
            let root = map.get(&expression[..index])?;
            Some(lookup_path(root, &expression[index + 1..]))
        })
        .flatten()
}

/// ドット区切りのパスで入れ子の値を辿る
fn lookup_path(root: &Value, path: &str) -> Option<Value> {
    path.split('.')
        .try_fold(root, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
        .cloned()
}
