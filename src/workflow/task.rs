//! ワークフロータスクの定義
//!
//! # 責務
//!
//! Workflow を構成する Task の定義体を提供するモジュール。
//! アプリケーションに対して、[`TaskDefinition`] と、その分類に使う
//! [`WorkerKind`] / [`Action`] を提供する。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// タイムアウトのデフォルト値（5分）
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// タスクを担当するワーカーの種別
///
/// タスク名のキーワードから推論されます（[`crate::workflow::parser::detect_agent`]）。
/// 閉じた列挙型なので、レジストリの網羅性をテストで検査できます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    /// 偵察・情報収集
    Recon,
    /// エクスプロイト
    Exploit,
    /// スキャン・列挙
    Scan,
    /// 解析
    Analysis,
    /// レポート作成
    Report,
    /// 監視
    Monitor,
    /// どのキーワードにも一致しない汎用タスク
    General,
}

impl WorkerKind {
    /// すべてのワーカー種別
    pub const ALL: [WorkerKind; 7] = [
        WorkerKind::Recon,
        WorkerKind::Exploit,
        WorkerKind::Scan,
        WorkerKind::Analysis,
        WorkerKind::Report,
        WorkerKind::Monitor,
        WorkerKind::General,
    ];

    /// 小文字の識別子（結果ファイル名などに使用）
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Recon => "recon",
            WorkerKind::Exploit => "exploit",
            WorkerKind::Scan => "scan",
            WorkerKind::Analysis => "analysis",
            WorkerKind::Report => "report",
            WorkerKind::Monitor => "monitor",
            WorkerKind::General => "general",
        }
    }

    /// タスク名からアクションを推論できなかった場合に使う主アクション
    ///
    /// [`WorkerKind::General`] は主アクションを持ちません。
    pub fn primary_action(&self) -> Option<Action> {
        match self {
            WorkerKind::Recon => Some(Action::Recon),
            WorkerKind::Exploit => Some(Action::Exploit),
            WorkerKind::Scan => Some(Action::Scan),
            WorkerKind::Analysis => Some(Action::Analyze),
            WorkerKind::Report => Some(Action::Report),
            WorkerKind::Monitor => Some(Action::Monitor),
            WorkerKind::General => None,
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// タスクのアクション（閉じた語彙）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Recon,
    Exploit,
    Enumerate,
    Analyze,
    Scan,
    Test,
    Validate,
    Report,
    #[default]
    Execute,
    Monitor,
}

impl Action {
    /// 推論時の照合順
    pub const VOCABULARY: [Action; 10] = [
        Action::Recon,
        Action::Exploit,
        Action::Enumerate,
        Action::Analyze,
        Action::Scan,
        Action::Test,
        Action::Validate,
        Action::Report,
        Action::Execute,
        Action::Monitor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Recon => "recon",
            Action::Exploit => "exploit",
            Action::Enumerate => "enumerate",
            Action::Analyze => "analyze",
            Action::Scan => "scan",
            Action::Test => "test",
            Action::Validate => "validate",
            Action::Report => "report",
            Action::Execute => "execute",
            Action::Monitor => "monitor",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// パラメーター値
///
/// ソース上で値全体が `${expression}` の形をしていれば参照、それ以外はリテラルです。
/// 参照はディスパッチ直前に解決されます（[`crate::engine::context`]）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ParamValue {
    Literal(String),
    Reference(String),
}

impl ParamValue {
    /// 生の文字列から値を作る
    ///
    /// ```rust
    /// use mdflow::workflow::task::ParamValue;
    ///
    /// assert_eq!(ParamValue::parse("${job.target}"), ParamValue::Reference("job.target".to_string()));
    /// assert_eq!(ParamValue::parse("example.com"), ParamValue::Literal("example.com".to_string()));
    /// ```
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
            Some(expression) => ParamValue::Reference(expression.trim().to_string()),
            None => ParamValue::Literal(raw.to_string()),
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, ParamValue::Reference(_))
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Literal(value) => f.write_str(value),
            ParamValue::Reference(expression) => write!(f, "${{{}}}", expression),
        }
    }
}

/// タスク定義（ドメインモデル）
///
/// ワークフロー内の1つの処理単位を表します。
/// 実行時には参照が解決され、[`crate::worker::Task`] としてワーカーに渡されます。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDefinition {
    name: String,
    phase: String,
    worker: WorkerKind,
    action: Action,
    parameters: BTreeMap<String, ParamValue>,
    dependencies: BTreeSet<String>,
    timeout_ms: u64,
    retry: u32,
    critical: bool,
    continue_on_failure: bool,
    output: Option<String>,
    code: Option<String>,
}

impl TaskDefinition {
    /// デフォルト値でタスクを生成
    pub fn new(name: impl Into<String>, phase: impl Into<String>, worker: WorkerKind, action: Action) -> Self {
        Self {
            name: name.into(),
            phase: phase.into(),
            worker,
            action,
            parameters: BTreeMap::new(),
            dependencies: BTreeSet::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry: 0,
            critical: false,
            continue_on_failure: false,
            output: None,
            code: None,
        }
    }

    /// パラメーターを追加（ビルダー）
    pub fn with_parameter(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn worker(&self) -> WorkerKind {
        self.worker
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn parameters(&self) -> &BTreeMap<String, ParamValue> {
        &self.parameters
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    /// 1回の試行あたりのタイムアウト
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// 失敗時の再試行回数（初回を含まない）
    pub fn retry(&self) -> u32 {
        self.retry
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    /// 失敗してもジョブを継続するか
    ///
    /// `Critical: true` のタスクは `Continue` の指定に関わらず継続しません。
    pub fn continue_on_failure(&self) -> bool {
        self.continue_on_failure && !self.critical
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// フェンスドコードブロックから取り込んだリテラル
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub(crate) fn set_parameter(&mut self, key: &str, value: &str) {
        self.parameters.insert(key.to_string(), ParamValue::parse(value));
    }

    pub(crate) fn add_dependencies(&mut self, names: impl IntoIterator<Item = String>) {
        self.dependencies.extend(names);
    }

    pub(crate) fn set_timeout_ms(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
    }

    pub(crate) fn set_retry(&mut self, retry: u32) {
        self.retry = retry;
    }

    pub(crate) fn set_critical(&mut self, critical: bool) {
        self.critical = critical;
    }

    pub(crate) fn set_continue_on_failure(&mut self, continue_on_failure: bool) {
        self.continue_on_failure = continue_on_failure;
    }

    pub(crate) fn set_output(&mut self, output: String) {
        self.output = Some(output);
    }

    pub(crate) fn set_code(&mut self, code: String) {
        self.code = Some(code);
    }
}
