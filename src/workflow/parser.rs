//! Markdown 形式のワークフロー定義パーサー
//!
//! # 責務
//!
//! 行指向・1パスでワークフロー定義テキストを読み、[`Workflow`] を構築します。
//! パースは寛容で、任意項目が欠けていてもエラーにせずデフォルト値を使います。
//! 失敗するのはファイル自体が読めない場合（[`ParseError`]）のみです。
//!
//! # 文法
//!
//! ```text
//! ---                      ← 1行目のみ。メタデータブロック開始
//! id: basic-recon          ← key: value
//! ---                      ← メタデータブロック終了
//! # Basic Recon            ← 最初の `# ` 見出しが説明文
//! ## Discovery             ← フェーズ開始（開いているタスクを確定）
//! ### Resolve Host         ← タスク開始（`- **Name** ...` も可）
//! Target: example.com      ← タスクのプロパティ行
//! Depends: Other Task
//! ```
//!
//! バッククォート3つで囲まれたフェンスドコードブロックの中身は、
//! 開いているタスクのコードとしてそのまま保持されます。
//!
//! プロパティのキーは大文字小文字を区別せず、次の語彙のみ認識します:
//! Target, Command, Tool, Params/Parameters, Depends/After, Timeout（秒）,
//! Retry, Critical, Continue/ContinueOnFailure, Output, Schema。
//!
//! # 使用例
//!
//! ```rust
//! use mdflow::workflow::parser::WorkflowParser;
//! use mdflow::workflow::task::WorkerKind;
//!
//! let text = "---\nid: basic-recon\n---\n# Basic Recon\n## Discovery\n### Resolve Host\nTarget: example.com\n";
//! let workflow = WorkflowParser::new().parse(text);
//!
//! assert_eq!(workflow.id(), "basic-recon");
//! assert_eq!(workflow.tasks()[0].worker(), WorkerKind::Recon);
//! ```

use std::path::Path;

use tracing::{debug, warn};

use crate::error::ParseError;
use super::definition::{Phase, Workflow};
use super::task::{Action, TaskDefinition, WorkerKind};

/// フェーズ見出しがない場所で開始したタスクのフェーズ名
pub const DEFAULT_PHASE: &str = "default";

const FENCE: &str = "```";

/// ワーカー種別の推論に使うキーワード（照合順）
const AGENT_KEYWORDS: [(WorkerKind, &[&str]); 6] = [
    (WorkerKind::Recon, &["recon", "reconnaissance", "discover"]),
    (WorkerKind::Exploit, &["exploit", "attack", "payload"]),
    (WorkerKind::Scan, &["scan", "enum", "port"]),
    (WorkerKind::Analysis, &["analyze", "analysis", "parse"]),
    (WorkerKind::Report, &["report", "document", "generate"]),
    (WorkerKind::Monitor, &["monitor", "watch", "track"]),
];

/// テキストからワーカー種別を推論する
///
/// 大文字小文字を区別せずキーワードの部分一致で判定し、
/// どれにも一致しなければ [`WorkerKind::General`] を返します。
///
/// ```rust
/// use mdflow::workflow::parser::detect_agent;
/// use mdflow::workflow::task::WorkerKind;
///
/// assert_eq!(detect_agent("Port Scan"), WorkerKind::Scan);
/// assert_eq!(detect_agent("Resolve Host"), WorkerKind::General);
/// ```
pub fn detect_agent(text: &str) -> WorkerKind {
    let lower = text.to_lowercase();
    AGENT_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| lower.contains(keyword)))
        .map(|(kind, _)| *kind)
        .unwrap_or(WorkerKind::General)
}

/// テキストからアクションを推論する（一致しなければ `execute`）
pub fn detect_action(text: &str) -> Action {
    match_action(text).unwrap_or_default()
}

fn match_action(text: &str) -> Option<Action> {
    let lower = text.to_lowercase();
    Action::VOCABULARY
        .into_iter()
        .find(|action| lower.contains(action.as_str()))
}

/// ワークフローパーサー
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkflowParser;

impl WorkflowParser {
    pub fn new() -> Self {
        Self
    }

    /// テキストからワークフローをパースする
    ///
    /// ID と名前はメタデータの `id` / `name`、なければ説明文から決まります。
    pub fn parse(&self, text: &str) -> Workflow {
        self.parse_with_stem(text, None)
    }

    /// ファイルからワークフローをパースする
    ///
    /// メタデータに `id` / `name` がない場合はファイル名（拡張子なし）を使います。
    ///
    /// # エラー
    ///
    /// - [`ParseError::Unreadable`] - ファイルが存在しない、読めない、UTF-8 でない
    pub fn parse_file(&self, path: impl AsRef<Path>) -> Result<Workflow, ParseError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ParseError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let stem = path.file_stem().and_then(|stem| stem.to_str());
        Ok(self.parse_with_stem(&text, stem))
    }

    fn parse_with_stem(&self, text: &str, stem: Option<&str>) -> Workflow {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut state = ParseState::default();

        for (index, raw) in text.lines().enumerate() {
            state.line(index, raw);
        }

        state.finish(stem)
    }
}

/// 1パス分のパース状態
#[derive(Default)]
struct ParseState {
    workflow: Workflow,
    current_phase: Option<String>,
    current_task: Option<TaskDefinition>,
    in_metadata: bool,
    code_block: Option<Vec<String>>,
}

impl ParseState {
    fn line(&mut self, index: usize, raw: &str) {
        let line = raw.trim();

        // コードブロック内は空行も含めてそのまま保持
        if let Some(lines) = self.code_block.as_mut() {
            if line.starts_with(FENCE) {
                let code = lines.join("\n");
                self.code_block = None;
                self.attach_code(code);
            } else {
                lines.push(raw.to_string());
            }
            return;
        }

        if line.is_empty() {
            return;
        }

        if index == 0 && line == "---" {
            self.in_metadata = true;
            return;
        }

        if self.in_metadata {
            if line == "---" {
                self.in_metadata = false;
            } else if let Some((key, value)) = line.split_once(':') {
                let key = key.trim();
                if !key.is_empty() {
                    self.workflow.metadata.insert(key.to_string(), value.trim().to_string());
                }
            }
            return;
        }

        if line.starts_with(FENCE) {
            self.code_block = Some(Vec::new());
            return;
        }

        if let Some(title) = line.strip_prefix("# ") {
            if self.workflow.description.is_empty() {
                self.workflow.description = title.trim().to_string();
            }
            return;
        }

        if let Some(name) = line.strip_prefix("## ") {
            self.flush_task();
            let name = name.trim().to_string();
            let order = self.workflow.phases.len() + 1;
            self.workflow.phases.push(Phase::new(name.clone(), order));
            self.current_phase = Some(name);
            return;
        }

        if let Some(name) = task_heading(line) {
            self.flush_task();
            self.current_task = Some(self.new_task(name));
            return;
        }

        if let Some((key, value)) = split_property(line) {
            self.property(index, &key, value);
        }
    }

    fn new_task(&self, name: String) -> TaskDefinition {
        let phase = self.current_phase.as_deref().unwrap_or(DEFAULT_PHASE);

        let mut worker = detect_agent(&name);
        if worker == WorkerKind::General && phase != DEFAULT_PHASE {
            worker = detect_agent(phase);
        }
        let action = match_action(&name)
            .or_else(|| worker.primary_action())
            .unwrap_or_default();

        debug!(task = %name, phase, %worker, %action, "タスクを検出しました");
        TaskDefinition::new(name, phase, worker, action)
    }

    fn property(&mut self, index: usize, key: &str, value: String) {
        let Some(task) = self.current_task.as_mut() else {
            // タスク外のプロパティ行は無視し、警告として記録する
            if is_known_property(key) {
                let message = format!(
                    "{}行目: タスクの外にあるプロパティ '{}' を無視しました",
                    index + 1,
                    key
                );
                warn!(line = index + 1, key, "タスクの外にあるプロパティ行を無視しました");
                self.workflow.warnings.push(message);
            }
            return;
        };

        match key {
            "target" => task.set_parameter("target", &value),
            "command" => task.set_parameter("command", &value),
            "tool" => task.set_parameter("tool", &value),
            "params" | "parameters" => task.set_parameter("options", &value),
            "schema" => task.set_parameter("schema", &value),
            "depends" | "after" => task.add_dependencies(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string),
            ),
            "timeout" => match leading_number(&value) {
                // 0秒は無効値としてデフォルトを維持
                Some(0) => {
                    warn!(task = task.name(), "Timeout: 0 を無視しました");
                    self.workflow.warnings.push(format!(
                        "{}行目: タスク '{}' の Timeout: 0 を無視し、デフォルト値を使います",
                        index + 1,
                        task.name()
                    ));
                }
                Some(secs) => task.set_timeout_ms(secs.saturating_mul(1000)),
                None => warn!(task = task.name(), value = %value, "Timeout の値を解釈できません"),
            },
            "retry" | "retries" => match leading_number(&value) {
                Some(retry) => task.set_retry(u32::try_from(retry).unwrap_or(u32::MAX)),
                None => warn!(task = task.name(), value = %value, "Retry の値を解釈できません"),
            },
            "critical" => task.set_critical(value.eq_ignore_ascii_case("true")),
            "continue" | "continueonfailure" | "continue on failure" => {
                task.set_continue_on_failure(value.eq_ignore_ascii_case("true"))
            }
            "output" => task.set_output(value),
            _ => {}
        }
    }

    fn attach_code(&mut self, code: String) {
        match self.current_task.as_mut() {
            Some(task) => {
                let combined = match task.code() {
                    Some(existing) => format!("{}\n{}", existing, code),
                    None => code,
                };
                task.set_code(combined);
            }
            None => debug!("タスク外のコードブロックを無視しました"),
        }
    }

    fn flush_task(&mut self) {
        if let Some(task) = self.current_task.take() {
            self.workflow.push_task(task);
        }
    }

    fn finish(mut self, stem: Option<&str>) -> Workflow {
        if let Some(lines) = self.code_block.take() {
            warn!("閉じられていないコードブロックがあります");
            self.workflow
                .warnings
                .push("閉じられていないコードブロックをファイル末尾で閉じました".to_string());
            self.attach_code(lines.join("\n"));
        }
        self.flush_task();

        let mut workflow = self.workflow;
        let stem = stem.filter(|stem| !stem.is_empty());

        workflow.id = match workflow.metadata.get("id") {
            Some(id) if !id.is_empty() => id.clone(),
            _ => slugify(stem.unwrap_or(&workflow.description)),
        };
        workflow.name = match workflow.metadata.get("name") {
            Some(name) if !name.is_empty() => name.clone(),
            _ => stem.map(str::to_string).unwrap_or_else(|| workflow.description.clone()),
        };

        workflow
    }
}

/// `### Name` または `- **Name** ...` からタスク名を取り出す
///
/// 太字部分がコロンで終わる場合（`- **Target:** x`）はプロパティ行として扱います。
fn task_heading(line: &str) -> Option<String> {
    if let Some(name) = line.strip_prefix("### ") {
        return Some(name.trim().to_string());
    }

    let rest = line.strip_prefix("- **")?;
    let name = match rest.find("**") {
        Some(end) => &rest[..end],
        None => rest,
    };
    let name = name.trim();
    if name.is_empty() || name.ends_with(':') {
        return None;
    }
    Some(name.to_string())
}

/// `Key: value` を (小文字のキー, 値) に分解する
///
/// 行頭の箇条書き記号とキーを囲む `**` は無視し、
/// 値は前後の空白と、先頭・末尾の引用符を1つずつ取り除きます。
fn split_property(line: &str) -> Option<(String, String)> {
    let body = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .unwrap_or(line)
        .trim_start();
    let (key, value) = body.split_once(':')?;

    let key = key.trim().trim_matches('*').trim().to_lowercase();
    if key.is_empty() {
        return None;
    }

    let value = value.trim().trim_start_matches("**").trim();
    Some((key, strip_quotes(value).to_string()))
}

fn strip_quotes(value: &str) -> &str {
    let value = value
        .strip_prefix(['"', '\''])
        .unwrap_or(value);
    value.strip_suffix(['"', '\'']).unwrap_or(value)
}

fn is_known_property(key: &str) -> bool {
    matches!(
        key,
        "target"
            | "command"
            | "tool"
            | "params"
            | "parameters"
            | "depends"
            | "after"
            | "timeout"
            | "retry"
            | "retries"
            | "critical"
            | "continue"
            | "continueonfailure"
            | "continue on failure"
            | "output"
            | "schema"
    )
}

/// 先頭の数字列を読む（`"30s"` → 30）
fn leading_number(value: &str) -> Option<u64> {
    let digits: String = value.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::task::{ParamValue, DEFAULT_TIMEOUT_MS};

    const BASIC_RECON: &str = "---\nid: basic-recon\n---\n# Basic Recon\n## Discovery\n### Resolve Host\nTarget: example.com\n";

    #[test]
    fn test_parse_basic_recon_example() {
        let workflow = WorkflowParser::new().parse(BASIC_RECON);

        assert_eq!(workflow.metadata().len(), 1);
        assert_eq!(workflow.metadata().get("id").map(String::as_str), Some("basic-recon"));
        assert_eq!(workflow.id(), "basic-recon");
        assert_eq!(workflow.description(), "Basic Recon");

        assert_eq!(workflow.phases().len(), 1);
        assert_eq!(workflow.phases()[0].name, "Discovery");
        assert_eq!(workflow.phases()[0].order, 1);
        assert_eq!(workflow.phases()[0].tasks, vec!["Resolve Host"]);

        assert_eq!(workflow.tasks().len(), 1);
        let task = &workflow.tasks()[0];
        assert_eq!(task.name(), "Resolve Host");
        assert_eq!(task.phase(), "Discovery");
        assert_eq!(task.worker(), WorkerKind::Recon);
        assert_eq!(task.action(), Action::Recon);
        assert_eq!(task.parameters().len(), 1);
        assert_eq!(
            task.parameters().get("target"),
            Some(&ParamValue::Literal("example.com".to_string()))
        );
    }

    #[test]
    fn test_detect_agent_keyword_groups() {
        assert_eq!(detect_agent("Subdomain Discovery"), WorkerKind::Recon);
        assert_eq!(detect_agent("Build Payload"), WorkerKind::Exploit);
        assert_eq!(detect_agent("Enumerate Services"), WorkerKind::Scan);
        assert_eq!(detect_agent("Parse Output"), WorkerKind::Analysis);
        assert_eq!(detect_agent("Generate Summary"), WorkerKind::Report);
        assert_eq!(detect_agent("WATCH Logs"), WorkerKind::Monitor);
        assert_eq!(detect_agent("Resolve Host"), WorkerKind::General);
    }

    #[test]
    fn test_detect_action_vocabulary() {
        assert_eq!(detect_action("Initial Recon"), Action::Recon);
        assert_eq!(detect_action("Validate Findings"), Action::Validate);
        assert_eq!(detect_action("Enumerate Users"), Action::Enumerate);
        assert_eq!(detect_action("Resolve Host"), Action::Execute);
    }

    #[test]
    fn test_task_properties() {
        let text = r#"# Props
## Scanning
### Port Scan
Target: "10.0.0.5"
Tool: nmap
Command: nmap -sV 10.0.0.5
Params: -p 1-1000
Timeout: 60
Retry: 2
Critical: TRUE
Output: ports.json
Schema: ports.schema.json
### Analyze Findings
After: Port Scan, Other
depends: Third
Continue: true
"#;
        let workflow = WorkflowParser::new().parse(text);
        let scan = workflow.task("Port Scan").unwrap();

        assert_eq!(scan.parameters().get("target"), Some(&ParamValue::Literal("10.0.0.5".to_string())));
        assert_eq!(scan.parameters().get("tool"), Some(&ParamValue::Literal("nmap".to_string())));
        assert_eq!(
            scan.parameters().get("command"),
            Some(&ParamValue::Literal("nmap -sV 10.0.0.5".to_string()))
        );
        assert_eq!(scan.parameters().get("options"), Some(&ParamValue::Literal("-p 1-1000".to_string())));
        assert_eq!(
            scan.parameters().get("schema"),
            Some(&ParamValue::Literal("ports.schema.json".to_string()))
        );
        assert_eq!(scan.timeout_ms(), 60_000);
        assert_eq!(scan.retry(), 2);
        assert!(scan.is_critical());
        assert_eq!(scan.output(), Some("ports.json"));

        let analyze = workflow.task("Analyze Findings").unwrap();
        let deps: Vec<&str> = analyze.dependencies().iter().map(String::as_str).collect();
        assert_eq!(deps, vec!["Other", "Port Scan", "Third"]);
        assert!(analyze.continue_on_failure());
        assert_eq!(analyze.worker(), WorkerKind::Analysis);
    }

    #[test]
    fn test_zero_timeout_keeps_default_with_warning() {
        let text = "# Zero\n### Slow Scan\nTimeout: 0\n";
        let workflow = WorkflowParser::new().parse(text);

        assert_eq!(workflow.tasks()[0].timeout_ms(), DEFAULT_TIMEOUT_MS);
        assert_eq!(workflow.warnings().len(), 1);
        assert!(workflow.warnings()[0].contains("Timeout: 0"));
    }

    #[test]
    fn test_value_keeps_text_after_first_colon() {
        let text = "### Fetch\nTarget: http://example.com:8080/path\n";
        let workflow = WorkflowParser::new().parse(text);
        assert_eq!(
            workflow.tasks()[0].parameters().get("target"),
            Some(&ParamValue::Literal("http://example.com:8080/path".to_string()))
        );
    }

    #[test]
    fn test_reference_parameters() {
        let text = "### Scan Host\nTarget: ${job.target}\nParams: '${Recon Host.findings.dns}'\n";
        let workflow = WorkflowParser::new().parse(text);
        let params = workflow.tasks()[0].parameters();

        assert_eq!(params.get("target"), Some(&ParamValue::Reference("job.target".to_string())));
        assert_eq!(
            params.get("options"),
            Some(&ParamValue::Reference("Recon Host.findings.dns".to_string()))
        );
    }

    #[test]
    fn test_bullet_tasks_and_phase_flush() {
        let text = "# Bullets\n## One\n- **Recon Target** gather info\nTarget: a\n## Two\n- **Scan Target**: ports\n- **Target:** ignored as task\n";
        let workflow = WorkflowParser::new().parse(text);

        assert_eq!(workflow.tasks().len(), 2);
        assert_eq!(workflow.phases()[0].tasks, vec!["Recon Target"]);
        assert_eq!(workflow.phases()[1].tasks, vec!["Scan Target"]);
        assert_eq!(workflow.tasks()[1].phase(), "Two");
        assert_eq!(
            workflow.tasks()[1].parameters().get("target"),
            Some(&ParamValue::Literal("ignored as task".to_string()))
        );
    }

    #[test]
    fn test_code_block_captured_verbatim() {
        let text = "### Run Script\n```bash\n  echo one\n\necho two\n```\nTarget: x\n";
        let workflow = WorkflowParser::new().parse(text);
        let task = &workflow.tasks()[0];

        assert_eq!(task.code(), Some("  echo one\n\necho two"));
        assert_eq!(task.parameters().get("target"), Some(&ParamValue::Literal("x".to_string())));
    }

    #[test]
    fn test_code_block_lines_are_not_parsed() {
        let text = "### Script\n```\n### Not A Task\nTarget: nope\n```\n";
        let workflow = WorkflowParser::new().parse(text);

        assert_eq!(workflow.tasks().len(), 1);
        assert!(workflow.tasks()[0].parameters().is_empty());
    }

    #[test]
    fn test_orphan_property_is_ignored_with_warning() {
        let text = "# Orphans\nTarget: lost.example.com\nSome prose: not a property\n### Recon Host\n";
        let workflow = WorkflowParser::new().parse(text);

        assert!(workflow.tasks()[0].parameters().is_empty());
        assert_eq!(workflow.warnings().len(), 1);
        assert!(workflow.warnings()[0].contains("Target") || workflow.warnings()[0].contains("target"));
    }

    #[test]
    fn test_metadata_only_on_first_line() {
        let text = "# Title\n---\nid: nope\n---\n### Task\n";
        let workflow = WorkflowParser::new().parse(text);
        assert!(workflow.metadata().is_empty());
        assert_eq!(workflow.id(), "title");
    }

    #[test]
    fn test_identity_defaults() {
        let workflow = WorkflowParser::new().parse("# Web App Recon!\n### Recon\n");
        assert_eq!(workflow.id(), "web-app-recon");
        assert_eq!(workflow.name(), "Web App Recon!");

        let workflow = WorkflowParser::new().parse("---\nid: x\nname: Pretty Name\n---\n### Recon\n");
        assert_eq!(workflow.id(), "x");
        assert_eq!(workflow.name(), "Pretty Name");
    }

    #[test]
    fn test_task_without_phase_uses_default() {
        let workflow = WorkflowParser::new().parse("### Lonely Task\n");
        assert_eq!(workflow.tasks()[0].phase(), DEFAULT_PHASE);
        assert_eq!(workflow.tasks()[0].worker(), WorkerKind::General);
        assert_eq!(workflow.tasks()[0].action(), Action::Execute);
    }

    #[test]
    fn test_parse_file_missing() {
        let result = WorkflowParser::new().parse_file("/nonexistent/workflow-xyz.md");
        assert!(matches!(result, Err(ParseError::Unreadable { .. })));
    }

    #[test]
    fn test_helpers() {
        assert_eq!(strip_quotes("\"quoted\""), "quoted");
        assert_eq!(strip_quotes("'half"), "half");
        assert_eq!(leading_number("30s"), Some(30));
        assert_eq!(leading_number("abc"), None);
        assert_eq!(slugify("  Hello, World  "), "hello-world");
    }
}
