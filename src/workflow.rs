//! Markdown ワークフロー定義
//!
//! # 責務
//!
//! - Markdown で書かれたワークフロー記述を構造化モデルに変換
//! - タスク名のキーワードからワーカー種別とアクションを推論
//! - 依存関係の整合性（未知の依存先、循環依存）の検証
//!
//! # モジュール構成
//!
//! - [`task`][]: タスク定義とその分類（[`WorkerKind`], [`Action`]）
//! - [`definition`][]: ワークフローとフェーズ
//! - [`parser`][]: 行指向パーサー
//! - [`validation`][]: 実行前のバリデーション
//!
//! # 使用例
//!
//! ```rust
//! use mdflow::workflow::{validate, WorkflowParser};
//!
//! let text = "# Quick Check\n\n## Discovery\n\n### Resolve Host\nTarget: example.com\n";
//! let workflow = WorkflowParser::new().parse(text);
//!
//! assert!(validate(&workflow).valid);
//! assert_eq!(workflow.tasks().len(), 1);
//! ```

pub mod task;
pub mod definition;
pub mod parser;
pub mod validation;

// 公開APIの再エクスポート
pub use definition::{Phase, Workflow};
pub use parser::{detect_action, detect_agent, WorkflowParser};
pub use task::{Action, ParamValue, TaskDefinition, WorkerKind};
pub use validation::{validate, ValidationReport};
