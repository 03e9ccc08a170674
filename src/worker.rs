//! ワーカー（タスクの実行者）
//!
//! # 責務
//!
//! - ワーカーの共通インターフェースと、種別をキーにしたレジストリを提供
//! - 推論サービスを使う同梱ワーカーを提供
//!
//! # モジュール構成
//!
//! - [`traits`][]: [`Worker`] トレイト、[`Task`]、[`TaskValidation`]、[`WorkerError`]
//! - [`registry`][]: [`WorkerRegistry`]
//! - [`prompt`][]: 汎用の [`PromptWorker`]
//! - [`report`][]: レポート作成の [`ReportWorker`]

pub mod traits;
pub mod registry;
pub mod prompt;
pub mod report;

// 公開APIの再エクスポート
pub use traits::{Task, TaskValidation, Worker, WorkerError};
pub use registry::WorkerRegistry;
pub use prompt::PromptWorker;
pub use report::ReportWorker;
