//! ワークフロー実行エンジン
//!
//! # 責務
//!
//! - 登録済みワークフローをジョブとして実行
//! - 依存関係に従ったラウンド単位の並行ディスパッチ
//! - タスク間のパラメーター参照（`${...}`）の解決
//! - タイムアウトとリトライの制御
//! - ジョブの状態管理と進行イベントの送信
//!
//! # モジュール構成
//!
//! - [`executor`][]: オーケストレーター本体
//! - [`context`][]: 参照解決のコンテキスト
//! - [`event`][]: 進行イベント
//! - [`result`][]: ジョブと実行エラーの型

pub mod result;
pub mod context;
pub mod event;
pub mod executor;

// 公開APIの再エクスポート
pub use result::{ExecutionError, Job, JobStatus, TaskFailure};
pub use context::{ExecutionContext, ResolvedParameters};
pub use event::JobEvent;
pub use executor::{Orchestrator, WorkerStatus, WorkflowFile, FINAL_REPORT_TASK};
