//! mdflow - Markdown で記述したワークフローを LLM ワーカーで実行するツール
//!
//! # モジュール構成
//!
//! - [`workflow`][]: Markdown ワークフローのパースと検証
//! - [`engine`][]: 依存関係に従ってタスクを実行するオーケストレーター
//! - [`worker`][]: ワーカーの共通インターフェースと同梱ワーカー
//! - [`provider`][]: リモート推論サービスのクライアント
//! - [`config`][]: 設定ファイル
//! - [`archive`][]: タスク結果のファイル保存
//! - [`telemetry`][]: ログ出力の初期化
//! - [`error`][]: エラー型

pub mod archive;
pub mod config;
pub mod engine;
pub mod error;
pub mod provider;
pub mod telemetry;
pub mod worker;
pub mod workflow;
