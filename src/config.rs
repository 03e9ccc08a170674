//! 設定ファイルの読み込み
//!
//! # 責務
//!
//! - TOML 形式の設定ファイルを [`Settings`] に変換
//! - 推論サービス、エンジン、入出力パス、ログの各設定にデフォルト値を提供
//!
//! # モジュール構成
//!
//! - `dto`: TOML デシリアライズ専用の内部構造体（非公開）
//! - [`settings`][]: バリデーション済みのドメインモデル

mod dto;
pub mod settings;

// 公開APIの再エクスポート
pub use settings::{
    EngineSettings, InferenceSettings, LogFormat, LoggingSettings, PathSettings, Settings,
    DEFAULT_ENDPOINT, TOKEN_ENV,
};
