//! TOML デシリアライズ用の DTO (Data Transfer Object)
//!
//! # 責務
//!
//! 設定ファイルからのデータ読み込み専用の構造体を提供します。
//! DTO はバリデーション前の「生データ」を表現し、ドメインモデルとは分離されています。
//! すべての項目は省略可能で、省略された項目は [`Settings`](super::Settings) 側のデフォルト値になります。
//!
//! ## 変換フロー
//!
//! ```text
//! TOML ファイル
//!   ↓ (デシリアライズ)
//! SettingsDto
//!   ↓ (TryFrom でバリデーション)
//! Settings (ドメインモデル)
//! ```

use std::path::PathBuf;

use serde::Deserialize;

/// 設定 DTO
///
/// **注**: この構造体は config モジュール内部の実装詳細です。
/// 外部からは [`Settings`](super::Settings) を使用してください。
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(super) struct SettingsDto {
    pub(super) inference: InferenceDto,
    pub(super) engine: EngineDto,
    pub(super) paths: PathsDto,
    pub(super) logging: LoggingDto,
}

/// `[inference]` セクション
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(super) struct InferenceDto {
    pub(super) endpoint: Option<String>,
    pub(super) token: Option<String>,
    pub(super) app_id: Option<String>,
    pub(super) timeout_secs: Option<u64>,
    pub(super) add_context_from_internet: Option<bool>,
}

/// `[engine]` セクション
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(super) struct EngineDto {
    pub(super) strict_references: Option<bool>,
    pub(super) enforce_timeouts: Option<bool>,
    pub(super) retry_backoff_ms: Option<u64>,
    pub(super) generate_report: Option<bool>,
}

/// `[paths]` セクション
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(super) struct PathsDto {
    pub(super) workflows_dir: Option<PathBuf>,
    pub(super) results_dir: Option<PathBuf>,
    pub(super) schemas_dir: Option<PathBuf>,
}

/// `[logging]` セクション
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(super) struct LoggingDto {
    pub(super) level: Option<String>,
    pub(super) format: Option<String>,
    pub(super) file: Option<PathBuf>,
}
