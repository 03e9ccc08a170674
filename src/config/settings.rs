//! アプリケーション設定（ドメインモデル）
//!
//! # 責務
//!
//! TOML 形式の設定ファイルを読み込み、バリデーション済みの [`Settings`] として提供します。
//! ファイルがない場合や項目が省略された場合はデフォルト値を使います。
//!
//! ## 使用例
//!
//! ```toml
//! [inference]
//! endpoint = "https://llm.example.com/api/invoke"
//! timeout_secs = 120
//!
//! [engine]
//! strict_references = false
//! retry_backoff_ms = 1000
//!
//! [paths]
//! results_dir = "./results"
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```
//!
//! APIトークンは設定ファイルの `inference.token` よりも
//! 環境変数 [`TOKEN_ENV`] が優先されます（[`Settings::load`]）。

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::Level;

use crate::error::ConfigError;
use super::dto::{EngineDto, InferenceDto, LoggingDto, PathsDto, SettingsDto};

/// APIトークンを上書きする環境変数
pub const TOKEN_ENV: &str = "MDFLOW_TOKEN";

/// 推論サービスのデフォルトエンドポイント
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8080/api/invoke";

const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;

/// アプリケーション設定
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    inference: InferenceSettings,
    engine: EngineSettings,
    paths: PathSettings,
    logging: LoggingSettings,
}

/// `[inference]` 推論サービスへの接続設定
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceSettings {
    pub endpoint: String,
    pub token: Option<String>,
    /// `X-App-Id` ヘッダーとして送る値
    pub app_id: Option<String>,
    pub timeout: Duration,
    pub add_context_from_internet: bool,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: None,
            app_id: None,
            timeout: Duration::from_secs(DEFAULT_INFERENCE_TIMEOUT_SECS),
            add_context_from_internet: true,
        }
    }
}

/// `[engine]` オーケストレーターの動作設定
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// 解決できない参照をエラーにする（既定では null として扱い警告のみ）
    pub strict_references: bool,
    /// タスクごとのタイムアウトを適用する
    pub enforce_timeouts: bool,
    /// 再試行までの待機時間
    pub retry_backoff: Duration,
    /// ジョブ完了後に最終レポートを生成する
    pub generate_report: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            strict_references: false,
            enforce_timeouts: true,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            generate_report: true,
        }
    }
}

/// `[paths]` 入出力ディレクトリ
#[derive(Debug, Clone, PartialEq)]
pub struct PathSettings {
    pub workflows_dir: PathBuf,
    pub results_dir: PathBuf,
    pub schemas_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            workflows_dir: PathBuf::from("./workflows"),
            results_dir: PathBuf::from("./results"),
            schemas_dir: PathBuf::from("./schemas"),
        }
    }
}

/// ログの出力形式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Validation(format!(
                "logging.format は \"pretty\" または \"json\" である必要があります: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => f.write_str("pretty"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// `[logging]` ログ出力設定
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: Level,
    pub format: LogFormat,
    /// 指定された場合は標準エラーではなくこのファイルに出力する
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

impl Settings {
    /// 設定を読み込み、環境変数によるトークンの上書きを適用する
    ///
    /// `path` が `None` の場合はデフォルト値から開始します。
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(settings.with_token_override(std::env::var(TOKEN_ENV).ok()))
    }

    /// TOML ファイルから設定を読み込む
    ///
    /// # 処理フロー
    ///
    /// 1. ファイル読み込み
    /// 2. TOML デシリアライズ → [`SettingsDto`]
    /// 3. バリデーション & 変換 → [`Settings`]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// TOML 文字列から設定を読み込む
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let dto: SettingsDto = toml::from_str(toml)?;
        Self::try_from(dto)
    }

    /// 空でないトークンが与えられた場合に上書きする
    pub fn with_token_override(mut self, token: Option<String>) -> Self {
        if let Some(token) = token.filter(|token| !token.trim().is_empty()) {
            self.inference.token = Some(token);
        }
        self
    }

    pub fn inference(&self) -> &InferenceSettings {
        &self.inference
    }

    pub fn engine(&self) -> &EngineSettings {
        &self.engine
    }

    pub fn paths(&self) -> &PathSettings {
        &self.paths
    }

    pub fn logging(&self) -> &LoggingSettings {
        &self.logging
    }
}

/// DTO からドメインモデルへの変換（読み込み方向）
///
/// 省略された項目にはデフォルト値を使い、不正な値の場合は
/// [`ConfigError::Validation`] を返します。
impl TryFrom<SettingsDto> for Settings {
    type Error = ConfigError;

    fn try_from(dto: SettingsDto) -> Result<Self, Self::Error> {
        Ok(Self {
            inference: inference_from_dto(dto.inference)?,
            engine: engine_from_dto(dto.engine),
            paths: paths_from_dto(dto.paths),
            logging: logging_from_dto(dto.logging)?,
        })
    }
}

fn inference_from_dto(dto: InferenceDto) -> Result<InferenceSettings, ConfigError> {
    let defaults = InferenceSettings::default();

    let endpoint = dto.endpoint.unwrap_or(defaults.endpoint);
    if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
        return Err(ConfigError::Validation(format!(
            "inference.endpoint は http:// または https:// で始まる必要があります: {}",
            endpoint
        )));
    }

    let timeout = match dto.timeout_secs {
        Some(0) => {
            return Err(ConfigError::Validation(
                "inference.timeout_secs は1以上である必要があります".to_string(),
            ));
        }
        Some(secs) => Duration::from_secs(secs),
        None => defaults.timeout,
    };

    Ok(InferenceSettings {
        endpoint,
        token: dto.token.filter(|token| !token.trim().is_empty()),
        app_id: dto.app_id,
        timeout,
        add_context_from_internet: dto
            .add_context_from_internet
            .unwrap_or(defaults.add_context_from_internet),
    })
}

fn engine_from_dto(dto: EngineDto) -> EngineSettings {
    let defaults = EngineSettings::default();
    EngineSettings {
        strict_references: dto.strict_references.unwrap_or(defaults.strict_references),
        enforce_timeouts: dto.enforce_timeouts.unwrap_or(defaults.enforce_timeouts),
        retry_backoff: dto
            .retry_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_backoff),
        generate_report: dto.generate_report.unwrap_or(defaults.generate_report),
    }
}

fn paths_from_dto(dto: PathsDto) -> PathSettings {
    let defaults = PathSettings::default();
    PathSettings {
        workflows_dir: dto.workflows_dir.unwrap_or(defaults.workflows_dir),
        results_dir: dto.results_dir.unwrap_or(defaults.results_dir),
        schemas_dir: dto.schemas_dir.unwrap_or(defaults.schemas_dir),
    }
}

fn logging_from_dto(dto: LoggingDto) -> Result<LoggingSettings, ConfigError> {
    let level = match dto.level {
        Some(level) => Level::from_str(&level).map_err(|_| {
            ConfigError::Validation(format!(
                "logging.level が不正です（trace/debug/info/warn/error）: {}",
                level
            ))
        })?,
        None => Level::INFO,
    };
    let format = match dto.format {
        Some(format) => format.parse()?,
        None => LogFormat::default(),
    };

    Ok(LoggingSettings {
        level,
        format,
        file: dto.file,
    })
}
