//! エラー型の定義
//!
//! このモジュールは、mdflow 全体で使用されるエラー型を定義します。
//! ジョブ実行時のエラーは [`crate::engine::result::ExecutionError`] を参照してください。

use std::path::PathBuf;

use thiserror::Error;

/// 設定関連のエラー
#[derive(Debug, Error)]
pub enum ConfigError {
    /// ファイルの読み込みに失敗
    #[error("設定ファイルの読み込みに失敗しました: {0}")]
    FileRead(#[from] std::io::Error),

    /// TOML のデシリアライズに失敗
    #[error("TOML のデシリアライズに失敗しました: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    /// バリデーションエラー
    #[error("設定のバリデーションに失敗しました: {0}")]
    Validation(String),
}

/// 推論サービス（リモートLLM）呼び出しのエラー
#[derive(Debug, Error)]
pub enum ProviderError {
    /// トークン未設定
    #[error("APIトークンが設定されていません（設定ファイルの inference.token または環境変数 {0}）")]
    MissingToken(&'static str),

    /// HTTP通信の失敗（接続不可、タイムアウト等）
    #[error("推論サービスとの通信に失敗しました: {0}")]
    Http(#[from] reqwest::Error),

    /// サービスがエラーステータスを返した
    #[error("推論サービスがエラーを返しました: {status} - {message}")]
    Api {
        /// HTTPステータスコード
        status: u16,
        /// サービスが返したメッセージ
        message: String,
    },

    /// レート制限超過
    #[error("レート制限を超えました")]
    RateLimitExceeded,

    /// 不正なレスポンス
    #[error("不正なレスポンス: {0}")]
    InvalidResponse(String),

    /// JSONの変換に失敗
    #[error("JSONの変換に失敗しました: {0}")]
    Json(#[from] serde_json::Error),

    /// スキーマファイル等の読み込みに失敗
    #[error("ファイルの読み込みに失敗しました: {0}")]
    Io(#[from] std::io::Error),
}

/// ワークフロー定義ファイルのパースエラー
///
/// パーサーは内容に対して寛容なため、このエラーは
/// ファイル自体が読めない場合にのみ発生します。
#[derive(Debug, Error)]
pub enum ParseError {
    /// ファイルの読み込みに失敗（存在しない、UTF-8でない等）
    #[error("ワークフローファイルを読み込めません: {path}: {source}")]
    Unreadable {
        /// 対象ファイルのパス
        path: PathBuf,
        /// 元のI/Oエラー
        #[source]
        source: std::io::Error,
    },
}

/// ワークフロー読み込み時のエラー
///
/// いずれのエラーもジョブが作成される前に発生します。
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// パースに失敗
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// バリデーションに失敗（未知の依存関係、循環依存、必須フィールドの欠落等）
    #[error("ワークフローのバリデーションに失敗しました: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// 結果ファイルの保存エラー
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// ディレクトリ作成やファイル書き込みに失敗
    #[error("結果ファイルを保存できません: {0}")]
    Io(#[from] std::io::Error),

    /// JSONの変換に失敗
    #[error("結果をJSONに変換できません: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_joins_messages() {
        let err = WorkflowError::Validation(vec![
            "タスクがありません".to_string(),
            "循環依存が検出されました".to_string(),
        ]);

        assert_eq!(
            err.to_string(),
            "ワークフローのバリデーションに失敗しました: タスクがありません; 循環依存が検出されました"
        );
    }

    #[test]
    fn test_api_error_message() {
        let err = ProviderError::Api {
            status: 401,
            message: "Unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "推論サービスがエラーを返しました: 401 - Unauthorized");
    }
}
