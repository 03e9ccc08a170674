//! 推論サービス抽象化レイヤー
//!
//! # 責務
//!
//! - リモートの推論サービス（LLM）への単一リクエスト/レスポンス呼び出しを統一的に扱う
//! - 設定に応じたクライアントを生成するファクトリー機能
//!
//! # モジュール構成
//!
//! - `traits` - 共通インターフェース（[`InferenceClient`]トレイト等）
//! - `http` - HTTP(S) で JSON を POST するクライアント
//!
//! # 使用例
//!
//! ```rust,no_run
//! use mdflow::config::Settings;
//! use mdflow::provider::{create_provider, InferenceRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::load(None)?;
//!     let client = create_provider(settings.inference())?;
//!
//!     let response = client.invoke(&InferenceRequest::new("Explain SYN scanning in one sentence.")).await?;
//!     println!("{}", response);
//!     Ok(())
//! }
//! ```

pub mod traits;
pub mod http;

// 公開APIの再エクスポート
pub use traits::{InferenceClient, InferenceRequest};
pub use http::HttpInferenceClient;

use crate::config::InferenceSettings;
use crate::error::ProviderError;

/// 推論クライアントを生成するファクトリー関数
///
/// トークンの有無はここでは検査しません。未設定の場合は最初の呼び出しで
/// [`ProviderError::MissingToken`] が返されます。
///
/// # エラー
///
/// - [`ProviderError::Http`] - HTTP クライアントの初期化に失敗
pub fn create_provider(
    settings: &InferenceSettings,
) -> Result<Box<dyn InferenceClient>, ProviderError> {
    Ok(Box::new(HttpInferenceClient::from_settings(settings)?))
}
