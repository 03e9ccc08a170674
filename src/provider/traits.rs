//! 推論サービスの共通インターフェース定義
//!
//! # 責務
//!
//! - 推論クライアントの共通トレイト [`InferenceClient`] を定義
//! - リクエスト型 [`InferenceRequest`] を提供
//!
//! レスポンスはサービスが返した JSON をそのまま [`serde_json::Value`] として扱います。
//!
//! # 使用例
//!
//! ```rust,no_run
//! use mdflow::provider::{InferenceClient, InferenceRequest};
//!
//! async fn example(client: &dyn InferenceClient) {
//!     let request = InferenceRequest::new("Summarize common DNS misconfigurations.")
//!         .with_internet_context(true);
//!
//!     let response = client.invoke(&request).await.unwrap();
//!     println!("{}", response);
//! }
//! ```

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::ProviderError;

/// 推論サービスの共通インターフェース
///
/// # 実装要件
///
/// - `Send + Sync`: ワーカーから並行に呼び出されます
/// - 非同期実行対応（`async_trait`を使用）
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// プロンプトを送信し、JSON レスポンスを取得する
    ///
    /// # エラー
    ///
    /// - [`ProviderError::MissingToken`] - トークン未設定
    /// - [`ProviderError::Http`] - 通信失敗
    /// - [`ProviderError::Api`] - サービスがエラーステータスを返した
    /// - [`ProviderError::RateLimitExceeded`] - レート制限超過
    /// - [`ProviderError::InvalidResponse`] - レスポンスが JSON でない
    async fn invoke(&self, request: &InferenceRequest) -> Result<Value, ProviderError>;
}

/// 推論リクエスト
///
/// シリアライズした形がそのままリクエストボディになります。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceRequest {
    pub prompt: String,
    pub add_context_from_internet: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_json_schema: Option<Value>,
}

impl InferenceRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            add_context_from_internet: false,
            response_json_schema: None,
        }
    }

    pub fn with_internet_context(mut self, enabled: bool) -> Self {
        self.add_context_from_internet = enabled;
        self
    }

    /// レスポンスの形を指定する JSON スキーマ
    pub fn with_schema(mut self, schema: Option<Value>) -> Self {
        self.response_json_schema = schema;
        self
    }
}
