//! HTTP 推論クライアント
//!
//! # 責務
//!
//! - 設定されたエンドポイントへ JSON を POST し、レスポンスを JSON として返す
//! - [`InferenceClient`] トレイトを実装
//! - HTTP ステータスを [`ProviderError`] に変換
//!
//! # リクエスト形式
//!
//! ```text
//! POST <endpoint>
//! Authorization: Bearer <token>
//! Content-Type: application/json
//! X-App-Id: <app_id>            (設定されている場合のみ)
//!
//! {"prompt": "...", "add_context_from_internet": true, "response_json_schema": {...}}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::config::{InferenceSettings, TOKEN_ENV};
use crate::error::ProviderError;
use super::traits::{InferenceClient, InferenceRequest};

/// HTTP 推論クライアント
pub struct HttpInferenceClient {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    app_id: Option<String>,
}

impl HttpInferenceClient {
    /// 新しいクライアントを生成
    ///
    /// # 引数
    ///
    /// - `endpoint`: POST 先の URL
    /// - `token`: Bearer トークン（未設定の場合は呼び出し時にエラー）
    /// - `timeout`: 1リクエストあたりのタイムアウト
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token,
            app_id: None,
        })
    }

    /// 設定から生成
    pub fn from_settings(settings: &InferenceSettings) -> Result<Self, ProviderError> {
        let mut client = Self::new(&settings.endpoint, settings.token.clone(), settings.timeout)?;
        client.app_id = settings.app_id.clone();
        Ok(client)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn invoke(&self, request: &InferenceRequest) -> Result<Value, ProviderError> {
        let token = self
            .token
            .as_deref()
            .ok_or(ProviderError::MissingToken(TOKEN_ENV))?;

        debug!(
            endpoint = %self.endpoint,
            prompt_len = request.prompt.len(),
            with_schema = request.response_json_schema.is_some(),
            "推論サービスを呼び出します"
        );

        let mut builder = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(request)?);
        if let Some(app_id) = &self.app_id {
            builder = builder.header("X-App-Id", app_id);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        serde_json::from_slice(&body).map_err(|e| {
            ProviderError::InvalidResponse(format!(
                "JSON として解釈できません: {}: {}",
                e,
                String::from_utf8_lossy(&body)
            ))
        })
    }
}

/// エラーステータスを [`ProviderError`] に変換する
///
/// ボディが `{"message": "..."}` の形ならそのメッセージを、
/// そうでなければステータスの標準的な理由句を使います。
fn status_error(status: StatusCode, body: &[u8]) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ProviderError::RateLimitExceeded;
    }

    let message = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string());

    ProviderError::Api {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_uses_body_message() {
        let err = status_error(StatusCode::UNAUTHORIZED, br#"{"message": "bad token"}"#);
        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "bad token");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn test_status_error_falls_back_to_reason() {
        let err = status_error(StatusCode::INTERNAL_SERVER_ERROR, b"<html>oops</html>");
        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "Internal Server Error");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn test_rate_limit() {
        let err = status_error(StatusCode::TOO_MANY_REQUESTS, b"");
        assert!(matches!(err, ProviderError::RateLimitExceeded));
    }

    #[tokio::test]
    async fn test_missing_token_fails_before_request() {
        let client =
            HttpInferenceClient::new("http://127.0.0.1:9/invoke", None, Duration::from_secs(1)).unwrap();
        let result = client.invoke(&InferenceRequest::new("hello")).await;

        assert!(matches!(result, Err(ProviderError::MissingToken(TOKEN_ENV))));
    }

    #[test]
    fn test_from_settings() {
        let settings = InferenceSettings::default();
        let client = HttpInferenceClient::from_settings(&settings).unwrap();
        assert_eq!(client.endpoint(), settings.endpoint);
    }
}
