//! # OAuth2 客户端策略
//!
//! 面向单个认证服务的授权码流程：构造授权跳转地址，
//! 并向令牌端点发起授权码和刷新令牌请求。

use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::OAuthStrategyConfig;
use crate::error::{GatewayError, Result};

/// 令牌端点错误
#[derive(Debug, Error)]
pub enum OAuthError {
    /// 认证服务返回 OAuth 错误，如 `invalid_grant`
    #[error("token request rejected ({status}): {error}")]
    Rejected {
        status: StatusCode,
        error: String,
        description: Option<String>,
    },
    /// 无法连接认证服务
    #[error("token endpoint unreachable: {0}")]
    Network(#[source] reqwest::Error),
    /// 认证服务失败且没有 OAuth 错误体
    #[error("token endpoint failed ({status}): {body}")]
    Provider { status: StatusCode, body: String },
    /// 成功响应但不是令牌响应
    #[error("malformed token response: {0}")]
    Malformed(String),
}

impl OAuthError {
    /// 认证服务明确拒绝授权时为 `true`。
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// 令牌端点成功响应
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// OAuth2 授权码策略
#[derive(Debug, Clone)]
pub struct OAuthStrategy {
    http_client: Client,
    config: OAuthStrategyConfig,
    authorization_url: Url,
    basic_auth: String,
}

impl OAuthStrategy {
    pub fn new(config: &OAuthStrategyConfig) -> Result<Self> {
        let authorization_url = Url::parse(&config.authorization_url).map_err(|e| {
            GatewayError::config_with_source(
                format!("invalid authorization_url: {}", config.authorization_url),
                e,
            )
        })?;
        Url::parse(&config.token_url).map_err(|e| {
            GatewayError::config_with_source(format!("invalid token_url: {}", config.token_url), e)
        })?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::config_with_source("Failed to build OAuth client", e))?;

        Ok(Self {
            http_client,
            authorization_url,
            basic_auth: format!("Basic {}", STANDARD.encode(config.basic_auth_credentials())),
            config: config.clone(),
        })
    }

    /// 认证服务回跳的路径。
    #[must_use]
    pub fn callback_path(&self) -> String {
        self.config.callback_path()
    }

    /// 认证服务跳转地址，`state` 携带重启目标。
    #[must_use]
    pub fn authorization_url(&self, state: Option<&str>) -> String {
        let mut url = self.authorization_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.extend_pairs([
                ("response_type", "code"),
                ("redirect_uri", self.config.callback_url.as_str()),
                ("client_id", self.config.client_id.as_str()),
            ]);
            if let Some(scope) = &self.config.scope {
                query.append_pair("scope", scope);
            }
            if let Some(state) = state {
                query.append_pair("state", state);
            }
        }
        url.into()
    }

    /// 用授权码换取令牌。
    pub async fn exchange_code(&self, code: &str) -> std::result::Result<TokenResponse, OAuthError> {
        self.request_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.callback_url.as_str()),
        ])
        .await
    }

    /// 用刷新令牌换取新的令牌对。
    pub async fn refresh(
        &self,
        refresh_token: &str,
    ) -> std::result::Result<TokenResponse, OAuthError> {
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn request_token(
        &self,
        grant: &[(&str, &str)],
    ) -> std::result::Result<TokenResponse, OAuthError> {
        let mut params = grant.to_vec();
        params.push(("client_id", self.config.client_id.as_str()));
        params.push(("client_secret", self.config.client_secret.as_str()));

        let response = self
            .http_client
            .post(&self.config.token_url)
            .header(header::AUTHORIZATION, &self.basic_auth)
            .header(header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(OAuthError::Network)?;

        let status = response.status();
        let body = response.text().await.map_err(OAuthError::Network)?;

        if !status.is_success() {
            return Err(parse_error_response(status, body));
        }

        parse_token_response(&body)
    }
}

fn parse_error_response(status: StatusCode, body: String) -> OAuthError {
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(err) if status.is_client_error() => OAuthError::Rejected {
            status,
            error: err.error,
            description: err.error_description,
        },
        _ => OAuthError::Provider { status, body },
    }
}

fn parse_token_response(body: &str) -> std::result::Result<TokenResponse, OAuthError> {
    let token: TokenResponse =
        serde_json::from_str(body).map_err(|e| OAuthError::Malformed(e.to_string()))?;

    if token.access_token.is_empty() {
        return Err(OAuthError::Malformed("empty access_token".to_string()));
    }
    Ok(token)
}

impl From<OAuthError> for GatewayError {
    fn from(err: OAuthError) -> Self {
        Self::upstream_unavailable_with_source(format!("OAuth2 token request failed: {err}"), err)
    }
}
