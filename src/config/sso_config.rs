//! # 认证插件配置

use super::PORT_PLACEHOLDER;
use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// 回调地址无法解析时使用的默认回调路径。
pub const DEFAULT_CALLBACK_PATH: &str = "/auth/sso/callback";

/// `[sso]` 配置段
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SsoConfig {
    /// 内联的 PEM 校验密钥
    #[serde(default)]
    pub public_key: Option<String>,
    /// 启动时从磁盘读取的 PEM 校验密钥
    #[serde(default)]
    pub public_key_path: Option<PathBuf>,
    /// 令牌校验选项
    #[serde(default)]
    pub jwt: JwtOptions,
    /// OAuth2 认证服务
    #[serde(default)]
    pub oauth: Option<OAuthStrategyConfig>,
    /// 凭证 cookie 属性
    #[serde(default)]
    pub cookies: CookieOptions,
}

impl SsoConfig {
    /// 从内联值或密钥文件解析校验密钥。
    pub fn resolve_public_key(&self) -> Result<String> {
        if let Some(key) = self.public_key.as_ref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.clone());
        }

        match &self.public_key_path {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                GatewayError::config_with_source(
                    format!("Failed to read public key: {}", path.display()),
                    e,
                )
            }),
            None => Err(GatewayError::config("public_key is required")),
        }
    }

    /// OAuth2 配置，缺失时返回 "required" 错误。
    pub fn oauth(&self) -> Result<&OAuthStrategyConfig> {
        self.oauth
            .as_ref()
            .ok_or_else(|| GatewayError::config("oauth is required"))
    }
}

/// `[sso.jwt]` 校验选项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtOptions {
    /// 允许的签名算法
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<String>,
    /// 要求的 `aud` 声明
    #[serde(default)]
    pub audience: Option<String>,
    /// 要求的 `iss` 声明
    #[serde(default)]
    pub issuer: Option<String>,
    /// 接受过期令牌
    #[serde(default)]
    pub ignore_expiration: bool,
    /// 时钟偏差容忍秒数
    #[serde(default)]
    pub leeway_secs: u64,
}

impl Default for JwtOptions {
    fn default() -> Self {
        Self {
            algorithms: default_algorithms(),
            audience: None,
            issuer: None,
            ignore_expiration: false,
            leeway_secs: 0,
        }
    }
}

fn default_algorithms() -> Vec<String> {
    vec!["RS256".to_string()]
}

/// `[sso.oauth]` 授权码认证服务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthStrategyConfig {
    /// 认证服务授权端点
    pub authorization_url: String,
    /// 认证服务令牌端点
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// 在认证服务登记的回调地址，端口可写作 `XXXX`
    pub callback_url: String,
    /// 请求的 scope
    #[serde(default)]
    pub scope: Option<String>,
    /// 写入令牌端点 Basic 认证头的凭证
    #[serde(default = "default_basic_auth_template")]
    pub basic_auth_template: String,
    /// 令牌端点超时
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl OAuthStrategyConfig {
    /// 将实际端口代入回调地址占位符。
    pub fn bind_port(&mut self, port: u16) {
        if self.callback_url.contains(PORT_PLACEHOLDER) {
            self.callback_url = self
                .callback_url
                .replace(PORT_PLACEHOLDER, &port.to_string());
        }
    }

    /// 回调地址的路径部分，即插件拦截的路由。
    #[must_use]
    pub fn callback_path(&self) -> String {
        let candidate = self.callback_url.replace(PORT_PLACEHOLDER, "0");
        Url::parse(&candidate)
            .ok()
            .map(|url| url.path().to_string())
            .filter(|path| path != "/")
            .unwrap_or_else(|| DEFAULT_CALLBACK_PATH.to_string())
    }

    /// 按模板生成 Basic 认证凭证。
    #[must_use]
    pub fn basic_auth_credentials(&self) -> String {
        self.basic_auth_template
            .replace("{client_id}", &self.client_id)
            .replace("{client_secret}", &self.client_secret)
    }
}

fn default_basic_auth_template() -> String {
    "{client_id}:{client_secret}".to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

/// `[sso.cookies]` 凭证 cookie 属性
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieOptions {
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_http_only")]
    pub http_only: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: default_cookie_path(),
            domain: None,
            secure: false,
            http_only: true,
        }
    }
}

fn default_cookie_path() -> String {
    "/".to_string()
}

const fn default_http_only() -> bool {
    true
}
