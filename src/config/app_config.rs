//! # 网关配置结构定义

use super::SsoConfig;
use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// 根配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// 监听设置
    #[serde(default)]
    pub server: ServerConfig,
    /// 引擎配置
    #[serde(default)]
    pub gateway: EngineConfig,
    /// 上游目标，按路径前缀匹配
    pub proxies: Vec<ProxyConfig>,
    /// 认证插件配置
    #[serde(default)]
    pub sso: SsoConfig,
}

impl GatewayConfig {
    /// 校验 serde 无法校验的取值。
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(GatewayError::config("server.host must not be empty"));
        }

        if self.proxies.is_empty() {
            return Err(GatewayError::config("at least one [[proxies]] entry is required"));
        }

        for proxy in &self.proxies {
            proxy.validate()?;
        }

        if let Some(oauth) = &self.sso.oauth {
            Url::parse(&oauth.authorization_url).map_err(|e| {
                GatewayError::config_with_source(
                    format!("invalid sso.oauth.authorization_url: {}", oauth.authorization_url),
                    e,
                )
            })?;
        }

        Ok(())
    }
}

/// 监听配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,
    /// 监听端口，0 表示随机端口
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerConfig {
    /// 供 `TcpListener::bind` 使用的 `host:port`。
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8000
}

/// 管道引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 并发交换上限；缺省或 `<= 0` 表示不限制
    #[serde(default)]
    pub max_connections: Option<i64>,
    /// 进程标识，用作 `x-request-id` 前缀
    #[serde(default = "default_uid")]
    pub uid: String,
    /// 转发头开关
    #[serde(default)]
    pub headers: HeaderToggles,
}

impl EngineConfig {
    /// 非正值归一为不限制后的实际上限。
    #[must_use]
    pub fn connection_limit(&self) -> Option<usize> {
        self.max_connections
            .filter(|limit| *limit > 0)
            .and_then(|limit| usize::try_from(limit).ok())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_connections: None,
            uid: default_uid(),
            headers: HeaderToggles::default(),
        }
    }
}

fn default_uid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// 引擎写入哪些转发头，默认全部开启。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct HeaderToggles {
    /// 向 `x-forwarded-for` 追加客户端地址
    #[serde(rename = "x-forwarded-for", default = "enabled")]
    pub x_forwarded_for: bool,
    /// 向 `x-forwarded-host` 追加入站主机
    #[serde(rename = "x-forwarded-host", default = "enabled")]
    pub x_forwarded_host: bool,
    /// 向 `via` 追加 `"<version> <hostname>"`
    #[serde(default = "enabled")]
    pub via: bool,
    /// 将 `x-request-id` 设为 `"<uid>.<correlation id>"`
    #[serde(rename = "x-request-id", default = "enabled")]
    pub x_request_id: bool,
    /// 在 `x-response-time` 中报告上游耗时
    #[serde(rename = "x-response-time", default = "enabled")]
    pub x_response_time: bool,
}

impl Default for HeaderToggles {
    fn default() -> Self {
        Self {
            x_forwarded_for: true,
            x_forwarded_host: true,
            via: true,
            x_request_id: true,
            x_response_time: true,
        }
    }
}

const fn enabled() -> bool {
    true
}

/// 单个上游目标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// 路由到该目标的入站路径前缀，转发前去除
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// 上游基础地址
    pub url: String,
}

impl ProxyConfig {
    fn validate(&self) -> Result<()> {
        if !self.base_path.starts_with('/') {
            return Err(GatewayError::config(format!(
                "proxy base_path must start with '/': {}",
                self.base_path
            )));
        }

        let url = Url::parse(&self.url).map_err(|e| {
            GatewayError::config_with_source(format!("invalid proxy url: {}", self.url), e)
        })?;

        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(GatewayError::config(format!(
                "unsupported proxy scheme '{other}' in {}",
                self.url
            ))),
        }
    }
}

fn default_base_path() -> String {
    "/".to_string()
}
