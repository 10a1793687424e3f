//! # 配置管理模块
//!
//! 加载并校验 TOML 配置文件，向引擎和认证插件提供只读配置。

mod app_config;
mod sso_config;

pub use app_config::{EngineConfig, GatewayConfig, HeaderToggles, ProxyConfig, ServerConfig};
pub use sso_config::{CookieOptions, JwtOptions, OAuthStrategyConfig, SsoConfig};

use crate::error::{GatewayError, Result};
use std::path::Path;

/// 回调地址中的端口占位符，监听绑定后替换。
pub const PORT_PLACEHOLDER: &str = "XXXX";

/// 加载并校验 `path` 处的配置文件。
pub fn load_config(path: impl AsRef<Path>) -> Result<GatewayConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(GatewayError::config(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        GatewayError::config_with_source(
            format!("Failed to read configuration file: {}", path.display()),
            e,
        )
    })?;

    let config: GatewayConfig = toml::from_str(&content)?;
    config.validate()?;

    tracing::info!(
        path = %path.display(),
        proxies = config.proxies.len(),
        "configuration loaded"
    );

    Ok(config)
}
